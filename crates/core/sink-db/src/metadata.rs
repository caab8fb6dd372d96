//! Metadata Registry
//!
//! Per-table provenance and freshness bookkeeping, plus per-asset
//! freshness for every remote item contributing to a table. The registry
//! never gates synchronization; it exists for external consumers —
//! schedulers deciding whether a re-fetch is warranted and dashboards
//! reporting freshness.
//!
//! Upserts are insert-or-overwrite-on-conflict. There is deliberately no
//! monotonic guard on `last_updated`: a re-run with older remote data
//! overwrites a newer recorded value.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::{db::Executor, error::Error, sql};

/// One registry row: provenance and freshness for a target table.
#[derive(Debug, Clone, FromRow)]
pub struct MetadataRecord {
    pub table: String,
    pub collection: String,
    pub name: String,
    pub provider: String,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Freshness of one remote item contributing to a target table.
#[derive(Debug, Clone, FromRow)]
pub struct AssetRecord {
    pub table: String,
    pub item: String,
    pub remote_updated: Option<DateTime<Utc>>,
}

/// Idempotently creates the registry tables in `schema`.
///
/// Runtime DDL rather than static migrations: the registry lives in a
/// configurable schema, which migration files cannot be parameterized by.
#[tracing::instrument(skip(pool), err)]
pub async fn ensure_registry(pool: &sqlx::PgPool, schema: &str) -> Result<(), Error> {
    checked(schema)?;
    let schema = sql::quote(schema);

    let metadata_ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.metadata (
            "table" TEXT NOT NULL PRIMARY KEY,
            collection TEXT NOT NULL,
            "name" TEXT NOT NULL,
            "provider" TEXT NOT NULL,
            last_updated TIMESTAMP WITH TIME ZONE
        )
        "#
    );
    sqlx::query(&metadata_ddl).execute(pool).await?;

    let assets_ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {schema}.metadata_assets (
            "table" TEXT NOT NULL REFERENCES {schema}.metadata ("table"),
            item TEXT NOT NULL,
            remote_updated TIMESTAMP WITH TIME ZONE,
            PRIMARY KEY ("table", item)
        )
        "#
    );
    sqlx::query(&assets_ddl).execute(pool).await?;

    Ok(())
}

/// Upserts the metadata record for a target table.
///
/// On conflict the freshness (and display fields) are overwritten, never
/// accumulated.
#[tracing::instrument(skip(exe), err)]
pub async fn upsert_metadata<'c, E>(
    exe: E,
    schema: &str,
    table: &str,
    collection: &str,
    name: &str,
    provider: &str,
    last_updated: Option<DateTime<Utc>>,
) -> Result<(), Error>
where
    E: Executor<'c>,
{
    checked(schema)?;
    let query = format!(
        r#"
        INSERT INTO {}.metadata ("table", collection, "name", "provider", last_updated)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT ("table") DO UPDATE SET
            collection = EXCLUDED.collection,
            "name" = EXCLUDED."name",
            "provider" = EXCLUDED."provider",
            last_updated = EXCLUDED.last_updated
        "#,
        sql::quote(schema)
    );

    sqlx::query(&query)
        .bind(table)
        .bind(collection)
        .bind(name)
        .bind(provider)
        .bind(last_updated)
        .execute(exe)
        .await?;

    Ok(())
}

/// Upserts the freshness record for one remote item contributing to a
/// target table.
#[tracing::instrument(skip(exe), err)]
pub async fn upsert_asset<'c, E>(
    exe: E,
    schema: &str,
    table: &str,
    item: &str,
    remote_updated: Option<DateTime<Utc>>,
) -> Result<(), Error>
where
    E: Executor<'c>,
{
    checked(schema)?;
    let query = format!(
        r#"
        INSERT INTO {}.metadata_assets ("table", item, remote_updated)
        VALUES ($1, $2, $3)
        ON CONFLICT ("table", item) DO UPDATE SET remote_updated = EXCLUDED.remote_updated
        "#,
        sql::quote(schema)
    );

    sqlx::query(&query)
        .bind(table)
        .bind(item)
        .bind(remote_updated)
        .execute(exe)
        .await?;

    Ok(())
}

/// Fetches the metadata record for a target table, if one exists.
#[tracing::instrument(skip(exe), err)]
pub async fn get_metadata<'c, E>(
    exe: E,
    schema: &str,
    table: &str,
) -> Result<Option<MetadataRecord>, Error>
where
    E: Executor<'c>,
{
    checked(schema)?;
    let query = format!(
        r#"
        SELECT "table", collection, "name", "provider", last_updated
        FROM {}.metadata
        WHERE "table" = $1
        "#,
        sql::quote(schema)
    );

    let record = sqlx::query_as(&query).bind(table).fetch_optional(exe).await?;
    Ok(record)
}

/// Fetches the asset record for one (table, item) pair, if one exists.
#[tracing::instrument(skip(exe), err)]
pub async fn get_asset<'c, E>(
    exe: E,
    schema: &str,
    table: &str,
    item: &str,
) -> Result<Option<AssetRecord>, Error>
where
    E: Executor<'c>,
{
    checked(schema)?;
    let query = format!(
        r#"
        SELECT "table", item, remote_updated
        FROM {}.metadata_assets
        WHERE "table" = $1 AND item = $2
        "#,
        sql::quote(schema)
    );

    let record = sqlx::query_as(&query)
        .bind(table)
        .bind(item)
        .fetch_optional(exe)
        .await?;
    Ok(record)
}

fn checked(identifier: &str) -> Result<(), Error> {
    sql::validate_identifier(identifier).map_err(|source| Error::InvalidIdentifier {
        identifier: identifier.to_owned(),
        source,
    })
}
