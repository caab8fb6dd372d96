//! Persistence core for geodata snapshot synchronization.
//!
//! Keeps long-lived PostgreSQL tables in lockstep with the latest
//! upstream snapshot through a staged upsert-and-scoped-delete protocol,
//! and records per-table and per-asset freshness in a metadata registry.
//!
//! One [`SinkDb::sync_run`] is all-or-nothing: staging, the three-phase
//! merge, staging cleanup and the metadata upserts execute on a single
//! transaction guarded by a table-scoped advisory lock. A failed run
//! rolls back completely — the target table is never observable
//! half-merged and stale metadata never claims success.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use snapshots::Snapshot;
use tracing::instrument;

mod db;
mod error;
pub mod metadata;
pub mod sql;
pub mod staging;
pub mod synchronize;

use self::db::ConnPool;
pub use self::{
    db::{ConnError, Executor, Transaction},
    error::Error,
    metadata::{AssetRecord, MetadataRecord},
    staging::StagedTable,
    synchronize::SUBDIVISION_COLUMN,
};

/// Default pool size for the sink DB.
pub const DEFAULT_POOL_SIZE: u32 = 10;

pub(crate) mod _priv {
    pub trait Sealed {}
}

/// A target table, identified by `(schema, name)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TargetTable<'a> {
    pub schema: &'a str,
    pub table: &'a str,
}

impl std::fmt::Display for TargetTable<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Provenance recorded alongside a sync run.
#[derive(Debug, Copy, Clone)]
pub struct RunMetadata<'a> {
    /// Collection identifier, e.g. `byggnader/byggnad`.
    pub collection: &'a str,
    /// Display name of the layer.
    pub name: &'a str,
    /// Provider name, e.g. `Lantmäteriet`.
    pub provider: &'a str,
    /// The snapshot's reported remote-updated time.
    pub remote_updated: Option<DateTime<Utc>>,
    /// Remote item that contributed this snapshot, when the dataset is
    /// delivered per-region.
    pub item: Option<&'a str>,
}

/// Parameters of one sync run.
#[derive(Debug, Copy, Clone)]
pub struct SyncRun<'a> {
    pub target: TargetTable<'a>,
    /// Schema holding the ephemeral staging table.
    pub staging_schema: &'a str,
    pub snapshot: &'a Snapshot,
    /// Tag scoping this run's deletes; `None` means full-table replace
    /// semantics.
    pub subdivision: Option<&'a str>,
    pub metadata: RunMetadata<'a>,
}

/// Connection pool to the sink DB. Clones refer to the same instance.
#[derive(Debug, Clone)]
pub struct SinkDb {
    pool: ConnPool,
    url: Arc<str>,
}

impl SinkDb {
    /// Sets up a connection pool to the sink DB.
    #[instrument(skip_all, err)]
    pub async fn connect(url: &str, pool_size: u32) -> Result<Self, Error> {
        let pool = ConnPool::connect(url, pool_size).await?;
        Ok(Self {
            pool,
            url: url.into(),
        })
    }

    /// The underlying sqlx pool, for callers that need to run their own
    /// queries (tests, dashboards).
    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Begins a transaction with RAII rollback semantics.
    pub async fn begin(&self) -> Result<Transaction, Error> {
        let tx = self.pool.begin().await?;
        Ok(Transaction::new(tx))
    }

    /// Idempotently prepares the data and staging schemas plus the
    /// metadata registry. Called once at startup.
    #[instrument(skip(self), err)]
    pub async fn ensure_schemas(
        &self,
        data_schema: &str,
        staging_schema: &str,
    ) -> Result<(), Error> {
        for schema in [data_schema, staging_schema] {
            sql::validate_identifier(schema).map_err(|source| Error::InvalidIdentifier {
                identifier: schema.to_owned(),
                source,
            })?;
            let ddl = format!("CREATE SCHEMA IF NOT EXISTS {}", sql::quote(schema));
            sqlx::query(&ddl).execute(self.pool()).await?;
        }
        metadata::ensure_registry(self.pool(), data_schema).await?;
        Ok(())
    }

    /// Executes one sync run: stage → merge → cleanup → metadata, all on
    /// one transaction.
    ///
    /// Concurrent runs against the same target are serialized by a
    /// transaction-scoped advisory lock on the qualified table name;
    /// runs against different tables (or the same table under different
    /// subdivision tags, which this lock intentionally also serializes
    /// because they share a staging name) do not otherwise coordinate.
    ///
    /// Returns the number of staged rows now present in the target.
    #[instrument(
        skip(self, run),
        fields(target = %run.target, subdivision = run.subdivision),
        err
    )]
    pub async fn sync_run(&self, run: SyncRun<'_>) -> Result<u64, Error> {
        let mut tx = self.begin().await?;

        lock_table(&mut tx, run.target).await?;

        let staged =
            staging::stage(&mut tx, run.staging_schema, run.target.table, run.snapshot).await?;
        let rows = synchronize::synchronize(&mut tx, run.target, &staged, run.subdivision).await?;
        staging::drop_staged(&mut tx, &staged).await?;

        // Metadata commits together with the merge, never before: a
        // failed merge must not leave freshness claiming success.
        let table_name = run.target.table;
        metadata::upsert_metadata(
            &mut tx,
            run.target.schema,
            table_name,
            run.metadata.collection,
            run.metadata.name,
            run.metadata.provider,
            run.metadata.remote_updated,
        )
        .await?;
        if let Some(item) = run.metadata.item {
            metadata::upsert_asset(
                &mut tx,
                run.target.schema,
                table_name,
                item,
                run.metadata.remote_updated,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(rows)
    }
}

/// Takes the advisory lock serializing runs against one target table.
///
/// Transaction-scoped, so it is released on commit and rollback alike.
async fn lock_table(tx: &mut Transaction, target: TargetTable<'_>) -> Result<(), Error> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(target.to_string())
        .execute(&mut *tx)
        .await?;
    Ok(())
}
