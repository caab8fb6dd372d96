//! Table Synchronizer
//!
//! The core reconciliation algorithm: merges a staged snapshot into its
//! permanent target table.
//!
//! - **Bootstrap** (target absent): the target is created as a
//!   structural copy of the staged table, the identity column becomes
//!   the primary key, and — when subdivision scoping is used — every row
//!   is stamped with the run's tag and the tag column is indexed.
//! - **Reconcile** (target present): a three-phase merge keyed on
//!   identity. Matched rows are fully overwritten, unmatched source rows
//!   inserted, unmatched target rows deleted — scoped to the run's
//!   subdivision tag when one is given, unconditionally otherwise.
//!
//! All statements run on the caller's transaction; the merge is never
//! observable half-applied.

use crate::{db::Transaction, error::Error, sql, staging::StagedTable, TargetTable};

/// Reserved column holding the subdivision tag on scoped target tables.
pub const SUBDIVISION_COLUMN: &str = "_subdivision";

/// Merges the staged snapshot into the target table.
///
/// Returns the number of staged rows now present in the target. The
/// caller owns the transaction; nothing is committed here.
#[tracing::instrument(
    skip(tx, staged),
    fields(staged_rows = staged.row_count()),
    err
)]
pub async fn synchronize(
    tx: &mut Transaction,
    target: TargetTable<'_>,
    staged: &StagedTable,
    subdivision: Option<&str>,
) -> Result<u64, Error> {
    checked(target.schema)?;
    checked(target.table)?;

    let exists = table_exists(tx, target).await?;
    if exists {
        reconcile(tx, target, staged, subdivision).await?;
    } else {
        bootstrap(tx, target, staged, subdivision).await?;
    }

    Ok(staged.row_count())
}

async fn table_exists(tx: &mut Transaction, target: TargetTable<'_>) -> Result<bool, Error> {
    let query = indoc::indoc! {"
        SELECT EXISTS(
            SELECT 1 FROM information_schema.tables
            WHERE table_schema = $1 AND table_name = $2
        )
    "};

    let exists: bool = sqlx::query_scalar(query)
        .bind(target.schema)
        .bind(target.table)
        .fetch_one(&mut *tx)
        .await?;
    Ok(exists)
}

/// Creates the target as a structural copy of the staged table.
async fn bootstrap(
    tx: &mut Transaction,
    target: TargetTable<'_>,
    staged: &StagedTable,
    subdivision: Option<&str>,
) -> Result<(), Error> {
    tracing::info!(table = %target, "creating new target table");

    let target_name = sql::qualified(target.schema, target.table);
    let staged_name = staged.qualified();

    // CREATE TABLE AS is a utility statement and rejects bind
    // parameters, so the tag goes in as a quoted literal.
    let ctas = match subdivision {
        Some(tag) => format!(
            "CREATE TABLE {} AS SELECT *, CAST({} AS TEXT) AS {} FROM {}",
            target_name,
            sql::literal(tag),
            SUBDIVISION_COLUMN,
            staged_name
        ),
        None => format!("CREATE TABLE {} AS SELECT * FROM {}", target_name, staged_name),
    };
    sqlx::query(&ctas).execute(&mut *tx).await?;

    let add_pk = format!(
        "ALTER TABLE {} ADD PRIMARY KEY ({})",
        target_name,
        sql::quote(staged.identity_column())
    );
    sqlx::query(&add_pk).execute(&mut *tx).await?;

    if subdivision.is_some() {
        // Supports the scoped delete predicate on later runs.
        let index = format!("CREATE INDEX ON {} ({})", target_name, SUBDIVISION_COLUMN);
        sqlx::query(&index).execute(&mut *tx).await?;
    }

    Ok(())
}

/// Three-phase merge into an existing target.
async fn reconcile(
    tx: &mut Transaction,
    target: TargetTable<'_>,
    staged: &StagedTable,
    subdivision: Option<&str>,
) -> Result<(), Error> {
    check_schema_compatibility(tx, target, staged, subdivision).await?;

    let target_name = sql::qualified(target.schema, target.table);
    let staged_name = staged.qualified();
    let identity = sql::quote(staged.identity_column());

    let column_names: Vec<&str> = staged.columns().iter().map(|c| c.name.as_str()).collect();
    let non_key: Vec<&str> = column_names
        .iter()
        .copied()
        .filter(|name| *name != staged.identity_column())
        .collect();

    // Phase 1: full-row overwrite of every matched identity.
    if !non_key.is_empty() {
        let update = update_sql(&target_name, &staged_name, &identity, &non_key);
        let result = sqlx::query(&update).execute(&mut *tx).await?;
        tracing::debug!(rows = result.rows_affected(), "merge_updated");
    }

    // Phase 2: insert every identity present only in the source.
    let insert = insert_sql(
        &target_name,
        &staged_name,
        &identity,
        &column_names,
        subdivision.is_some(),
    );
    let mut insert_query = sqlx::query(&insert);
    if let Some(tag) = subdivision {
        insert_query = insert_query.bind(tag);
    }
    let result = insert_query.execute(&mut *tx).await?;
    tracing::debug!(rows = result.rows_affected(), "merge_inserted");

    // Phase 3: delete identities absent from the source — only within
    // this run's subdivision when scoping is on. Rows tagged with a
    // different subdivision are never touched.
    let delete = delete_sql(&target_name, &staged_name, &identity, subdivision.is_some());
    let mut delete_query = sqlx::query(&delete);
    if let Some(tag) = subdivision {
        delete_query = delete_query.bind(tag);
    }
    let result = delete_query.execute(&mut *tx).await?;
    tracing::debug!(rows = result.rows_affected(), "merge_deleted");

    Ok(())
}

/// Fails with [`Error::SchemaMismatch`] unless every staged column (and,
/// for scoped runs, the subdivision column) exists in the target.
///
/// Column-set drift between runs is rejected, not auto-migrated; a
/// structurally different target requires an explicit migration step.
async fn check_schema_compatibility(
    tx: &mut Transaction,
    target: TargetTable<'_>,
    staged: &StagedTable,
    subdivision: Option<&str>,
) -> Result<(), Error> {
    let query = indoc::indoc! {"
        SELECT column_name
        FROM information_schema.columns
        WHERE table_schema = $1 AND table_name = $2
    "};

    let target_columns: Vec<String> = sqlx::query_scalar(query)
        .bind(target.schema)
        .bind(target.table)
        .fetch_all(&mut *tx)
        .await?;

    let mut missing: Vec<String> = staged
        .columns()
        .iter()
        .filter(|c| !target_columns.iter().any(|t| t == &c.name))
        .map(|c| c.name.clone())
        .collect();

    if subdivision.is_some() && !target_columns.iter().any(|t| t == SUBDIVISION_COLUMN) {
        missing.push(SUBDIVISION_COLUMN.to_owned());
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(Error::SchemaMismatch {
            table: target.table.to_owned(),
            missing,
        })
    }
}

fn update_sql(target: &str, staged: &str, identity: &str, non_key: &[&str]) -> String {
    let assignments: Vec<String> = non_key
        .iter()
        .map(|name| {
            let quoted = sql::quote(name);
            format!("{quoted} = source.{quoted}")
        })
        .collect();

    format!(
        "UPDATE {target} AS target SET {} FROM {staged} AS source \
         WHERE target.{identity} = source.{identity}",
        assignments.join(", ")
    )
}

fn insert_sql(
    target: &str,
    staged: &str,
    identity: &str,
    columns: &[&str],
    scoped: bool,
) -> String {
    let mut column_list: Vec<String> = columns.iter().map(|name| sql::quote(name)).collect();
    let mut select_list: Vec<String> = columns
        .iter()
        .map(|name| format!("source.{}", sql::quote(name)))
        .collect();
    if scoped {
        column_list.push(SUBDIVISION_COLUMN.to_owned());
        select_list.push("$1".to_owned());
    }

    format!(
        "INSERT INTO {target} ({}) SELECT {} FROM {staged} AS source \
         WHERE NOT EXISTS (SELECT 1 FROM {target} AS target \
         WHERE target.{identity} = source.{identity})",
        column_list.join(", "),
        select_list.join(", ")
    )
}

fn delete_sql(target: &str, staged: &str, identity: &str, scoped: bool) -> String {
    let scope_predicate = if scoped {
        format!("target.{SUBDIVISION_COLUMN} = $1 AND ")
    } else {
        String::new()
    };

    format!(
        "DELETE FROM {target} AS target WHERE {scope_predicate}\
         NOT EXISTS (SELECT 1 FROM {staged} AS source \
         WHERE source.{identity} = target.{identity})"
    )
}

fn checked(identifier: &str) -> Result<(), Error> {
    sql::validate_identifier(identifier).map_err(|source| Error::InvalidIdentifier {
        identifier: identifier.to_owned(),
        source,
    })
}
