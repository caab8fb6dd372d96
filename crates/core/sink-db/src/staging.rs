//! Snapshot Stager
//!
//! Lands an incoming snapshot in an ephemeral staging table scoped to the
//! same base name as the eventual target. Re-staging under the same name
//! fully replaces prior staged content.
//!
//! Staging always happens inside the run's transaction: if the run fails
//! anywhere, rolling back removes the staged table, so no orphaned
//! staging tables can accumulate.

use snapshots::{Column, ColumnType, Snapshot, Value};
use sqlx::{postgres::PgArguments, query::Query, Postgres};

use crate::{
    db::{Executor, Transaction},
    error::Error,
    sql,
};

/// Rows per INSERT statement. PostgreSQL caps bind parameters at 65535
/// per statement; the chunk size is derived from the column count so a
/// wide layer never exceeds it.
const MAX_BIND_PARAMS: usize = 60_000;

/// Handle to a successfully staged snapshot.
///
/// Carries the staged table's identity and column layout; the
/// synchronizer derives its merge column lists from here.
#[derive(Debug)]
pub struct StagedTable {
    schema: String,
    table: String,
    identity_column: String,
    columns: Vec<Column>,
    row_count: u64,
}

impl StagedTable {
    /// Quoted `schema.table` of the staging relation.
    pub fn qualified(&self) -> String {
        sql::qualified(&self.schema, &self.table)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn identity_column(&self) -> &str {
        &self.identity_column
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }
}

/// Stages a snapshot into `{staging_schema}.{table}`.
///
/// Fails with [`Error::MissingIdentity`] if the snapshot declares no
/// identity column; every synchronizable layer must have one.
#[tracing::instrument(skip(tx, snapshot), fields(rows = snapshot.rows.len()), err)]
pub async fn stage(
    tx: &mut Transaction,
    staging_schema: &str,
    table: &str,
    snapshot: &Snapshot,
) -> Result<StagedTable, Error> {
    let identity_column =
        snapshot
            .identity_column
            .clone()
            .ok_or_else(|| Error::MissingIdentity {
                layer: snapshot.layer.clone(),
            })?;

    checked(staging_schema)?;
    checked(table)?;
    checked(&identity_column)?;
    for column in &snapshot.columns {
        checked(&column.name)?;
    }

    let qualified = sql::qualified(staging_schema, table);

    // Replace any previously staged content under this name.
    sqlx::query(&format!("DROP TABLE IF EXISTS {qualified}"))
        .execute(&mut *tx)
        .await?;

    sqlx::query(&create_table_sql(&qualified, &snapshot.columns))
        .execute(&mut *tx)
        .await?;

    let chunk_rows = (MAX_BIND_PARAMS / snapshot.columns.len().max(1)).max(1);
    for chunk in snapshot.rows.chunks(chunk_rows) {
        let insert_sql = insert_sql(&qualified, &snapshot.columns, chunk.len());
        let mut query = sqlx::query(&insert_sql);
        for row in chunk {
            for (column, value) in snapshot.columns.iter().zip(row) {
                query = bind_value(query, column.ty, value);
            }
        }
        query.execute(&mut *tx).await?;
    }

    tracing::debug!(table = %qualified, rows = snapshot.rows.len(), "snapshot staged");

    Ok(StagedTable {
        schema: staging_schema.to_owned(),
        table: table.to_owned(),
        identity_column,
        columns: snapshot.columns.clone(),
        row_count: snapshot.rows.len() as u64,
    })
}

/// Drops the staged table. Called on the happy path before commit;
/// failure paths rely on transaction rollback instead.
#[tracing::instrument(skip(exe, staged), fields(table = %staged.qualified()), err)]
pub async fn drop_staged<'c, E>(exe: E, staged: &StagedTable) -> Result<(), Error>
where
    E: Executor<'c>,
{
    sqlx::query(&format!("DROP TABLE IF EXISTS {}", staged.qualified()))
        .execute(exe)
        .await?;
    Ok(())
}

fn checked(identifier: &str) -> Result<(), Error> {
    sql::validate_identifier(identifier).map_err(|source| Error::InvalidIdentifier {
        identifier: identifier.to_owned(),
        source,
    })
}

fn create_table_sql(qualified: &str, columns: &[Column]) -> String {
    let defs: Vec<String> = columns
        .iter()
        .map(|c| sql::column_definition(&c.name, c.ty.pg_type()))
        .collect();
    format!("CREATE TABLE {} ({})", qualified, defs.join(", "))
}

fn insert_sql(qualified: &str, columns: &[Column], rows: usize) -> String {
    let column_list: Vec<String> = columns.iter().map(|c| sql::quote(&c.name)).collect();

    let mut param = 0;
    let tuples: Vec<String> = (0..rows)
        .map(|_| {
            let placeholders: Vec<String> = columns
                .iter()
                .map(|_| {
                    param += 1;
                    format!("${param}")
                })
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        qualified,
        column_list.join(", "),
        tuples.join(", ")
    )
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    ty: ColumnType,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Text(s) => query.bind(s.as_str()),
        Value::BigInt(v) => query.bind(*v),
        Value::Double(v) => query.bind(*v),
        Value::Boolean(v) => query.bind(*v),
        Value::TimestampTz(v) => query.bind(*v),
        Value::Bytes(b) => query.bind(b.as_slice()),
        // NULL binds must carry the column's type so the server never
        // has to guess a parameter OID.
        Value::Null => match ty {
            ColumnType::Text => query.bind(Option::<&str>::None),
            ColumnType::BigInt => query.bind(Option::<i64>::None),
            ColumnType::Double => query.bind(Option::<f64>::None),
            ColumnType::Boolean => query.bind(Option::<bool>::None),
            ColumnType::TimestampTz => {
                query.bind(Option::<chrono::DateTime<chrono::Utc>>::None)
            }
            ColumnType::Bytes | ColumnType::Geometry => query.bind(Option::<&[u8]>::None),
        },
    }
}

#[cfg(test)]
mod tests {
    use snapshots::{Column, ColumnType};

    use super::*;

    fn columns() -> Vec<Column> {
        vec![
            Column::new("objektidentitet", ColumnType::Text),
            Column::new("geom", ColumnType::Geometry),
            Column::new("andrad", ColumnType::TimestampTz),
        ]
    }

    #[test]
    fn create_table_sql_lists_all_columns() {
        let sql = create_table_sql("staging.byggnad", &columns());
        assert!(sql.starts_with("CREATE TABLE staging.byggnad ("));
        assert!(sql.contains("objektidentitet TEXT"));
        assert!(sql.contains("geom BYTEA"));
        assert!(sql.contains("andrad TIMESTAMPTZ"));
    }

    #[test]
    fn insert_sql_numbers_placeholders_across_rows() {
        let sql = insert_sql("staging.byggnad", &columns(), 2);
        assert!(sql.contains("($1, $2, $3)"));
        assert!(sql.contains("($4, $5, $6)"));
        assert!(!sql.contains("$7"));
    }

    #[test]
    fn insert_sql_single_row() {
        let sql = insert_sql("staging.byggnad", &columns(), 1);
        assert!(sql.ends_with("VALUES ($1, $2, $3)"));
    }
}
