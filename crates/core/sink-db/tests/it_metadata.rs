//! DB integration tests for the sync metadata registry

use chrono::{DateTime, TimeZone, Utc};
use pgtemp::PgTempDB;
use sink_db::{metadata, RunMetadata, SinkDb, SyncRun, TargetTable};
use snapshots::{Column, ColumnType, Snapshot, Value};

async fn connect(temp_db: &PgTempDB) -> SinkDb {
    let db = SinkDb::connect(&temp_db.connection_uri(), 5)
        .await
        .expect("Failed to connect to sink db");
    db.ensure_schemas("data", "staging")
        .await
        .expect("Failed to prepare schemas");
    db
}

fn snapshot() -> Snapshot {
    Snapshot {
        layer: "byggnad".into(),
        identity_column: Some("id".into()),
        columns: vec![
            Column::new("id", ColumnType::Text),
            Column::new("value", ColumnType::Text),
        ],
        rows: vec![vec![Value::from("id1"), Value::from("v1")]],
    }
}

fn march_1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 6, 30, 0).unwrap()
}

async fn sync_at(
    db: &SinkDb,
    subdivision: Option<&str>,
    remote_updated: Option<DateTime<Utc>>,
) -> u64 {
    db.sync_run(SyncRun {
        target: TargetTable {
            schema: "data",
            table: "byggnad",
        },
        staging_schema: "staging",
        snapshot: &snapshot(),
        subdivision,
        metadata: RunMetadata {
            collection: "byggnader/byggnad",
            name: "byggnad",
            provider: "Lantmäteriet",
            remote_updated,
            item: subdivision,
        },
    })
    .await
    .expect("Sync failed")
}

#[tokio::test]
async fn sync_records_table_and_asset_metadata() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    //* When
    sync_at(&db, Some("region-a"), Some(march_1())).await;

    //* Then
    let record = metadata::get_metadata(db.pool(), "data", "byggnad")
        .await
        .expect("Failed to read metadata")
        .expect("No metadata recorded");
    assert_eq!(record.collection, "byggnader/byggnad");
    assert_eq!(record.name, "byggnad");
    assert_eq!(record.provider, "Lantmäteriet");
    assert_eq!(record.last_updated, Some(march_1()));

    let asset = metadata::get_asset(db.pool(), "data", "byggnad", "region-a")
        .await
        .expect("Failed to read asset metadata")
        .expect("No asset metadata recorded");
    assert_eq!(asset.item, "region-a");
    assert_eq!(asset.remote_updated, Some(march_1()));
}

#[tokio::test]
async fn unscoped_sync_records_no_asset_row() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    //* When
    sync_at(&db, None, Some(march_1())).await;

    //* Then
    let record = metadata::get_metadata(db.pool(), "data", "byggnad")
        .await
        .expect("Failed to read metadata")
        .expect("No metadata recorded");
    assert_eq!(record.last_updated, Some(march_1()));

    let asset_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM data.metadata_assets WHERE \"table\" = $1")
            .bind("byggnad")
            .fetch_one(db.pool())
            .await
            .expect("Failed to count asset rows");
    assert_eq!(asset_count, 0);
}

#[tokio::test]
async fn last_updated_reflects_most_recent_run_not_maximum() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;
    sync_at(&db, Some("region-a"), Some(march_1())).await;

    //* When
    // A later run carrying an older source timestamp still wins: the
    // registry mirrors the state that was last written, it does not
    // keep a high-water mark.
    let february = Utc.with_ymd_and_hms(2026, 2, 1, 6, 30, 0).unwrap();
    sync_at(&db, Some("region-a"), Some(february)).await;

    //* Then
    let record = metadata::get_metadata(db.pool(), "data", "byggnad")
        .await
        .expect("Failed to read metadata")
        .expect("No metadata recorded");
    assert_eq!(record.last_updated, Some(february));
}

#[tokio::test]
async fn asset_rows_accumulate_per_subdivision() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;

    //* When
    sync_at(&db, Some("region-a"), Some(march_1())).await;
    sync_at(&db, Some("region-b"), Some(march_1())).await;

    //* Then
    let items: Vec<String> = sqlx::query_scalar(
        "SELECT item FROM data.metadata_assets WHERE \"table\" = $1 ORDER BY item",
    )
    .bind("byggnad")
    .fetch_all(db.pool())
    .await
    .expect("Failed to read asset rows");
    assert_eq!(items, vec!["region-a".to_string(), "region-b".to_string()]);
}
