//! DB integration tests for the per-layer sync pass

use std::{
    collections::BTreeMap,
    sync::Mutex,
};

use chrono::{TimeZone, Utc};
use geosync::orchestrator::{self, LayerOutcome, Pass};
use pgtemp::PgTempDB;
use sink_db::{metadata, SinkDb};
use snapshots::{Column, ColumnType, LoadResult, ProgressSink, Snapshot, Value};

struct RecordingSink(Mutex<Vec<u8>>);

impl ProgressSink for RecordingSink {
    fn set_progress(&self, percent: u8) {
        self.0.lock().unwrap().push(percent);
    }
}

async fn connect(temp_db: &PgTempDB) -> SinkDb {
    let db = SinkDb::connect(&temp_db.connection_uri(), 5)
        .await
        .expect("Failed to connect to sink db");
    db.ensure_schemas("geodata", "geodata_staging")
        .await
        .expect("Failed to prepare schemas");
    db
}

fn layer(name: &str, identity: Option<&str>, ids: &[&str]) -> Snapshot {
    Snapshot {
        layer: name.into(),
        identity_column: identity.map(str::to_owned),
        columns: vec![
            Column::new("id", ColumnType::Text),
            Column::new("value", ColumnType::Text),
        ],
        rows: ids
            .iter()
            .enumerate()
            .map(|(i, id)| vec![Value::from(*id), Value::from(format!("v{i}"))])
            .collect(),
    }
}

fn load_result(layers: Vec<Snapshot>) -> LoadResult {
    LoadResult {
        remote_updated: Some(Utc.with_ymd_and_hms(2026, 3, 1, 6, 30, 0).unwrap()),
        layers: layers
            .into_iter()
            .map(|snapshot| (snapshot.layer.clone(), snapshot))
            .collect(),
    }
}

#[tokio::test]
async fn pass_syncs_dedups_and_skips_per_layer() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;
    let input = load_result(vec![
        // Carries a duplicated identity value; the first row wins.
        layer("byggnad", Some("id"), &["id1", "id2", "id1"]),
        // No identity column: must be skipped, not fail the pass.
        layer("hydrolinje", None, &["id1"]),
    ]);
    let pass = Pass {
        db: &db,
        data_schema: "geodata",
        staging_schema: "geodata_staging",
        collection: "byggnader",
        provider: "Lantmäteriet",
    };
    let progress = RecordingSink(Mutex::new(Vec::new()));

    //* When
    let report = orchestrator::run_pass(pass, "kommun-2584", Some("kommun-2584"), input, &progress).await;

    //* Then
    assert_eq!(
        report.remote_updated,
        Some(Utc.with_ymd_and_hms(2026, 3, 1, 6, 30, 0).unwrap())
    );
    assert!(matches!(
        report.outcomes["byggnad"],
        LayerOutcome::Synced { rows: 2 }
    ));
    assert!(matches!(
        report.outcomes["hydrolinje"],
        LayerOutcome::Skipped { .. }
    ));
    assert_eq!(report.failures().count(), 0);

    // Progress reported after each of the two layers.
    assert_eq!(*progress.0.lock().unwrap(), vec![50, 100]);

    // The synced layer landed in a table derived from collection and
    // layer names, deduplicated keep-first.
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT id, value FROM geodata.byggnader_byggnad ORDER BY id")
            .fetch_all(db.pool())
            .await
            .expect("Failed to read target table");
    assert_eq!(
        rows,
        vec![("id1".into(), "v0".into()), ("id2".into(), "v1".into())]
    );

    // The skipped layer produced no table and no metadata.
    let skipped_meta = metadata::get_metadata(db.pool(), "geodata", "byggnader_hydrolinje")
        .await
        .expect("Failed to read metadata");
    assert!(skipped_meta.is_none());

    // The synced layer's metadata carries the snapshot's freshness.
    let meta = metadata::get_metadata(db.pool(), "geodata", "byggnader_byggnad")
        .await
        .expect("Failed to read metadata")
        .expect("No metadata recorded");
    assert_eq!(meta.collection, "byggnader");
    assert_eq!(meta.last_updated, report.remote_updated);
}

#[tokio::test]
async fn failed_layer_does_not_abort_the_pass() {
    //* Given
    let temp_db = PgTempDB::new();
    let db = connect(&temp_db).await;
    let pass = Pass {
        db: &db,
        data_schema: "geodata",
        staging_schema: "geodata_staging",
        collection: "byggnader",
        provider: "Lantmäteriet",
    };

    // Bootstrap byggnad with its current shape.
    let first = load_result(vec![layer("byggnad", Some("id"), &["id1"])]);
    orchestrator::run_pass(pass, "kommun-2584", Some("kommun-2584"), first, &snapshots::NoProgress)
        .await;

    // Second pass: byggnad's snapshot drifted (extra column), while a
    // new anlaggning layer is fine.
    let mut drifted = layer("byggnad", Some("id"), &["id1"]);
    drifted.columns.push(Column::new("extra", ColumnType::Text));
    for row in &mut drifted.rows {
        row.push(Value::Null);
    }
    let input = load_result(vec![drifted, layer("anlaggning", Some("id"), &["id9"])]);

    //* When
    let report =
        orchestrator::run_pass(pass, "kommun-2584", Some("kommun-2584"), input, &snapshots::NoProgress)
            .await;

    //* Then
    let failed: BTreeMap<_, _> = report.failures().collect();
    assert_eq!(failed.len(), 1);
    assert!(failed.contains_key("byggnad"));
    assert!(matches!(
        report.outcomes["anlaggning"],
        LayerOutcome::Synced { rows: 1 }
    ));

    // The healthy layer's table exists despite the sibling failure.
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM geodata.byggnader_anlaggning")
        .fetch_one(db.pool())
        .await
        .expect("Failed to read target table");
    assert_eq!(count, 1);
}
