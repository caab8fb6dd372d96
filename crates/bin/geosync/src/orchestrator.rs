//! Per-layer sync pass over one loaded snapshot.
//!
//! A pass walks every layer of a [`LoadResult`] and drives one
//! [`SinkDb::sync_run`] per layer. Layer problems are contained: a layer
//! without an identity column is skipped, duplicate identity rows are
//! dropped keep-first with a warning, and a failed run is recorded in
//! the report while the remaining layers proceed.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use sink_db::{sql, RunMetadata, SinkDb, SyncRun, TargetTable};
use snapshots::{LoadResult, ProgressSink, Snapshot, Value};
use tracing::{info, warn};

/// What happened to one layer during a pass.
#[derive(Debug)]
pub enum LayerOutcome {
    /// The layer was synchronized; `rows` is the snapshot's row count
    /// after deduplication.
    Synced { rows: u64 },
    /// The layer was left untouched.
    Skipped { reason: &'static str },
    /// The layer's sync run failed and rolled back.
    Failed { error: sink_db::Error },
}

/// Result of one pass: per-layer outcomes plus the snapshot's reported
/// remote-updated time.
#[derive(Debug)]
pub struct PassReport {
    pub remote_updated: Option<DateTime<Utc>>,
    pub outcomes: BTreeMap<String, LayerOutcome>,
}

impl PassReport {
    /// Layers whose sync run failed.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &sink_db::Error)> {
        self.outcomes.iter().filter_map(|(layer, outcome)| match outcome {
            LayerOutcome::Failed { error } => Some((layer.as_str(), error)),
            _ => None,
        })
    }
}

/// Fixed context of a pass: where to write and how to label it.
#[derive(Debug, Copy, Clone)]
pub struct Pass<'a> {
    pub db: &'a SinkDb,
    pub data_schema: &'a str,
    pub staging_schema: &'a str,
    pub collection: &'a str,
    pub provider: &'a str,
}

/// Runs one sync pass over every layer of `load_result`.
///
/// `subdivision` scopes each run's deletes to the asset's partition;
/// `None` gives full-replace semantics. Progress is reported after each
/// layer, whether it succeeded or not.
pub async fn run_pass(
    pass: Pass<'_>,
    asset: &str,
    subdivision: Option<&str>,
    load_result: LoadResult,
    progress: &dyn ProgressSink,
) -> PassReport {
    let total = load_result.layers.len();
    let mut outcomes = BTreeMap::new();

    for (index, (layer, mut snapshot)) in load_result.layers.into_iter().enumerate() {
        let outcome = sync_layer(&pass, asset, subdivision, load_result.remote_updated, &mut snapshot).await;
        match &outcome {
            LayerOutcome::Synced { rows } => info!(%layer, rows, "layer synchronized"),
            LayerOutcome::Skipped { reason } => warn!(%layer, reason, "layer skipped"),
            LayerOutcome::Failed { error } => {
                warn!(%layer, error = %error, "layer sync failed")
            }
        }
        outcomes.insert(layer, outcome);

        progress.set_progress((((index + 1) * 100) / total) as u8);
    }

    PassReport {
        remote_updated: load_result.remote_updated,
        outcomes,
    }
}

async fn sync_layer(
    pass: &Pass<'_>,
    asset: &str,
    subdivision: Option<&str>,
    remote_updated: Option<DateTime<Utc>>,
    snapshot: &mut Snapshot,
) -> LayerOutcome {
    if snapshot.identity_index().is_none() {
        return LayerOutcome::Skipped {
            reason: "no identity column",
        };
    }

    let removed = dedup_keep_first(snapshot);
    if removed > 0 {
        warn!(
            layer = %snapshot.layer,
            removed, "removed rows with null or duplicate identity values"
        );
    }

    let table = sql::derive_table_name(pass.collection, &snapshot.layer);
    let run = SyncRun {
        target: TargetTable {
            schema: pass.data_schema,
            table: &table,
        },
        staging_schema: pass.staging_schema,
        snapshot,
        subdivision,
        metadata: RunMetadata {
            collection: pass.collection,
            name: &snapshot.layer,
            provider: pass.provider,
            remote_updated,
            item: Some(asset),
        },
    };

    match pass.db.sync_run(run).await {
        Ok(rows) => LayerOutcome::Synced { rows },
        Err(error) => LayerOutcome::Failed { error },
    }
}

/// Drops rows without a usable identity: null identity values and
/// repeats of an already-seen value (first occurrence wins). Returns the
/// number of rows removed.
///
/// Providers occasionally ship the same feature twice in one delivery,
/// or features missing their key attribute; the merge protocol requires
/// every staged row to carry a unique, non-null identity.
pub fn dedup_keep_first(snapshot: &mut Snapshot) -> usize {
    let Some(identity) = snapshot.identity_index() else {
        return 0;
    };

    let before = snapshot.rows.len();
    let mut seen = HashSet::new();
    snapshot.rows.retain(|row| match &row[identity] {
        Value::Null => false,
        value => seen.insert(format!("{value:?}")),
    });
    before - snapshot.rows.len()
}
