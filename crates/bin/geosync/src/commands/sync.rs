use anyhow::{bail, Context, Result};
use sink_db::SinkDb;
use snapshots::{LoaderRegistry, LogProgress, Session};
use tracing::info;

use crate::{
    config::SyncConfig,
    decode::GeoJsonDecoder,
    orchestrator::{self, Pass},
};

pub async fn run(config: SyncConfig) -> Result<()> {
    info!("Starting geosync");

    let registry = LoaderRegistry::known_providers();
    let loader = registry.get(&config.collection).with_context(|| {
        let known: Vec<_> = registry.collections().collect();
        format!(
            "Unknown collection: {} (known: {})",
            config.collection,
            known.join(", ")
        )
    })?;

    // Authenticate when credentials are configured; collections with
    // open downloads work anonymously.
    let session = match (&config.oauth_client_id, &config.oauth_client_secret) {
        (Some(client_id), Some(client_secret)) => Session::authenticate(
            &config.oauth_token_url,
            client_id,
            client_secret,
            loader.scope(),
        )
        .await
        .context("Failed to authenticate against the provider")?,
        (None, None) => Session::anonymous().context("Failed to build HTTP client")?,
        _ => bail!("OAuth client id and secret must be provided together"),
    };

    let db = SinkDb::connect(&config.database_url, config.max_db_connections)
        .await
        .context("Failed to connect to database")?;
    info!("Database connection established");

    db.ensure_schemas(&config.data_schema, &config.staging_schema)
        .await
        .context("Failed to prepare schemas")?;

    let load_result = loader
        .load(&config.asset, &session, &GeoJsonDecoder)
        .await
        .with_context(|| format!("Failed to load asset: {}", config.asset))?;
    info!(
        asset = %config.asset,
        layers = load_result.layers.len(),
        "Snapshot loaded"
    );

    let pass = Pass {
        db: &db,
        data_schema: &config.data_schema,
        staging_schema: &config.staging_schema,
        collection: &config.collection,
        provider: loader.provider(),
    };
    let subdivision = (!config.unscoped).then_some(config.asset.as_str());
    let report =
        orchestrator::run_pass(pass, &config.asset, subdivision, load_result, &LogProgress).await;

    let failures: Vec<_> = report
        .failures()
        .map(|(layer, error)| format!("{layer}: {error}"))
        .collect();
    if !failures.is_empty() {
        bail!("{} layer(s) failed to sync: {}", failures.len(), failures.join("; "));
    }

    info!("Geosync complete");
    Ok(())
}
