use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "geosync")]
#[command(version)]
#[command(about = "PostgreSQL synchronization tool for geodata snapshots", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Synchronize one collection asset into the sink database
    Sync(SyncConfig),
}

#[derive(Parser, Debug, Clone)]
pub struct SyncConfig {
    /// Collection to sync, e.g. "byggnader" (required)
    ///
    /// Can also be set via COLLECTION environment variable
    #[arg(short = 'c', long, env = "COLLECTION", required = true)]
    pub collection: String,

    /// Remote item (asset) id to fetch, e.g. a kommun code (required)
    ///
    /// Can also be set via ASSET_ID environment variable
    #[arg(short = 'a', long, env = "ASSET_ID", required = true)]
    pub asset: String,

    /// Sync without a subdivision tag: the snapshot replaces the whole
    /// target table instead of only this asset's partition
    ///
    /// Can also be set via UNSCOPED environment variable
    #[arg(long, env = "UNSCOPED", default_value_t = false)]
    pub unscoped: bool,

    /// PostgreSQL connection URL (required)
    ///
    /// Format: postgresql://[user]:[password]@[host]:[port]/[database]
    /// Can also be set via DATABASE_URL environment variable
    #[arg(long, env = "DATABASE_URL", required = true)]
    pub database_url: String,

    /// Schema holding the synchronized tables (default: "geodata")
    ///
    /// Can also be set via DATA_SCHEMA environment variable
    #[arg(long, env = "DATA_SCHEMA", default_value = "geodata")]
    pub data_schema: String,

    /// Schema holding ephemeral staging tables (default: "geodata_staging")
    ///
    /// Can also be set via STAGING_SCHEMA environment variable
    #[arg(long, env = "STAGING_SCHEMA", default_value = "geodata_staging")]
    pub staging_schema: String,

    /// Maximum database connections (default: 10, valid range: 1-1000)
    ///
    /// Can also be set via MAX_DB_CONNECTIONS environment variable
    #[arg(long, env = "MAX_DB_CONNECTIONS", default_value_t = sink_db::DEFAULT_POOL_SIZE, value_parser = clap::value_parser!(u32).range(1..=1000))]
    pub max_db_connections: u32,

    /// OAuth2 token endpoint for collections that require authentication
    ///
    /// Can also be set via OAUTH_TOKEN_URL environment variable
    #[arg(
        long,
        env = "OAUTH_TOKEN_URL",
        default_value = "https://apimanager.lantmateriet.se/oauth2/token"
    )]
    pub oauth_token_url: String,

    /// OAuth2 client id
    ///
    /// Can also be set via OAUTH_CLIENT_ID environment variable
    #[arg(long, env = "OAUTH_CLIENT_ID")]
    pub oauth_client_id: Option<String>,

    /// OAuth2 client secret
    ///
    /// Can also be set via OAUTH_CLIENT_SECRET environment variable
    #[arg(long, env = "OAUTH_CLIENT_SECRET", hide_env_values = true)]
    pub oauth_client_secret: Option<String>,
}
