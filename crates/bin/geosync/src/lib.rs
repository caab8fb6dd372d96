// Core modules
pub mod commands;
pub mod config;
pub mod decode;
pub mod logging;
pub mod orchestrator;

// Re-export for convenience
pub use config::SyncConfig;
pub use orchestrator::{LayerOutcome, Pass, PassReport};
