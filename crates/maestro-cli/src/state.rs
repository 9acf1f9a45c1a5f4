//! Shared application state for CLI commands.

use std::path::PathBuf;

use anyhow::Context;
use maestro_infra::config::{self, EngineConfig};
use maestro_infra::sqlite::DatabasePool;

/// Everything a command handler needs: configuration and the database pool.
pub struct AppState {
    pub config: EngineConfig,
    pub db_pool: DatabasePool,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load configuration, and open the
    /// database (creating and migrating it on first use).
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = config::data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;

        let config = config::load_engine_config(&data_dir).await;
        tracing::debug!(data_dir = %data_dir.display(), "initialized application state");

        let database_url = format!("sqlite://{}/maestro.db", data_dir.display());
        let db_pool = DatabasePool::new(&database_url)
            .await
            .with_context(|| format!("opening database at {database_url}"))?;

        Ok(Self {
            config,
            db_pool,
            data_dir,
        })
    }
}
