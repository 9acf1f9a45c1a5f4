//! Engine configuration loader.
//!
//! Reads `config.toml` from the data directory (`~/.maestro/` by default)
//! and deserializes it into [`EngineConfig`]. Falls back to defaults when
//! the file is missing or malformed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use maestro_core::engine::orchestrator::OrchestratorConfig;
use maestro_core::engine::retry::BackoffPolicy;
use serde::{Deserialize, Serialize};

/// Engine tuning knobs, as authored in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Where the HTTP agent invoker posts invocation requests.
    pub invoker_endpoint: String,
    /// Ceiling on one whole run, in seconds.
    pub run_timeout_secs: u64,
    /// Per-attempt timeout for steps without their own, in seconds.
    pub step_timeout_secs: u64,
    /// Grace period for in-flight steps on cancellation, in seconds.
    pub cancel_grace_secs: u64,
    /// First inter-attempt backoff delay, in milliseconds.
    pub retry_initial_backoff_ms: u64,
    /// Backoff growth factor per attempt.
    pub retry_backoff_multiplier: f64,
    /// Backoff ceiling, in milliseconds.
    pub retry_max_backoff_ms: u64,
    /// Progress event channel capacity.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invoker_endpoint: "http://127.0.0.1:8700/invoke".to_string(),
            run_timeout_secs: 1800,
            step_timeout_secs: 300,
            cancel_grace_secs: 5,
            retry_initial_backoff_ms: 250,
            retry_backoff_multiplier: 2.0,
            retry_max_backoff_ms: 10_000,
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Map the file-level knobs onto the orchestrator's configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            run_timeout: Duration::from_secs(self.run_timeout_secs),
            default_step_timeout: Duration::from_secs(self.step_timeout_secs),
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
            backoff: BackoffPolicy {
                initial: Duration::from_millis(self.retry_initial_backoff_ms),
                multiplier: self.retry_backoff_multiplier,
                max: Duration::from_millis(self.retry_max_backoff_ms),
            },
        }
    }
}

/// The data directory: `MAESTRO_DATA_DIR`, falling back to `~/.maestro`.
pub fn data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MAESTRO_DATA_DIR") {
        return PathBuf::from(dir);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".maestro")
}

/// Load engine configuration from `{data_dir}/config.toml`.
///
/// - Missing file: defaults, silently.
/// - Unreadable or unparseable file: defaults, with a warning.
pub async fn load_engine_config(data_dir: &Path) -> EngineConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("no config.toml at {}, using defaults", config_path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!(
                "failed to read {}: {err}, using defaults",
                config_path.display()
            );
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            EngineConfig::default()
        }
    }
}
