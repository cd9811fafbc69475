//! Shared configuration, loaded from `CORTEX_*` environment variables.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Single-operator local deployment. The default.
    Local,
    /// Hosted deployment; stricter plaintext policies apply.
    Cloud,
}

/// Immutable configuration for an engine instance.
///
/// Every field has a default; the environment only overrides. The master
/// key is intentionally *not* part of this struct; it is supplied
/// out-of-band to the crypto layer so configuration dumps never carry it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CortexConfig {
    /// Path to the main database file.
    pub db_path: PathBuf,
    /// Minimum Merkle checkpoint batch size (high write rate).
    pub checkpoint_min: u64,
    /// Maximum Merkle checkpoint batch size (calm periods).
    pub checkpoint_max: u64,
    /// Legacy fixed batch size, kept for compatibility with older tooling.
    pub checkpoint_batch: u64,
    /// Read pool maximum size.
    pub pool_size: usize,
    /// Requests allowed per rate window, per key, unless the key overrides.
    pub rate_limit: u32,
    /// Rate window in seconds.
    pub rate_window_secs: u64,
    /// Embedding dimension; must equal the vector schema dimension.
    pub embeddings_dim: usize,
    /// Origins allowed by embedding hosts; carried for host layers.
    pub allowed_origins: Vec<String>,
    /// Deployment mode.
    pub deploy: DeployMode,
}

impl Default for CortexConfig {
    fn default() -> Self {
        let home = env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
        CortexConfig {
            db_path: home.join(".cortex").join("cortex.db"),
            checkpoint_min: 100,
            checkpoint_max: 1000,
            checkpoint_batch: 1000,
            pool_size: 5,
            rate_limit: 300,
            rate_window_secs: 60,
            embeddings_dim: 384,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
            deploy: DeployMode::Local,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(fallback)
}

impl CortexConfig {
    /// Build configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let d = CortexConfig::default();
        CortexConfig {
            db_path: env::var_os("CORTEX_DB")
                .map(PathBuf::from)
                .unwrap_or(d.db_path),
            checkpoint_min: env_parse("CORTEX_CHECKPOINT_MIN", d.checkpoint_min),
            checkpoint_max: env_parse("CORTEX_CHECKPOINT_MAX", d.checkpoint_max),
            checkpoint_batch: env_parse("CORTEX_CHECKPOINT_BATCH", d.checkpoint_batch),
            pool_size: env_parse("CORTEX_POOL_SIZE", d.pool_size),
            rate_limit: env_parse("CORTEX_RATE_LIMIT", d.rate_limit),
            rate_window_secs: env_parse("CORTEX_RATE_WINDOW", d.rate_window_secs),
            embeddings_dim: env_parse("CORTEX_EMBEDDINGS_DIM", d.embeddings_dim),
            allowed_origins: env::var("CORTEX_ALLOWED_ORIGINS")
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(d.allowed_origins),
            deploy: match env::var("CORTEX_DEPLOY").as_deref() {
                Ok("cloud") => DeployMode::Cloud,
                _ => DeployMode::Local,
            },
        }
    }

    /// True when running in a hosted deployment.
    pub fn is_cloud(&self) -> bool {
        self.deploy == DeployMode::Cloud
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = CortexConfig::default();
        assert_eq!(c.checkpoint_min, 100);
        assert_eq!(c.checkpoint_max, 1000);
        assert_eq!(c.embeddings_dim, 384);
        assert!(!c.is_cloud());
    }
}
