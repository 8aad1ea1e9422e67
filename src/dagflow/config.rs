// SPDX-License-Identifier: MIT

//! Engine configuration from environment variables

use std::path::PathBuf;
use std::time::Duration;

use crate::dagflow::EngineError;

pub const DEFAULT_WORK_DIR: &str = "./data";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 5006;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Base directory holding one sub-directory per workflow
    pub work_dir: PathBuf,
    /// SQLite URL; in-memory stores when unset
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    /// Background reconciliation period; demand-driven only when unset
    pub reconcile_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            database_url: None,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            reconcile_interval: None,
        }
    }
}

impl EngineConfig {
    /// Read `DAGFLOW_*` variables from the process environment
    pub fn from_env() -> Result<Self, EngineError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(dir) = get("DAGFLOW_WORK_DIR") {
            config.work_dir = PathBuf::from(dir);
        }
        config.database_url = get("DAGFLOW_DATABASE_URL");
        if let Some(host) = get("DAGFLOW_HOST") {
            config.host = host;
        }
        if let Some(port) = get("DAGFLOW_PORT") {
            config.port = port.trim().parse().map_err(|_| {
                EngineError::config(format!("DAGFLOW_PORT must be a port number, got '{}'", port))
            })?;
        }
        if let Some(secs) = get("DAGFLOW_RECONCILE_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                EngineError::config(format!(
                    "DAGFLOW_RECONCILE_SECS must be a number of seconds, got '{}'",
                    secs
                ))
            })?;
            config.reconcile_interval = interval(secs);
        }

        Ok(config)
    }
}

/// Zero seconds disables the background reconciler
pub fn interval(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
