//! Config - インスタンス設定
//!
//! 環境変数（`WEFT_*`）か JSON から読み込みます。足りない項目はデフォルト値。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::{Layout, Result, WeftError, WorkerId};

pub const ENV_INSTANCE_ID: &str = "WEFT_INSTANCE_ID";
pub const ENV_ROOT: &str = "WEFT_ROOT";
pub const ENV_SESSION_TIMEOUT_MS: &str = "WEFT_SESSION_TIMEOUT_MS";
pub const ENV_REBALANCE_TOLERANCE: &str = "WEFT_REBALANCE_TOLERANCE";

/// Configuration of one weft instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker id; also the liveness marker name and election participant id.
    pub instance_id: String,

    /// Path prefix for every weft node (empty = top level).
    pub root: String,

    /// Liveness session timeout; bounds how long a dead worker keeps its tasks.
    pub session_timeout_ms: u64,

    /// Allowed load difference between the joining worker and any donor.
    pub rebalance_tolerance: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_id: format!("weft-{}", rand::random::<u32>()),
            root: String::new(),
            session_timeout_ms: 15_000,
            rebalance_tolerance: 1,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (env vars in production, a map in tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(id) = lookup(ENV_INSTANCE_ID) {
            config.instance_id = id;
        }
        if let Some(root) = lookup(ENV_ROOT) {
            config.root = root;
        }
        if let Some(ms) = lookup(ENV_SESSION_TIMEOUT_MS) {
            config.session_timeout_ms = parse_number(ENV_SESSION_TIMEOUT_MS, &ms)?;
        }
        if let Some(tolerance) = lookup(ENV_REBALANCE_TOLERANCE) {
            config.rebalance_tolerance = parse_number(ENV_REBALANCE_TOLERANCE, &tolerance)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| WeftError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.worker_id()?;
        self.layout()?;
        if self.session_timeout_ms == 0 {
            return Err(WeftError::Config("session timeout must be positive".into()));
        }
        if self.rebalance_tolerance == 0 {
            return Err(WeftError::Config("rebalance tolerance must be at least 1".into()));
        }
        Ok(())
    }

    pub fn worker_id(&self) -> Result<WorkerId> {
        WorkerId::parse(self.instance_id.clone())
            .map_err(|e| WeftError::Config(e.to_string()))
    }

    pub fn layout(&self) -> Result<Layout> {
        Layout::new(self.root.clone())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.session_timeout_ms)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| WeftError::Config(format!("{key} must be a number, got {raw:?}")))
}
