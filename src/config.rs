//! `config.json` stored in the application directory.

use std::{path::Path, time::Duration};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    daemon::tracker::TrackerConfig,
    fs::operations::{read_json_locked, write_json_locked},
};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub idle_timeout_secs: u64,
    pub flush_interval_secs: u64,
    pub poll_interval_ms: u64,
    /// Track every program, creating records as they show up.
    pub track_all: bool,
    /// Mirror the store into `snapshot.json` after every change.
    pub snapshot: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 120,
            flush_interval_secs: 60,
            poll_interval_ms: 1000,
            track_all: false,
            snapshot: false,
        }
    }
}

impl Config {
    /// Reads the config from `dir`, writing the defaults first if there is none.
    pub fn load_or_create(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            info!("No config found, writing defaults to {path:?}");
            let config = Config::default();
            write_json_locked(&path, &config)?;
            return Ok(config);
        }
        read_json_locked(&path)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn tracker(&self) -> TrackerConfig {
        TrackerConfig {
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
            track_all: self.track_all,
        }
    }
}
