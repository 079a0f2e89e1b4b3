use crate::error::BuildError;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Externally supplied cache settings, for example from a JSON file.
///
/// ```json
/// { "name": "sessions", "ignore_case": true, "sweep_interval": "30s" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)] // Defaults to ordinal comparison
  pub ignore_case: bool,
  #[serde(default)]
  pub shards: Option<usize>,
  /// A human-readable duration such as `"20s"` or `"1m 30s"`.
  #[serde(default)]
  pub sweep_interval: Option<String>,
  #[serde(default = "default_sweeper")]
  pub sweeper: bool,
  #[serde(default)]
  pub persistence_dir: Option<PathBuf>,
}

fn default_sweeper() -> bool {
  true
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: None,
      ignore_case: false,
      shards: None,
      sweep_interval: None,
      sweeper: default_sweeper(),
      persistence_dir: None,
    }
  }
}

impl CacheConfig {
  /// Parses a configuration from JSON.
  pub fn from_json(json: &str) -> Result<Self, BuildError> {
    serde_json::from_str(json).map_err(|e| BuildError::InvalidConfig(e.to_string()))
  }

  /// The parsed sweep interval, if one was given.
  pub fn sweep_interval(&self) -> Result<Option<Duration>, BuildError> {
    self
      .sweep_interval
      .as_deref()
      .map(|raw| {
        humantime::parse_duration(raw)
          .map_err(|e| BuildError::InvalidConfig(format!("sweep_interval '{raw}': {e}")))
      })
      .transpose()
  }
}
