//! Pool configuration: desired worker counts per queue group.
//!
//! The config document is a YAML mapping from queue-group strings (ordered,
//! comma-separated queue names, kept verbatim as keys) to worker counts,
//! optionally containing per-environment sub-mappings that override the top
//! level:
//!
//! ```yaml
//! high: 2
//! high,low: 1
//! production:
//!   high: 4
//! ```
//!
//! Parsing is a pure function over the file contents and the environment
//! name, so reload behaves identically to first load.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use respool_common::{PoolError, PoolResult};
use serde_yaml::Value;

/// Desired census: queue group → target worker count.
pub type DesiredCensus = BTreeMap<String, usize>;

/// Environment variable naming an explicit config path.
pub const CONFIG_PATH_VAR: &str = "RESQUE_POOL_CONFIG";

/// Default config locations, checked in order.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["resque-pool.yml", "config/resque-pool.yml"];

/// Environment-name variables, checked in order; first non-empty wins.
pub const ENVIRONMENT_VARS: [&str; 3] = ["RACK_ENV", "RAILS_ENV", "RESQUE_ENV"];

/// Default worker polling interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Where the desired census comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// A YAML file, re-read on every (re)load.
    Path(PathBuf),
    /// A fixed in-memory census (embedding and tests).
    Inline(DesiredCensus),
}

impl ConfigSource {
    /// Locate a config source from the environment and working directory:
    /// `RESQUE_POOL_CONFIG` if set, else the first existing default path.
    pub fn discover() -> Option<Self> {
        if let Ok(path) = env::var(CONFIG_PATH_VAR) {
            if !path.is_empty() {
                return Some(Self::Path(PathBuf::from(path)));
            }
        }
        Self::discover_in(Path::new("."))
    }

    /// Check the default config locations under `dir`.
    pub fn discover_in(dir: &Path) -> Option<Self> {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
            .map(Self::Path)
    }

    /// Produce the desired census, applying the environment overlay.
    pub fn load(&self, environment: Option<&str>) -> PoolResult<DesiredCensus> {
        match self {
            Self::Inline(census) => Ok(census.clone()),
            Self::Path(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| {
                    PoolError::config(format!("failed to read {}: {}", path.display(), e))
                })?;
                parse_census(&contents, environment)
            }
        }
    }
}

/// Parse a config document into a desired census.
///
/// If `environment` names a sub-mapping in the document, its entries are
/// merged over the top level; afterwards every value that is itself a
/// mapping is stripped (those are environment sections, not counts).
pub fn parse_census(contents: &str, environment: Option<&str>) -> PoolResult<DesiredCensus> {
    let doc: Value = serde_yaml::from_str(contents)
        .map_err(|e| PoolError::config(format!("invalid pool config: {}", e)))?;
    if matches!(doc, Value::Null) {
        return Ok(DesiredCensus::new());
    }
    let top = doc
        .as_mapping()
        .ok_or_else(|| PoolError::config("pool config top level must be a mapping"))?;

    let mut merged: Vec<(String, Value)> = Vec::with_capacity(top.len());
    for (key, value) in top {
        merged.push((string_key(key)?, value.clone()));
    }

    if let Some(env_name) = environment {
        let overlay = merged
            .iter()
            .find(|(key, _)| key == env_name)
            .map(|(_, value)| value.clone());
        if let Some(Value::Mapping(section)) = overlay {
            for (key, value) in &section {
                let key = string_key(key)?;
                match merged.iter_mut().find(|(existing, _)| *existing == key) {
                    Some(slot) => slot.1 = value.clone(),
                    None => merged.push((key, value.clone())),
                }
            }
        }
    }

    let mut census = DesiredCensus::new();
    for (key, value) in merged {
        match value {
            // Environment sections, already merged or irrelevant.
            Value::Mapping(_) => continue,
            Value::Number(count) => {
                let count = count
                    .as_u64()
                    .ok_or_else(|| non_count_error(&key))? as usize;
                census.insert(key, count);
            }
            _ => return Err(non_count_error(&key)),
        }
    }
    Ok(census)
}

fn string_key(key: &Value) -> PoolResult<String> {
    key.as_str()
        .map(str::to_string)
        .ok_or_else(|| PoolError::config("pool config keys must be strings"))
}

fn non_count_error(key: &str) -> PoolError {
    PoolError::config(format!(
        "worker count for '{}' must be a non-negative integer",
        key
    ))
}

/// Environment-derived pool options, captured once at startup.
#[derive(Debug, Clone)]
pub struct PoolEnv {
    /// Environment name for the config overlay.
    pub environment: Option<String>,
    /// Worker polling interval (`INTERVAL`, seconds).
    pub interval: Duration,
    /// Worker verbose mode (`LOGGING` or `VERBOSE`).
    pub verbose: bool,
    /// Worker very-verbose mode (`VVERBOSE`).
    pub very_verbose: bool,
}

impl Default for PoolEnv {
    fn default() -> Self {
        Self {
            environment: None,
            interval: DEFAULT_INTERVAL,
            verbose: false,
            very_verbose: false,
        }
    }
}

impl PoolEnv {
    /// Capture options from the process environment.
    pub fn from_env() -> Self {
        let environment = ENVIRONMENT_VARS
            .iter()
            .find_map(|name| env::var(name).ok().filter(|value| !value.is_empty()));
        let interval = env::var("INTERVAL")
            .ok()
            .and_then(|value| value.parse::<f64>().ok())
            .filter(|secs| *secs > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_INTERVAL);
        Self {
            environment,
            interval,
            verbose: env_flag("LOGGING") || env_flag("VERBOSE"),
            very_verbose: env_flag("VVERBOSE"),
        }
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name).map(|value| !value.is_empty()).unwrap_or(false)
}
