use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use txn_saga::{ConfigError, TxnConfig, load_toml};

pub const DEFAULT_ITERATIONS: usize = 1000;
pub const DEFAULT_ENTITY_ID: i64 = 47;

/// Contents of a `--config` file. Every key is optional; flags win.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct DemoConfig {
    iterations: Option<usize>,
    seed: Option<u64>,
    entity_id: Option<i64>,
    cancel_after_ms: Option<u64>,
    txn: TxnConfig,
}

impl DemoConfig {
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read and
    /// `ConfigError::Parse` if it is not a valid demo config.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }
}

/// Command-line values that override the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub iterations: Option<usize>,
    pub seed: Option<u64>,
    pub entity_id: Option<i64>,
    pub cancel_after_ms: Option<u64>,
}

/// Fully resolved settings of one demo invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub iterations: usize,
    pub seed: Option<u64>,
    pub entity_id: i64,
    pub cancel_after: Option<Duration>,
    pub txn: TxnConfig,
}

impl Settings {
    #[must_use]
    pub fn resolve(overrides: Overrides, file: DemoConfig) -> Self {
        Self {
            iterations: overrides
                .iterations
                .or(file.iterations)
                .unwrap_or(DEFAULT_ITERATIONS),
            seed: overrides.seed.or(file.seed),
            entity_id: overrides
                .entity_id
                .or(file.entity_id)
                .unwrap_or(DEFAULT_ENTITY_ID),
            cancel_after: overrides
                .cancel_after_ms
                .or(file.cancel_after_ms)
                .map(Duration::from_millis),
            txn: file.txn,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::resolve(Overrides::default(), DemoConfig::default())
    }
}
