use std::path::Path;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::error::ConfigError;

/// Read a TOML file and deserialize it into `T`.
///
/// # Errors
///
/// Returns `ConfigError::Read` if the file cannot be read and
/// `ConfigError::Parse` if its content does not deserialize into `T`.
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

/// Settings applied to a transaction run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct TxnConfig {
    label: Option<String>,
    shielded_drain: bool,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            label: None,
            shielded_drain: true,
        }
    }
}

impl TxnConfig {
    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the text is not a valid config.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Read` if the file cannot be read and
    /// `ConfigError::Parse` if its content is not a valid config.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        load_toml(path)
    }

    /// Name recorded on the run's tracing span.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Whether compensation runs on its own task, so it completes even if
    /// the caller stops polling the run.
    #[must_use]
    pub fn shielded_drain(&self) -> bool {
        self.shielded_drain
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_shielded_drain(mut self, shielded_drain: bool) -> Self {
        self.shielded_drain = shielded_drain;
        self
    }
}
