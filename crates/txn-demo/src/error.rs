use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to load demo configuration")]
    Config(#[from] txn_saga::ConfigError),
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use txn_saga::ConfigError;

    use super::CliError;

    #[test]
    fn config_error_converts_via_from() {
        let config_err = ConfigError::Read {
            path: PathBuf::from("/missing.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "test"),
        };

        let cli_err: CliError = config_err.into();

        assert!(matches!(cli_err, CliError::Config(_)));
    }

    #[test]
    fn config_error_has_source_chain() {
        let cli_err: CliError = ConfigError::Read {
            path: PathBuf::from("/missing.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "test"),
        }
        .into();

        let source = std::error::Error::source(&cli_err).expect("config error is the source");

        assert!(source.to_string().contains("/missing.toml"));
        assert!(std::error::Error::source(source).is_some());
    }
}
