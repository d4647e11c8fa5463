//! Load tuning knobs read from the environment.

use std::str::FromStr;
use std::time::Duration;

/// Postgres caps a single statement at 65 535 bind parameters.
pub const PG_MAX_PARAMS: usize = 65_535;

/// Bind parameters per feature row: dataset id, feature, requested by.
pub const PARAMS_PER_ROW: usize = 3;

/// Largest batch that still fits in one statement.
pub const MAX_BATCH_SIZE: usize = PG_MAX_PARAMS / PARAMS_PER_ROW;

/// Features per insert statement when `BULK_INSERT_BATCH_SIZE` is unset.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Upper bound for the whole loading transaction when
/// `LOAD_TRANSACTION_TIMEOUT_SECS` is unset.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be used.
    #[error("Invalid value for {name}: {value:?} ({message})")]
    Invalid {
        /// Variable name.
        name: String,
        /// Raw value found in the environment.
        value: String,
        /// Why the value was rejected.
        message: String,
    },
}

/// Reads `name` from the environment and parses it, falling back to
/// `default` when the variable is unset or blank.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the variable is set but does not
/// parse as `T`.
pub fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                name: name.to_string(),
                value: raw.clone(),
                message: e.to_string(),
            })
        }
        _ => Ok(default),
    }
}

/// Settings that shape a single load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadConfig {
    /// Maximum features per multi-row insert statement.
    pub batch_size: usize,
    /// Deadline for the loading transaction; exceeding it rolls back.
    pub transaction_timeout: Duration,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            transaction_timeout: DEFAULT_TRANSACTION_TIMEOUT,
        }
    }
}

impl LoadConfig {
    /// Builds a config, validating the batch size.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if `batch_size` is zero or larger
    /// than [`MAX_BATCH_SIZE`].
    pub fn new(batch_size: usize, transaction_timeout: Duration) -> Result<Self, ConfigError> {
        if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::Invalid {
                name: "BULK_INSERT_BATCH_SIZE".to_string(),
                value: batch_size.to_string(),
                message: format!("must be between 1 and {MAX_BATCH_SIZE}"),
            });
        }
        Ok(Self {
            batch_size,
            transaction_timeout,
        })
    }

    /// Reads `BULK_INSERT_BATCH_SIZE` and `LOAD_TRANSACTION_TIMEOUT_SECS`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if either variable is malformed or
    /// out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        let batch_size = parse_env("BULK_INSERT_BATCH_SIZE", DEFAULT_BATCH_SIZE)?;
        let timeout_secs = parse_env(
            "LOAD_TRANSACTION_TIMEOUT_SECS",
            DEFAULT_TRANSACTION_TIMEOUT.as_secs(),
        )?;
        Self::new(batch_size, Duration::from_secs(timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_batch_sizes() {
        assert!(LoadConfig::new(0, DEFAULT_TRANSACTION_TIMEOUT).is_err());
        assert!(LoadConfig::new(MAX_BATCH_SIZE + 1, DEFAULT_TRANSACTION_TIMEOUT).is_err());
        assert_eq!(
            LoadConfig::new(MAX_BATCH_SIZE, DEFAULT_TRANSACTION_TIMEOUT)
                .unwrap()
                .batch_size,
            21_845
        );
    }

    #[test]
    fn parse_env_uses_default_when_unset() {
        let value: usize = parse_env("DATASET_LOADER_TEST_UNSET_VARIABLE", 7).unwrap();
        assert_eq!(value, 7);
    }
}
