//! Environment Configuration Helpers
//!
//! Each component owns its config struct (`ProofConfig`, `OracleConfig`,
//! `LedgerConfig`, `EngineConfig`, `FeedConfig`) with a `Default` holding
//! the protocol defaults and a `from_env()` that overrides individual fields.
//! This module holds the shared parsing and error plumbing.

use std::str::FromStr;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Variable is set but cannot be parsed.
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Environment variable name.
        key: String,
        /// Raw value that failed to parse.
        value: String,
    },
}

/// Read `key` from the environment, falling back to `default` when unset.
///
/// An empty value counts as unset.
pub fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw),
        _ => Ok(default),
    }
}

/// Read an optional `key` from the environment.
pub fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a raw value, tagging failures with the variable name.
pub fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
        key: key.to_string(),
        value: raw.to_string(),
    })
}
