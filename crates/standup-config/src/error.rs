//! Error surface for configuration resolution and descriptor derivation.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while resolving configuration or deriving service descriptors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A key flagged as required resolved to an empty or absent value.
    #[error("configuration key '{key}' is required by service '{service}' but is missing or empty")]
    MissingRequiredKey {
        /// Key that failed to resolve.
        key: String,
        /// Service whose descriptor needs the key.
        service: String,
    },
    /// A declared configuration file could not be read or parsed.
    #[error("configuration source '{path}' is unreadable: {source}")]
    UnreadableSource {
        /// Path of the offending file.
        path: PathBuf,
        /// What went wrong while reading it.
        #[source]
        source: SourceError,
    },
    /// A value was present but could not be interpreted.
    #[error("configuration key '{key}' has invalid value '{value}': expected {expected}")]
    InvalidValue {
        /// Key holding the value.
        key: String,
        /// Raw value as resolved.
        value: String,
        /// Human description of the accepted format.
        expected: String,
    },
    /// A service name did not match any descriptor.
    #[error("unknown service '{name}'; expected one of: {known}")]
    UnknownService {
        /// Requested service name.
        name: String,
        /// Comma separated list of known services.
        known: String,
    },
    /// Service dependencies formed a cycle.
    #[error("service '{service}' participates in a dependency cycle")]
    DependencyCycle {
        /// Service where the cycle was detected.
        service: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, value: &str, expected: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_owned(),
            value: value.to_owned(),
            expected: expected.into(),
        }
    }
}

/// Reasons a configuration file could not be consumed.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The file could not be opened or read.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// A non-comment line did not follow the `KEY=VALUE` shape.
    #[error("line {line}: expected KEY=VALUE, found '{content}'")]
    Malformed {
        /// One-based line number.
        line: usize,
        /// Offending line content.
        content: String,
    },
}
