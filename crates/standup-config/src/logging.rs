use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::defaults::{
    DEFAULT_LOG_FILE_NAME, DEFAULT_LOG_FILTER, LOG_DIR, LOG_FILE, LOG_FILE_NAME, LOG_FORMAT,
    LOG_LEVEL,
};
use crate::{ConfigError, EnvironmentSnapshot};

/// Supported logging output formats.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// Structured JSON suitable for ingestion by logging stacks.
    Json,
    /// Human-readable single line output.
    #[default]
    Compact,
}

/// Logging configuration resolved from the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// `tracing` filter expression.
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
    /// File that also receives the tool's own log lines.
    pub file: Option<Utf8PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_owned(),
            format: LogFormat::default(),
            file: None,
        }
    }
}

impl LoggingSettings {
    /// Reads `LOG_LEVEL`, `LOG_FORMAT` and the optional `LOG_FILE`.
    ///
    /// `LOG_FILE` accepts a boolean, which places the file at
    /// `LOG_DIR/LOG_FILE_NAME`, or an explicit path.
    pub fn from_snapshot(snapshot: &EnvironmentSnapshot) -> Result<Self, ConfigError> {
        let filter = snapshot
            .get_non_empty(LOG_LEVEL)
            .map_or_else(|| DEFAULT_LOG_FILTER.to_owned(), str::to_lowercase);
        let format = snapshot
            .parse::<LogFormat>(LOG_FORMAT, "'compact' or 'json'")?
            .unwrap_or_default();
        Ok(Self {
            filter,
            format,
            file: log_file(snapshot),
        })
    }
}

fn log_file(snapshot: &EnvironmentSnapshot) -> Option<Utf8PathBuf> {
    let raw = snapshot.get_non_empty(LOG_FILE)?;
    match raw.to_ascii_lowercase().as_str() {
        "0" | "false" | "no" | "off" => None,
        "1" | "true" | "yes" | "on" => {
            let directory = snapshot.get_non_empty(LOG_DIR).unwrap_or("logs");
            let name = snapshot
                .get_non_empty(LOG_FILE_NAME)
                .unwrap_or(DEFAULT_LOG_FILE_NAME);
            Some(Utf8PathBuf::from(directory).join(name))
        }
        _ => Some(Utf8PathBuf::from(raw)),
    }
}
