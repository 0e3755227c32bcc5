//! Layered configuration resolution.
//!
//! Sources are merged in the order given, later layers overriding earlier
//! ones for keys present in both. The conventional stack built by
//! [`standard_sources`] is: built-in defaults, the environment file, the
//! process environment, then explicit command-line overrides.

use std::fs;
use std::path::{Path, PathBuf};

use crate::defaults::builtin_defaults;
use crate::error::SourceError;
use crate::snapshot::Provenance;
use crate::{ConfigError, EnvironmentSnapshot};

/// One layer of configuration input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in defaults.
    Defaults(Vec<(String, String)>),
    /// A `KEY=VALUE` file. Optional files may be absent.
    File {
        /// Location of the file.
        path: PathBuf,
        /// Whether a missing file is an error.
        required: bool,
    },
    /// Captured process environment.
    Environment(Vec<(String, String)>),
    /// Explicit overrides from the command line.
    Overrides(Vec<(String, String)>),
}

/// Merges the given sources into an immutable snapshot.
///
/// # Errors
///
/// Returns [`ConfigError::UnreadableSource`] when a required file is missing,
/// when any declared file cannot be read, or when a line is not a
/// `KEY=VALUE` pair.
pub fn resolve(sources: &[ConfigSource]) -> Result<EnvironmentSnapshot, ConfigError> {
    let mut snapshot = EnvironmentSnapshot::default();
    for source in sources {
        match source {
            ConfigSource::Defaults(pairs) => merge(&mut snapshot, pairs, Provenance::Default),
            ConfigSource::File { path, required } => {
                if !*required && !path.exists() {
                    continue;
                }
                let pairs = read_env_file(path)?;
                merge(&mut snapshot, &pairs, Provenance::File);
            }
            ConfigSource::Environment(pairs) => {
                merge(&mut snapshot, pairs, Provenance::Environment);
            }
            ConfigSource::Overrides(pairs) => merge(&mut snapshot, pairs, Provenance::Override),
        }
    }
    Ok(snapshot)
}

/// Builds the conventional source stack used by the CLI.
#[must_use]
pub fn standard_sources(
    env_file: Option<(PathBuf, bool)>,
    environment: Vec<(String, String)>,
    overrides: Vec<(String, String)>,
) -> Vec<ConfigSource> {
    let mut sources = vec![ConfigSource::Defaults(builtin_defaults())];
    if let Some((path, required)) = env_file {
        sources.push(ConfigSource::File { path, required });
    }
    sources.push(ConfigSource::Environment(environment));
    sources.push(ConfigSource::Overrides(overrides));
    sources
}

fn merge(snapshot: &mut EnvironmentSnapshot, pairs: &[(String, String)], provenance: Provenance) {
    for (key, value) in pairs {
        snapshot.insert(key.clone(), value.clone(), provenance);
    }
}

/// Reads and parses a `KEY=VALUE` file.
///
/// # Errors
///
/// Returns [`ConfigError::UnreadableSource`] when the file cannot be read or
/// contains a malformed line.
pub fn read_env_file(path: &Path) -> Result<Vec<(String, String)>, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::UnreadableSource {
        path: path.to_path_buf(),
        source: SourceError::Io(source),
    })?;
    parse_env_lines(&content).map_err(|source| ConfigError::UnreadableSource {
        path: path.to_path_buf(),
        source,
    })
}

/// Parses `KEY=VALUE` lines, skipping blanks and `#` comments.
///
/// An optional leading `export ` is accepted and matching surrounding quotes
/// are stripped from values. Later duplicates win.
///
/// # Errors
///
/// Returns [`SourceError::Malformed`] for lines without `=` or with an empty
/// key.
pub fn parse_env_lines(content: &str) -> Result<Vec<(String, String)>, SourceError> {
    let mut pairs = Vec::new();
    for (index, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line);
        let (key, value) = parse_assignment(line).ok_or_else(|| SourceError::Malformed {
            line: index + 1,
            content: raw_line.to_owned(),
        })?;
        pairs.push((key, value));
    }
    Ok(pairs)
}

/// Parses a single `KEY=VALUE` assignment such as a `--set` argument.
#[must_use]
pub fn parse_assignment(text: &str) -> Option<(String, String)> {
    let (key, value) = text.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_owned(), unquote(value.trim()).to_owned()))
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}
