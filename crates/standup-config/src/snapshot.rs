//! Immutable view over resolved configuration values.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use strum::{Display, EnumString};

use crate::ConfigError;

/// Layer that supplied a resolved value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Provenance {
    /// Built-in default.
    Default,
    /// Environment file supplied via `--env-file`.
    File,
    /// Ambient process environment.
    Environment,
    /// Explicit command-line override.
    Override,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedValue {
    value: String,
    provenance: Provenance,
}

/// Resolved mapping of configuration keys to string values.
///
/// Snapshots are produced once per invocation by [`crate::resolve`] and then
/// passed by reference to every component. Nothing downstream reads the
/// process environment directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    values: BTreeMap<String, ResolvedValue>,
}

impl EnvironmentSnapshot {
    pub(crate) fn insert(&mut self, key: String, value: String, provenance: Provenance) {
        self.values.insert(key, ResolvedValue { value, provenance });
    }

    /// Builds a snapshot from literal pairs, all attributed to `provenance`.
    #[must_use]
    pub fn from_pairs<I, K, V>(pairs: I, provenance: Provenance) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut snapshot = Self::default();
        for (key, value) in pairs {
            snapshot.insert(key.into(), value.into(), provenance);
        }
        snapshot
    }

    /// Returns the raw value for `key`, including empty strings.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|resolved| resolved.value.as_str())
    }

    /// Returns the value for `key` when it is present and not blank.
    #[must_use]
    pub fn get_non_empty(&self, key: &str) -> Option<&str> {
        self.get(key)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Reports which layer supplied `key`.
    #[must_use]
    pub fn provenance(&self, key: &str) -> Option<Provenance> {
        self.values.get(key).map(|resolved| resolved.provenance)
    }

    /// Returns the value for `key`, failing when it is absent or blank.
    pub fn require(&self, key: &str, service: &str) -> Result<&str, ConfigError> {
        self.get_non_empty(key)
            .ok_or_else(|| ConfigError::MissingRequiredKey {
                key: key.to_owned(),
                service: service.to_owned(),
            })
    }

    /// Parses the value for `key`, returning `None` when it is absent or blank.
    pub fn parse<T>(&self, key: &str, expected: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
    {
        let Some(raw) = self.get_non_empty(key) else {
            return Ok(None);
        };
        raw.parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::invalid(key, raw, expected))
    }

    /// Parses `key` as a number of seconds; fractional values are accepted.
    pub fn seconds(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        let Some(raw) = self.get_non_empty(key) else {
            return Ok(None);
        };
        raw.parse::<f64>()
            .ok()
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
            .map(Some)
            .ok_or_else(|| ConfigError::invalid(key, raw, "a non-negative number of seconds"))
    }

    /// Parses `key` as a whole number of milliseconds.
    pub fn millis(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self
            .parse::<u64>(key, "a whole number of milliseconds")?
            .map(Duration::from_millis))
    }

    /// Iterates over keys supplied by the given layers, in key order.
    pub fn entries_from<'a>(
        &'a self,
        layers: &'a [Provenance],
    ) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.values
            .iter()
            .filter(|(_, resolved)| layers.contains(&resolved.provenance))
            .map(|(key, resolved)| (key.as_str(), resolved.value.as_str()))
    }

    /// Number of resolved keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys were resolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
