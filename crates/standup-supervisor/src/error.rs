//! Error surface for record persistence and service supervision.

use std::io;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use standup_config::ConfigError;

use crate::control::ControlError;

/// Errors raised by the process record store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The state directory could not be created.
    #[error("failed to create state directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A record file could not be read.
    #[error("failed to read process record '{path}': {source}")]
    Read {
        /// Record path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A record file could not be written.
    #[error("failed to write process record '{path}': {source}")]
    Write {
        /// Record path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A record file could not be removed.
    #[error("failed to remove process record '{path}': {source}")]
    Remove {
        /// Record path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A record file exists but does not hold a valid record.
    #[error("process record '{path}' is corrupt: {source}")]
    Corrupt {
        /// Record path.
        path: Utf8PathBuf,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// A record could not be encoded.
    #[error("failed to encode process record for '{service}': {source}")]
    Encode {
        /// Service whose record failed to encode.
        service: String,
        /// Encoder error.
        #[source]
        source: serde_json::Error,
    },
    /// The service name cannot be used as a file name.
    #[error("service name '{name}' cannot be used as a record file name")]
    InvalidName {
        /// Offending name.
        name: String,
    },
}

/// Errors raised while starting, stopping or inspecting services.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Configuration was invalid or named an unknown service.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The service could not be launched.
    #[error("failed to launch service '{service}': {source}")]
    Launch {
        /// Service being launched.
        service: String,
        /// Underlying control error.
        #[source]
        source: ControlError,
    },
    /// Something else already accepts connections on the service's socket.
    #[error(
        "cannot launch service '{service}': {occupant} is already accepting connections; free the port first"
    )]
    PortInUse {
        /// Service being launched.
        service: String,
        /// Address that answered.
        occupant: String,
    },
    /// Readiness was not confirmed within the retry window.
    #[error(
        "service '{service}' did not become ready after {attempts} attempt(s) in {elapsed:?}: {detail}"
    )]
    ReadinessTimeout {
        /// Service being awaited.
        service: String,
        /// Probe attempts made.
        attempts: u32,
        /// Time spent waiting.
        elapsed: Duration,
        /// Detail reported by the last probe.
        detail: String,
    },
    /// The recorded process is no longer running.
    #[error("service '{service}' is no longer running: {detail}")]
    ProcessLost {
        /// Affected service.
        service: String,
        /// What was observed.
        detail: String,
    },
    /// Reading or writing a process record failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Waiting was cancelled by a termination signal.
    #[error("interrupted while waiting for service '{service}'; it was left running")]
    Interrupted {
        /// Service being awaited.
        service: String,
    },
    /// Signalling or inspecting the service process failed.
    #[error("failed to control service '{service}': {source}")]
    Signal {
        /// Affected service.
        service: String,
        /// Underlying control error.
        #[source]
        source: ControlError,
    },
    /// A dependency could not be brought up.
    #[error("service '{service}' cannot start because dependency '{dependency}' failed: {source}")]
    DependencyFailed {
        /// Service that was requested.
        service: String,
        /// Dependency that failed.
        dependency: String,
        /// Failure raised for the dependency.
        #[source]
        source: Box<SupervisorError>,
    },
}

impl SupervisorError {
    /// Name of the service that actually failed, when there is one.
    ///
    /// Dependency failures resolve to the dependency rather than the service
    /// that was requested.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        match self {
            Self::DependencyFailed {
                dependency, source, ..
            } => source.service().or(Some(dependency.as_str())),
            Self::Launch { service, .. }
            | Self::PortInUse { service, .. }
            | Self::ReadinessTimeout { service, .. }
            | Self::ProcessLost { service, .. }
            | Self::Interrupted { service }
            | Self::Signal { service, .. } => Some(service.as_str()),
            Self::Config(ConfigError::UnknownService { name, .. }) => Some(name.as_str()),
            Self::Config(_) | Self::Store(_) => None,
        }
    }
}
