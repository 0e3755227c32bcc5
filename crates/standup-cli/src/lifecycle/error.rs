//! Error types for lifecycle commands.

use std::io;

use thiserror::Error;

use standup_config::ConfigError;
use standup_supervisor::{CancellationError, ProbeError, ReportError, SupervisorError};

/// Errors raised while executing lifecycle commands.
#[derive(Debug, Error)]
pub(crate) enum LifecycleError {
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Report(#[from] ReportError),
    #[error(transparent)]
    Cancellation(#[from] CancellationError),
    /// Status found at least one service that is not ready.
    #[error("service '{service}' is not ready")]
    NotReady { service: String },
    #[error("failed to write output: {0}")]
    Io(#[source] io::Error),
}

impl LifecycleError {
    pub(crate) fn failing_service(&self) -> Option<&str> {
        match self {
            Self::Supervisor(error) => error.service(),
            Self::Configuration(ConfigError::UnknownService { name, .. }) => Some(name.as_str()),
            Self::NotReady { service } => Some(service.as_str()),
            _ => None,
        }
    }
}
