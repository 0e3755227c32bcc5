//! Error types for the CLI runtime.

use thiserror::Error;

use standup_config::ConfigError;
use standup_supervisor::telemetry::TelemetryError;

use crate::lifecycle::LifecycleError;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("{0}")]
    CliUsage(clap::Error),
    #[error("invalid configuration: {0}")]
    Configuration(#[source] ConfigError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
}

impl AppError {
    /// Service the failure is attributed to, when there is one.
    pub(crate) fn failing_service(&self) -> Option<&str> {
        match self {
            Self::Lifecycle(error) => error.failing_service(),
            Self::Configuration(ConfigError::MissingRequiredKey { service, .. }) => {
                Some(service.as_str())
            }
            Self::Configuration(ConfigError::UnknownService { name, .. }) => Some(name.as_str()),
            Self::CliUsage(_) | Self::Configuration(_) | Self::Telemetry(_) => None,
        }
    }
}
