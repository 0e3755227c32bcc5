//! Configuration for the `standup` demo-stack supervisor.
//!
//! Configuration is resolved once per invocation from an ordered list of
//! [`ConfigSource`] layers: built-in defaults, an optional `KEY=VALUE`
//! environment file, the captured process environment, and explicit
//! command-line overrides. The result is an immutable
//! [`EnvironmentSnapshot`] that records which layer supplied each key.
//!
//! The snapshot is then turned into a [`ServiceCatalogue`]: the database,
//! backend and frontend [`ServiceDescriptor`]s in startup order, together
//! with the shared [`BackoffPolicy`] and stop grace period. Malformed
//! readiness targets, ports and durations are rejected at this stage so that
//! nothing downstream has to validate configuration again.

mod backoff;
mod command;
pub mod defaults;
mod descriptor;
mod error;
mod logging;
mod readiness;
mod resolver;
mod snapshot;

pub use backoff::{BackoffKind, BackoffPolicy};
pub use command::{CommandSplitError, split_command};
pub use defaults::{DEFAULT_ENV_FILE, DEFAULT_LOG_FILTER, builtin_defaults};
pub use descriptor::{
    LaunchSpec, ServiceCatalogue, ServiceDescriptor, ServiceKind, StackSettings,
    record_file_name,
};
pub use error::{ConfigError, SourceError};
pub use logging::{LogFormat, LoggingSettings};
pub use readiness::{
    DEFAULT_HEALTH_QUERY, ExpectedStatus, ProbeTarget, ReadinessCheck, TargetParseError,
};
pub use resolver::{
    ConfigSource, parse_assignment, parse_env_lines, read_env_file, resolve, standard_sources,
};
pub use snapshot::{EnvironmentSnapshot, Provenance};
