//! Configuration loading for the CLI.
//!
//! The process environment is captured exactly once per invocation and
//! layered between the env-file and the `--set` overrides.

use standup_config::{DEFAULT_ENV_FILE, EnvironmentSnapshot, resolve, standard_sources};

use crate::AppError;
use crate::cli::Cli;

pub(crate) trait ConfigLoader {
    /// Resolves the configuration snapshot for one invocation.
    fn load(&self, cli: &Cli) -> Result<EnvironmentSnapshot, AppError>;
}

/// Loader reading the real process environment.
pub(crate) struct ProcessEnvironmentLoader;

impl ConfigLoader for ProcessEnvironmentLoader {
    fn load(&self, cli: &Cli) -> Result<EnvironmentSnapshot, AppError> {
        resolve_with(cli, std::env::vars().collect())
    }
}

/// Loader with a fixed environment, for tests and embedding.
#[cfg(test)]
pub(crate) struct FixedEnvironmentLoader(pub(crate) Vec<(String, String)>);

#[cfg(test)]
impl ConfigLoader for FixedEnvironmentLoader {
    fn load(&self, cli: &Cli) -> Result<EnvironmentSnapshot, AppError> {
        resolve_with(cli, self.0.clone())
    }
}

fn resolve_with(
    cli: &Cli,
    environment: Vec<(String, String)>,
) -> Result<EnvironmentSnapshot, AppError> {
    // Only an explicitly named env-file is required to exist.
    let env_file = match &cli.env_file {
        Some(path) => (path.clone(), true),
        None => (DEFAULT_ENV_FILE.into(), false),
    };
    let sources = standard_sources(Some(env_file), environment, cli.overrides.clone());
    resolve(&sources).map_err(AppError::Configuration)
}
