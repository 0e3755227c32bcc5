//! Service descriptors derived from a resolved snapshot.

use std::collections::BTreeMap;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::Serialize;
use strum::{Display, EnumString};

use crate::backoff::BackoffPolicy;
use crate::command::split_command;
use crate::defaults::{
    API_PORT, BROWSER, CONTAINER_RUNTIME, DB_HEALTH_QUERY, DB_HOST, DB_NAME, DB_PASSWORD, DB_PORT,
    DB_USER, FRONTEND_PORT, HEALTHCHECK_TIMEOUT, LOG_DIR, NODE_ENV, SERVICE_WORKDIR, STATE_DIR, STOP_GRACE_SECS,
};
use crate::readiness::{DEFAULT_HEALTH_QUERY, ExpectedStatus, ProbeTarget, ReadinessCheck};
use crate::snapshot::Provenance;
use crate::{ConfigError, EnvironmentSnapshot};

const DEFAULT_HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Role of a service within the demo stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// PostgreSQL instance.
    Database,
    /// HTTP API server.
    Backend,
    /// Frontend dev server.
    Frontend,
}

impl ServiceKind {
    /// Every kind in declaration (startup) order.
    pub const ALL: [Self; 3] = [Self::Database, Self::Backend, Self::Frontend];

    /// Prefix used for per-service configuration keys.
    #[must_use]
    pub const fn env_prefix(self) -> &'static str {
        match self {
            Self::Database => "DATABASE",
            Self::Backend => "BACKEND",
            Self::Frontend => "FRONTEND",
        }
    }

    const fn dependencies(self) -> &'static [Self] {
        match self {
            Self::Database => &[],
            Self::Backend => &[Self::Database],
            Self::Frontend => &[Self::Backend],
        }
    }
}

/// How a service is brought up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchSpec {
    /// A local child process.
    Process {
        /// Executable name or path.
        program: String,
        /// Arguments passed verbatim.
        args: Vec<String>,
    },
    /// A named container managed through the container runtime CLI.
    Container {
        /// Container name.
        name: String,
        /// Image used when the container does not exist yet.
        image: Option<String>,
        /// Extra `run` arguments placed before the image.
        args: Vec<String>,
    },
    /// Managed elsewhere; only probed.
    External,
}

/// Immutable description of one managed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unique service name.
    pub name: String,
    /// Role within the stack.
    pub kind: ServiceKind,
    /// Launch strategy.
    pub launch: LaunchSpec,
    /// Directory the child process runs in.
    pub working_directory: Utf8PathBuf,
    /// Variables added to the child environment.
    pub environment: BTreeMap<String, String>,
    /// Readiness check gating dependants.
    pub readiness: ReadinessCheck,
    /// Services that must be ready first, in order.
    pub depends_on: Vec<String>,
    /// Append-only log receiving the child's output.
    pub log_path: Utf8PathBuf,
    /// Location of the persisted process record.
    pub record_path: Utf8PathBuf,
}

/// File name of the record kept for `service` inside the state directory.
#[must_use]
pub fn record_file_name(service: &str) -> String {
    format!("{service}.json")
}

/// Stack-wide settings that are not tied to a single service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackSettings {
    /// Readiness retry policy.
    pub backoff: BackoffPolicy,
    /// Time allowed for graceful shutdown before escalating.
    pub stop_grace: Duration,
    /// Directory holding process records.
    pub state_dir: Utf8PathBuf,
    /// Container CLI executable.
    pub container_runtime: String,
}

/// The full set of services, in declaration order, plus shared settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCatalogue {
    services: Vec<ServiceDescriptor>,
    settings: StackSettings,
}

impl ServiceCatalogue {
    /// Builds a catalogue, validating that dependencies exist and are acyclic.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownService`] for a dependency that names no
    /// descriptor and [`ConfigError::DependencyCycle`] when dependencies loop.
    pub fn new(
        services: Vec<ServiceDescriptor>,
        settings: StackSettings,
    ) -> Result<Self, ConfigError> {
        let catalogue = Self { services, settings };
        for service in &catalogue.services {
            catalogue.dependency_closure(&service.name)?;
        }
        Ok(catalogue)
    }

    /// Derives the standard three-service stack from `snapshot`.
    ///
    /// # Errors
    ///
    /// Fails when a required key is missing or any value cannot be parsed.
    pub fn from_snapshot(snapshot: &EnvironmentSnapshot) -> Result<Self, ConfigError> {
        let settings = StackSettings {
            backoff: BackoffPolicy::from_snapshot(snapshot)?,
            stop_grace: snapshot
                .seconds(STOP_GRACE_SECS)?
                .unwrap_or(DEFAULT_STOP_GRACE),
            state_dir: path_or(snapshot, STATE_DIR, ".demo-app-cache"),
            container_runtime: snapshot
                .get_non_empty(CONTAINER_RUNTIME)
                .unwrap_or("docker")
                .to_owned(),
        };
        let services = ServiceKind::ALL
            .into_iter()
            .map(|kind| describe(snapshot, kind, &settings.state_dir))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(services, settings)
    }

    /// Descriptors in declaration order.
    #[must_use]
    pub fn services(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    /// Looks up a descriptor by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Looks up a descriptor by name, failing with the list of known names.
    pub fn require(&self, name: &str) -> Result<&ServiceDescriptor, ConfigError> {
        self.get(name).ok_or_else(|| ConfigError::UnknownService {
            name: name.to_owned(),
            known: self
                .services
                .iter()
                .map(|service| service.name.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
    }

    /// Readiness retry policy.
    #[must_use]
    pub fn backoff(&self) -> &BackoffPolicy {
        &self.settings.backoff
    }

    /// Graceful stop window.
    #[must_use]
    pub fn stop_grace(&self) -> Duration {
        self.settings.stop_grace
    }

    /// Directory holding process records.
    #[must_use]
    pub fn state_dir(&self) -> &Utf8PathBuf {
        &self.settings.state_dir
    }

    /// Container CLI executable.
    #[must_use]
    pub fn container_runtime(&self) -> &str {
        &self.settings.container_runtime
    }

    /// Transitive dependencies of `name`, dependencies first, excluding `name`.
    ///
    /// # Errors
    ///
    /// Fails for unknown services and dependency cycles.
    pub fn dependency_closure(&self, name: &str) -> Result<Vec<&ServiceDescriptor>, ConfigError> {
        let mut ordered = Vec::new();
        let mut visiting = Vec::new();
        self.visit(name, &mut visiting, &mut ordered)?;
        ordered.pop();
        Ok(ordered)
    }

    fn visit<'a>(
        &'a self,
        name: &str,
        visiting: &mut Vec<String>,
        ordered: &mut Vec<&'a ServiceDescriptor>,
    ) -> Result<(), ConfigError> {
        if ordered.iter().any(|done| done.name == name) {
            return Ok(());
        }
        if visiting.iter().any(|open| open == name) {
            return Err(ConfigError::DependencyCycle {
                service: name.to_owned(),
            });
        }
        let service = self.require(name)?;
        visiting.push(name.to_owned());
        for dependency in &service.depends_on {
            self.visit(dependency, visiting, ordered)?;
        }
        visiting.pop();
        ordered.push(service);
        Ok(())
    }
}

fn describe(
    snapshot: &EnvironmentSnapshot,
    kind: ServiceKind,
    state_dir: &Utf8PathBuf,
) -> Result<ServiceDescriptor, ConfigError> {
    let name = kind.to_string();
    let prefix = kind.env_prefix();
    let log_dir = path_or(snapshot, LOG_DIR, "logs");
    let log_path = snapshot
        .get_non_empty(&format!("{prefix}_LOG_PATH"))
        .map_or_else(|| log_dir.join(format!("{name}-dev.log")), Utf8PathBuf::from);
    let working_directory = snapshot
        .get_non_empty(&format!("{prefix}_WORKDIR"))
        .or_else(|| snapshot.get_non_empty(SERVICE_WORKDIR))
        .map_or_else(|| Utf8PathBuf::from("."), Utf8PathBuf::from);

    Ok(ServiceDescriptor {
        launch: launch_spec(snapshot, prefix)?,
        environment: child_environment(snapshot, kind)?,
        readiness: readiness_check(snapshot, kind)?,
        depends_on: kind
            .dependencies()
            .iter()
            .map(ToString::to_string)
            .collect(),
        record_path: state_dir.join(record_file_name(&name)),
        working_directory,
        log_path,
        kind,
        name,
    })
}

fn path_or(snapshot: &EnvironmentSnapshot, key: &str, fallback: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(snapshot.get_non_empty(key).unwrap_or(fallback))
}

fn split_value(snapshot: &EnvironmentSnapshot, key: &str) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = snapshot.get_non_empty(key) else {
        return Ok(Vec::new());
    };
    split_command(raw).map_err(|error| ConfigError::invalid(key, raw, error.to_string()))
}

/// A configured container takes precedence over a command, since commands
/// carry built-in defaults.
fn launch_spec(snapshot: &EnvironmentSnapshot, prefix: &str) -> Result<LaunchSpec, ConfigError> {
    if let Some(name) = snapshot.get_non_empty(&format!("{prefix}_CONTAINER")) {
        return Ok(LaunchSpec::Container {
            name: name.to_owned(),
            image: snapshot
                .get_non_empty(&format!("{prefix}_IMAGE"))
                .map(str::to_owned),
            args: split_value(snapshot, &format!("{prefix}_CONTAINER_ARGS"))?,
        });
    }
    let mut words = split_value(snapshot, &format!("{prefix}_COMMAND"))?.into_iter();
    Ok(match words.next() {
        Some(program) => LaunchSpec::Process {
            program,
            args: words.collect(),
        },
        None => LaunchSpec::External,
    })
}

fn port(snapshot: &EnvironmentSnapshot, key: &str, fallback: u16) -> Result<u16, ConfigError> {
    Ok(snapshot
        .parse::<u16>(key, "a TCP port number")?
        .unwrap_or(fallback))
}

fn child_environment(
    snapshot: &EnvironmentSnapshot,
    kind: ServiceKind,
) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut environment: BTreeMap<String, String> = snapshot
        .entries_from(&[Provenance::File, Provenance::Override])
        .map(|(key, value)| (key.to_owned(), value.to_owned()))
        .collect();
    if let Some(node_env) = snapshot.get_non_empty(NODE_ENV) {
        environment.insert(NODE_ENV.to_owned(), node_env.to_owned());
    }
    match kind {
        ServiceKind::Backend => {
            environment.insert("PORT".to_owned(), port(snapshot, API_PORT, 3001)?.to_string());
        }
        ServiceKind::Frontend => {
            environment.insert(
                FRONTEND_PORT.to_owned(),
                port(snapshot, FRONTEND_PORT, 3000)?.to_string(),
            );
            if let Some(browser) = snapshot.get_non_empty(BROWSER) {
                environment.insert(BROWSER.to_owned(), browser.to_owned());
            }
        }
        ServiceKind::Database => {}
    }
    Ok(environment)
}

fn readiness_check(
    snapshot: &EnvironmentSnapshot,
    kind: ServiceKind,
) -> Result<ReadinessCheck, ConfigError> {
    let prefix = kind.env_prefix();
    let endpoint_key = format!("{prefix}_HEALTH_ENDPOINT");
    let target = match snapshot.get_non_empty(&endpoint_key) {
        Some(raw) => raw
            .parse::<ProbeTarget>()
            .map_err(|error| ConfigError::invalid(&endpoint_key, raw, error.to_string()))?,
        None => default_target(snapshot, kind)?,
    };

    let status_key = format!("{prefix}_EXPECT_STATUS");
    let target = match snapshot.get_non_empty(&status_key) {
        Some(raw) => {
            let status = raw.parse::<ExpectedStatus>().map_err(|error| {
                ConfigError::invalid(&status_key, raw, error.to_string())
            })?;
            target.with_expected_status(status)
        }
        None => target,
    };
    let target = target.with_database_session(
        snapshot.get(DB_PASSWORD).filter(|password| !password.is_empty()),
        snapshot.get_non_empty(DB_HEALTH_QUERY),
    );

    let timeout = snapshot
        .seconds(HEALTHCHECK_TIMEOUT)?
        .unwrap_or(DEFAULT_HEALTHCHECK_TIMEOUT);
    if timeout.is_zero() {
        return Err(ConfigError::invalid(
            HEALTHCHECK_TIMEOUT,
            snapshot.get(HEALTHCHECK_TIMEOUT).unwrap_or_default(),
            "a positive number of seconds",
        ));
    }
    Ok(ReadinessCheck { target, timeout })
}

fn default_target(
    snapshot: &EnvironmentSnapshot,
    kind: ServiceKind,
) -> Result<ProbeTarget, ConfigError> {
    let name = kind.to_string();
    let http = |url: String, key: &str| {
        url::Url::parse(&url)
            .map(|url| ProbeTarget::Http {
                url,
                expected: ExpectedStatus::default(),
            })
            .map_err(|error| ConfigError::invalid(key, &url, error.to_string()))
    };
    match kind {
        ServiceKind::Database => Ok(ProbeTarget::Postgres {
            host: snapshot.get_non_empty(DB_HOST).unwrap_or("localhost").to_owned(),
            port: port(snapshot, DB_PORT, 5432)?,
            user: snapshot.require(DB_USER, &name)?.to_owned(),
            database: snapshot.require(DB_NAME, &name)?.to_owned(),
            password: None,
            query: DEFAULT_HEALTH_QUERY.to_owned(),
        }),
        ServiceKind::Backend => http(
            format!(
                "http://localhost:{}/api/articles",
                port(snapshot, API_PORT, 3001)?
            ),
            API_PORT,
        ),
        ServiceKind::Frontend => http(
            format!("http://localhost:{}/", port(snapshot, FRONTEND_PORT, 3000)?),
            FRONTEND_PORT,
        ),
    }
}
