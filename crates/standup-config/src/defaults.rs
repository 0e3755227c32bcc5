//! Configuration keys and their built-in defaults.

/// Directory holding per-service process records.
pub const STATE_DIR: &str = "STATE_DIR";
/// Directory receiving per-service log files.
pub const LOG_DIR: &str = "LOG_DIR";
/// Working directory used when a service does not override it.
pub const SERVICE_WORKDIR: &str = "SERVICE_WORKDIR";
/// Backend listening port.
pub const API_PORT: &str = "API_PORT";
/// Frontend dev server port.
pub const FRONTEND_PORT: &str = "FRONTEND_PORT";
/// Container CLI used for container-backed services.
pub const CONTAINER_RUNTIME: &str = "CONTAINER_RUNTIME";
/// Database host.
pub const DB_HOST: &str = "DB_HOST";
/// Database port.
pub const DB_PORT: &str = "DB_PORT";
/// Database role used by the readiness check.
pub const DB_USER: &str = "DB_USER";
/// Database name used by the readiness check.
pub const DB_NAME: &str = "DB_NAME";
/// Database password offered by the readiness check.
pub const DB_PASSWORD: &str = "DB_PASSWORD";
/// Statement the database readiness check runs.
pub const DB_HEALTH_QUERY: &str = "DB_HEALTH_QUERY";
/// Per-attempt probe timeout in seconds.
pub const HEALTHCHECK_TIMEOUT: &str = "HEALTHCHECK_TIMEOUT";
/// Total readiness window in seconds.
pub const STARTUP_TIMEOUT: &str = "STARTUP_TIMEOUT";
/// Upper bound on probe attempts.
pub const PROBE_MAX_ATTEMPTS: &str = "PROBE_MAX_ATTEMPTS";
/// Base delay between probe attempts in milliseconds.
pub const PROBE_INTERVAL_MS: &str = "PROBE_INTERVAL_MS";
/// Delay growth strategy between attempts.
pub const PROBE_BACKOFF: &str = "PROBE_BACKOFF";
/// Cap for exponential delays in milliseconds.
pub const PROBE_MAX_INTERVAL_MS: &str = "PROBE_MAX_INTERVAL_MS";
/// Grace period before a stop escalates to a forced kill.
pub const STOP_GRACE_SECS: &str = "STOP_GRACE_SECS";
/// Tracing filter expression.
pub const LOG_LEVEL: &str = "LOG_LEVEL";
/// Log output format.
pub const LOG_FORMAT: &str = "LOG_FORMAT";
/// Enables, or names, a file receiving the tool's own log lines.
pub const LOG_FILE: &str = "LOG_FILE";
/// File name used under `LOG_DIR` when `LOG_FILE` is a boolean.
pub const LOG_FILE_NAME: &str = "LOG_FILE_NAME";
/// Node environment forwarded to the dev servers.
pub const NODE_ENV: &str = "NODE_ENV";
/// Browser launcher forwarded to the frontend dev server.
pub const BROWSER: &str = "BROWSER";

/// Default env-file consulted when `--env-file` is not given.
pub const DEFAULT_ENV_FILE: &str = "config/demo.env";

/// Default tool log file name.
pub const DEFAULT_LOG_FILE_NAME: &str = "standup.log";

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

const DEFAULTS: &[(&str, &str)] = &[
    (STATE_DIR, ".demo-app-cache"),
    (LOG_DIR, "logs"),
    (SERVICE_WORKDIR, "demo-app/src"),
    (API_PORT, "3001"),
    (FRONTEND_PORT, "3000"),
    ("BACKEND_COMMAND", "npm run dev -w backend"),
    ("FRONTEND_COMMAND", "npm run dev -w frontend"),
    (CONTAINER_RUNTIME, "docker"),
    (DB_HOST, "localhost"),
    (DB_PORT, "5432"),
    (DB_HEALTH_QUERY, crate::readiness::DEFAULT_HEALTH_QUERY),
    (HEALTHCHECK_TIMEOUT, "2"),
    (STARTUP_TIMEOUT, "30"),
    (PROBE_MAX_ATTEMPTS, "30"),
    (PROBE_INTERVAL_MS, "1000"),
    (PROBE_BACKOFF, "fixed"),
    (PROBE_MAX_INTERVAL_MS, "5000"),
    (STOP_GRACE_SECS, "10"),
    (LOG_LEVEL, DEFAULT_LOG_FILTER),
    (LOG_FORMAT, "compact"),
    (NODE_ENV, "development"),
    (BROWSER, "none"),
];

/// Built-in defaults, the lowest-precedence configuration layer.
#[must_use]
pub fn builtin_defaults() -> Vec<(String, String)> {
    DEFAULTS
        .iter()
        .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
        .collect()
}
