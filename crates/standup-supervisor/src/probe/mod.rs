//! Single-attempt readiness probes.
//!
//! A probe performs exactly one attempt against a service's
//! [`ReadinessCheck`](standup_config::ReadinessCheck) and always returns a
//! [`ReadinessResult`]. Expected failures such as refused connections,
//! unexpected HTTP statuses or a database that is still starting are
//! reported as unsuccessful results rather than errors; retrying is the
//! supervisor's job.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};

use thiserror::Error;

use standup_config::{ProbeTarget, ServiceDescriptor};

use crate::record::unix_millis;

mod database;
mod http;
mod tcp;
mod watchdog;

pub use watchdog::ProbeWatchdog;

/// Outcome of one readiness attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessResult {
    /// Service probed.
    pub service: String,
    /// One-based attempt number.
    pub attempt: u32,
    /// Whether the service is ready.
    pub success: bool,
    /// Human-readable observation.
    pub detail: String,
    /// Time the attempt took.
    pub elapsed: Duration,
    /// Unix milliseconds when the attempt finished.
    pub observed_at: u64,
}

impl ReadinessResult {
    /// Builds a result stamped with the current time.
    #[must_use]
    pub fn new(
        service: &str,
        attempt: u32,
        success: bool,
        detail: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            service: service.to_owned(),
            attempt,
            success,
            detail: detail.into(),
            elapsed,
            observed_at: unix_millis(),
        }
    }
}

/// One readiness attempt against a service.
pub trait HealthProbe: Send + Sync {
    /// Probes `service` once. Never retries and never fails.
    fn check(&self, service: &ServiceDescriptor, attempt: u32) -> ReadinessResult;

    /// Describes whatever already accepts connections on the service's
    /// socket, if anything does.
    fn occupant(&self, _service: &ServiceDescriptor) -> Option<String> {
        None
    }
}

/// Errors raised while preparing probes.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    HttpClient {
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

/// What a probe saw, before it is stamped into a [`ReadinessResult`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Observation {
    pub(crate) ready: bool,
    pub(crate) detail: String,
}

impl Observation {
    pub(crate) fn ready(detail: impl Into<String>) -> Self {
        Self {
            ready: true,
            detail: detail.into(),
        }
    }

    pub(crate) fn not_ready(detail: impl Into<String>) -> Self {
        Self {
            ready: false,
            detail: detail.into(),
        }
    }
}

/// Probe speaking TCP, HTTP and the PostgreSQL query protocol.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    http: reqwest::blocking::Client,
}

impl SystemProbe {
    /// Builds the probe and its shared HTTP client.
    pub fn new() -> Result<Self, ProbeError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| ProbeError::HttpClient { source })?;
        Ok(Self { http })
    }
}

impl HealthProbe for SystemProbe {
    fn check(&self, service: &ServiceDescriptor, attempt: u32) -> ReadinessResult {
        let started = Instant::now();
        let timeout = service.readiness.timeout;
        let observation = match &service.readiness.target {
            ProbeTarget::Tcp { host, port } => tcp::probe(host, *port, timeout),
            ProbeTarget::Http { url, expected } => http::probe(&self.http, url, expected, timeout),
            ProbeTarget::Postgres {
                host,
                port,
                user,
                database,
                password,
                query,
            } => database::probe(
                &database::Session {
                    host,
                    port: *port,
                    user,
                    database,
                    password: password.as_deref(),
                    query,
                },
                timeout,
            ),
        };
        ReadinessResult::new(
            &service.name,
            attempt,
            observation.ready,
            observation.detail,
            started.elapsed(),
        )
    }

    fn occupant(&self, service: &ServiceDescriptor) -> Option<String> {
        let (host, port) = service.readiness.target.socket()?;
        let stream = connect(host, port, service.readiness.timeout).ok()?;
        Some(
            stream
                .peer_addr()
                .map_or_else(|_| format!("{host}:{port}"), |address| address.to_string()),
        )
    }
}

fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let addresses: Vec<_> = (host, port).to_socket_addrs()?.collect();
    if addresses.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{host}:{port} resolved to no addresses"),
        ));
    }
    Ok(addresses)
}

/// Connects to the first address of `host:port` that accepts within the
/// overall `timeout`.
pub(crate) fn connect(
    host: &str,
    port: u16,
    timeout: Duration,
) -> io::Result<std::net::TcpStream> {
    let deadline = Instant::now() + timeout;
    let mut last_error = None;
    for address in resolve(host, port)? {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match std::net::TcpStream::connect_timeout(&address, remaining) {
            Ok(stream) => return Ok(stream),
            Err(error) => last_error = Some(error),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out")
    }))
}
