//! Declarative readiness checks attached to each service.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use url::Url;

const DEFAULT_POSTGRES_PORT: u16 = 5432;

/// Statement run by the database readiness check unless overridden.
pub const DEFAULT_HEALTH_QUERY: &str = "SELECT 1";

/// HTTP status codes that count as ready.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExpectedStatus {
    /// Any `2xx` response.
    #[default]
    AnySuccess,
    /// Exactly one of the listed codes.
    OneOf(Vec<u16>),
}

impl ExpectedStatus {
    /// Whether `code` satisfies the expectation.
    #[must_use]
    pub fn accepts(&self, code: u16) -> bool {
        match self {
            Self::AnySuccess => (200..300).contains(&code),
            Self::OneOf(codes) => codes.contains(&code),
        }
    }
}

impl FromStr for ExpectedStatus {
    type Err = TargetParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let codes = input
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u16>()
                    .ok()
                    .filter(|code| (100..600).contains(code))
                    .ok_or_else(|| TargetParseError::InvalidStatus(part.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if codes.is_empty() {
            return Ok(Self::AnySuccess);
        }
        Ok(Self::OneOf(codes))
    }
}

impl fmt::Display for ExpectedStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnySuccess => formatter.write_str("2xx"),
            Self::OneOf(codes) => {
                let rendered: Vec<String> = codes.iter().map(u16::to_string).collect();
                formatter.write_str(&rendered.join(","))
            }
        }
    }
}

/// What a readiness probe talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeTarget {
    /// Plain TCP connect.
    Tcp {
        /// Host name or address.
        host: String,
        /// Port number.
        port: u16,
    },
    /// HTTP GET with an expected status set.
    Http {
        /// Fully qualified URL.
        url: Url,
        /// Status codes that count as ready.
        expected: ExpectedStatus,
    },
    /// PostgreSQL login followed by a round-trip query.
    Postgres {
        /// Host name or address.
        host: String,
        /// Port number.
        port: u16,
        /// Role to log in as.
        user: String,
        /// Database to connect to.
        database: String,
        /// Password offered when the server asks for one.
        password: Option<String>,
        /// Statement that must complete without error.
        query: String,
    },
}

impl ProbeTarget {
    /// Replaces the accepted HTTP status set; other targets are unchanged.
    #[must_use]
    pub fn with_expected_status(self, status: ExpectedStatus) -> Self {
        match self {
            Self::Http { url, .. } => Self::Http {
                url,
                expected: status,
            },
            other => other,
        }
    }

    /// Host and port the target listens on.
    #[must_use]
    pub fn socket(&self) -> Option<(&str, u16)> {
        match self {
            Self::Tcp { host, port } | Self::Postgres { host, port, .. } => {
                Some((host.as_str(), *port))
            }
            Self::Http { url, .. } => Some((url.host_str()?, url.port_or_known_default()?)),
        }
    }

    /// Supplies the database password and readiness query.
    ///
    /// A password embedded in the endpoint URL is kept. Other targets are
    /// unchanged.
    #[must_use]
    pub fn with_database_session(self, password: Option<&str>, query: Option<&str>) -> Self {
        match self {
            Self::Postgres {
                host,
                port,
                user,
                database,
                password: embedded,
                query: current,
            } => Self::Postgres {
                host,
                port,
                user,
                database,
                password: embedded.or_else(|| password.map(str::to_owned)),
                query: query.map_or(current, str::to_owned),
            },
            other => other,
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(formatter, "tcp://{host}:{port}"),
            Self::Http { url, expected } => write!(formatter, "{url} (expect {expected})"),
            Self::Postgres {
                host,
                port,
                user,
                database,
                ..
            } => write!(formatter, "postgres://{user}@{host}:{port}/{database}"),
        }
    }
}

impl FromStr for ProbeTarget {
    type Err = TargetParseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let url = Url::parse(input)?;
        match url.scheme() {
            "tcp" => {
                let host = require_host(&url, input)?;
                let port = url
                    .port()
                    .ok_or_else(|| TargetParseError::MissingPort(input.to_owned()))?;
                Ok(Self::Tcp { host, port })
            }
            "http" | "https" => {
                require_host(&url, input)?;
                Ok(Self::Http {
                    url,
                    expected: ExpectedStatus::default(),
                })
            }
            "postgres" | "postgresql" => {
                let host = require_host(&url, input)?;
                let user = url.username();
                if user.is_empty() {
                    return Err(TargetParseError::MissingUser(input.to_owned()));
                }
                let database = url.path().trim_start_matches('/');
                if database.is_empty() {
                    return Err(TargetParseError::MissingDatabase(input.to_owned()));
                }
                Ok(Self::Postgres {
                    host,
                    port: url.port().unwrap_or(DEFAULT_POSTGRES_PORT),
                    user: user.to_owned(),
                    database: database.to_owned(),
                    password: url.password().map(str::to_owned),
                    query: DEFAULT_HEALTH_QUERY.to_owned(),
                })
            }
            other => Err(TargetParseError::UnsupportedScheme(other.to_owned())),
        }
    }
}

fn require_host(url: &Url, input: &str) -> Result<String, TargetParseError> {
    url.host_str()
        .filter(|host| !host.is_empty())
        .map(str::to_owned)
        .ok_or_else(|| TargetParseError::MissingHost(input.to_owned()))
}

/// Errors encountered while parsing a [`ProbeTarget`] from text.
#[derive(Debug, Error)]
pub enum TargetParseError {
    /// Scheme was not recognised.
    #[error("unsupported readiness scheme '{0}'")]
    UnsupportedScheme(String),
    /// Host name was missing.
    #[error("missing host in '{0}'")]
    MissingHost(String),
    /// TCP port was missing.
    #[error("missing port in '{0}'")]
    MissingPort(String),
    /// Postgres role was missing.
    #[error("missing user in '{0}'")]
    MissingUser(String),
    /// Postgres database was missing.
    #[error("missing database in '{0}'")]
    MissingDatabase(String),
    /// An expected status entry was not an HTTP code.
    #[error("invalid HTTP status '{0}'")]
    InvalidStatus(String),
    /// The URL itself could not be parsed.
    #[error(transparent)]
    Url(#[from] url::ParseError),
}

/// One service's readiness check: a target plus a per-attempt time budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    /// What to probe.
    pub target: ProbeTarget,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
}
