//! Readiness as a logged-in PostgreSQL round trip.
//!
//! The check authenticates with the configured role and password, runs the
//! readiness query with the simple query protocol and reports ready only
//! once the server answers with `CommandComplete` and `ReadyForQuery`. Any
//! `ErrorResponse`, whether during login (SQLSTATE `57P03` while the server
//! is recovering, `3D000` for a missing database) or for the query itself,
//! is reported as not ready with its code and message.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use postgres::config::SslMode;
use postgres::{Config, NoTls};

use super::Observation;

/// Connection parameters for one readiness attempt.
pub(super) struct Session<'a> {
    pub(super) host: &'a str,
    pub(super) port: u16,
    pub(super) user: &'a str,
    pub(super) database: &'a str,
    pub(super) password: Option<&'a str>,
    pub(super) query: &'a str,
}

impl Session<'_> {
    fn config(&self, timeout: Duration) -> Config {
        let mut config = Config::new();
        config
            .host(self.host)
            .port(self.port)
            .user(self.user)
            .dbname(self.database)
            .application_name(env!("CARGO_PKG_NAME"))
            .ssl_mode(SslMode::Disable)
            .connect_timeout(timeout);
        if let Some(password) = self.password {
            config.password(password);
        }
        config
    }
}

pub(super) fn probe(session: &Session<'_>, timeout: Duration) -> Observation {
    let config = session.config(timeout);
    let query = session.query.to_owned();
    let (sender, receiver) = mpsc::channel();
    // The client has no read deadline of its own, so a silent server is
    // bounded by waiting on a helper thread.
    let spawned = thread::Builder::new()
        .name(String::from("probe-postgres"))
        .spawn(move || {
            let _ = sender.send(round_trip(&config, &query));
        });
    if let Err(error) = spawned {
        return Observation::not_ready(format!("could not start database check: {error}"));
    }
    match receiver.recv_timeout(timeout) {
        Ok(Ok(())) => Observation::ready(format!(
            "'{}' succeeded as '{}' on '{}'",
            session.query, session.user, session.database
        )),
        Ok(Err(error)) => Observation::not_ready(describe(&error)),
        Err(_) => Observation::not_ready(format!(
            "{}:{}: no reply within {timeout:?}",
            session.host, session.port
        )),
    }
}

fn round_trip(config: &Config, query: &str) -> Result<(), postgres::Error> {
    let mut client = config.connect(NoTls)?;
    client.batch_execute(query)?;
    client.close()
}

/// Formats server errors as `SQLSTATE: message`; other failures verbatim.
fn describe(error: &postgres::Error) -> String {
    match error.as_db_error() {
        Some(server) => format!("{}: {}", server.code().code(), server.message()),
        None => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::time::Instant;

    /// One step of a scripted backend.
    enum Step {
        Reply(Vec<u8>),
        Receive(u8),
    }

    /// Accepts one connection, reads the startup packet and plays `script`.
    ///
    /// Every frontend message is forwarded on the channel; the startup packet
    /// arrives with tag `0`.
    fn fake_server(script: Vec<Step>) -> (u16, mpsc::Receiver<(u8, Vec<u8>)>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
            let Some(startup) = read_body(&mut stream) else {
                return;
            };
            let _ = sender.send((0, startup));
            for step in script {
                match step {
                    Step::Reply(bytes) => {
                        if stream.write_all(&bytes).is_err() {
                            return;
                        }
                    }
                    Step::Receive(expected) => {
                        let mut tag = [0_u8; 1];
                        if stream.read_exact(&mut tag).is_err() || tag != [expected] {
                            return;
                        }
                        let Some(body) = read_body(&mut stream) else {
                            return;
                        };
                        let _ = sender.send((expected, body));
                    }
                }
            }
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest);
        });
        (port, receiver)
    }

    fn read_body(stream: &mut TcpStream) -> Option<Vec<u8>> {
        let mut length = [0_u8; 4];
        stream.read_exact(&mut length).ok()?;
        let total = usize::try_from(u32::from_be_bytes(length)).ok()?;
        let mut body = vec![0_u8; total.checked_sub(4)?];
        stream.read_exact(&mut body).ok()?;
        Some(body)
    }

    fn message(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut bytes = vec![tag];
        let length = u32::try_from(body.len() + 4).expect("length fits");
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    fn authentication(code: u32, extra: &[u8]) -> Vec<u8> {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(extra);
        message(b'R', &body)
    }

    fn idle() -> Vec<u8> {
        message(b'Z', b"I")
    }

    fn session<'a>(port: u16, password: Option<&'a str>) -> Session<'a> {
        Session {
            host: "127.0.0.1",
            port,
            user: "conduit",
            database: "realworld",
            password,
            query: "SELECT 1",
        }
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack
            .windows(needle.len())
            .any(|window| window == needle)
    }

    #[test]
    fn logged_in_query_round_trip_is_ready() {
        let (port, received) = fake_server(vec![
            Step::Reply(authentication(3, &[])),
            Step::Receive(b'p'),
            Step::Reply([authentication(0, &[]), idle()].concat()),
            Step::Receive(b'Q'),
            Step::Reply([message(b'C', b"SELECT 1\0"), idle()].concat()),
        ]);

        let observation = probe(&session(port, Some("s3cret")), Duration::from_secs(2));

        assert!(observation.ready, "{}", observation.detail);
        let (_, startup) = received.recv().expect("startup packet");
        assert!(contains(&startup, b"user\0conduit\0"));
        assert!(contains(&startup, b"database\0realworld\0"));
        let (_, password) = received.recv().expect("password message");
        assert_eq!(password, b"s3cret\0");
        let (_, query) = received.recv().expect("query message");
        assert_eq!(query, b"SELECT 1\0");
    }

    #[test]
    fn error_after_authentication_is_not_ready() {
        let body = b"SFATAL\0C3D000\0Mdatabase \"realworld\" does not exist\0\0";
        let (port, _received) = fake_server(vec![Step::Reply(
            [authentication(0, &[]), message(b'E', body)].concat(),
        )]);

        let observation = probe(&session(port, None), Duration::from_secs(2));

        assert!(!observation.ready);
        assert_eq!(
            observation.detail,
            "3D000: database \"realworld\" does not exist"
        );
    }

    #[test]
    fn password_challenge_without_password_is_not_ready() {
        let (port, _received) = fake_server(vec![Step::Reply(authentication(
            10,
            b"SCRAM-SHA-256\0\0",
        ))]);

        let observation = probe(&session(port, None), Duration::from_secs(2));

        assert!(!observation.ready);
        assert!(observation.detail.contains("password"), "{}", observation.detail);
    }

    #[test]
    fn failing_query_is_not_ready() {
        let body = b"SERROR\0C42P01\0Mrelation \"missing\" does not exist\0\0";
        let (port, _received) = fake_server(vec![
            Step::Reply([authentication(0, &[]), idle()].concat()),
            Step::Receive(b'Q'),
            Step::Reply([message(b'E', body), idle()].concat()),
        ]);

        let observation = probe(&session(port, None), Duration::from_secs(2));

        assert!(!observation.ready);
        assert_eq!(
            observation.detail,
            "42P01: relation \"missing\" does not exist"
        );
    }

    #[test]
    fn starting_up_error_is_not_ready() {
        let body = b"SFATAL\0C57P03\0Mthe database system is starting up\0\0";
        let (port, _received) = fake_server(vec![Step::Reply(message(b'E', body))]);

        let observation = probe(&session(port, None), Duration::from_secs(2));

        assert!(!observation.ready);
        assert_eq!(
            observation.detail,
            "57P03: the database system is starting up"
        );
    }

    #[test]
    fn garbage_reply_is_not_ready() {
        let (port, _received) = fake_server(vec![Step::Reply(
            b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec(),
        )]);

        let observation = probe(&session(port, None), Duration::from_secs(2));

        assert!(!observation.ready);
    }

    #[test]
    fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let started = Instant::now();
        let observation = probe(&session(port, None), Duration::from_millis(300));

        assert!(!observation.ready);
        assert!(started.elapsed() < Duration::from_secs(2));
        drop(listener);
    }
}
