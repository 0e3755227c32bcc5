use std::error::Error as _;
use std::time::Duration;

use reqwest::blocking::Client;
use url::Url;

use standup_config::ExpectedStatus;

use super::Observation;

pub(super) fn probe(
    client: &Client,
    url: &Url,
    expected: &ExpectedStatus,
    timeout: Duration,
) -> Observation {
    match client.get(url.clone()).timeout(timeout).send() {
        Ok(response) => {
            let code = response.status().as_u16();
            if expected.accepts(code) {
                Observation::ready(format!("HTTP {code}"))
            } else {
                Observation::not_ready(format!("HTTP {code} (expected {expected})"))
            }
        }
        Err(error) => Observation::not_ready(describe(&error)),
    }
}

/// Renders the transport error with its innermost cause, which is where
/// "connection refused" and friends live.
fn describe(error: &reqwest::Error) -> String {
    let kind = if error.is_timeout() {
        "timed out"
    } else if error.is_connect() {
        "connection failed"
    } else {
        "request failed"
    };
    let mut root: &dyn std::error::Error = error;
    while let Some(source) = root.source() {
        root = source;
    }
    format!("{kind}: {root}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn serve_once(status_line: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let mut reader = BufReader::new(stream);
                let mut line = String::new();
                while reader.read_line(&mut line).map(|read| read > 2).unwrap_or(false) {
                    line.clear();
                }
                let mut stream = reader.into_inner();
                let _ = write!(
                    stream,
                    "HTTP/1.1 {status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                );
            }
        });
        Url::parse(&format!("http://127.0.0.1:{port}/api/articles")).expect("url")
    }

    fn client() -> Client {
        Client::builder().build().expect("client")
    }

    #[test]
    fn success_status_is_ready() {
        let url = serve_once("200 OK");
        let observation = probe(
            &client(),
            &url,
            &ExpectedStatus::default(),
            Duration::from_secs(2),
        );
        assert!(observation.ready, "{}", observation.detail);
        assert_eq!(observation.detail, "HTTP 200");
    }

    #[test]
    fn unexpected_status_is_not_ready() {
        let url = serve_once("503 Service Unavailable");
        let observation = probe(
            &client(),
            &url,
            &ExpectedStatus::default(),
            Duration::from_secs(2),
        );
        assert!(!observation.ready);
        assert_eq!(observation.detail, "HTTP 503 (expected 2xx)");
    }

    #[test]
    fn explicit_status_set_is_honoured() {
        let url = serve_once("401 Unauthorized");
        let observation = probe(
            &client(),
            &url,
            &ExpectedStatus::OneOf(vec![200, 401]),
            Duration::from_secs(2),
        );
        assert!(observation.ready, "{}", observation.detail);
    }

    #[test]
    fn refused_connection_is_not_ready() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
            listener.local_addr().expect("addr").port()
        };
        let url = Url::parse(&format!("http://127.0.0.1:{port}/")).expect("url");
        let observation = probe(
            &client(),
            &url,
            &ExpectedStatus::default(),
            Duration::from_secs(1),
        );
        assert!(!observation.ready);
        assert!(observation.detail.starts_with("connection failed"));
    }
}
