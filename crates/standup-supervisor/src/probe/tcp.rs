use std::time::Duration;

use super::{Observation, connect};

pub(super) fn probe(host: &str, port: u16, timeout: Duration) -> Observation {
    match connect(host, port, timeout) {
        Ok(stream) => {
            let peer = stream
                .peer_addr()
                .map_or_else(|_| format!("{host}:{port}"), |addr| addr.to_string());
            Observation::ready(format!("accepted connection on {peer}"))
        }
        Err(error) => Observation::not_ready(format!("{host}:{port}: {error}")),
    }
}
