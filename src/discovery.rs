//! UDP discovery responder.
//!
//! Binds `0.0.0.0:<discovery_port>` (57777 by default) and answers any
//! datagram whose payload is exactly `REQUIRE_SERVER` with
//! `RESPONSE_SERVER_<name>_<ip>_<port>`. Malformed probes are silently
//! dropped. Runs until the process exits or the handle is asked to stop.

use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

const PROBE_PAYLOAD: &str = "REQUIRE_SERVER";

pub struct DiscoveryResponder {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    local_port: u16,
}

impl DiscoveryResponder {
    /// Spawns the responder thread. `advertise_ip` and `tcp_port` are
    /// baked into every response; `server_name` must already be
    /// alphanumerics-and-`-` (validated by `ServerConfig`).
    pub fn spawn(
        bind_port: u16,
        server_name: String,
        advertise_ip: String,
        tcp_port: u16,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", bind_port))?;
        // Bounded so the responder thread notices a stop request promptly
        // instead of blocking on recv_from forever.
        socket.set_read_timeout(Some(Duration::from_millis(250)))?;
        let local_port = socket.local_addr()?.port();

        let running = Arc::new(AtomicBool::new(true));
        let running_thread = running.clone();
        let response = format!("RESPONSE_SERVER_<{server_name}>_{advertise_ip}_{tcp_port}");

        let handle = thread::Builder::new()
            .name("discovery-responder".into())
            .spawn(move || {
                info!(bind_port, %response, "discovery responder listening");
                let mut buf = [0u8; 1024];
                while running_thread.load(Ordering::Relaxed) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, peer)) => {
                            if &buf[..len] == PROBE_PAYLOAD.as_bytes() {
                                if let Err(e) = socket.send_to(response.as_bytes(), peer) {
                                    warn!(%peer, error = %e, "failed to send discovery response");
                                }
                            } else {
                                debug!(%peer, "dropped malformed discovery probe");
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                        Err(e) => {
                            error!(error = %e, "discovery socket error, exiting responder thread");
                            break;
                        }
                    }
                }
                info!("discovery responder stopped");
            })
            .expect("failed to spawn discovery-responder thread");

        Ok(DiscoveryResponder {
            running,
            handle: Some(handle),
            local_port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DiscoveryResponder {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket as ClientSocket;
    use std::time::Duration;

    #[test]
    fn responds_to_require_server_probe() {
        let mut responder =
            DiscoveryResponder::spawn(0, "Test".into(), "127.0.0.1".into(), 2277).unwrap();
        let client = ClientSocket::bind("0.0.0.0:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        client
            .send_to(PROBE_PAYLOAD.as_bytes(), ("127.0.0.1", responder.local_port()))
            .unwrap();

        let mut buf = [0u8; 256];
        let (len, _) = client.recv_from(&mut buf).unwrap();
        let response = std::str::from_utf8(&buf[..len]).unwrap();
        assert_eq!(response, "RESPONSE_SERVER_<Test>_127.0.0.1_2277");
        responder.stop();
    }

    #[test]
    fn malformed_probe_gets_no_response() {
        let mut responder =
            DiscoveryResponder::spawn(0, "Test".into(), "127.0.0.1".into(), 2277).unwrap();
        let client = ClientSocket::bind("0.0.0.0:0").unwrap();
        client
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        client
            .send_to(b"GARBAGE", ("127.0.0.1", responder.local_port()))
            .unwrap();

        let mut buf = [0u8; 256];
        let result = client.recv_from(&mut buf);
        assert!(result.is_err(), "server must not answer a malformed probe");
        responder.stop();
    }
}
