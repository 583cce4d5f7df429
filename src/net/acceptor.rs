//! TCP accept loop.
//!
//! Blocks on `accept()` of the main listener and pushes `(TcpStream,
//! SocketAddr)` pairs to Master's inbound queue. Closing the listener
//! (or any accept error) is the shutdown signal: the acceptor exits and
//! pushes one sentinel so Master can observe listener death instead of
//! silently starving.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::{info, warn};

pub enum Accepted {
    Connection(TcpStream, SocketAddr),
    ListenerDied(String),
}

pub struct Acceptor {
    handle: Option<JoinHandle<()>>,
}

impl Acceptor {
    pub fn spawn(listener: TcpListener, tx: Sender<Accepted>) -> Self {
        let handle = thread::Builder::new()
            .name("acceptor".into())
            .spawn(move || {
                info!(addr = ?listener.local_addr().ok(), "acceptor listening");
                loop {
                    match listener.accept() {
                        Ok((stream, addr)) => {
                            info!(%addr, "accepted connection");
                            if tx.send(Accepted::Connection(stream, addr)).is_err() {
                                // Master is gone; nothing left to do.
                                return;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "acceptor exiting after listener error");
                            let _ = tx.send(Accepted::ListenerDied(e.to_string()));
                            return;
                        }
                    }
                }
            })
            .expect("failed to spawn acceptor thread");

        Acceptor {
            handle: Some(handle),
        }
    }

    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
