//! The coordinator: one per process, owns every worker, the user
//! bindings, and message fan-out.
//!
//! Runs a short-interval tick loop rather than reacting to each event as
//! it arrives, mirroring the source design's single-threaded poll loop.
//! Every mutation of shared coordinator state — who is bound to which
//! user id, which workers exist — happens on the tick thread, so none of
//! it needs its own lock: `worker_map` is a `DashMap` only because
//! workers themselves read it concurrently (to push into each other's
//! inboxes would be wrong — only Master fans messages out), not because
//! the tick loop needs concurrent writers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::message::Message;
use crate::net::Accepted;
use crate::permissions::PermissionTable;
use crate::status::StatusCode;
use crate::users::{UserRecord, UserTable};
use crate::worker::{self, SharedContext, WorkerHandle};

pub const TICK_INTERVAL: Duration = Duration::from_millis(10);

/// A synchronous request from a Worker to Master. Every variant carries
/// its own one-shot reply channel; Master answers exactly once per ask,
/// which a worker's blocking `recv()` on the reply end depends on.
pub enum Ask {
    Login {
        peer_addr: SocketAddr,
        user_id: String,
        password: String,
        reply: Sender<Result<UserRecord, StatusCode>>,
    },
    SendMessage {
        message: Message,
        reply: Sender<StatusCode>,
    },
}

pub struct Master {
    running: Arc<AtomicBool>,
    worker_map: DashMap<SocketAddr, WorkerHandle>,
    /// user id -> bound connection, only present while a session is live.
    user_bindings: Mutex<HashMap<String, SocketAddr>>,
    users: Arc<UserTable>,
    permissions: Arc<PermissionTable>,
    shared: Arc<SharedContext>,
    accepted_rx: Receiver<Accepted>,
    ask_tx: Sender<Ask>,
    ask_rx: Receiver<Ask>,
    operator_tx: Sender<Message>,
    operator_rx: Receiver<Message>,
    observers: Mutex<Vec<Sender<Message>>>,
}

impl Master {
    pub fn new(
        users: Arc<UserTable>,
        permissions: Arc<PermissionTable>,
        shared: Arc<SharedContext>,
        accepted_rx: Receiver<Accepted>,
    ) -> Self {
        let (ask_tx, ask_rx) = unbounded();
        let (operator_tx, operator_rx) = unbounded();
        Master {
            running: Arc::new(AtomicBool::new(true)),
            worker_map: DashMap::new(),
            user_bindings: Mutex::new(HashMap::new()),
            users,
            permissions,
            shared,
            accepted_rx,
            ask_tx,
            ask_rx,
            operator_tx,
            operator_rx,
            observers: Mutex::new(Vec::new()),
        }
    }

    pub fn permissions(&self) -> &Arc<PermissionTable> {
        &self.permissions
    }

    /// Clones the channel workers use to ask Master things.
    pub fn ask_sender(&self) -> Sender<Ask> {
        self.ask_tx.clone()
    }

    /// Clones the channel an operator console uses to inject a
    /// server-sender broadcast message (`sendMessage` in the external
    /// control surface).
    pub fn operator_sender(&self) -> Sender<Message> {
        self.operator_tx.clone()
    }

    /// Registers a new observer for every message Master fans out,
    /// regardless of `distributeMessage`/per-user flags — useful for a
    /// local operator console that wants to see all chat traffic.
    pub fn subscribe(&self) -> Receiver<Message> {
        let (tx, rx) = unbounded();
        self.observers.lock().push(tx);
        rx
    }

    pub fn connected_user_count(&self) -> usize {
        self.user_bindings.lock().len()
    }

    /// Runs the tick loop until `stop()` is called. Intended to be run
    /// on its own thread by the caller (or as the main thread of the
    /// whole server, since it never returns early on its own).
    pub fn run(&self) {
        info!("master tick loop starting");
        while self.running.load(Ordering::Relaxed) {
            self.tick();
            thread::sleep(TICK_INTERVAL);
        }
        self.shutdown_all_workers();
        info!("master tick loop stopped");
    }

    /// Idempotent. Stops accepting new coordination work and disconnects
    /// every live worker; the tick loop notices on its next iteration
    /// (or, if already outside the loop, `run()`'s caller unwinds once
    /// `shutdown_all_workers` finishes).
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        self.shutdown_all_workers();
    }

    fn shutdown_all_workers(&self) {
        for entry in self.worker_map.iter() {
            entry.value().request_stop();
        }
        self.user_bindings.lock().clear();
    }

    fn tick(&self) {
        self.drain_new_connection();
        self.drain_asks();
        self.reap_dead_workers();

        let mut outgoing: Vec<Message> = self.operator_rx.try_iter().collect();
        if !outgoing.is_empty() {
            self.fan_out(&mut outgoing);
        }
    }

    fn drain_new_connection(&self) {
        match self.accepted_rx.try_recv() {
            Ok(Accepted::Connection(stream, addr)) => {
                let handle = worker::spawn(stream, addr, self.ask_tx.clone(), self.shared.clone());
                self.worker_map.insert(addr, handle);
            }
            Ok(Accepted::ListenerDied(reason)) => {
                warn!(reason, "tcp listener died; no further connections will be accepted");
            }
            Err(_) => {}
        }
    }

    fn drain_asks(&self) {
        for ask in self.ask_rx.try_iter() {
            match ask {
                Ask::Login {
                    peer_addr,
                    user_id,
                    password,
                    reply,
                } => {
                    let result = self.handle_login_ask(peer_addr, &user_id, &password);
                    let _ = reply.send(result);
                }
                Ask::SendMessage { message, reply } => {
                    // Enqueued for the fan-out pass later this same tick,
                    // so a message always appears before its own ask
                    // returns success to the sender.
                    self.fan_out(&mut vec![message]);
                    let _ = reply.send(StatusCode::Success);
                }
            }
        }
    }

    fn handle_login_ask(
        &self,
        peer_addr: SocketAddr,
        user_id: &str,
        password: &str,
    ) -> Result<UserRecord, StatusCode> {
        let record = match self.users.get(user_id) {
            Some(record) => record.clone(),
            None => return Err(StatusCode::ErrUserUndefined),
        };
        if record.password != password {
            return Err(StatusCode::ErrPswdUnmatch);
        }

        // Atomic displacement: bind the new connection and stop whatever
        // was previously bound to this user id within the same handler
        // invocation, so there is never a tick where both are live.
        let mut bindings = self.user_bindings.lock();
        if let Some(prev_addr) = bindings.insert(user_id.to_string(), peer_addr) {
            if prev_addr != peer_addr {
                if let Some(prev) = self.worker_map.get(&prev_addr) {
                    info!(%user_id, old = %prev_addr, new = %peer_addr, "displacing prior session");
                    prev.request_stop();
                }
            }
        }
        Ok(record)
    }

    fn reap_dead_workers(&self) {
        let dead: Vec<SocketAddr> = self
            .worker_map
            .iter()
            .filter(|entry| entry.value().is_finished())
            .map(|entry| *entry.key())
            .collect();
        if dead.is_empty() {
            return;
        }
        let mut bindings = self.user_bindings.lock();
        for addr in dead {
            self.worker_map.remove(&addr);
            bindings.retain(|_, bound_addr| *bound_addr != addr);
        }
    }

    fn fan_out(&self, messages: &mut Vec<Message>) {
        let observers = self.observers.lock();
        let bindings = self.user_bindings.lock();
        for message in messages.drain(..) {
            for observer in observers.iter() {
                let _ = observer.send(message.clone());
            }
            let distribute_all = self.permissions.distribute_message();
            for (user_id, addr) in bindings.iter() {
                let deliver = distribute_all || message.sender_id == *user_id || message.is_from_server();
                if !deliver {
                    continue;
                }
                if let Some(handle) = self.worker_map.get(addr) {
                    handle.push_inbox(message.clone());
                }
            }
        }
    }
}
