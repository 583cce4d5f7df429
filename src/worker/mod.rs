//! Per-connection state machine: reader + writer + dispatcher.
//!
//! Three threads per connection: a Recver that frames inbound packets
//! onto a request queue (and simply stops — closing the queue — on any
//! read error or EOF), a Sender that drains a response queue onto the
//! socket (and stops when that queue is closed), and the Worker's own
//! main thread, which owns all per-connection state and is the only
//! thread that ever touches it.
//!
//! Stopping a worker is a single action: shut the socket down. That
//! breaks the Recver's blocking read, which closes the request queue,
//! which unblocks the main thread's blocking receive and makes it exit,
//! which drops the response queue's sender and lets the Sender thread
//! exit in turn. No separate stop signal needs to reach three places.

use std::fs;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde_json::Value;
use tracing::{info, warn};

use crate::master::Ask;
use crate::message::Message;
use crate::paths::resolve_under_root;
use crate::permissions::PermissionTable;
use crate::protocol::{Codec, Packet};
use crate::status::StatusCode;
use crate::transfer::{Direction, FileTransferDescriptor};
use crate::users::UserRecord;

/// Immutable, shared-by-clone context every worker needs: the permission
/// table, the resolved share root, and the transfer/packet size caps.
pub struct SharedContext {
    pub permissions: Arc<PermissionTable>,
    pub share_root: PathBuf,
    pub max_transfer_size: u64,
    pub max_packet_size: u32,
}

/// Master's handle onto a running worker. Holds only what Master needs:
/// enough to detect death, force a disconnect, and push inbox messages.
/// Never touches the worker's connection or command-handling state
/// directly — that's off limits outside the worker's own thread.
pub struct WorkerHandle {
    peer_addr: SocketAddr,
    shutdown_stream: TcpStream,
    inbox_tx: Sender<Message>,
    main_thread: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_finished(&self) -> bool {
        self.main_thread.is_finished()
    }

    /// Forces the worker to disconnect. Non-blocking: shuts the socket
    /// down and returns immediately, letting the worker's own threads
    /// unwind on their own time.
    pub fn request_stop(&self) {
        let _ = self.shutdown_stream.shutdown(Shutdown::Both);
    }

    /// Best-effort: if the worker has already died, the send silently
    /// fails and the message is dropped, which is correct — there is no
    /// inbox left to deliver into.
    pub fn push_inbox(&self, message: Message) {
        let _ = self.inbox_tx.send(message);
    }
}

struct MainLoopCtx {
    peer_addr: SocketAddr,
    ask_tx: Sender<Ask>,
    request_rx: Receiver<Packet>,
    response_tx: Sender<Packet>,
    inbox_rx: Receiver<Message>,
    shared: Arc<SharedContext>,
}

/// Spawns the three threads for a freshly accepted connection and
/// returns Master's handle onto it.
pub fn spawn(
    stream: TcpStream,
    peer_addr: SocketAddr,
    ask_tx: Sender<Ask>,
    shared: Arc<SharedContext>,
) -> WorkerHandle {
    let (request_tx, request_rx) = unbounded::<Packet>();
    let (response_tx, response_rx) = unbounded::<Packet>();
    let (inbox_tx, inbox_rx) = unbounded::<Message>();

    let recver_stream = stream.try_clone().expect("failed to clone socket for recver");
    let sender_stream = stream.try_clone().expect("failed to clone socket for sender");
    let shutdown_stream = stream.try_clone().expect("failed to clone socket for shutdown");

    let recv_codec = Codec::new(shared.max_packet_size);
    thread::Builder::new()
        .name(format!("worker-{peer_addr}-recv"))
        .spawn(move || {
            let mut stream = recver_stream;
            loop {
                match recv_codec.read_packet(&mut stream) {
                    Ok(Some(pkt)) => {
                        if request_tx.send(pkt).is_err() {
                            return;
                        }
                    }
                    Ok(None) => return,
                    Err(e) => {
                        warn!(%peer_addr, error = %e, "recver stopping on stream error");
                        return;
                    }
                }
            }
        })
        .expect("failed to spawn recver thread");

    let send_codec = Codec::new(shared.max_packet_size);
    thread::Builder::new()
        .name(format!("worker-{peer_addr}-send"))
        .spawn(move || {
            let mut stream = sender_stream;
            for pkt in response_rx.iter() {
                if let Err(e) = send_codec.write_packet(&mut stream, &pkt) {
                    warn!(%peer_addr, error = %e, "sender stopping on stream error");
                    return;
                }
            }
        })
        .expect("failed to spawn sender thread");

    let main_ctx = MainLoopCtx {
        peer_addr,
        ask_tx,
        request_rx,
        response_tx,
        inbox_rx,
        shared,
    };
    let main_thread = thread::Builder::new()
        .name(format!("worker-{peer_addr}-main"))
        .spawn(move || run_main_loop(main_ctx))
        .expect("failed to spawn worker main thread");

    WorkerHandle {
        peer_addr,
        shutdown_stream,
        inbox_tx,
        main_thread,
    }
}

fn run_main_loop(ctx: MainLoopCtx) {
    let mut user: Option<UserRecord> = None;
    info!(peer = %ctx.peer_addr, "worker started");
    loop {
        let pkt = match ctx.request_rx.recv() {
            Ok(pkt) => pkt,
            Err(_) => break,
        };
        let response = dispatch(&ctx, &mut user, pkt);
        if ctx.response_tx.send(response).is_err() {
            break;
        }
    }
    info!(peer = %ctx.peer_addr, "worker exiting");
}

fn dispatch(ctx: &MainLoopCtx, user: &mut Option<UserRecord>, pkt: Packet) -> Packet {
    if user.is_none() {
        return if pkt.cmd == "login" {
            handle_login(ctx, user, &pkt)
        } else {
            warn!(peer = %ctx.peer_addr, cmd = %pkt.cmd, "rejected command: not logged in");
            Packet::response(pkt.id, StatusCode::ErrNoLogin, Value::Null)
        };
    }

    match pkt.cmd.as_str() {
        "login" => Packet::response(pkt.id, StatusCode::ErrUserRelogin, Value::Null),
        "getFileList" => handle_get_file_list(ctx, user.as_ref().unwrap(), &pkt),
        "getMessage" => handle_get_message(ctx, user.as_ref().unwrap(), &pkt),
        "putMessage" => handle_put_message(ctx, user.as_ref().unwrap(), &pkt),
        "getFile" => handle_get_file(ctx, user.as_ref().unwrap(), &pkt),
        "putFile" => handle_put_file(ctx, user.as_ref().unwrap(), &pkt),
        _ => Packet::response(pkt.id, StatusCode::ErrUndefCmd, Value::Null),
    }
}

fn handle_login(ctx: &MainLoopCtx, user: &mut Option<UserRecord>, pkt: &Packet) -> Packet {
    let (Some(user_id), Some(password)) = (arg_str(&pkt.args, 0), arg_str(&pkt.args, 1)) else {
        return Packet::response(pkt.id, StatusCode::ErrUndefCmd, Value::Null);
    };

    let (reply_tx, reply_rx) = bounded(1);
    let sent = ctx.ask_tx.send(Ask::Login {
        peer_addr: ctx.peer_addr,
        user_id: user_id.to_string(),
        password: password.to_string(),
        reply: reply_tx,
    });
    if sent.is_err() {
        return Packet::response(pkt.id, StatusCode::ErrServerBusy, Value::Null);
    }
    match reply_rx.recv() {
        Ok(Ok(record)) => {
            *user = Some(record);
            Packet::response(pkt.id, StatusCode::Success, Value::Null)
        }
        Ok(Err(code)) => Packet::response(pkt.id, code, Value::Null),
        Err(_) => Packet::response(pkt.id, StatusCode::ErrServerBusy, Value::Null),
    }
}

fn handle_get_file_list(ctx: &MainLoopCtx, _user: &UserRecord, pkt: &Packet) -> Packet {
    if !ctx.shared.permissions.all_user_get_filelist() {
        info!(peer = %ctx.peer_addr, "getFileList denied: no global permission");
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    let Some(rel) = arg_str(&pkt.args, 0) else {
        return Packet::response(pkt.id, StatusCode::ErrUndefCmd, Value::Null);
    };
    let Some(dir_path) = resolve_under_root(&ctx.shared.share_root, rel) else {
        return Packet::response(pkt.id, StatusCode::ErrDirNotExist, Value::Null);
    };
    if !dir_path.is_dir() {
        return Packet::response(pkt.id, StatusCode::ErrDirNotExist, Value::Null);
    }

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let entries = match fs::read_dir(&dir_path) {
        Ok(entries) => entries,
        Err(_) => return Packet::response(pkt.id, StatusCode::ErrDirNotExist, Value::Null),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if path.is_dir() {
            dirs.push(name);
        } else if let Ok(meta) = entry.metadata() {
            let suffix = path
                .extension()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            files.push((name, suffix, meta.len(), mtime));
        }
    }
    Packet::response(pkt.id, StatusCode::Success, (dirs, files))
}

fn handle_get_message(ctx: &MainLoopCtx, user: &UserRecord, pkt: &Packet) -> Packet {
    if !ctx.shared.permissions.all_user_get_message() {
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    if !user.perms.msg_down {
        // Drain so messages don't pile up forever for a permanently
        // denied user.
        while ctx.inbox_rx.try_recv().is_ok() {}
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    let messages: Vec<Message> = ctx.inbox_rx.try_iter().collect();
    Packet::response(pkt.id, StatusCode::Success, messages)
}

fn handle_put_message(ctx: &MainLoopCtx, user: &UserRecord, pkt: &Packet) -> Packet {
    if !ctx.shared.permissions.all_user_put_message() {
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    if !user.perms.msg_up {
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    let Some(body) = arg_str(&pkt.args, 0) else {
        return Packet::response(pkt.id, StatusCode::ErrUndefCmd, Value::Null);
    };
    let message = Message::new(user.id.clone(), body.to_string());
    let (reply_tx, reply_rx) = bounded(1);
    if ctx
        .ask_tx
        .send(Ask::SendMessage {
            message,
            reply: reply_tx,
        })
        .is_err()
    {
        return Packet::response(pkt.id, StatusCode::ErrServerBusy, Value::Null);
    }
    let status = reply_rx.recv().unwrap_or(StatusCode::ErrServerBusy);
    Packet::response(pkt.id, status, Value::Null)
}

fn handle_get_file(ctx: &MainLoopCtx, user: &UserRecord, pkt: &Packet) -> Packet {
    if !ctx.shared.permissions.all_user_download_file() {
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    if !user.perms.file_down {
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    let Some(rel) = arg_str(&pkt.args, 0) else {
        return Packet::response(pkt.id, StatusCode::ErrUndefCmd, Value::Null);
    };
    let start_offset = pkt.args.get(1).and_then(Value::as_u64).unwrap_or(0);

    let resolved = resolve_under_root(&ctx.shared.share_root, rel);
    let path = match resolved {
        Some(p) if p.is_file() => p,
        _ => return Packet::response(pkt.id, StatusCode::ErrFileNotExist, Value::Null),
    };
    let size = match fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(_) => return Packet::response(pkt.id, StatusCode::ErrFileNotExist, Value::Null),
    };

    let (listener, port) = match FileTransferDescriptor::bind_ephemeral() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(peer = %ctx.peer_addr, error = %e, "failed to bind file-transfer listener");
            return Packet::response(pkt.id, StatusCode::ErrServerBusy, Value::Null);
        }
    };
    info!(peer = %ctx.peer_addr, path = ?path, size, port, "starting file download");
    let response = Packet::response(pkt.id, StatusCode::Success, (port, size));
    FileTransferDescriptor {
        direction: Direction::Send,
        path,
        size,
        start_offset,
        expected_peer_ip: ctx.peer_addr.ip(),
    }
    .spawn(listener);
    response
}

fn handle_put_file(ctx: &MainLoopCtx, user: &UserRecord, pkt: &Packet) -> Packet {
    if !ctx.shared.permissions.all_user_upload_file() {
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    if !user.perms.file_up {
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }
    let Some(rel) = arg_str(&pkt.args, 0) else {
        return Packet::response(pkt.id, StatusCode::ErrUndefCmd, Value::Null);
    };
    let Some(size) = pkt.args.get(1).and_then(Value::as_u64) else {
        return Packet::response(pkt.id, StatusCode::ErrUndefCmd, Value::Null);
    };

    let Some(path) = resolve_under_root(&ctx.shared.share_root, rel) else {
        // Escaping the root refuses to reveal path structure outside the
        // share: surface it as a permission denial, not a 404-shaped code.
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    };
    if path.exists() {
        return Packet::response(pkt.id, StatusCode::ErrFileAlreadyExist, Value::Null);
    }
    if size > ctx.shared.max_transfer_size {
        warn!(peer = %ctx.peer_addr, size, cap = ctx.shared.max_transfer_size, "upload rejected: exceeds configured cap");
        return Packet::response(pkt.id, StatusCode::ErrNoPermission, Value::Null);
    }

    let (listener, port) = match FileTransferDescriptor::bind_ephemeral() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(peer = %ctx.peer_addr, error = %e, "failed to bind file-transfer listener");
            return Packet::response(pkt.id, StatusCode::ErrServerBusy, Value::Null);
        }
    };
    info!(peer = %ctx.peer_addr, path = ?path, size, port, "starting file upload");
    let response = Packet::response(pkt.id, StatusCode::Success, [port]);
    FileTransferDescriptor {
        direction: Direction::Receive,
        path,
        size,
        start_offset: 0,
        expected_peer_ip: ctx.peer_addr.ip(),
    }
    .spawn(listener);
    response
}

fn arg_str(args: &[Value], idx: usize) -> Option<&str> {
    args.get(idx).and_then(Value::as_str)
}
