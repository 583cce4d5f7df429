//! Unified error type for the server core.
//!
//! Mirrors the teacher's `thiserror`-based error enum: one flat type for
//! everything that can abort a connection or a startup path. Per-request
//! protocol failures are represented as [`crate::status::StatusCode`]
//! values on the wire, not as `ServerError` — this type never reaches a
//! client.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("I/O error: {source} (context: {context})")]
    Io {
        source: io::Error,
        context: String,
    },

    #[error("packet length {len} exceeds the maximum of {max}")]
    PacketTooLarge { len: u32, max: u32 },

    #[error("connection closed mid-packet")]
    PeerDisconnected,

    #[error("malformed packet body: {0}")]
    MalformedPacket(#[from] serde_json::Error),

    #[error("failed to bind {addr}: {source}")]
    BindFailed { addr: SocketAddr, source: io::Error },

    #[error("shared directory does not exist: {path:?}")]
    ShareDirMissing { path: PathBuf },

    #[error("user list is malformed at line {line}: {reason}")]
    UserListMalformed { line: usize, reason: String },

    #[error("duplicate user id in user list: {id}")]
    DuplicateUser { id: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("master coordinator is no longer running")]
    MasterStopped,
}

impl ServerError {
    pub fn io(source: io::Error, context: impl Into<String>) -> Self {
        ServerError::Io {
            source,
            context: context.into(),
        }
    }
}
