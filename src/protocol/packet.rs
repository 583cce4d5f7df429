//! The correlated request/response envelope.
//!
//! `Packet { id, cmd, args }` is the unit of exchange on the control
//! connection. A response reuses the request's `id` and sets `cmd` to
//! `"return"`, with `args = [statusCode, payload]`.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::StatusCode;

pub const RETURN_CMD: &str = "return";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub id: u64,
    pub cmd: String,
    pub args: Vec<Value>,
}

impl Packet {
    pub fn new(id: u64, cmd: impl Into<String>, args: Vec<Value>) -> Self {
        Packet {
            id,
            cmd: cmd.into(),
            args,
        }
    }

    /// Allocate the next id from the process-wide counter. Starts at 1.
    pub fn next_id() -> u64 {
        NEXT_ID.fetch_add(1, Ordering::SeqCst)
    }

    /// Build a `return` response correlated to `request`.
    pub fn response(request_id: u64, status: StatusCode, payload: impl Serialize) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or(Value::Null);
        Packet {
            id: request_id,
            cmd: RETURN_CMD.to_string(),
            args: vec![Value::from(status.code()), payload],
        }
    }

    pub fn is_return(&self) -> bool {
        self.cmd == RETURN_CMD
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
