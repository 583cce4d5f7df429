//! Core of a LAN file-sharing and messaging server: a TCP control
//! connection per client, UDP discovery broadcast, and an on-demand
//! side channel for file transfer.

pub mod config;
pub mod discovery;
pub mod error;
pub mod master;
pub mod message;
pub mod net;
pub mod paths;
pub mod permissions;
pub mod protocol;
pub mod server;
pub mod status;
pub mod transfer;
pub mod users;
pub mod worker;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::Server;
