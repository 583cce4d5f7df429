//! Transport-level plumbing: the TCP accept loop.

pub mod acceptor;

pub use acceptor::{Acceptor, Accepted};
