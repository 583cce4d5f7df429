//! Wire protocol: packet envelope and length-prefixed framing.

pub mod codec;
pub mod packet;

pub use codec::{Codec, DEFAULT_MAX_PACKET_SIZE};
pub use packet::Packet;
