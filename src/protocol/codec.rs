//! Length-prefixed framing over a byte stream.
//!
//! Wire form: `len(4 bytes, big-endian) ++ body`, where `body` is the
//! UTF-8 JSON encoding of a [`Packet`]. The reader loops until it has
//! accumulated exactly the requested number of bytes — a short read is
//! not end-of-message, only a closed stream mid-read is.

use std::io::{Read, Write};

use crate::error::ServerError;
use crate::protocol::packet::Packet;

/// Default cap on a single packet's body size, to keep a hostile or
/// corrupt 4-byte length header from driving an unbounded allocation.
pub const DEFAULT_MAX_PACKET_SIZE: u32 = 16 * 1024 * 1024;

pub struct Codec {
    max_packet_size: u32,
}

impl Default for Codec {
    fn default() -> Self {
        Codec {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }
}

impl Codec {
    pub fn new(max_packet_size: u32) -> Self {
        Codec { max_packet_size }
    }

    /// Read exactly one framed packet. A clean EOF before any byte of the
    /// length header is read is reported as `Ok(None)`; anything else that
    /// truncates a frame is `Err(ServerError::PeerDisconnected)`.
    pub fn read_packet<R: Read>(&self, stream: &mut R) -> Result<Option<Packet>, ServerError> {
        let mut len_buf = [0u8; 4];
        match read_exact_or_eof(stream, &mut len_buf)? {
            false => return Ok(None),
            true => {}
        }
        let len = u32::from_be_bytes(len_buf);
        if len > self.max_packet_size {
            return Err(ServerError::PacketTooLarge {
                len,
                max: self.max_packet_size,
            });
        }
        let mut body = vec![0u8; len as usize];
        read_exact_full(stream, &mut body)?;
        let packet = Packet::decode(&body)?;
        Ok(Some(packet))
    }

    pub fn write_packet<W: Write>(&self, stream: &mut W, packet: &Packet) -> Result<(), ServerError> {
        let body = packet.encode()?;
        let len = body.len() as u32;
        stream
            .write_all(&len.to_be_bytes())
            .map_err(|e| ServerError::io(e, "writing packet length header"))?;
        stream
            .write_all(&body)
            .map_err(|e| ServerError::io(e, "writing packet body"))?;
        Ok(())
    }
}

/// Reads exactly `buf.len()` bytes, looping over short reads. Returns
/// `Ok(false)` if the stream is already at EOF before any byte is read,
/// `Ok(true)` on a full read, and an error if EOF is hit partway through.
fn read_exact_or_eof<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<bool, ServerError> {
    let mut read = 0;
    while read < buf.len() {
        let n = stream
            .read(&mut buf[read..])
            .map_err(|e| ServerError::io(e, "reading packet frame"))?;
        if n == 0 {
            if read == 0 {
                return Ok(false);
            }
            return Err(ServerError::PeerDisconnected);
        }
        read += n;
    }
    Ok(true)
}

fn read_exact_full<R: Read>(stream: &mut R, buf: &mut [u8]) -> Result<(), ServerError> {
    match read_exact_or_eof(stream, buf)? {
        true => Ok(()),
        false => Err(ServerError::PeerDisconnected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::io::Cursor;

    #[test]
    fn round_trip_through_cursor() {
        let codec = Codec::default();
        let pkt = Packet::new(1, "getFileList", vec![Value::from("/")]);
        let mut buf = Vec::new();
        codec.write_packet(&mut buf, &pkt).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = codec.read_packet(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn clean_eof_before_header_is_none() {
        let codec = Codec::default();
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(codec.read_packet(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let codec = Codec::default();
        // Claim a 10-byte body but supply only 3.
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(&[1, 2, 3]);
        let mut cursor = Cursor::new(buf);
        assert!(codec.read_packet(&mut cursor).is_err());
    }

    #[test]
    fn oversized_length_header_is_rejected() {
        let codec = Codec::new(16);
        let mut buf = Vec::new();
        buf.extend_from_slice(&1024u32.to_be_bytes());
        let mut cursor = Cursor::new(buf);
        let err = codec.read_packet(&mut cursor).unwrap_err();
        assert!(matches!(err, ServerError::PacketTooLarge { .. }));
    }
}
