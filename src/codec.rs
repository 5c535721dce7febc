//! The framing codec is an external collaborator per spec §1/§4.5, but §6
//! requires a default. Grounded on the original's `ICodec`/
//! `BuiltInFrameCodec` (`server_unix.go`: `new(BuiltInFrameCodec)` when no
//! codec option is supplied).

use crate::buffer::RingBuffer;

/// Turns a byte stream into framed messages and back. `decode` is called
/// repeatedly by `loopRead` after every socket read; each `Some` return
/// consumes the frame from `inbound` and is handed to
/// [`EventHandler::react`](crate::handler::EventHandler::react).
pub trait Codec: Send + Sync {
    /// Attempts to pull one complete frame out of `inbound`, consuming the
    /// bytes that made it up. Returns `None` if `inbound` doesn't yet hold a
    /// complete frame.
    fn decode(&self, inbound: &mut RingBuffer) -> Option<Vec<u8>>;

    /// Encodes one outgoing frame to be appended to a connection's outbound
    /// buffer.
    fn encode(&self, frame: &[u8]) -> Vec<u8>;
}

/// The default codec: every byte read is delivered as-is, with no framing.
/// Mirrors the original's `BuiltInFrameCodec`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn decode(&self, inbound: &mut RingBuffer) -> Option<Vec<u8>> {
        if inbound.is_empty() {
            return None;
        }
        let len = inbound.len();
        Some(inbound.split_to(len))
    }

    fn encode(&self, frame: &[u8]) -> Vec<u8> {
        frame.to_vec()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn pass_through_drains_whatever_is_buffered() {
        let codec = PassThroughCodec;
        let mut buf = RingBuffer::new();
        buf.append(b"ping");

        let frame = codec.decode(&mut buf).unwrap();
        assert_eq!(frame, b"ping");
        assert!(buf.is_empty());
        assert!(codec.decode(&mut buf).is_none());
    }

    #[test]
    fn encode_is_identity() {
        let codec = PassThroughCodec;
        assert_eq!(codec.encode(b"pong"), b"pong");
    }
}
