//! Length-prefix framing over a byte stream.
//!
//! Each message travels as a `u32` big-endian payload length followed by
//! the payload itself. [`FrameDecoder`] reassembles that convention from
//! reads of arbitrary size: bytes accumulate until a full frame is
//! buffered, the frame is decoded and evicted immediately, and the
//! cursor returns to waiting for the next length word. At most one
//! fully-framed message is ever pending inside the buffer.

use crate::protocol::{DecodeError, Packet};
use std::io;

/// Size of the length word in front of every payload.
pub const LENGTH_PREFIX_BYTES: usize = 4;

/// Upper bound on a single payload. Map chunks are budgeted well below
/// this; anything larger means the stream is desynchronized or hostile.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Serializes a packet and wraps it in the length-prefix framing.
pub fn encode_frame(packet: &Packet) -> Result<Vec<u8>, bincode::Error> {
    let payload = packet.encode()?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_BYTES + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameState {
    AwaitingLength,
    AwaitingPayload(usize),
}

/// Incremental decoder for the read side of a connection.
///
/// Feed it raw bytes with [`extend`](FrameDecoder::extend), then drain
/// completed packets with [`try_next`](FrameDecoder::try_next) until it
/// returns `Ok(None)`. A decode failure consumes the offending frame,
/// so one bad message never wedges the stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    state: FrameState,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            state: FrameState::AwaitingLength,
        }
    }

    /// Appends freshly read bytes to the framing buffer.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Attempts to produce the next fully-framed packet.
    ///
    /// Returns `Ok(None)` when more bytes are needed. On
    /// [`DecodeError::FrameTooLarge`] the stream cannot be resynchronized
    /// and the caller must drop the connection; every other error has
    /// already evicted the bad frame and the stream remains usable.
    pub fn try_next(&mut self) -> Result<Option<Packet>, DecodeError> {
        loop {
            match self.state {
                FrameState::AwaitingLength => {
                    if self.buf.len() < LENGTH_PREFIX_BYTES {
                        return Ok(None);
                    }
                    let len = u32::from_be_bytes([
                        self.buf[0],
                        self.buf[1],
                        self.buf[2],
                        self.buf[3],
                    ]) as usize;
                    if len > MAX_FRAME_BYTES {
                        return Err(DecodeError::FrameTooLarge(len));
                    }
                    self.state = FrameState::AwaitingPayload(len);
                }
                FrameState::AwaitingPayload(len) => {
                    if self.buf.len() < LENGTH_PREFIX_BYTES + len {
                        return Ok(None);
                    }
                    let result =
                        Packet::decode(&self.buf[LENGTH_PREFIX_BYTES..LENGTH_PREFIX_BYTES + len]);
                    self.buf.drain(..LENGTH_PREFIX_BYTES + len);
                    self.state = FrameState::AwaitingLength;
                    return result.map(Some);
                }
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// True for errors meaning the peer is gone: the connection's tasks
/// should stop cleanly without affecting any other connection.
pub fn is_disconnect_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}

/// True for no-data-yet conditions that should be retried after a short
/// sleep rather than surfaced.
pub fn is_transient_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MapSize, Player, Vec2};

    fn sample_packets() -> Vec<Packet> {
        vec![
            Packet::ConnectRequest {
                nickname: "ada".to_string(),
            },
            Packet::ConnectAccepted {
                map_size: MapSize::new(16, 16),
            },
            Packet::PlayerState(Player {
                id: 0,
                nickname: "ada".to_string(),
                position: Some(Vec2::new(3.0, 4.0)),
            }),
            Packet::MovePlayer {
                position: Vec2::new(-1.0, 7.5),
            },
            Packet::ServerFull,
        ]
    }

    #[test]
    fn test_single_frame_roundtrip() {
        let packet = Packet::MapDataRequest;
        let frame = encode_frame(&packet).unwrap();

        let mut decoder = FrameDecoder::new();
        decoder.extend(&frame);

        assert_eq!(decoder.try_next().unwrap(), Some(packet));
        assert_eq!(decoder.try_next().unwrap(), None);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_length_prefix_is_big_endian() {
        let frame = encode_frame(&Packet::ServerFull).unwrap();
        // One-byte payload: just the tag.
        assert_eq!(&frame[..4], &[0, 0, 0, 1]);
        assert_eq!(frame.len(), 5);
    }

    #[test]
    fn test_split_at_every_boundary() {
        let packets = sample_packets();
        let mut stream = Vec::new();
        for packet in &packets {
            stream.extend_from_slice(&encode_frame(packet).unwrap());
        }

        // Feeding the stream split at any single point must still yield
        // every packet, in order.
        for split in 0..=stream.len() {
            let mut decoder = FrameDecoder::new();
            let mut out = Vec::new();

            decoder.extend(&stream[..split]);
            while let Some(packet) = decoder.try_next().unwrap() {
                out.push(packet);
            }
            decoder.extend(&stream[split..]);
            while let Some(packet) = decoder.try_next().unwrap() {
                out.push(packet);
            }

            assert_eq!(out, packets, "split at byte {}", split);
        }
    }

    #[test]
    fn test_byte_at_a_time_feed() {
        let packets = sample_packets();
        let mut stream = Vec::new();
        for packet in &packets {
            stream.extend_from_slice(&encode_frame(packet).unwrap());
        }

        let mut decoder = FrameDecoder::new();
        let mut out = Vec::new();
        for byte in stream {
            decoder.extend(&[byte]);
            while let Some(packet) = decoder.try_next().unwrap() {
                out.push(packet);
            }
        }

        assert_eq!(out, packets);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_bad_frame_is_evicted_and_stream_recovers() {
        let mut stream = Vec::new();
        // Hand-built frame with an unknown tag.
        stream.extend_from_slice(&1u32.to_be_bytes());
        stream.push(0xEE);
        stream.extend_from_slice(&encode_frame(&Packet::ServerFull).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&stream);

        assert!(matches!(
            decoder.try_next(),
            Err(DecodeError::UnknownTag(0xEE))
        ));
        // The bad frame is gone; the next one decodes normally.
        assert_eq!(decoder.try_next().unwrap(), Some(Packet::ServerFull));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_zero_length_frame_is_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&0u32.to_be_bytes());
        assert!(matches!(
            decoder.try_next(),
            Err(DecodeError::EmptyPayload)
        ));
    }

    #[test]
    fn test_oversized_length_prefix() {
        let mut decoder = FrameDecoder::new();
        decoder.extend(&(MAX_FRAME_BYTES as u32 + 1).to_be_bytes());
        assert!(matches!(
            decoder.try_next(),
            Err(DecodeError::FrameTooLarge(_))
        ));
    }

    #[test]
    fn test_error_classification() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        let block = io::Error::new(io::ErrorKind::WouldBlock, "later");
        assert!(is_disconnect_error(&reset));
        assert!(!is_disconnect_error(&block));
        assert!(is_transient_error(&block));
        assert!(!is_transient_error(&reset));
    }
}
