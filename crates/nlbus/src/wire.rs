// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message framing.
//!
//! Every datagram carries one or more frames. A frame is a fixed 16-byte
//! header followed by the payload, padded with zeros to a 4-byte boundary:
//!
//! ```text
//! +-------------+-----------+------------+---------------+-------------+
//! | length: u32 | type: u16 | flags: u16 | sequence: u32 | sender: u32 |
//! +-------------+-----------+------------+---------------+-------------+
//! | payload ...                                      | padding (0..3)  |
//! +--------------------------------------------------+-----------------+
//! ```
//!
//! `length` counts the header and the unpadded payload. Integers are host
//! byte order. The `sender` field is written by the transport on receipt;
//! encoders fill in their own identity, which the transport overwrites.

use crate::cursor::{align4, ByteCursor};
use crate::error::{NlError, Result};

/// Size of the fixed frame header.
pub const HEADER_LEN: usize = 16;

/// Byte offset of the `sender` field inside the header.
pub const SENDER_OFFSET: usize = 12;

/// Default maximum payload accepted by [`MessageCodec::encode`].
pub const DEFAULT_MAX_PAYLOAD: usize = 8192;

/// Largest payload a single datagram can carry.
pub const MAX_PAYLOAD_LIMIT: usize = u16::MAX as usize - HEADER_LEN;

/// Reserved control message types.
pub mod msg_type {
    /// Nothing, ignore.
    pub const NOOP: u16 = 1;
    /// Error report.
    pub const ERROR: u16 = 2;
    /// End of a single logical exchange.
    pub const DONE: u16 = 3;
    /// Data was lost.
    pub const OVERRUN: u16 = 4;
    /// First type available to protocols.
    pub const MIN_TYPE: u16 = 0x10;

    /// Whether `kind` is one of the reserved control types.
    pub fn is_control(kind: u16) -> bool {
        kind < MIN_TYPE
    }
}

/// Header flag bits.
pub mod flags {
    pub const REQUEST: u16 = 0x01;
    pub const MULTI: u16 = 0x02;
    pub const ACK: u16 = 0x04;
    pub const ECHO: u16 = 0x08;
    pub const DUMP_INTR: u16 = 0x10;
}

/// Fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameHeader {
    pub length: u32,
    pub kind: u16,
    pub flags: u16,
    pub sequence: u32,
    pub sender: u32,
}

impl FrameHeader {
    /// Read a header from the cursor. Only checks that 16 bytes are present.
    pub fn read(cur: &mut ByteCursor<'_>) -> Result<Self> {
        let bytes = cur
            .take(HEADER_LEN)
            .map_err(|e| NlError::frame(format!("truncated header: {}", e)))?;
        let mut hc = ByteCursor::new(bytes);
        // Cannot fail: exactly HEADER_LEN bytes were taken above.
        let read = |hc: &mut ByteCursor<'_>| -> std::result::Result<Self, crate::cursor::ShortRead> {
            Ok(Self {
                length: hc.read_u32()?,
                kind: hc.read_u16()?,
                flags: hc.read_u16()?,
                sequence: hc.read_u32()?,
                sender: hc.read_u32()?,
            })
        };
        read(&mut hc).map_err(|e| NlError::frame(e.to_string()))
    }

    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.length.to_ne_bytes());
        buf.extend_from_slice(&self.kind.to_ne_bytes());
        buf.extend_from_slice(&self.flags.to_ne_bytes());
        buf.extend_from_slice(&self.sequence.to_ne_bytes());
        buf.extend_from_slice(&self.sender.to_ne_bytes());
    }

    /// Payload length implied by `length`.
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_LEN)
    }

    /// Bytes this frame occupies on the wire, padding included.
    pub fn aligned_len(&self) -> usize {
        align4(self.length as usize)
    }
}

/// A decoded frame owning its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl MessageFrame {
    pub fn sender(&self) -> u32 {
        self.header.sender
    }

    pub fn kind(&self) -> u16 {
        self.header.kind
    }

    pub fn sequence(&self) -> u32 {
        self.header.sequence
    }

    /// Zero-payload DONE frame: the exchange is complete.
    pub fn is_done(&self) -> bool {
        self.header.kind == msg_type::DONE && self.payload.is_empty()
    }

    /// Payload up to the first NUL, as text.
    pub fn payload_text(&self) -> String {
        payload_text(&self.payload)
    }
}

/// A frame borrowed from a receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameView<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

impl FrameView<'_> {
    pub fn to_frame(&self) -> MessageFrame {
        MessageFrame {
            header: self.header,
            payload: self.payload.to_vec(),
        }
    }
}

/// Encoder/decoder for single frames.
#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    max_payload: usize,
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl MessageCodec {
    /// Create a codec that rejects payloads longer than `max_payload`.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(MAX_PAYLOAD_LIMIT),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Encode a frame with no flags set.
    pub fn encode(&self, payload: &[u8], sender: u32, kind: u16, sequence: u32) -> Result<Vec<u8>> {
        self.encode_with_flags(payload, sender, kind, 0, sequence)
    }

    /// Encode a frame.
    ///
    /// The returned buffer is `align4(HEADER_LEN + payload.len())` bytes long.
    pub fn encode_with_flags(
        &self,
        payload: &[u8],
        sender: u32,
        kind: u16,
        flags: u16,
        sequence: u32,
    ) -> Result<Vec<u8>> {
        if payload.len() > self.max_payload {
            return Err(NlError::FrameTooLarge {
                len: payload.len(),
                max: self.max_payload,
            });
        }
        let length = HEADER_LEN + payload.len();
        let total = align4(length);

        let mut buf = Vec::new();
        buf.try_reserve_exact(total)?;

        FrameHeader {
            length: length as u32,
            kind,
            flags,
            sequence,
            sender,
        }
        .write_to(&mut buf);
        buf.extend_from_slice(payload);
        buf.resize(total, 0);
        Ok(buf)
    }

    /// Encode the zero-payload DONE frame that ends an exchange.
    pub fn encode_done(&self, sender: u32, sequence: u32) -> Result<Vec<u8>> {
        self.encode(&[], sender, msg_type::DONE, sequence)
    }

    /// Decode exactly one frame.
    ///
    /// The buffer must hold the whole frame and nothing else: its size must
    /// equal the declared `length`, optionally followed by the zero padding
    /// up to the next 4-byte boundary.
    pub fn decode(&self, bytes: &[u8]) -> Result<MessageFrame> {
        let mut cur = ByteCursor::new(bytes);
        let header = FrameHeader::read(&mut cur)?;
        let length = header.length as usize;

        if length < HEADER_LEN {
            return Err(NlError::frame(format!(
                "declared length {} is below header size {}",
                length, HEADER_LEN
            )));
        }
        if bytes.len() != length && bytes.len() != align4(length) {
            return Err(NlError::frame(format!(
                "declared length {} does not match buffer of {} bytes",
                length,
                bytes.len()
            )));
        }

        let payload = cur
            .take(length - HEADER_LEN)
            .map_err(|e| NlError::frame(e.to_string()))?;
        Ok(MessageFrame {
            header,
            payload: payload.to_vec(),
        })
    }

    /// Iterate over the frames packed into one datagram.
    pub fn frames<'a>(&self, datagram: &'a [u8]) -> FrameIter<'a> {
        FrameIter::new(datagram)
    }
}

/// Walks the frames packed into one datagram.
///
/// Yields `Err(MalformedFrame)` once and then stops if a frame's declared
/// length is below the header size or runs past the end of the datagram;
/// the rest of that datagram cannot be located reliably.
#[derive(Debug, Clone)]
pub struct FrameIter<'a> {
    cur: ByteCursor<'a>,
    done: bool,
}

impl<'a> FrameIter<'a> {
    pub fn new(datagram: &'a [u8]) -> Self {
        Self {
            cur: ByteCursor::new(datagram),
            done: false,
        }
    }

    /// Offset of the next frame inside the datagram.
    pub fn offset(&self) -> usize {
        self.cur.position()
    }

    fn fail(&mut self, err: NlError) -> Option<Result<FrameView<'a>>> {
        self.done = true;
        Some(Err(err))
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<FrameView<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cur.remaining() < HEADER_LEN {
            return None;
        }

        let start = self.cur.position();
        let available = self.cur.remaining();
        let header = match FrameHeader::read(&mut self.cur) {
            Ok(h) => h,
            Err(e) => return self.fail(e),
        };
        let length = header.length as usize;

        if length < HEADER_LEN {
            return self.fail(NlError::frame(format!(
                "frame at offset {} declares length {} below header size",
                start, length
            )));
        }
        if length > available {
            return self.fail(NlError::frame(format!(
                "frame at offset {} declares length {} but only {} bytes were delivered",
                start, length, available
            )));
        }

        let payload = match self.cur.take(length - HEADER_LEN) {
            Ok(p) => p,
            Err(e) => return self.fail(NlError::frame(e.to_string())),
        };
        // The final frame of a datagram may omit its padding.
        self.cur.skip_saturating(header.aligned_len() - length);

        Some(Ok(FrameView { header, payload }))
    }
}

/// Overwrite the sender field of an encoded frame.
///
/// Transports call this on receipt so handlers always see the real origin.
/// Returns `false` if the buffer is too short to hold a header.
pub fn stamp_sender(frame: &mut [u8], sender: u32) -> bool {
    match frame.get_mut(SENDER_OFFSET..SENDER_OFFSET + 4) {
        Some(field) => {
            field.copy_from_slice(&sender.to_ne_bytes());
            true
        }
        None => false,
    }
}

/// Stamp every well-formed frame of a datagram with `sender`.
///
/// Stops at the first malformed frame and leaves the rest untouched.
/// Returns the number of frames stamped.
pub fn stamp_datagram(datagram: &mut [u8], sender: u32) -> usize {
    let mut offsets = Vec::new();
    {
        let mut iter = FrameIter::new(datagram);
        loop {
            let at = iter.offset();
            match iter.next() {
                Some(Ok(_)) => offsets.push(at),
                _ => break,
            }
        }
    }
    for &at in &offsets {
        stamp_sender(&mut datagram[at..], sender);
    }
    offsets.len()
}

/// Payload as a C string: everything before the first NUL.
///
/// Bytes after the terminator are never looked at, so a client that sends
/// a fixed-size buffer does not get its uninitialised tail back.
pub fn until_nul(payload: &[u8]) -> &[u8] {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    &payload[..end]
}

/// Render a payload as text, stopping at the first NUL.
pub fn payload_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(until_nul(payload)).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let codec = MessageCodec::default();
        let bytes = codec.encode(b"abc", 7, 0x20, 99).unwrap();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[0..4], &19u32.to_ne_bytes());
        assert_eq!(&bytes[4..6], &0x20u16.to_ne_bytes());
        assert_eq!(&bytes[6..8], &0u16.to_ne_bytes());
        assert_eq!(&bytes[8..12], &99u32.to_ne_bytes());
        assert_eq!(&bytes[12..16], &7u32.to_ne_bytes());
        assert_eq!(&bytes[16..19], b"abc");
        assert_eq!(bytes[19], 0);
    }

    #[test]
    fn test_decode_accepts_unpadded_buffer() {
        let codec = MessageCodec::default();
        let bytes = codec.encode(b"abc", 1, 0x20, 0).unwrap();
        let frame = codec.decode(&bytes[..19]).unwrap();
        assert_eq!(frame.payload, b"abc");
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let codec = MessageCodec::default();
        let mut bytes = codec.encode(b"abcd", 1, 0x20, 0).unwrap();
        bytes.extend_from_slice(&[0; 4]);
        assert!(matches!(
            codec.decode(&bytes),
            Err(NlError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_rejects_short_buffer() {
        let codec = MessageCodec::default();
        assert!(matches!(
            codec.decode(&[0u8; 10]),
            Err(NlError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_decode_rejects_length_below_header() {
        let mut bytes = Vec::new();
        FrameHeader {
            length: 8,
            ..Default::default()
        }
        .write_to(&mut bytes);
        assert!(matches!(
            MessageCodec::default().decode(&bytes),
            Err(NlError::MalformedFrame(_))
        ));
    }

    #[test]
    fn test_encode_too_large() {
        let codec = MessageCodec::new(4);
        let err = codec.encode(b"hello", 0, 0x20, 0).unwrap_err();
        assert_eq!(err, NlError::FrameTooLarge { len: 5, max: 4 });
    }

    #[test]
    fn test_done_frame() {
        let codec = MessageCodec::default();
        let frame = codec.decode(&codec.encode_done(0, 5).unwrap()).unwrap();
        assert!(frame.is_done());
        assert_eq!(frame.header.length as usize, HEADER_LEN);
    }

    #[test]
    fn test_stamp_sender() {
        let codec = MessageCodec::default();
        let mut bytes = codec.encode(b"x", 1, 0x20, 0).unwrap();
        assert!(stamp_sender(&mut bytes, 4242));
        assert_eq!(codec.decode(&bytes).unwrap().sender(), 4242);
        assert!(!stamp_sender(&mut [0u8; 8], 1));
    }

    #[test]
    fn test_stamp_datagram_covers_every_frame() {
        let codec = MessageCodec::default();
        let mut datagram = codec.encode(b"a", 1, 0x20, 1).unwrap();
        datagram.extend(codec.encode(b"bb", 2, 0x20, 2).unwrap());
        assert_eq!(stamp_datagram(&mut datagram, 77), 2);
        for frame in codec.frames(&datagram) {
            assert_eq!(frame.unwrap().header.sender, 77);
        }
    }

    #[test]
    fn test_frame_iter_walks_packed_frames() {
        let codec = MessageCodec::default();
        let mut datagram = codec.encode(b"one", 0, 0x20, 1).unwrap();
        datagram.extend(codec.encode(b"second", 0, 0x21, 2).unwrap());
        datagram.extend(codec.encode_done(0, 3).unwrap());

        let frames: Vec<_> = codec.frames(&datagram).collect::<Result<_>>().unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload, b"one");
        assert_eq!(frames[1].payload, b"second");
        assert_eq!(frames[1].header.kind, 0x21);
        assert_eq!(frames[2].header.kind, msg_type::DONE);
    }

    #[test]
    fn test_frame_iter_stops_on_overlong_frame() {
        let codec = MessageCodec::default();
        let mut datagram = codec.encode(b"ok", 0, 0x20, 1).unwrap();
        let mut bad = codec.encode(b"truncated", 0, 0x20, 2).unwrap();
        bad[0..4].copy_from_slice(&200u32.to_ne_bytes());
        datagram.extend(bad);

        let mut iter = codec.frames(&datagram);
        assert!(iter.next().unwrap().is_ok());
        assert!(matches!(iter.next(), Some(Err(NlError::MalformedFrame(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_payload_text_stops_at_nul() {
        assert_eq!(payload_text(b"ping\0\0\0\0"), "ping");
        assert_eq!(payload_text(b"pong"), "pong");
    }

    #[test]
    fn test_until_nul() {
        assert_eq!(until_nul(b"ping\0\0"), b"ping");
        assert_eq!(until_nul(b"a\0garbage"), b"a");
        assert_eq!(until_nul(b"\0\0"), b"");
        assert_eq!(until_nul(b"pong"), b"pong");
    }
}
