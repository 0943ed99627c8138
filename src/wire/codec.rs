// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire frame codec: fixed 40-byte header, CRC32C integrity check, and a
//! small accumulator for reassembling frames out of a non-blocking TCP
//! stream.
//!
//! Layout (little-endian on the wire):
//!
//! ```text
//! 0  magic      u32
//! 4  version    u8
//! 5  type       u8
//! 6  flags      u16
//! 8  seq        u32
//! 12 length     u32
//! 16 src_node   u64
//! 24 dst_node   u64
//! 32 checksum   u32
//! 36 reserved   u32
//! ```

use crate::error::{Error, Result};
use crate::wire::checksum::crc32c;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 40;

/// Fixed magic number every valid frame carries.
pub const MSG_MAGIC: u32 = 0x4F4D_4553;

/// Fixed protocol version byte.
pub const MSG_VERSION: u8 = 1;

/// Largest payload this core will build or accept.
pub const NET_MAX_MSG_SIZE: usize = 64 * 1024;

/// Message type tags used by this core.
pub mod msg_type {
    pub const HELLO: u8 = 0x10;
    pub const PING: u8 = 0x11;
    pub const PONG: u8 = 0x12;
    pub const SEARCH: u8 = 0x30;
    pub const RESULTS: u8 = 0x31;
    pub const INDEX: u8 = 0x32;
}

/// Bit 0 of the flags field: message expects reliable delivery semantics.
pub const FLAG_RELIABLE: u16 = 1 << 0;

fn read_u16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes(buf[off..off + 2].try_into().unwrap())
}
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())
}
fn read_u64(buf: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
}
fn write_u16(buf: &mut [u8], off: usize, v: u16) {
    buf[off..off + 2].copy_from_slice(&v.to_le_bytes());
}
fn write_u32(buf: &mut [u8], off: usize, v: u32) {
    buf[off..off + 4].copy_from_slice(&v.to_le_bytes());
}
fn write_u64(buf: &mut [u8], off: usize, v: u64) {
    buf[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

/// Field accessors. These never validate; callers must have already run
/// [`validate`] (or trust the buffer, e.g. a frame this process just built).
pub mod field {
    use super::*;

    pub fn magic(buf: &[u8]) -> u32 {
        read_u32(buf, 0)
    }
    pub fn version(buf: &[u8]) -> u8 {
        buf[4]
    }
    pub fn msg_type(buf: &[u8]) -> u8 {
        buf[5]
    }
    pub fn flags(buf: &[u8]) -> u16 {
        read_u16(buf, 6)
    }
    pub fn seq(buf: &[u8]) -> u32 {
        read_u32(buf, 8)
    }
    pub fn length(buf: &[u8]) -> u32 {
        read_u32(buf, 12)
    }
    pub fn src_node(buf: &[u8]) -> u64 {
        read_u64(buf, 16)
    }
    pub fn dst_node(buf: &[u8]) -> u64 {
        read_u64(buf, 24)
    }
    pub fn checksum(buf: &[u8]) -> u32 {
        read_u32(buf, 32)
    }
    pub fn payload(buf: &[u8]) -> &[u8] {
        &buf[HEADER_SIZE..HEADER_SIZE + length(buf) as usize]
    }
}

/// Writes a fresh header into `buf` (which must be at least `HEADER_SIZE`
/// bytes long), with zeroed flags/seq/length/checksum/reserved. Always
/// succeeds.
pub fn init(buf: &mut [u8], msg_type: u8, src: u64, dst: u64) {
    write_u32(buf, 0, MSG_MAGIC);
    buf[4] = MSG_VERSION;
    buf[5] = msg_type;
    write_u16(buf, 6, 0);
    write_u32(buf, 8, 0);
    write_u32(buf, 12, 0);
    write_u64(buf, 16, src);
    write_u64(buf, 24, dst);
    write_u32(buf, 32, 0);
    write_u32(buf, 36, 0);
}

/// Sets the payload length field and copies `data` immediately after the
/// header. `buf` must have room for `HEADER_SIZE + data.len()` bytes.
pub fn set_payload(buf: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    if data.len() > NET_MAX_MSG_SIZE {
        return Err(Error::InvalidArg(format!(
            "payload length {} exceeds NET_MAX_MSG_SIZE {}",
            data.len(),
            NET_MAX_MSG_SIZE
        )));
    }
    buf.truncate(HEADER_SIZE);
    buf.extend_from_slice(data);
    write_u32(buf, 12, data.len() as u32);
    Ok(())
}

/// Zeros the checksum field, computes CRC32C over the whole frame, and
/// stores the result back into the checksum field.
pub fn finalize(buf: &mut [u8]) {
    write_u32(buf, 32, 0);
    let sum = crc32c(buf);
    write_u32(buf, 32, sum);
}

/// Validates a frame at the start of `buf`, where only the first `avail`
/// bytes are known good.
///
/// Returns the total frame size (`HEADER_SIZE + length`) on success.
pub fn validate(buf: &[u8], avail: usize) -> Result<usize> {
    if avail < HEADER_SIZE {
        return Err(Error::Incomplete);
    }
    if field::magic(buf) != MSG_MAGIC || field::version(buf) != MSG_VERSION {
        return Err(Error::InvalidArg("bad magic or version".into()));
    }
    let length = field::length(buf) as usize;
    if length > NET_MAX_MSG_SIZE {
        return Err(Error::InvalidArg("payload length exceeds NET_MAX_MSG_SIZE".into()));
    }
    let total = HEADER_SIZE + length;
    if avail < total {
        return Err(Error::Incomplete);
    }
    let stored = field::checksum(buf);
    let mut scratch = buf[..total].to_vec();
    write_u32(&mut scratch, 32, 0);
    let computed = crc32c(&scratch);
    if computed != stored {
        return Err(Error::InvalidArg("checksum mismatch".into()));
    }
    Ok(total)
}

/// Convenience: builds a complete, finalized frame into a fresh buffer.
pub fn build(msg_type: u8, src: u64, dst: u64, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; HEADER_SIZE];
    init(&mut buf, msg_type, src, dst);
    set_payload(&mut buf, payload)?;
    finalize(&mut buf);
    Ok(buf)
}

/// Outcome of peeking at a possibly-partial buffer for a complete frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseResult {
    /// A full, well-formed frame is present; `(header_size, total_size)`.
    Complete(usize, usize),
    /// Not enough bytes yet to even read the header, or to complete a
    /// frame whose header has been read; the caller should read more.
    Incomplete(usize),
    /// The declared length exceeds `NET_MAX_MSG_SIZE`; the connection
    /// should be dropped.
    TooLarge(usize),
}

/// Peeks at `buf` without consuming it, reporting whether a complete frame
/// is present.
pub fn peek_frame_header(buf: &[u8]) -> ParseResult {
    if buf.len() < HEADER_SIZE {
        return ParseResult::Incomplete(HEADER_SIZE - buf.len());
    }
    let length = field::length(buf) as usize;
    if length > NET_MAX_MSG_SIZE {
        return ParseResult::TooLarge(length);
    }
    let total = HEADER_SIZE + length;
    if buf.len() < total {
        return ParseResult::Incomplete(total - buf.len());
    }
    ParseResult::Complete(HEADER_SIZE, total)
}

/// If `buf` holds a complete frame, returns a slice over it (header +
/// payload), otherwise `None`. Does not validate magic/version/checksum.
pub fn extract_frame(buf: &[u8]) -> Option<&[u8]> {
    match peek_frame_header(buf) {
        ParseResult::Complete(_, total) => Some(&buf[..total]),
        _ => None,
    }
}

/// Reassembles frames out of a byte stream delivered in arbitrary chunks
/// (as a non-blocking socket read produces). Frames are validated
/// (magic/version/checksum) as they are decoded.
#[derive(Debug, Default)]
pub struct FrameCodec {
    accumulator: Vec<u8>,
    frames_decoded: u64,
    bytes_decoded: u64,
    frames_rejected: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends freshly-read bytes to the internal accumulator.
    pub fn feed(&mut self, data: &[u8]) {
        self.accumulator.extend_from_slice(data);
    }

    /// Pulls the next complete, validated frame out of the accumulator, if
    /// any. Returns `Ok(None)` when more bytes are needed. A frame that
    /// fails validation is still consumed (so the stream can resync on the
    /// next frame boundary reported by its own length field) and counted
    /// in `frames_rejected`; the caller decides whether that is fatal.
    pub fn decode_next(&mut self) -> Result<Option<Vec<u8>>> {
        match peek_frame_header(&self.accumulator) {
            ParseResult::Incomplete(_) => Ok(None),
            ParseResult::TooLarge(len) => {
                self.frames_rejected += 1;
                self.accumulator.clear();
                Err(Error::InvalidArg(format!("frame length {} too large", len)))
            }
            ParseResult::Complete(_, total) => {
                let frame = self.accumulator[..total].to_vec();
                self.accumulator.drain(..total);
                match validate(&frame, frame.len()) {
                    Ok(_) => {
                        self.frames_decoded += 1;
                        self.bytes_decoded += frame.len() as u64;
                        Ok(Some(frame))
                    }
                    Err(e) => {
                        self.frames_rejected += 1;
                        Err(e)
                    }
                }
            }
        }
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.accumulator.is_empty()
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn bytes_decoded(&self) -> u64 {
        self.bytes_decoded
    }

    pub fn frames_rejected(&self) -> u64 {
        self.frames_rejected
    }

    /// Drops any partially buffered bytes, e.g. after a rejected frame
    /// desyncs the stream beyond recovery.
    pub fn reset(&mut self) {
        self.accumulator.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_ping_no_payload() {
        let frame = build(msg_type::PING, 0x1234, 0x5678, &[]).unwrap();
        assert_eq!(frame.len(), HEADER_SIZE);
        let total = validate(&frame, frame.len()).unwrap();
        assert_eq!(total, HEADER_SIZE);
        assert_eq!(field::msg_type(&frame), msg_type::PING);
        assert_eq!(field::src_node(&frame), 0x1234);
        assert_eq!(field::dst_node(&frame), 0x5678);
    }

    #[test]
    fn bad_magic_is_invalid() {
        let mut frame = build(msg_type::PING, 0x1234, 0x5678, &[]).unwrap();
        write_u32(&mut frame, 0, 0xDEAD_DEAD);
        assert!(matches!(
            validate(&frame, frame.len()),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn short_buffer_is_incomplete() {
        let frame = build(msg_type::SEARCH, 1, 2, b"hello").unwrap();
        let total = frame.len();
        assert!(matches!(
            validate(&frame, total - 1),
            Err(Error::Incomplete)
        ));
    }

    #[test]
    fn oversized_payload_rejected_by_set_payload() {
        let mut buf = vec![0u8; HEADER_SIZE];
        init(&mut buf, msg_type::INDEX, 1, 2);
        let huge = vec![0u8; NET_MAX_MSG_SIZE + 1];
        assert!(matches!(
            set_payload(&mut buf, &huge),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn tampered_payload_fails_checksum() {
        let mut frame = build(msg_type::SEARCH, 1, 2, b"quick").unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(matches!(
            validate(&frame, frame.len()),
            Err(Error::InvalidArg(_))
        ));
    }

    #[test]
    fn codec_reassembles_split_frames() {
        let f1 = build(msg_type::PING, 1, 2, &[]).unwrap();
        let f2 = build(msg_type::SEARCH, 1, 2, b"fox").unwrap();
        let mut codec = FrameCodec::new();

        codec.feed(&f1[..10]);
        assert!(codec.decode_next().unwrap().is_none());
        codec.feed(&f1[10..]);
        codec.feed(&f2);

        let got1 = codec.decode_next().unwrap().unwrap();
        assert_eq!(got1, f1);
        let got2 = codec.decode_next().unwrap().unwrap();
        assert_eq!(got2, f2);
        assert!(codec.decode_next().unwrap().is_none());
        assert_eq!(codec.frames_decoded(), 2);
    }

    #[test]
    fn peek_and_extract_helpers() {
        let frame = build(msg_type::PONG, 9, 9, &[]).unwrap();
        match peek_frame_header(&frame) {
            ParseResult::Complete(h, t) => {
                assert_eq!(h, HEADER_SIZE);
                assert_eq!(t, HEADER_SIZE);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(extract_frame(&frame), Some(frame.as_slice()));
        assert_eq!(extract_frame(&frame[..HEADER_SIZE - 1]), None);
    }

    #[test]
    fn too_large_declared_length_is_rejected() {
        let mut buf = vec![0u8; HEADER_SIZE];
        write_u32(&mut buf, 12, (NET_MAX_MSG_SIZE + 1) as u32);
        assert_eq!(
            peek_frame_header(&buf),
            ParseResult::TooLarge(NET_MAX_MSG_SIZE + 1)
        );
    }
}
