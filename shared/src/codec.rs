//! Binary wire codec
//!
//! Every frame on the wire has the layout
//!
//! ```text
//! [u32 frame length][i32 type tag][payload fields in declared order]
//! ```
//!
//! where the frame length counts the tag and the payload. Numbers are
//! fixed-width big-endian. Strings carry an `i32` byte-length prefix followed by
//! their UTF-8 bytes; an absent string is written as length 0, so absent and
//! empty decode identically.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::CodecError;

/// Size of the frame length header
pub const FRAME_HEADER_LEN: usize = 4;
/// Size of the message type tag
pub const TAG_LEN: usize = 4;

/// Builds one frame: reserves the length header, then accepts the tag and fields
#[derive(Debug)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + capacity);
        buf.put_u32(0);
        Self { buf }
    }

    pub fn write_tag(&mut self, tag: i32) {
        self.buf.put_i32(tag);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn write_str(&mut self, value: &str) {
        self.buf.put_i32(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Writes `None` exactly like an empty string
    pub fn write_optional_str(&mut self, value: Option<&str>) {
        self.write_str(value.unwrap_or(""));
    }

    /// Number of bytes written after the frame header
    pub fn payload_len(&self) -> usize {
        self.buf.len() - FRAME_HEADER_LEN
    }

    /// Patches the frame length header and freezes the frame
    pub fn finish(mut self) -> Bytes {
        let len = self.payload_len() as u32;
        self.buf[..FRAME_HEADER_LEN].copy_from_slice(&len.to_be_bytes());
        self.buf.freeze()
    }
}

impl Default for MessageWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads fields out of one frame body with bounds checking on every read
#[derive(Debug, Clone)]
pub struct MessageReader {
    buf: Bytes,
}

impl MessageReader {
    /// Wraps a frame body (tag and payload, without the length header)
    pub fn new(body: Bytes) -> Self {
        Self { buf: body }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), CodecError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(CodecError::Truncated { needed, remaining });
        }
        Ok(())
    }

    /// Consumes the type tag at the front of the body
    pub fn read_tag(&mut self) -> Result<i32, CodecError> {
        if self.buf.remaining() < TAG_LEN {
            return Err(CodecError::MissingTag(self.buf.remaining()));
        }
        Ok(self.buf.get_i32())
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.ensure(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8() != 0)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let len = len as usize;
        self.ensure(len)?;
        let bytes = self.buf.split_to(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
    }

    /// Reads a string, mapping the empty string to `None`
    pub fn read_optional_string(&mut self) -> Result<Option<String>, CodecError> {
        let value = self.read_string()?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    /// Takes every byte not yet read
    pub fn take_rest(&mut self) -> Bytes {
        self.buf.split_to(self.buf.remaining())
    }
}

/// Incremental splitter turning a byte stream into frame bodies
///
/// Bytes read from the socket are appended to the internal buffer; complete
/// frames are handed out one at a time. A header announcing more than
/// `max_frame_length` bytes is rejected before any payload is buffered so a
/// corrupt or hostile peer cannot make the reader allocate without bound.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_length: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(4096),
            max_frame_length,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Buffer for socket reads (`AsyncReadExt::read_buf`)
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn extend_from_slice(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Number of buffered bytes that do not yet form a complete frame
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete frame body, or `None` if more bytes are needed
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, CodecError> {
        if self.buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buf[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_frame_length {
            return Err(CodecError::FrameTooLarge {
                len,
                max: self.max_frame_length,
            });
        }

        if self.buf.len() < FRAME_HEADER_LEN + len {
            self.buf.reserve(FRAME_HEADER_LEN + len - self.buf.len());
            return Ok(None);
        }

        self.buf.advance(FRAME_HEADER_LEN);
        Ok(Some(self.buf.split_to(len).freeze()))
    }
}
