//! Length-prefixed message framing
//!
//! Every message on the wire starts with a 4-byte header:
//!
//! ```text
//! +-------------+-------------+------------------------+
//! | size: u16le | type: u16le | payload (size - 4)     |
//! +-------------+-------------+------------------------+
//! ```
//!
//! `size` counts the header itself. Several messages may share one TCP
//! delivery and one message may be split across two deliveries, so
//! [`decode`] reports how many bytes it consumed and leaves an incomplete
//! tail for the caller to carry into the next call.

use thiserror::Error;

/// Size of the `{size, type}` prefix
pub const HEADER_SIZE: usize = 4;

/// Largest frame the header can describe
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Errors produced while framing or reading messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Fewer than four bytes are buffered; wait for more
    #[error("Truncated header: {available} of {HEADER_SIZE} bytes available")]
    TruncatedHeader { available: usize },

    /// The header is complete but the payload has not fully arrived yet
    #[error("Truncated payload: frame of {size} bytes, {available} available")]
    TruncatedPayload { size: usize, available: usize },

    /// The header describes a frame that cannot be valid; fatal for the stream
    #[error("Invalid frame length {size} (allowed {HEADER_SIZE}..={max})")]
    InvalidLength { size: usize, max: usize },

    /// Encoding a payload that does not fit the 16-bit size field
    #[error("Payload of {len} bytes exceeds frame limit of {max}")]
    PayloadTooLarge { len: usize, max: usize },

    /// A field read ran past the end of the payload
    #[error("Unexpected end of payload: needed {needed} bytes, {available} available")]
    UnexpectedEnd { needed: usize, available: usize },

    /// A payload carried more bytes than its layout defines
    #[error("{count} trailing bytes after message body")]
    TrailingBytes { count: usize },

    /// A string field was not valid UTF-16
    #[error("Invalid UTF-16 string field")]
    InvalidString,

    /// A field holds a value outside its defined set
    #[error("Invalid value {value} for field {field}")]
    InvalidValue { field: &'static str, value: u32 },

    /// The frame's type id does not match the message being decoded
    #[error("Expected message type {expected}, got {actual}")]
    UnexpectedType { expected: u16, actual: u16 },
}

impl CodecError {
    /// True when more bytes may turn this into a valid frame
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            CodecError::TruncatedHeader { .. } | CodecError::TruncatedPayload { .. }
        )
    }
}

/// Wire header preceding every payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetHeader {
    pub size: u16,
    pub type_id: u16,
}

impl NetHeader {
    pub fn read(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CodecError::TruncatedHeader {
                available: bytes.len(),
            });
        }
        Ok(Self {
            size: u16::from_le_bytes([bytes[0], bytes[1]]),
            type_id: u16::from_le_bytes([bytes[2], bytes[3]]),
        })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.type_id.to_le_bytes());
    }

    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }
}

/// One decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub type_id: u16,
    pub payload: Vec<u8>,
}

impl Message {
    pub fn new(type_id: u16, payload: Vec<u8>) -> Self {
        Self { type_id, payload }
    }

    /// Total encoded size including the header
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Messages recovered by one [`decode`] call
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub messages: Vec<Message>,
    /// Bytes at the front of the input that belong to `messages`
    pub consumed: usize,
}

/// Appends one framed message to `out`
pub fn encode(type_id: u16, payload: &[u8], out: &mut Vec<u8>) -> Result<(), CodecError> {
    let size = HEADER_SIZE + payload.len();
    if size > MAX_FRAME_SIZE {
        return Err(CodecError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_FRAME_SIZE - HEADER_SIZE,
        });
    }
    out.reserve(size);
    NetHeader {
        size: size as u16,
        type_id,
    }
    .write(out);
    out.extend_from_slice(payload);
    Ok(())
}

pub fn encode_message(message: &Message, out: &mut Vec<u8>) -> Result<(), CodecError> {
    encode(message.type_id, &message.payload, out)
}

/// Decodes the first frame of `buf`, returning it with its encoded length
pub fn decode_one(buf: &[u8], max_size: usize) -> Result<(Message, usize), CodecError> {
    let header = NetHeader::read(buf)?;
    let size = header.size as usize;
    let max = max_size.min(MAX_FRAME_SIZE);
    if size < HEADER_SIZE || size > max {
        return Err(CodecError::InvalidLength { size, max });
    }
    if buf.len() < size {
        return Err(CodecError::TruncatedPayload {
            size,
            available: buf.len(),
        });
    }
    let message = Message::new(header.type_id, buf[HEADER_SIZE..size].to_vec());
    Ok((message, size))
}

/// Decodes every complete frame at the front of `buf`
///
/// Stops at the first incomplete frame and reports the bytes consumed so far.
/// `InvalidLength` is returned as an error even if earlier frames decoded,
/// since nothing after a corrupt header can be trusted.
pub fn decode(buf: &[u8], max_size: usize) -> Result<Decoded, CodecError> {
    let mut decoded = Decoded::default();
    while decoded.consumed < buf.len() {
        match decode_one(&buf[decoded.consumed..], max_size) {
            Ok((message, used)) => {
                decoded.messages.push(message);
                decoded.consumed += used;
            }
            Err(e) if e.is_incomplete() => break,
            Err(e) => return Err(e),
        }
    }
    Ok(decoded)
}

/// Reassembles frames from a stream delivered in arbitrary chunks
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pending: Vec<u8>,
    max_size: usize,
}

impl FrameBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            pending: Vec::new(),
            max_size,
        }
    }

    /// Appends `chunk` and returns every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<Message>, CodecError> {
        self.pending.extend_from_slice(chunk);
        let decoded = decode(&self.pending, self.max_size)?;
        self.pending.drain(..decoded.consumed);
        Ok(decoded.messages)
    }

    /// Bytes of an incomplete frame waiting for the rest of their data
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
