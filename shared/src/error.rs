//! Error types for the wire codec and message dispatch

use thiserror::Error;

/// Errors raised while reading or writing wire data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload ended before a field could be read
    #[error("truncated payload: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string length prefix was negative
    #[error("negative string length {0}")]
    NegativeLength(i32),

    /// String bytes were not valid UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A frame header announced more bytes than the configured maximum
    #[error("frame of {len} bytes exceeds maximum frame length of {max} bytes")]
    FrameTooLarge { len: usize, max: usize },

    /// A frame was too short to hold a type tag
    #[error("frame of {0} bytes is too short to hold a type tag")]
    MissingTag(usize),
}

/// Errors routed to a connection's error sink when a frame cannot be handled
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// The handler accepted the message but failed to process it
    #[error("handler failed for tag {tag}: {reason}")]
    Handler { tag: i32, reason: String },
}

impl DispatchError {
    pub fn handler(tag: i32, reason: impl Into<String>) -> Self {
        DispatchError::Handler {
            tag,
            reason: reason.into(),
        }
    }
}

/// Errors that end a connection's read loop
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("framing error: {0}")]
    Codec(#[from] CodecError),
}
