//! Frame encoding and decoding errors

use std::fmt;
use std::fmt::Display;

/// Failure modes when converting between packets and their wire bytes
///
/// Decoding rejects buffers that cannot hold a complete frame; encoding
/// rejects payloads whose length cannot be represented in the header.
#[derive(Debug, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer is shorter than the 8-byte frame header
    ShortHeader,

    /// Header announces more payload bytes than the buffer carries
    LengthMismatch,

    /// Payload exceeds the 65,527-byte encoding limit
    PayloadTooLarge,

    /// Type byte is not a known packet type
    UnknownType(u8),
}

impl std::error::Error for CodecError {}

impl Display for CodecError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CodecError::ShortHeader => "buffer too short for frame header".fmt(fmt),
            CodecError::LengthMismatch => "frame payload length mismatch".fmt(fmt),
            CodecError::PayloadTooLarge => "payload too large to encode".fmt(fmt),
            CodecError::UnknownType(v) => write!(fmt, "unknown packet type {:#04x}", v),
        }
    }
}
