//! Tunnel frame definitions and wire encoding
//!
//! Every UDP datagram carries exactly one frame (after the AEAD layer has
//! been removed). All frames share a fixed 8-byte header followed by an
//! opaque payload.
//!
//! # Frame layout
//! ```text
//! +---------+---------+-------------------+
//! | type u8 | rsv  u8 |   length u16 BE   |
//! +---------+---------+-------------------+
//! |          session_id u32 BE            |
//! +---------------------------------------+
//! |          payload [length bytes]       |
//! +---------------------------------------+
//! ```
//!
//! - type: 0x01 = DATA (tunneled IP packet), 0x02 = KEEPALIVE (empty payload)
//! - length: payload bytes, big-endian
//! - session_id: the sender's 32-bit session identifier, big-endian

use crate::codec::errors::CodecError;
use std::fmt;
use std::fmt::Display;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Frame header length in bytes
pub const HEADER_LEN: usize = 8;

/// Largest encoded frame (header + payload) that fits a UDP payload
pub const MAX_DATAGRAM: usize = 65535;

/// Largest payload an encoded frame can carry
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

/// Packet type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Tunneled IP packet (Type 0x01)
    Data = 0x01,
    /// Session registration and liveness refresh (Type 0x02)
    KeepAlive = 0x02,
}

impl TryFrom<u8> for PacketType {
    type Error = CodecError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0x01 => Ok(PacketType::Data),
            0x02 => Ok(PacketType::KeepAlive),
            _ => Err(CodecError::UnknownType(v)),
        }
    }
}

/// A single tunnel frame
///
/// The header's length field is implied by `payload.len()`: `encode` writes
/// it and `decode` validates it, so a decoded packet always satisfies
/// `encoded_len == HEADER_LEN + payload.len()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketType,
    pub reserved: u8,
    pub session_id: u32,
    pub payload: Vec<u8>,
}

impl Packet {
    /// Wraps a raw IP packet read from the virtual adapter
    pub fn data(session_id: u32, payload: Vec<u8>) -> Self {
        Packet {
            kind: PacketType::Data,
            reserved: 0,
            session_id,
            payload,
        }
    }

    /// Builds a zero-payload keep-alive for session registration/refresh
    pub fn keepalive(session_id: u32) -> Self {
        Packet {
            kind: PacketType::KeepAlive,
            reserved: 0,
            session_id,
            payload: Vec::new(),
        }
    }

    /// Serializes the frame into header + payload bytes
    ///
    /// Fails with `PayloadTooLarge` when the payload cannot be described by
    /// the 16-bit length field.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(CodecError::PayloadTooLarge);
        }

        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.kind as u8);
        buf.push(self.reserved);
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.session_id.to_be_bytes());
        buf.extend_from_slice(&self.payload);
        Ok(buf)
    }

    /// Parses a frame from raw bytes
    ///
    /// Requires at least the 8-byte header (`ShortHeader`) and then at least
    /// `length` payload bytes (`LengthMismatch`). Trailing bytes beyond the
    /// announced payload are discarded.
    pub fn decode(buf: &[u8]) -> Result<Packet, CodecError> {
        if buf.len() < HEADER_LEN {
            return Err(CodecError::ShortHeader);
        }

        let kind = PacketType::try_from(buf[0])?;
        let reserved = buf[1];
        let length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        let session_id = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);

        if buf.len() < HEADER_LEN + length {
            return Err(CodecError::LengthMismatch);
        }

        Ok(Packet {
            kind,
            reserved,
            session_id,
            payload: buf[HEADER_LEN..HEADER_LEN + length].to_vec(),
        })
    }

    /// True when the payload starts with an IPv4 version nibble
    pub fn is_ipv4(&self) -> bool {
        self.payload.first().map(|b| b >> 4) == Some(4)
    }

    /// True when the payload starts with an IPv6 version nibble
    pub fn is_ipv6(&self) -> bool {
        self.payload.first().map(|b| b >> 4) == Some(6)
    }

    /// Extracts the destination address of the tunneled IP packet
    ///
    /// Reads the fixed header offsets (IPv4 bytes 16..20, IPv6 bytes 24..40).
    /// Returns `None` when the payload is not a complete IP header.
    pub fn destination_ip(&self) -> Option<IpAddr> {
        if self.is_ipv4() && self.payload.len() >= 20 {
            let octets: [u8; 4] = self.payload[16..20].try_into().ok()?;
            return Some(IpAddr::V4(Ipv4Addr::from(octets)));
        }
        if self.is_ipv6() && self.payload.len() >= 40 {
            let octets: [u8; 16] = self.payload[24..40].try_into().ok()?;
            return Some(IpAddr::V6(Ipv6Addr::from(octets)));
        }
        None
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PacketType::Data => write!(
                f,
                "data session={:#010x} payload={}B",
                self.session_id,
                self.payload.len()
            ),
            PacketType::KeepAlive => write!(f, "keepalive session={:#010x}", self.session_id),
        }
    }
}
