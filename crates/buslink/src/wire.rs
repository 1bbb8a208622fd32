// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Wire-level proxy messages and the codec seam.
//!
//! Three message kinds travel over the link:
//! - DATA: carries a channel name and an opaque payload, acknowledged by the peer
//! - ACK: positive acknowledgment, carries only the message ID
//! - NACK: explicit processing failure, carries only the message ID
//!
//! The serialization format is a collaborator behind the [`WireCodec`] trait;
//! the agent only requires a self-describing buffer whose first logical field
//! is the kind discriminant. [`FlatCodec`] is the default little-endian layout:
//!
//! ```text
//! [kind u8][id u32 LE][name_len u16 LE][payload_len u32 LE][name bytes][payload bytes]
//! ```

use std::fmt;

/// Fixed header size of the flat layout (kind + id + name_len + payload_len).
pub const FLAT_HEADER_LEN: usize = 1 + 4 + 2 + 4;

// ============================================================================
// Message model
// ============================================================================

/// Wire message discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Data = 0,
    Ack = 1,
    Nack = 2,
}

impl MessageKind {
    /// Decode a discriminant byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(MessageKind::Data),
            1 => Some(MessageKind::Ack),
            2 => Some(MessageKind::Nack),
            _ => None,
        }
    }

    /// True for ACK and NACK (the two acknowledgment kinds).
    #[must_use]
    pub fn is_response(self) -> bool {
        matches!(self, MessageKind::Ack | MessageKind::Nack)
    }
}

/// Wire-level unit exchanged between proxy agents.
///
/// Invariant: ACK/NACK messages carry only `kind` and `id` (`channel` and
/// `payload` stay empty); DATA messages carry all fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireMessage {
    pub kind: MessageKind,
    /// Message identifier, unique per sent DATA message within its tracked
    /// lifetime and the peer's duplicate-detection window.
    pub id: u32,
    /// Destination bus channel (DATA only).
    pub channel: String,
    /// Opaque payload bytes (DATA only).
    pub payload: Vec<u8>,
}

impl WireMessage {
    /// Build a DATA message for a channel.
    #[must_use]
    pub fn data(id: u32, channel: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind: MessageKind::Data,
            id,
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Build an ACK for a message ID.
    #[must_use]
    pub fn ack(id: u32) -> Self {
        Self {
            kind: MessageKind::Ack,
            id,
            channel: String::new(),
            payload: Vec::new(),
        }
    }

    /// Build a NACK for a message ID.
    #[must_use]
    pub fn nack(id: u32) -> Self {
        Self {
            kind: MessageKind::Nack,
            id,
            channel: String::new(),
            payload: Vec::new(),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Wire encode/decode error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Encoded frame would exceed the configured maximum.
    FrameTooLarge { len: usize, max: usize },
    /// Channel name does not fit the 16-bit length field.
    ChannelTooLong { len: usize },
    /// Buffer ended before the declared content.
    Truncated { offset: usize },
    /// Unknown kind discriminant.
    BadKind { value: u8 },
    /// Channel name is not valid UTF-8.
    BadChannelName,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::FrameTooLarge { len, max } => {
                write!(f, "frame too large: {} bytes (max {})", len, max)
            }
            WireError::ChannelTooLong { len } => {
                write!(f, "channel name too long: {} bytes", len)
            }
            WireError::Truncated { offset } => {
                write!(f, "buffer truncated at offset {}", offset)
            }
            WireError::BadKind { value } => write!(f, "unknown message kind {:#04x}", value),
            WireError::BadChannelName => write!(f, "channel name is not valid UTF-8"),
        }
    }
}

impl std::error::Error for WireError {}

// ============================================================================
// Codec seam
// ============================================================================

/// Serialization collaborator.
///
/// `encode` replaces the contents of `buf` with exactly one frame and
/// returns its length; callers reuse the buffer across frames, so an
/// implementation that appends instead would concatenate garbage. `decode`
/// consumes exactly one frame. Implementations must keep the kind
/// discriminant as the first logical field so receivers can dispatch on it.
pub trait WireCodec: Send + Sync {
    fn encode(&self, msg: &WireMessage, buf: &mut Vec<u8>) -> Result<usize, WireError>;
    fn decode(&self, raw: &[u8]) -> Result<WireMessage, WireError>;
}

/// Default self-describing little-endian codec.
#[derive(Debug, Clone)]
pub struct FlatCodec {
    max_frame: usize,
}

impl FlatCodec {
    /// Create a codec bounded by `max_frame` bytes per encoded frame.
    #[must_use]
    pub fn new(max_frame: usize) -> Self {
        Self { max_frame }
    }
}

impl WireCodec for FlatCodec {
    fn encode(&self, msg: &WireMessage, buf: &mut Vec<u8>) -> Result<usize, WireError> {
        let name = msg.channel.as_bytes();
        if name.len() > usize::from(u16::MAX) {
            return Err(WireError::ChannelTooLong { len: name.len() });
        }

        let total = FLAT_HEADER_LEN + name.len() + msg.payload.len();
        if total > self.max_frame {
            return Err(WireError::FrameTooLarge {
                len: total,
                max: self.max_frame,
            });
        }

        buf.clear();
        buf.reserve(total);
        buf.push(msg.kind as u8);
        buf.extend_from_slice(&msg.id.to_le_bytes());
        buf.extend_from_slice(&(name.len() as u16).to_le_bytes());
        buf.extend_from_slice(&(msg.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&msg.payload);
        Ok(total)
    }

    fn decode(&self, raw: &[u8]) -> Result<WireMessage, WireError> {
        if raw.len() < FLAT_HEADER_LEN {
            return Err(WireError::Truncated { offset: raw.len() });
        }

        let kind = MessageKind::from_u8(raw[0]).ok_or(WireError::BadKind { value: raw[0] })?;
        let id = u32::from_le_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let name_len = usize::from(u16::from_le_bytes([raw[5], raw[6]]));
        let payload_len = u32::from_le_bytes([raw[7], raw[8], raw[9], raw[10]]) as usize;

        let name_end = FLAT_HEADER_LEN + name_len;
        let payload_end = name_end + payload_len;
        if raw.len() < payload_end {
            return Err(WireError::Truncated { offset: raw.len() });
        }

        let channel = std::str::from_utf8(&raw[FLAT_HEADER_LEN..name_end])
            .map_err(|_| WireError::BadChannelName)?
            .to_owned();

        Ok(WireMessage {
            kind,
            id,
            channel,
            payload: raw[name_end..payload_end].to_vec(),
        })
    }
}
