// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Agent error categorisation.
//!
//! Errors fall into four families (each handled by a distinct policy):
//! - configuration errors: programmer error, surfaced from setup calls
//! - resource exhaustion: pool full is a hard send failure, queue full is a
//!   logged soft drop
//! - transport errors: propagated to the send-path caller
//! - protocol errors: decode failure, unknown channel, authorization mismatch

use std::fmt;
use std::io;

use crate::wire::WireError;

/// Result alias for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Proxy agent error categorisation.
#[derive(Debug)]
pub enum AgentError {
    /// Invalid configuration or argument (programmer error).
    InvalidArgument { reason: String },
    /// Tracked-message pool is full; the message was not sent.
    PoolExhausted,
    /// No tracked message with this ID (expected outcome of the ACK/timeout race).
    NotFound { id: u32 },
    /// A bounded internal queue rejected an entry.
    QueueFull { queue: &'static str },
    /// Wire channel name does not resolve to a local channel.
    ChannelNotFound { name: String },
    /// Resolved channel is not this agent's designated shadow channel.
    PermissionDenied { channel: String },
    /// Local bus publish failed (transient; the remote sender will retry).
    PublishFailed { reason: String },
    /// Backend transport failure.
    Transport { reason: String },
    /// Wire encode/decode failure.
    Codec(WireError),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::InvalidArgument { reason } => write!(f, "invalid argument: {}", reason),
            AgentError::PoolExhausted => write!(f, "tracked-message pool exhausted"),
            AgentError::NotFound { id } => write!(f, "no tracked message with id {}", id),
            AgentError::QueueFull { queue } => write!(f, "{} queue full", queue),
            AgentError::ChannelNotFound { name } => write!(f, "channel not found: {}", name),
            AgentError::PermissionDenied { channel } => {
                write!(f, "channel {} is not a shadow channel of this agent", channel)
            }
            AgentError::PublishFailed { reason } => write!(f, "bus publish failed: {}", reason),
            AgentError::Transport { reason } => write!(f, "transport failed: {}", reason),
            AgentError::Codec(err) => write!(f, "codec failed: {}", err),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<WireError> for AgentError {
    fn from(err: WireError) -> Self {
        AgentError::Codec(err)
    }
}

impl From<io::Error> for AgentError {
    fn from(err: io::Error) -> Self {
        AgentError::Transport {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_error_display_variants() {
        let err = AgentError::InvalidArgument {
            reason: "dedup capacity is zero".into(),
        };
        assert_eq!(
            format!("{}", err),
            "invalid argument: dedup capacity is zero"
        );

        assert_eq!(
            format!("{}", AgentError::PoolExhausted),
            "tracked-message pool exhausted"
        );

        assert_eq!(
            format!("{}", AgentError::NotFound { id: 42 }),
            "no tracked message with id 42"
        );

        assert_eq!(
            format!("{}", AgentError::QueueFull { queue: "receive" }),
            "receive queue full"
        );

        let err = AgentError::PermissionDenied {
            channel: "telemetry".into(),
        };
        assert_eq!(
            format!("{}", err),
            "channel telemetry is not a shadow channel of this agent"
        );
    }

    #[test]
    fn test_io_error_maps_to_transport() {
        let err: AgentError = io::Error::new(io::ErrorKind::BrokenPipe, "link down").into();
        match err {
            AgentError::Transport { reason } => assert!(reason.contains("link down")),
            other => panic!("unexpected error variant: {:?}", other),
        }
    }
}
