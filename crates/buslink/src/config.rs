// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Agent configuration surface.
//!
//! The embedding application fills an [`AgentConfig`] before constructing the
//! agent. Misconfiguration is programmer error and is rejected up front by
//! [`AgentConfig::validate`], never discovered at runtime.

use crate::bus::ValidatorTag;
use crate::error::{AgentError, Result};

/// Sentinel for an unlimited transmit-attempt budget.
pub const RETRY_UNLIMITED: i32 = -1;

/// Default initial ACK timeout (milliseconds).
pub const DEFAULT_INITIAL_TIMEOUT_MS: u32 = 100;
/// Default maximum encoded frame size.
pub const DEFAULT_MAX_FRAME: usize = 1024;

/// Proxy agent configuration.
///
/// `track_capacity = 0` disables outbound tracking entirely: DATA messages
/// are sent fire-and-forget and never retransmitted.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name, used in log output.
    pub name: String,
    /// First retry delay in milliseconds; doubles per attempt.
    pub initial_timeout_ms: u32,
    /// Retry delay cap in milliseconds; 0 means uncapped.
    pub max_timeout_ms: u32,
    /// Transmit attempts per DATA message, or [`RETRY_UNLIMITED`].
    pub retry_limit: i32,
    /// Tracked-message pool capacity (0 disables tracking).
    pub track_capacity: usize,
    /// Duplicate-detection ring capacity.
    pub dedup_capacity: usize,
    /// Receive queue depth (inbound DATA awaiting the agent loop).
    pub recv_queue_depth: usize,
    /// Cleanup queue depth (IDs awaiting removal by the agent loop).
    pub cleanup_queue_depth: usize,
    /// Pending ACK/NACK queue depth.
    pub ack_queue_depth: usize,
    /// Upper bound on an encoded wire frame.
    pub max_frame_size: usize,
    /// Authorization tag a resolved channel's validator must match before the
    /// agent will publish onto it.
    pub shadow_validator: ValidatorTag,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "buslink".to_owned(),
            initial_timeout_ms: DEFAULT_INITIAL_TIMEOUT_MS,
            max_timeout_ms: 0,
            retry_limit: 5,
            track_capacity: 16,
            dedup_capacity: 32,
            recv_queue_depth: 16,
            cleanup_queue_depth: 16,
            ack_queue_depth: 16,
            max_frame_size: DEFAULT_MAX_FRAME,
            shadow_validator: ValidatorTag(0),
        }
    }
}

impl AgentConfig {
    /// Reject configurations the agent cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.initial_timeout_ms == 0 {
            return Err(AgentError::InvalidArgument {
                reason: "initial_timeout_ms must be > 0".into(),
            });
        }
        if self.retry_limit < RETRY_UNLIMITED {
            return Err(AgentError::InvalidArgument {
                reason: format!("retry_limit {} is neither >= 0 nor -1", self.retry_limit),
            });
        }
        if self.track_capacity > usize::from(u16::MAX) {
            return Err(AgentError::InvalidArgument {
                reason: format!("track_capacity {} exceeds u16 handle space", self.track_capacity),
            });
        }
        if self.recv_queue_depth == 0 || self.cleanup_queue_depth == 0 || self.ack_queue_depth == 0
        {
            return Err(AgentError::InvalidArgument {
                reason: "queue depths must be > 0".into(),
            });
        }
        if self.max_frame_size < crate::wire::FLAT_HEADER_LEN {
            return Err(AgentError::InvalidArgument {
                reason: format!(
                    "max_frame_size {} below minimum frame header {}",
                    self.max_frame_size,
                    crate::wire::FLAT_HEADER_LEN
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_initial_timeout_rejected() {
        let config = AgentConfig {
            initial_timeout_ms: 0,
            ..AgentConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(AgentError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_negative_retry_limit_other_than_sentinel_rejected() {
        let config = AgentConfig {
            retry_limit: -2,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AgentConfig {
            retry_limit: RETRY_UNLIMITED,
            ..AgentConfig::default()
        };
        assert!(config.validate().is_ok());
    }

}
