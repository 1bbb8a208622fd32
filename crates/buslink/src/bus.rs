// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! Local pub/sub bus contract.
//!
//! The bus itself (channel registry, publish/subscribe primitives) is an
//! external collaborator; the agent only resolves channels by name, checks
//! their validator tag against its configured shadow validator, and publishes
//! payloads non-blocking. [`LocalChannel`]/[`LocalRegistry`] are minimal
//! in-process implementations for tests and co-located embedders.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

/// Opaque authorization tag attached to a channel.
///
/// A channel qualifies as a proxy agent's shadow channel when its tag equals
/// the agent's configured shadow validator. This is the boundary between
/// "channel name parsed off the wire" and "channel the agent may inject into".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValidatorTag(pub u64);

/// Non-blocking publish failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Channel queue full; publishing now would block.
    WouldBlock,
    /// Payload exceeds the channel's message size.
    SizeExceeded { size: usize, max: usize },
    /// Channel has no remaining consumers.
    Closed,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::WouldBlock => write!(f, "publish would block"),
            BusError::SizeExceeded { size, max } => {
                write!(f, "payload of {} bytes exceeds channel size {}", size, max)
            }
            BusError::Closed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for BusError {}

/// One bus channel as seen by the agent.
pub trait BusChannel: Send + Sync {
    fn name(&self) -> &str;
    fn validator(&self) -> ValidatorTag;
    /// Maximum payload size accepted by this channel.
    fn message_size(&self) -> usize;
    /// Non-blocking publish of one payload.
    fn publish(&self, payload: &[u8]) -> Result<(), BusError>;
}

/// Name-to-channel resolution, the only registry operation the agent needs.
pub trait ChannelRegistry: Send + Sync {
    fn channel_from_name(&self, name: &str) -> Option<Arc<dyn BusChannel>>;
}

/// One pending local publish observed by the agent's subscriber, carrying a
/// reference to its origin channel.
pub struct BusEvent {
    pub channel: Arc<dyn BusChannel>,
    pub payload: Vec<u8>,
}

// ============================================================================
// In-process implementations
// ============================================================================

/// Minimal in-process channel backed by a bounded queue.
pub struct LocalChannel {
    name: String,
    validator: ValidatorTag,
    message_size: usize,
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
}

impl LocalChannel {
    /// Create a channel holding up to `depth` undelivered payloads.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        validator: ValidatorTag,
        message_size: usize,
        depth: usize,
    ) -> Arc<Self> {
        let (tx, rx) = bounded(depth);
        Arc::new(Self {
            name: name.into(),
            validator,
            message_size,
            tx,
            rx,
        })
    }

    /// Consumer side of the channel queue.
    #[must_use]
    pub fn delivered(&self) -> &Receiver<Vec<u8>> {
        &self.rx
    }
}

impl BusChannel for LocalChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn validator(&self) -> ValidatorTag {
        self.validator
    }

    fn message_size(&self) -> usize {
        self.message_size
    }

    fn publish(&self, payload: &[u8]) -> Result<(), BusError> {
        if payload.len() > self.message_size {
            return Err(BusError::SizeExceeded {
                size: payload.len(),
                max: self.message_size,
            });
        }
        match self.tx.try_send(payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(BusError::WouldBlock),
            Err(TrySendError::Disconnected(_)) => Err(BusError::Closed),
        }
    }
}

/// Name-keyed registry of [`LocalChannel`]s.
#[derive(Default)]
pub struct LocalRegistry {
    channels: Mutex<HashMap<String, Arc<LocalChannel>>>,
}

impl LocalRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel under its own name, replacing any previous entry.
    pub fn add(&self, channel: Arc<LocalChannel>) {
        self.channels
            .lock()
            .insert(channel.name().to_owned(), channel);
    }
}

impl ChannelRegistry for LocalRegistry {
    fn channel_from_name(&self, name: &str) -> Option<Arc<dyn BusChannel>> {
        self.channels
            .lock()
            .get(name)
            .map(|ch| Arc::clone(ch) as Arc<dyn BusChannel>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_channel_publish_and_deliver() {
        let ch = LocalChannel::new("telemetry", ValidatorTag(1), 64, 4);
        ch.publish(&[1, 2, 3]).expect("publish");
        assert_eq!(ch.delivered().try_recv().expect("recv"), vec![1, 2, 3]);
    }

    #[test]
    fn test_local_channel_rejects_oversized_payload() {
        let ch = LocalChannel::new("telemetry", ValidatorTag(1), 2, 4);
        assert_eq!(
            ch.publish(&[0; 3]),
            Err(BusError::SizeExceeded { size: 3, max: 2 })
        );
    }

    #[test]
    fn test_local_channel_would_block_when_full() {
        let ch = LocalChannel::new("telemetry", ValidatorTag(1), 8, 1);
        ch.publish(&[1]).expect("first publish");
        assert_eq!(ch.publish(&[2]), Err(BusError::WouldBlock));
    }

    #[test]
    fn test_registry_resolves_by_name() {
        let registry = LocalRegistry::new();
        registry.add(LocalChannel::new("a", ValidatorTag(1), 8, 1));

        assert!(registry.channel_from_name("a").is_some());
        assert!(registry.channel_from_name("b").is_none());
    }
}
