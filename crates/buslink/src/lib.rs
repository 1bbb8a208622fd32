// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2026 buslink developers

//! # buslink - reliable channel proxying for embedded pub/sub buses
//!
//! A proxy agent that mirrors a local pub/sub bus to a remote peer over an
//! unreliable transport. Outbound DATA messages are tracked and retransmitted
//! with exponential backoff until acknowledged; inbound DATA messages are
//! deduplicated, authorized against a shadow-validator tag, and published
//! onto the local bus; ACK/NACK responses go out through an asynchronous
//! worker so the receive path never blocks on the transport.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use buslink::{AgentConfig, LocalChannel, LocalRegistry, ProxyAgent, ValidatorTag};
//!
//! fn main() -> buslink::Result<()> {
//!     let (backend, _peer) = buslink::MemoryLink::pair();
//!
//!     let registry = Arc::new(LocalRegistry::new());
//!     registry.add(LocalChannel::new("telemetry", ValidatorTag(1), 256, 8));
//!
//!     let config = AgentConfig {
//!         name: "proxy".into(),
//!         shadow_validator: ValidatorTag(1),
//!         ..AgentConfig::default()
//!     };
//!     let agent = ProxyAgent::new(config, backend, registry)?;
//!
//!     let id = agent.send_data("telemetry", b"reading".to_vec())?;
//!     println!("sent message {}", id);
//!     Ok(())
//! }
//! ```
//!
//! ## Protocol flow
//!
//! ```text
//!  local bus           agent A                        agent B          local bus
//!  publish --> subscriber queue
//!                 |  DATA(id) ------- transport ------> dispatcher
//!                 |  (tracked,                            | fresh? -> recv queue
//!                 |   timer armed)                        | dup?   -> re-ACK only
//!                 |                                     agent loop
//!                 |                                       | validate shadow tag
//!                 |                                       | publish ----------> deliver
//!                 | <------ ACK(id) --- transport ------ ack worker
//!            cleanup queue
//!                 | entry reaped by agent loop
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ProxyAgent`] | The orchestrator; owns the polling loop and worker threads |
//! | [`AgentConfig`] | Timeouts, attempt limit, queue depths, shadow validator |
//! | [`Backend`] | Transport contract (`init` / `send` / `set_recv_cb`) |
//! | [`ChannelRegistry`] / [`BusChannel`] | Local bus contract |
//! | [`WireMessage`] / [`FlatCodec`] | Wire unit and its framing |
//! | [`AgentMetrics`] | Relaxed atomic counters with a snapshot view |

pub mod acker;
pub mod agent;
pub mod bus;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod tracker;
pub mod transport;
pub mod wire;

pub use acker::AckScheduler;
pub use agent::ProxyAgent;
pub use bus::{BusChannel, BusError, BusEvent, ChannelRegistry, LocalChannel, LocalRegistry, ValidatorTag};
pub use config::{AgentConfig, RETRY_UNLIMITED};
pub use dedup::DuplicateDetector;
pub use dispatch::ReceiveDispatcher;
pub use error::{AgentError, Result};
pub use metrics::{AgentMetrics, MetricsSnapshot};
pub use retry::RetryTimer;
pub use tracker::{retry_backoff_ms, AckOutcome, RetryDecision, TrackHandle, TrackerPool};
pub use transport::{Backend, MemoryLink, RecvCallback};
pub use wire::{FlatCodec, MessageKind, WireCodec, WireError, WireMessage};

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
