// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Hermes - receiver-side transport for real-time publish/subscribe
//!
//! Moves opaque payloads plus a fixed metadata header between transmitters
//! and receivers of a channel, whether they live in the same process, on the
//! same host, or on other hosts, behind one receiver interface.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hermes::{Receiver, RoleAttributes, Transmitter, Result};
//!
//! fn main() -> Result<()> {
//!     let receiver = Receiver::builder(RoleAttributes::local("chatter").with_history_depth(5))
//!         .hybrid(|payload, info| println!("seq {}: {} bytes", info.seq, payload.len()))?;
//!     receiver.enable()?;
//!
//!     let writer = Transmitter::builder(RoleAttributes::local("chatter")).hybrid()?;
//!     writer.transmit("hello")?;
//!
//!     receiver.disable();
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application callback                        |
//! +---------------------------------------------------------------------+
//! |  Receiver: Intra | Shm | Rtps | Hybrid (per-writer locality route)  |
//! |  Delivery core: sequence check -> History -> callback / Scheduler   |
//! +---------------------------------------------------------------------+
//! |  IntraRegistry   |  shm ring + futex notify  |  NetworkTransport    |
//! |  (same process)  |  (same host)              |  (loopback, UDP)     |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Receiver`] | Consumer side of a channel, one of four backends |
//! | [`Transmitter`] | Producer side of a channel |
//! | [`Endpoint`] | Identity plus immutable [`RoleAttributes`] |
//! | [`MessageInfo`] | Sender identity, sequence number, timestamp |
//! | [`History`] | Bounded KEEP_LAST buffer behind QoS depth and replay |
//!
//! ## Guarantees
//!
//! - At most one callback runs at a time per receiver, whatever backend
//!   delivered the message.
//! - Per sender, a sequence number at or below the last one seen is dropped.
//! - Once `disable()` returns, the callback is not invoked again until the
//!   next `enable()`.

/// Static constants and runtime (per-channel) QoS configuration.
pub mod config;
/// Endpoint: identity plus role attributes.
pub mod endpoint;
/// Error and Result types.
pub mod error;
/// Bounded message history.
pub mod history;
/// Unique endpoint identities.
pub mod identity;
/// Per-message metadata and sequence numbering.
pub mod message;
/// Receivers and the shared delivery core.
pub mod receiver;
/// Endpoint location and QoS attributes.
pub mod role;
/// Callback scheduling seam.
pub mod scheduler;
/// Producer counterparts of the receivers.
pub mod transmitter;
/// Intra-process, shared-memory and network transports.
pub mod transport;

pub use config::RuntimeConfig;
pub use endpoint::Endpoint;
pub use error::{Error, Result};
pub use history::{History, HistoryEntry};
pub use identity::Identity;
pub use message::{MessageInfo, SeqNumGenerator};
pub use receiver::{
    Callback, DeliverySink, HybridReceiver, IntraReceiver, Receiver, ReceiverBuilder, ReceiverStats,
    ReceiverStatsSnapshot, RtpsReceiver, ShmReceiver,
};
pub use role::{Locality, QosProfile, Reliability, RoleAttributes};
pub use scheduler::{Scheduler, Task, WorkerPool};
pub use transmitter::{
    HybridTransmitter, IntraTransmitter, RtpsTransmitter, ShmTransmitter, Transmitter, TransmitterBuilder,
};
pub use transport::intra::{IntraRegistry, IntraToken};
pub use transport::rtps::{LoopbackNetwork, NetworkTransport, SubscriptionId, UdpConfig, UdpTransport};
pub use transport::shm::{select_backend, ShmPolicy, ShmSettings};
pub use transport::{BackendKind, MatchEvent};

/// Hermes version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
