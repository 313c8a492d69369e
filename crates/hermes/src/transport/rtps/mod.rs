// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network transport seam.
//!
//! Receivers and transmitters only see [`NetworkTransport`]: writer
//! advertisement, per-channel discovery events and per-reader data
//! callbacks. How matching, retransmission or routing happen behind it is
//! the implementation's business.
//!
//! - [`LoopbackNetwork`]: in-process simulated network (tests, simulated
//!   remote participants, partition injection)
//! - [`UdpTransport`]: UDP unicast/multicast with periodic announcements

mod frame;
mod loopback;
mod udp;

pub use frame::{Frame, FrameError, FRAME_MAGIC, FRAME_VERSION};
pub use loopback::LoopbackNetwork;
pub use udp::{UdpConfig, UdpTransport};

use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::identity::Identity;
use crate::message::MessageInfo;
use crate::transport::MatchHandler;

/// Data callback of a network subscription.
pub type DataHandler = Arc<dyn Fn(&MessageInfo, &Bytes) + Send + Sync>;

/// Handle of a subscription or discovery watch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Reliable-or-best-effort network delivery with discovery.
///
/// Per (writer, channel), data reaches every matched compatible reader in
/// publish order. Reliable writers are delivered eventually; best-effort
/// ones may drop. Absence of a matching writer is a normal state, not an
/// error.
pub trait NetworkTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Make a local writer discoverable.
    fn advertise(&self, writer: &Endpoint) -> Result<()>;

    /// Stop advertising a writer (watchers see `Unmatched`).
    fn withdraw(&self, writer: &Identity);

    /// Send one stamped message from `writer`.
    fn publish(&self, writer: &Endpoint, info: &MessageInfo, payload: &Bytes) -> Result<()>;

    /// Receive data for `reader`'s channel.
    fn subscribe(&self, reader: &Endpoint, handler: DataHandler) -> Result<SubscriptionId>;

    /// Watch writers on `channel`. Writers already known are reported
    /// through `handler` before this returns.
    fn watch(&self, channel: &str, handler: MatchHandler) -> Result<SubscriptionId>;

    /// Drop a subscription or watch. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Largest payload `publish` accepts.
    fn max_payload(&self) -> usize;
}
