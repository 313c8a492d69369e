// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receivers: the consumer side of a channel.
//!
//! Four backends share one contract ([`Receiver`]):
//!
//! | Receiver         | Reaches                       | I/O path                        |
//! |------------------|-------------------------------|---------------------------------|
//! | [`IntraReceiver`]  | same-process transmitters     | direct call via `IntraRegistry` |
//! | [`ShmReceiver`]    | same-host transmitters        | shm ring + futex wake thread    |
//! | [`RtpsReceiver`]   | any host                      | `NetworkTransport` callbacks    |
//! | [`HybridReceiver`] | all of the above, per writer  | lazily created sub-receivers    |
//!
//! Every message, whatever its path, goes through the receiver's delivery
//! core: sequence check per sender, History append, then the callback.
//!
//! # Lifecycle
//!
//! ```text
//! new ──> set_history_attributes* ──> enable ──> ... ──> disable ──> enable ...
//! ```
//!
//! `enable` and `disable` are idempotent. When `disable` returns, no
//! callback is running and none will run until the next `enable`.

mod builder;
mod delivery;
mod hybrid;
mod intra;
mod rtps;
mod shm;
mod stats;

pub use builder::ReceiverBuilder;
pub use delivery::{Callback, DeliverySink};
pub use hybrid::HybridReceiver;
pub use intra::IntraReceiver;
pub use rtps::RtpsReceiver;
pub use shm::ShmReceiver;
pub use stats::{ReceiverStats, ReceiverStatsSnapshot};

pub(crate) use delivery::Delivery;

use bytes::Bytes;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::history::HistoryEntry;
use crate::message::MessageInfo;
use crate::role::RoleAttributes;

/// State every concrete receiver holds: its endpoint, the delivery core
/// and the sink its transport pushes into.
///
/// A standalone receiver owns its delivery core and toggles it on
/// enable/disable. A hybrid sub-receiver shares the hybrid's core and sink
/// and leaves activation to the hybrid.
pub(crate) struct ReceiverBase {
    delivery: Arc<Delivery>,
    sink: Arc<dyn DeliverySink>,
    owns_delivery: bool,
}

impl ReceiverBase {
    pub(crate) fn owned(delivery: Arc<Delivery>) -> Self {
        let sink: Arc<dyn DeliverySink> = delivery.clone();
        Self {
            delivery,
            sink,
            owns_delivery: true,
        }
    }

    pub(crate) fn shared(delivery: Arc<Delivery>, sink: Arc<dyn DeliverySink>) -> Self {
        Self {
            delivery,
            sink,
            owns_delivery: false,
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        self.delivery.endpoint()
    }

    pub(crate) fn sink(&self) -> Arc<dyn DeliverySink> {
        Arc::clone(&self.sink)
    }

    pub(crate) fn activate(&self) {
        if self.owns_delivery {
            self.delivery.activate();
        }
    }

    pub(crate) fn deactivate(&self) {
        if self.owns_delivery {
            self.delivery.deactivate();
        }
    }

    pub(crate) fn set_history_depth(&self, depth: usize) -> Result<()> {
        self.delivery.set_history_depth(depth)
    }

    pub(crate) fn history_depth(&self) -> usize {
        self.delivery.history().depth()
    }

    pub(crate) fn history(&self) -> Vec<HistoryEntry> {
        self.delivery.history().snapshot()
    }

    pub(crate) fn replay<F>(&self, f: F) -> usize
    where
        F: FnMut(&Bytes, &MessageInfo),
    {
        self.delivery.history().replay(f)
    }

    pub(crate) fn stats(&self) -> ReceiverStatsSnapshot {
        self.delivery.stats().snapshot()
    }
}

/// A receiver of any backend.
pub enum Receiver {
    /// Same process.
    Intra(IntraReceiver),
    /// Same host, shared memory.
    Shm(ShmReceiver),
    /// Network.
    Rtps(RtpsReceiver),
    /// Per-writer selection among the three.
    Hybrid(HybridReceiver),
}

macro_rules! each {
    ($self:ident, $r:ident => $body:expr) => {
        match $self {
            Receiver::Intra($r) => $body,
            Receiver::Shm($r) => $body,
            Receiver::Rtps($r) => $body,
            Receiver::Hybrid($r) => $body,
        }
    };
}

impl Receiver {
    /// Start building a receiver for `attributes`.
    #[must_use]
    pub fn builder(attributes: RoleAttributes) -> ReceiverBuilder {
        ReceiverBuilder::new(attributes)
    }

    /// Backend name for logs.
    #[must_use]
    pub fn backend_name(&self) -> &'static str {
        match self {
            Self::Intra(_) => "intra",
            Self::Shm(_) => "shm",
            Self::Rtps(_) => "rtps",
            Self::Hybrid(_) => "hybrid",
        }
    }

    /// Endpoint of this receiver.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        each!(self, r => r.endpoint())
    }

    /// Activate delivery. Idempotent.
    pub fn enable(&self) -> Result<()> {
        each!(self, r => r.enable())
    }

    /// Deactivate delivery and release backend resources. Idempotent.
    pub fn disable(&self) {
        each!(self, r => r.disable())
    }

    /// Whether delivery is active.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        each!(self, r => r.is_enabled())
    }

    /// Set History capacity. Rejected with `InvalidState` once enabled.
    pub fn set_history_attributes(&self, depth: usize) -> Result<()> {
        each!(self, r => r.set_history_attributes(depth))
    }

    /// Current History capacity.
    #[must_use]
    pub fn history_depth(&self) -> usize {
        each!(self, r => r.history_depth())
    }

    /// Copy of the History, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry> {
        each!(self, r => r.history())
    }

    /// Walk the History oldest first without invoking the callback.
    pub fn replay<F>(&self, f: F) -> usize
    where
        F: FnMut(&Bytes, &MessageInfo),
    {
        each!(self, r => r.replay(f))
    }

    /// Delivery counters.
    #[must_use]
    pub fn stats(&self) -> ReceiverStatsSnapshot {
        each!(self, r => r.stats())
    }
}

impl From<IntraReceiver> for Receiver {
    fn from(r: IntraReceiver) -> Self {
        Self::Intra(r)
    }
}

impl From<ShmReceiver> for Receiver {
    fn from(r: ShmReceiver) -> Self {
        Self::Shm(r)
    }
}

impl From<RtpsReceiver> for Receiver {
    fn from(r: RtpsReceiver) -> Self {
        Self::Rtps(r)
    }
}

impl From<HybridReceiver> for Receiver {
    fn from(r: HybridReceiver) -> Self {
        Self::Hybrid(r)
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("backend", &self.backend_name())
            .field("endpoint", self.endpoint())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::transport::intra::IntraRegistry;
    use crate::transport::rtps::LoopbackNetwork;

    #[test]
    fn test_uniform_contract_across_backends() {
        let registry = IntraRegistry::new();
        let net = LoopbackNetwork::new();
        let receivers: Vec<Receiver> = vec![
            Receiver::builder(RoleAttributes::local("contract"))
                .registry(Arc::clone(&registry))
                .intra(|_, _| {})
                .expect("intra")
                .into(),
            Receiver::builder(RoleAttributes::local("contract"))
                .network(net.clone())
                .rtps(|_, _| {})
                .expect("rtps")
                .into(),
            Receiver::builder(RoleAttributes::local("contract"))
                .registry(Arc::clone(&registry))
                .network(net.clone())
                .hybrid(|_, _| {})
                .expect("hybrid")
                .into(),
        ];

        for receiver in &receivers {
            assert!(!receiver.is_enabled());
            receiver.set_history_attributes(4).expect("depth before enable");
            assert_eq!(receiver.history_depth(), 4);

            receiver.enable().expect("enable");
            receiver.enable().expect("enable is idempotent");
            assert!(receiver.is_enabled());
            assert!(matches!(
                receiver.set_history_attributes(2),
                Err(Error::InvalidState(_))
            ));

            receiver.disable();
            receiver.disable();
            assert!(!receiver.is_enabled());
            assert_eq!(receiver.endpoint().channel(), "contract");
        }
    }

    #[test]
    fn test_debug_names_backend() {
        let receiver: Receiver = Receiver::builder(RoleAttributes::local("dbg"))
            .registry(IntraRegistry::new())
            .intra(|_, _| {})
            .expect("intra")
            .into();
        assert_eq!(receiver.backend_name(), "intra");
        assert!(format!("{:?}", receiver).contains("intra"));
    }
}
