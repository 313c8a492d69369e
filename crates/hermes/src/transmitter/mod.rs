// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmitters: the producer side of a channel.
//!
//! A transmitter stamps every payload with its [`MessageInfo`] (own
//! identity, next sequence number, wall-clock time) and hands it to its
//! backend. Stamped messages go through a per-transmitter outbox: stamping
//! and queueing are atomic, and one thread at a time sends the queue in
//! order, so receivers observe sequence numbers in order. No lock is held
//! while sending, so a receiver callback may publish on the transmitter it
//! is being fed by, from any thread.
//!
//! [`HybridTransmitter`] stamps once and sends the same `MessageInfo` over
//! every configured path; receivers reachable twice drop the second copy.

mod builder;
mod hybrid;
mod intra;
mod rtps;
mod shm;

pub use builder::TransmitterBuilder;
pub use hybrid::HybridTransmitter;
pub use intra::IntraTransmitter;
pub use rtps::RtpsTransmitter;
pub use shm::ShmTransmitter;

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::message::{MessageInfo, SeqNumGenerator};
use crate::role::RoleAttributes;
use crate::transport::Outbox;

/// Identity, sequence numbering and publish ordering of one transmitter.
pub(crate) struct TransmitterBase {
    endpoint: Endpoint,
    seq: SeqNumGenerator,
    outbox: Outbox<(MessageInfo, Bytes)>,
}

impl TransmitterBase {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            seq: SeqNumGenerator::new(),
            outbox: Outbox::new(),
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Stamp `payload` and queue it. `record` runs with the stamp, in
    /// sequence order, before anything is sent.
    pub(crate) fn enqueue(&self, payload: Bytes, record: impl FnOnce(&MessageInfo, &Bytes)) -> MessageInfo {
        self.outbox.push_with(|| {
            let info = MessageInfo::new(self.endpoint.id().clone(), self.seq.next());
            record(&info, &payload);
            ((info.clone(), payload), info)
        })
    }

    /// Send everything queued, unless another thread already is.
    ///
    /// Returns the send error of `own` if this thread sent it. Failures of
    /// messages queued by other threads are logged.
    pub(crate) fn flush(
        &self,
        own: &MessageInfo,
        mut send: impl FnMut(&MessageInfo, &Bytes) -> Result<()>,
    ) -> Result<()> {
        let mut result = Ok(());
        self.outbox.drain(|(info, payload)| {
            if let Err(e) = send(&info, &payload) {
                if info.seq == own.seq {
                    result = Err(e);
                } else {
                    log::warn!("[Transmitter] {} seq {} not sent: {}", self.endpoint, info.seq, e);
                }
            }
        });
        result
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.current()
    }
}

/// A transmitter of any backend.
pub enum Transmitter {
    /// Same process.
    Intra(IntraTransmitter),
    /// Same host, shared memory.
    Shm(ShmTransmitter),
    /// Network.
    Rtps(RtpsTransmitter),
    /// Every configured path.
    Hybrid(HybridTransmitter),
}

macro_rules! each {
    ($self:ident, $t:ident => $body:expr) => {
        match $self {
            Transmitter::Intra($t) => $body,
            Transmitter::Shm($t) => $body,
            Transmitter::Rtps($t) => $body,
            Transmitter::Hybrid($t) => $body,
        }
    };
}

impl Transmitter {
    /// Start building a transmitter for `attributes`.
    pub fn builder(attributes: RoleAttributes) -> TransmitterBuilder {
        TransmitterBuilder::new(attributes)
    }

    /// Endpoint of this transmitter.
    pub fn endpoint(&self) -> &Endpoint {
        each!(self, t => t.endpoint())
    }

    /// Publish one payload. Returns the metadata it was stamped with.
    pub fn transmit(&self, payload: impl Into<Bytes>) -> Result<MessageInfo> {
        each!(self, t => t.transmit(payload))
    }

    /// Sequence number the next `transmit` will use.
    pub fn next_seq(&self) -> u64 {
        each!(self, t => t.next_seq())
    }
}

impl From<IntraTransmitter> for Transmitter {
    fn from(t: IntraTransmitter) -> Self {
        Self::Intra(t)
    }
}

impl From<ShmTransmitter> for Transmitter {
    fn from(t: ShmTransmitter) -> Self {
        Self::Shm(t)
    }
}

impl From<RtpsTransmitter> for Transmitter {
    fn from(t: RtpsTransmitter) -> Self {
        Self::Rtps(t)
    }
}

impl From<HybridTransmitter> for Transmitter {
    fn from(t: HybridTransmitter) -> Self {
        Self::Hybrid(t)
    }
}

impl std::fmt::Debug for Transmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        each!(self, t => std::fmt::Debug::fmt(t, f))
    }
}
