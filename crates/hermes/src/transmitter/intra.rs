// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Same-process transmitter.

use bytes::Bytes;
use std::sync::Arc;

use super::{Transmitter, TransmitterBase};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::history::History;
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::intra::{IntraRegistry, IntraToken};

/// Publishes by calling into every same-process receiver of the channel.
///
/// Keeps the last `history_depth` messages so receivers enabling later get
/// them replayed.
pub struct IntraTransmitter {
    base: TransmitterBase,
    registry: Arc<IntraRegistry>,
    history: Arc<History>,
    _token: IntraToken,
}

impl IntraTransmitter {
    /// Transmitter on the process-wide registry.
    pub fn new(attributes: RoleAttributes) -> Result<Self> {
        Transmitter::builder(attributes).intra()
    }

    pub(crate) fn attach(endpoint: Endpoint, registry: Arc<IntraRegistry>) -> Self {
        let history = Arc::new(History::new(endpoint.attributes().qos.history_depth));
        let token = registry.register_transmitter(&endpoint, Arc::clone(&history));
        Self {
            base: TransmitterBase::new(endpoint),
            registry,
            history,
            _token: token,
        }
    }

    /// Endpoint of this transmitter.
    pub fn endpoint(&self) -> &Endpoint {
        self.base.endpoint()
    }

    /// Publish one payload to the channel's receivers in this process.
    pub fn transmit(&self, payload: impl Into<Bytes>) -> Result<MessageInfo> {
        let info = self.base.enqueue(payload.into(), |info, payload| self.record(info, payload));
        self.base.flush(&info, |info, payload| {
            self.dispatch(info, payload);
            Ok(())
        })?;
        Ok(info)
    }

    /// Keep a stamped message for late joiners.
    pub(crate) fn record(&self, info: &MessageInfo, payload: &Bytes) {
        self.history.push(payload.clone(), info.clone());
    }

    /// Hand a recorded message to every receiver. Returns the number of
    /// receivers reached.
    pub(crate) fn dispatch(&self, info: &MessageInfo, payload: &Bytes) -> usize {
        let reached = self.registry.dispatch(self.endpoint(), info, payload);
        log::trace!(
            "[IntraTransmitter] {} seq {} -> {} receiver(s)",
            self.endpoint().channel(),
            info.seq,
            reached
        );
        reached
    }

    /// Sequence number the next `transmit` will use.
    pub fn next_seq(&self) -> u64 {
        self.base.next_seq()
    }

    /// Messages kept for late joiners.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }
}

impl std::fmt::Debug for IntraTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntraTransmitter")
            .field("endpoint", self.endpoint())
            .field("next_seq", &self.next_seq())
            .finish()
    }
}
