// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Network receiver.
//!
//! Subscribes the delivery sink to a [`NetworkTransport`]. Matching,
//! retransmission and partitions are the transport's business; no matched
//! writer is a normal state, not an error.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{Receiver, ReceiverBase, ReceiverStatsSnapshot};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::history::HistoryEntry;
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::rtps::{DataHandler, NetworkTransport, SubscriptionId};
use crate::transport::BackendKind;

/// Receiver for transmitters reachable through a network transport.
pub struct RtpsReceiver {
    base: ReceiverBase,
    network: Arc<dyn NetworkTransport>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl RtpsReceiver {
    /// Receiver on `network`.
    pub fn new<F>(attributes: RoleAttributes, network: Arc<dyn NetworkTransport>, callback: F) -> Result<Self>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        Receiver::builder(attributes).network(network).rtps(callback)
    }

    pub(crate) fn from_base(base: ReceiverBase, network: Arc<dyn NetworkTransport>) -> Self {
        Self {
            base,
            network,
            subscription: Mutex::new(None),
        }
    }

    /// Endpoint of this receiver.
    pub fn endpoint(&self) -> &Endpoint {
        self.base.endpoint()
    }

    /// Subscribe to the channel. Fails with `TransportUnavailable` when the
    /// transport cannot take subscriptions. Idempotent.
    pub fn enable(&self) -> Result<()> {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return Ok(());
        }

        self.base.activate();
        let sink = self.base.sink();
        let handler: DataHandler = Arc::new(move |info: &MessageInfo, payload: &Bytes| {
            sink.deliver(BackendKind::Rtps, info, payload);
        });
        match self.network.subscribe(self.endpoint(), handler) {
            Ok(id) => {
                *subscription = Some(id);
                log::debug!(
                    "[RtpsReceiver] enabled {} on {} ({})",
                    self.endpoint(),
                    self.network.name(),
                    id
                );
                Ok(())
            }
            Err(e) => {
                self.base.deactivate();
                log::warn!("[RtpsReceiver] subscribe {} failed: {}", self.endpoint(), e);
                Err(e)
            }
        }
    }

    /// Unsubscribe. Idempotent.
    pub fn disable(&self) {
        let Some(id) = self.subscription.lock().take() else {
            return;
        };
        self.base.deactivate();
        self.network.unsubscribe(id);
        log::debug!("[RtpsReceiver] disabled {}", self.endpoint());
    }

    /// Whether the subscription is live.
    pub fn is_enabled(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Set History capacity before enabling.
    pub fn set_history_attributes(&self, depth: usize) -> Result<()> {
        self.base.set_history_depth(depth)
    }

    /// Current History capacity.
    pub fn history_depth(&self) -> usize {
        self.base.history_depth()
    }

    /// Copy of the History, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.base.history()
    }

    /// Walk the History oldest first.
    pub fn replay<F>(&self, f: F) -> usize
    where
        F: FnMut(&Bytes, &MessageInfo),
    {
        self.base.replay(f)
    }

    /// Delivery counters.
    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.base.stats()
    }
}

impl Drop for RtpsReceiver {
    fn drop(&mut self) {
        self.disable();
    }
}

impl std::fmt::Debug for RtpsReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RtpsReceiver")
            .field("endpoint", self.endpoint())
            .field("network", &self.network.name())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
