// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Same-process receiver.
//!
//! Registers its delivery sink with an [`IntraRegistry`]; a transmitter on
//! the same channel calls straight into it on `transmit()`. On enable the
//! newest writer-side history entries are replayed (late join).

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{Receiver, ReceiverBase, ReceiverStatsSnapshot};
use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::history::HistoryEntry;
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::intra::{IntraRegistry, IntraToken};

/// Receiver for transmitters living in this process.
pub struct IntraReceiver {
    base: ReceiverBase,
    registry: Arc<IntraRegistry>,
    token: Mutex<Option<IntraToken>>,
}

impl IntraReceiver {
    /// Receiver on the process-wide registry.
    pub fn new<F>(attributes: RoleAttributes, callback: F) -> Result<Self>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        Receiver::builder(attributes).intra(callback)
    }

    pub(crate) fn from_base(base: ReceiverBase, registry: Arc<IntraRegistry>) -> Self {
        Self {
            base,
            registry,
            token: Mutex::new(None),
        }
    }

    /// Endpoint of this receiver.
    pub fn endpoint(&self) -> &Endpoint {
        self.base.endpoint()
    }

    /// Register with the registry and replay writer history. Idempotent.
    pub fn enable(&self) -> Result<()> {
        {
            let mut token = self.token.lock();
            if token.is_some() {
                return Ok(());
            }
            self.base.activate();
            *token = Some(self.registry.register_receiver(self.endpoint(), self.base.sink()));
        }

        let depth = self.base.history_depth();
        let sink = self.base.sink();
        let replayed = self.registry.replay_history(self.endpoint(), depth, sink.as_ref());
        log::debug!(
            "[IntraReceiver] enabled {} (replayed {})",
            self.endpoint(),
            replayed
        );
        Ok(())
    }

    /// Unregister. Idempotent.
    pub fn disable(&self) {
        let Some(token) = self.token.lock().take() else {
            return;
        };
        self.base.deactivate();
        drop(token);
        log::debug!("[IntraReceiver] disabled {}", self.endpoint());
    }

    /// Whether the receiver is registered.
    pub fn is_enabled(&self) -> bool {
        self.token.lock().is_some()
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

impl Drop for IntraReceiver {
    fn drop(&mut self) {
        self.disable();
    }
}

impl std::fmt::Debug for IntraReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntraReceiver")
            .field("endpoint", self.endpoint())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
