// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Same-host receiver over a shared-memory ring.
//!
//! `enable()` attaches to the channel ring (the writer must have created
//! it) and starts one reader thread. The thread waits on the notify futex in
//! bounded slices, copies each slot out of the segment and pushes it through
//! the delivery sink. Ring overruns are reported as losses, never as errors.

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{DeliverySink, Receiver, ReceiverBase, ReceiverStatsSnapshot};
use crate::config::SHM_WAIT_SLICE_MS;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::history::HistoryEntry;
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::shm::{ReadOutcome, ShmRingReader, ShmSettings};
use crate::transport::BackendKind;

struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Receiver for transmitters in other processes of this host.
pub struct ShmReceiver {
    base: ReceiverBase,
    settings: ShmSettings,
    reader: Mutex<Option<ReaderThread>>,
}

impl ShmReceiver {
    /// Receiver with default shm settings.
    pub fn new<F>(attributes: RoleAttributes, callback: F) -> Result<Self>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        Receiver::builder(attributes).shm(callback)
    }

    pub(crate) fn from_base(base: ReceiverBase, settings: ShmSettings) -> Self {
        Self {
            base,
            settings,
            reader: Mutex::new(None),
        }
    }

    /// Endpoint of this receiver.
    pub fn endpoint(&self) -> &Endpoint {
        self.base.endpoint()
    }

    /// Namespace and geometry in use.
    pub fn settings(&self) -> &ShmSettings {
        &self.settings
    }

    /// Attach to the channel ring and start the reader thread.
    ///
    /// Fails with `TransportUnavailable` when the ring does not exist yet or
    /// was written with an incompatible layout. Idempotent.
    pub fn enable(&self) -> Result<()> {
        let mut reader = self.reader.lock();
        if reader.is_some() {
            return Ok(());
        }

        let names = self.settings.names_for(self.endpoint().channel());
        let ring = ShmRingReader::attach(&names, self.base.history_depth()).map_err(|e| {
            log::warn!("[ShmReceiver] cannot attach {}: {}", names.ring, e);
            Error::from(e)
        })?;

        self.base.activate();
        let stop = Arc::new(AtomicBool::new(false));
        let sink = self.base.sink();
        let thread_stop = Arc::clone(&stop);
        let spawned = thread::Builder::new()
            .name(format!("hermes-shm-{}", self.endpoint().channel()))
            .spawn(move || read_loop(ring, sink.as_ref(), &thread_stop));

        match spawned {
            Ok(handle) => {
                *reader = Some(ReaderThread { stop, handle });
                log::debug!("[ShmReceiver] enabled {} on {}", self.endpoint(), names.ring);
                Ok(())
            }
            Err(e) => {
                self.base.deactivate();
                Err(Error::TransportUnavailable(format!(
                    "shm reader thread for {}: {}",
                    self.endpoint().channel(),
                    e
                )))
            }
        }
    }

    /// Stop the reader thread and detach. Idempotent.
    ///
    /// From the reader thread itself (a callback disabling its own
    /// receiver) the thread is signalled but not joined.
    pub fn disable(&self) {
        let Some(reader) = self.reader.lock().take() else {
            return;
        };
        self.base.deactivate();
        reader.stop.store(true, Ordering::Release);

        if reader.handle.thread().id() == thread::current().id() {
            log::debug!("[ShmReceiver] {} disabled from its reader thread", self.endpoint());
            return;
        }
        if reader.handle.join().is_err() {
            log::error!("[ShmReceiver] reader thread of {} panicked", self.endpoint());
        }
        log::debug!("[ShmReceiver] disabled {}", self.endpoint());
    }

    /// Whether the reader thread is running.
    pub fn is_enabled(&self) -> bool {
        self.reader.lock().is_some()
    }

    /// Set History capacity (and attach replay depth) before enabling.
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

fn read_loop(mut ring: ShmRingReader, sink: &dyn DeliverySink, stop: &AtomicBool) {
    let slice = Duration::from_millis(SHM_WAIT_SLICE_MS);
    while !stop.load(Ordering::Acquire) {
        match ring.read_timeout(slice) {
            ReadOutcome::Message(info, payload) => sink.deliver(BackendKind::Shm, &info, &payload),
            ReadOutcome::Lost(count) => sink.report_loss(BackendKind::Shm, count),
            ReadOutcome::Empty => {}
        }
    }
}

impl Drop for ShmReceiver {
    fn drop(&mut self) {
        self.disable();
    }
}

impl std::fmt::Debug for ShmReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmReceiver")
            .field("endpoint", self.endpoint())
            .field("namespace", &self.settings.namespace)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
