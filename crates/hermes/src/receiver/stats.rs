// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver counters.
//!
//! Per-message anomalies never surface as errors; they are counted here.
//! Counters use `Relaxed` ordering and are eventually consistent.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic delivery counters of one receiver.
#[derive(Debug, Default)]
pub struct ReceiverStats {
    received: AtomicU64,
    delivered: AtomicU64,
    duplicates: AtomicU64,
    lost: AtomicU64,
    overruns: AtomicU64,
    misrouted: AtomicU64,
    rejected_disabled: AtomicU64,
    queue_overflows: AtomicU64,
    callback_panics: AtomicU64,
}

macro_rules! counter {
    ($inc:ident, $add:ident, $field:ident) => {
        #[inline]
        pub(crate) fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }

        #[inline]
        #[allow(dead_code)]
        pub(crate) fn $add(&self, n: u64) {
            self.$field.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl ReceiverStats {
    /// Zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(inc_received, add_received, received);
    counter!(inc_delivered, add_delivered, delivered);
    counter!(inc_duplicates, add_duplicates, duplicates);
    counter!(inc_lost, add_lost, lost);
    counter!(inc_overruns, add_overruns, overruns);
    counter!(inc_misrouted, add_misrouted, misrouted);
    counter!(inc_rejected_disabled, add_rejected_disabled, rejected_disabled);
    counter!(inc_queue_overflows, add_queue_overflows, queue_overflows);
    counter!(inc_callback_panics, add_callback_panics, callback_panics);

    /// Copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> ReceiverStatsSnapshot {
        ReceiverStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            misrouted: self.misrouted.load(Ordering::Relaxed),
            rejected_disabled: self.rejected_disabled.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReceiverStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReceiverStatsSnapshot {
    /// Messages handed to the delivery path by any backend.
    pub received: u64,
    /// Callback invocations completed (panicking ones included).
    pub delivered: u64,
    /// Dropped because seq <= last seen from that sender.
    pub duplicates: u64,
    /// Sequence gaps (messages never seen).
    pub lost: u64,
    /// Positions lost to shm ring overwrite.
    pub overruns: u64,
    /// Dropped because they came through a backend not routed to the sender.
    pub misrouted: u64,
    /// Arrived while the receiver was disabled.
    pub rejected_disabled: u64,
    /// Dropped because the scheduler queue bound was reached.
    pub queue_overflows: u64,
    /// Callback panics caught.
    pub callback_panics: u64,
}

impl ReceiverStatsSnapshot {
    /// Every message that did not reach the callback for any reason.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.duplicates + self.misrouted + self.rejected_disabled + self.queue_overflows
    }
}

impl fmt::Display for ReceiverStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Receiver Stats:")?;
        writeln!(f, "  received:          {}", self.received)?;
        writeln!(f, "  delivered:         {}", self.delivered)?;
        writeln!(f, "  duplicates:        {}", self.duplicates)?;
        writeln!(f, "  lost:              {}", self.lost)?;
        writeln!(f, "  overruns:          {}", self.overruns)?;
        writeln!(f, "  misrouted:         {}", self.misrouted)?;
        writeln!(f, "  rejected_disabled: {}", self.rejected_disabled)?;
        writeln!(f, "  queue_overflows:   {}", self.queue_overflows)?;
        write!(f, "  callback_panics:   {}", self.callback_panics)
    }
}
