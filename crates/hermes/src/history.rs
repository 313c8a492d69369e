// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded per-receiver message history.
//!
//! KEEP_LAST ring: entries are kept in arrival order and the oldest one is
//! evicted once `depth` is exceeded. Payloads are [`Bytes`], so snapshots
//! and replays share the buffers instead of copying them.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;

use crate::message::MessageInfo;

/// One stored message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Opaque payload.
    pub payload: Bytes,
    /// Metadata it arrived with.
    pub info: MessageInfo,
}

struct Ring {
    entries: VecDeque<HistoryEntry>,
    depth: usize,
}

/// Thread-safe KEEP_LAST history.
pub struct History {
    ring: Mutex<Ring>,
}

impl History {
    /// History holding at most `depth` entries (a depth of 0 is raised to 1).
    #[must_use]
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            ring: Mutex::new(Ring {
                entries: VecDeque::with_capacity(depth),
                depth,
            }),
        }
    }

    /// Configured capacity.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.ring.lock().depth
    }

    /// Change the capacity; shrinking evicts the oldest entries.
    pub fn set_depth(&self, depth: usize) {
        let mut ring = self.ring.lock();
        ring.depth = depth.max(1);
        while ring.entries.len() > ring.depth {
            ring.entries.pop_front();
        }
    }

    /// Append an entry, returning the evicted one if the ring was full.
    pub fn push(&self, payload: Bytes, info: MessageInfo) -> Option<HistoryEntry> {
        let mut ring = self.ring.lock();
        let evicted = if ring.entries.len() >= ring.depth {
            ring.entries.pop_front()
        } else {
            None
        };
        ring.entries.push_back(HistoryEntry { payload, info });
        evicted
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ring.lock().entries.len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ring.lock().entries.is_empty()
    }

    /// Copy of all entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.ring.lock().entries.iter().cloned().collect()
    }

    /// The newest `n` entries, oldest first.
    #[must_use]
    pub fn latest(&self, n: usize) -> Vec<HistoryEntry> {
        let ring = self.ring.lock();
        let skip = ring.entries.len().saturating_sub(n);
        ring.entries.iter().skip(skip).cloned().collect()
    }

    /// Newest entry.
    #[must_use]
    pub fn last(&self) -> Option<HistoryEntry> {
        self.ring.lock().entries.back().cloned()
    }

    /// Visit entries oldest first. Returns the number visited.
    ///
    /// Works on a snapshot so `f` may re-enter the history.
    pub fn replay<F>(&self, mut f: F) -> usize
    where
        F: FnMut(&Bytes, &MessageInfo),
    {
        let entries = self.snapshot();
        for entry in &entries {
            f(&entry.payload, &entry.info);
        }
        entries.len()
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.ring.lock().entries.clear();
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("History")
            .field("depth", &ring.depth)
            .field("len", &ring.entries.len())
            .finish()
    }
}
