// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-message metadata and sender-side sequence numbering.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::identity::Identity;

/// Metadata travelling with every message.
///
/// Created by the sender at publish time, read-only at the receiver.
/// For a fixed sender (which is bound to one channel) `seq` is strictly
/// increasing, which is what receivers use to drop duplicates and detect gaps.
///
/// # Wire Format
/// [`MessageInfo::WIRE_LEN`] bytes, little-endian:
/// `sender (16) | seq (u64) | timestamp_ns (u64)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MessageInfo {
    /// Identity of the transmitter that published the message.
    pub sender: Identity,
    /// Sequence number, starts at 1 per sender.
    pub seq: u64,
    /// Wall-clock send time, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

impl MessageInfo {
    /// Encoded size.
    pub const WIRE_LEN: usize = Identity::WIRE_LEN + 16;

    /// Metadata stamped now.
    #[must_use]
    pub fn new(sender: Identity, seq: u64) -> Self {
        Self {
            sender,
            seq,
            timestamp_ns: now_ns(),
        }
    }

    /// Write the header into `buf` (at least [`Self::WIRE_LEN`] bytes).
    ///
    /// Returns `None` if the buffer is too short.
    pub fn encode_into(&self, buf: &mut [u8]) -> Option<usize> {
        let out = buf.get_mut(..Self::WIRE_LEN)?;
        out[..16].copy_from_slice(&self.sender.as_bytes());
        out[16..24].copy_from_slice(&self.seq.to_le_bytes());
        out[24..32].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        Some(Self::WIRE_LEN)
    }

    /// Read a header written by [`Self::encode_into`].
    #[must_use]
    pub fn decode(buf: &[u8]) -> Option<Self> {
        let b = buf.get(..Self::WIRE_LEN)?;
        let mut id = [0u8; 16];
        id.copy_from_slice(&b[..16]);
        let mut seq = [0u8; 8];
        seq.copy_from_slice(&b[16..24]);
        let mut ts = [0u8; 8];
        ts.copy_from_slice(&b[24..32]);
        Some(Self {
            sender: Identity::from_bytes(id),
            seq: u64::from_le_bytes(seq),
            timestamp_ns: u64::from_le_bytes(ts),
        })
    }
}

/// Per-sender monotonic sequence numbering.
///
/// Starts at 1; 0 never appears on the wire, so receivers can use it as
/// "nothing seen yet".
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicU64,
}

impl SeqNumGenerator {
    /// Generator whose first value is 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next sequence number.
    #[inline]
    pub fn next(&self) -> u64 {
        // fetch_add returns the previous value, which is the one to use
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Sequence number the next call to [`Self::next`] will return.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Wall-clock time in nanoseconds since the Unix epoch.
#[must_use]
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
