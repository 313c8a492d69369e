// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Versioned shared-memory layout (v1).
//!
//! ```text
//! Offset                 Size              Field
//! 0                      64                ShmControl
//! 64 + i * stride        64                SlotHeader[i]
//! 64 + i * stride + 64   slot_payload      payload bytes of slot i
//! ```
//!
//! `stride = 64 + slot_payload` rounded up to 64 bytes.
//!
//! # Commit marker
//!
//! `marker = (pos + 1) << 1` once the message at ring position `pos` is
//! committed, `((pos + 1) << 1) | 1` while a writer is filling the slot, so a
//! zeroed slot never looks committed. Readers compare
//! the exact value before and after copying, so overwritten or half-written
//! slots are never delivered.
//!
//! # Ordering
//!
//! Writers store the odd marker, issue a Release fence, fill header and
//! payload, then store the even marker with Release. Readers load the marker
//! with Acquire, copy, issue an Acquire fence and reload the marker.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, Ordering};

use crate::identity::Identity;
use crate::message::MessageInfo;

/// Control block at offset 0 of every ring segment.
#[repr(C, align(64))]
pub struct ShmControl {
    /// Number of positions claimed by writers (next position to claim).
    pub reserved: AtomicU64,
    /// Ring capacity in slots (power of two).
    pub capacity: u32,
    /// Payload bytes per slot.
    pub slot_payload: u32,
    /// [`ShmControl::MAGIC`] once initialized.
    pub magic: AtomicU32,
    /// Layout version.
    pub version: u32,
    _pad: [u8; 40],
}

impl ShmControl {
    /// "HERM"
    pub const MAGIC: u32 = 0x4845_524D;

    /// Current layout version.
    pub const VERSION: u32 = 1;

    /// Size of the control block.
    pub const SIZE: usize = std::mem::size_of::<ShmControl>();

    /// Initialize a zeroed control block. Magic is published last.
    pub fn init(&mut self, capacity: u32, slot_payload: u32) {
        self.reserved.store(0, Ordering::Relaxed);
        self.capacity = capacity;
        self.slot_payload = slot_payload;
        self.version = Self::VERSION;
        self.magic.store(Self::MAGIC, Ordering::Release);
    }

    /// Magic loaded with Acquire (0 while the creator is initializing).
    #[inline]
    pub fn magic(&self) -> u32 {
        self.magic.load(Ordering::Acquire)
    }

    /// Check magic, version and geometry.
    pub fn validate(&self) -> Result<(), String> {
        let magic = self.magic();
        if magic != Self::MAGIC {
            return Err(format!("bad magic 0x{:08x}", magic));
        }
        if self.version != Self::VERSION {
            return Err(format!(
                "version mismatch: segment v{}, expected v{}",
                self.version,
                Self::VERSION
            ));
        }
        if self.capacity == 0 || !self.capacity.is_power_of_two() {
            return Err(format!("invalid capacity {}", self.capacity));
        }
        if self.slot_payload == 0 {
            return Err("zero slot payload".to_string());
        }
        Ok(())
    }

    /// Claim the next ring position.
    #[inline]
    pub fn claim(&self) -> u64 {
        self.reserved.fetch_add(1, Ordering::AcqRel)
    }

    /// Positions claimed so far.
    #[inline]
    pub fn reserved(&self) -> u64 {
        self.reserved.load(Ordering::Acquire)
    }
}

/// Per-slot header (64 bytes, cache-line aligned).
#[repr(C, align(64))]
pub struct SlotHeader {
    /// Commit marker (see module docs).
    pub marker: AtomicU64,
    /// Payload length.
    pub len: AtomicU32,
    _reserved: u32,
    /// Sender identity, high 64 bits.
    pub sender_hi: AtomicU64,
    /// Sender identity, low 64 bits.
    pub sender_lo: AtomicU64,
    /// Sender sequence number.
    pub seq: AtomicU64,
    /// Send timestamp (ns).
    pub timestamp_ns: AtomicU64,
    _pad: [u8; 16],
}

impl SlotHeader {
    /// Header size.
    pub const SIZE: usize = std::mem::size_of::<SlotHeader>();

    /// Mark the slot as being written for `pos`.
    #[inline]
    pub fn begin_write(&self, pos: u64) {
        self.marker.store(committed_marker(pos) | 1, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// Store the message metadata.
    #[inline]
    pub fn write_info(&self, info: &MessageInfo, len: u32) {
        let id = info.sender.as_u128();
        self.len.store(len, Ordering::Relaxed);
        self.sender_hi.store((id >> 64) as u64, Ordering::Relaxed);
        self.sender_lo.store(id as u64, Ordering::Relaxed);
        self.seq.store(info.seq, Ordering::Relaxed);
        self.timestamp_ns.store(info.timestamp_ns, Ordering::Relaxed);
    }

    /// Publish the slot for `pos`.
    #[inline]
    pub fn commit(&self, pos: u64) {
        self.marker.store(committed_marker(pos), Ordering::Release);
    }

    /// Current marker (Acquire).
    #[inline]
    pub fn marker(&self) -> u64 {
        self.marker.load(Ordering::Acquire)
    }

    /// Read metadata. Only meaningful between two matching marker loads.
    #[inline]
    pub fn read_info(&self) -> (MessageInfo, u32) {
        let hi = u128::from(self.sender_hi.load(Ordering::Relaxed));
        let lo = u128::from(self.sender_lo.load(Ordering::Relaxed));
        let sender = Identity::from_bytes(((hi << 64) | lo).to_be_bytes());
        let info = MessageInfo {
            sender,
            seq: self.seq.load(Ordering::Relaxed),
            timestamp_ns: self.timestamp_ns.load(Ordering::Relaxed),
        };
        (info, self.len.load(Ordering::Relaxed))
    }
}

/// What the marker says about position `pos`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    /// Committed for `pos`.
    Ready,
    /// A writer is filling the slot for `pos`.
    Writing,
    /// Still holds an older position; `pos` not written yet.
    Pending,
    /// Already reused for a later position.
    Overwritten,
}

/// Marker value of a committed slot holding position `pos`.
#[inline]
#[must_use]
pub const fn committed_marker(pos: u64) -> u64 {
    (pos + 1) << 1
}

/// Classify a marker relative to the position a reader expects.
#[inline]
#[must_use]
pub fn slot_state(marker: u64, pos: u64) -> SlotState {
    let want = committed_marker(pos);
    if marker == want {
        SlotState::Ready
    } else if marker == want | 1 {
        SlotState::Writing
    } else if marker < want {
        SlotState::Pending
    } else {
        SlotState::Overwritten
    }
}

/// Distance between consecutive slots for a payload size.
#[must_use]
pub const fn slot_stride(slot_payload: usize) -> usize {
    let raw = SlotHeader::SIZE + slot_payload;
    (raw + 63) & !63
}

/// Total ring segment size.
#[must_use]
pub const fn ring_segment_size(capacity: usize, slot_payload: usize) -> usize {
    ShmControl::SIZE + capacity * slot_stride(slot_payload)
}

/// Acquire fence between the payload copy and the marker re-check.
#[inline]
pub fn acquire_fence() {
    fence(Ordering::Acquire);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_sizes() {
        assert_eq!(ShmControl::SIZE, 64);
        assert_eq!(SlotHeader::SIZE, 64);
        assert_eq!(slot_stride(4096), 64 + 4096);
        assert_eq!(slot_stride(100), 192);
        assert_eq!(ring_segment_size(4, 4096), 64 + 4 * 4160);
    }

    #[test]
    fn test_slot_state() {
        assert_eq!(slot_state(committed_marker(10), 10), SlotState::Ready);
        assert_eq!(slot_state(committed_marker(10) | 1, 10), SlotState::Writing);
        assert_eq!(slot_state(committed_marker(2), 10), SlotState::Pending);
        // A zeroed slot is not a committed position 0
        assert_eq!(slot_state(0, 0), SlotState::Pending);
        assert_eq!(slot_state(committed_marker(266), 10), SlotState::Overwritten);
    }

    #[test]
    fn test_header_info_roundtrip() {
        // SAFETY: SlotHeader is plain atomics and padding, all-zero is valid
        let header: SlotHeader = unsafe { std::mem::zeroed() };
        let info = MessageInfo::new(Identity::new(), 9);
        header.begin_write(3);
        header.write_info(&info, 42);
        header.commit(3);
        assert_eq!(slot_state(header.marker(), 3), SlotState::Ready);
        let (read, len) = header.read_info();
        assert_eq!(read, info);
        assert_eq!(len, 42);
    }

    #[test]
    fn test_control_validation() {
        // SAFETY: ShmControl is atomics, integers and padding, all-zero is valid
        let mut control: ShmControl = unsafe { std::mem::zeroed() };
        assert!(control.validate().is_err());
        control.init(256, 4096);
        assert!(control.validate().is_ok());
        assert_eq!(control.claim(), 0);
        assert_eq!(control.claim(), 1);
        assert_eq!(control.reserved(), 2);

        control.version = 2;
        assert!(control.validate().unwrap_err().contains("version mismatch"));
    }
}
