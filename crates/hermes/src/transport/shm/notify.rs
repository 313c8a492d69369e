// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-channel wake-up segment.
//!
//! ```text
//! NotifyBlock (64 bytes)
//! +--------------------------------------------+
//! | word      u32  futex word, +1 per commit   |
//! | magic     u32  NotifyBlock::MAGIC          |
//! | committed u64  highest committed pos + 1   |
//! | padding                                    |
//! +--------------------------------------------+
//! ```
//!
//! Readers avoid lost wake-ups with the double-check pattern:
//! poll ring, snapshot `word`, poll again, then wait on the snapshot.

use super::futex::{futex_wait, futex_wake_all};
use super::segment::ShmSegment;
use super::{Result, ShmError};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// Shared notification block.
#[repr(C, align(64))]
pub struct NotifyBlock {
    /// Futex word bumped on every commit.
    pub word: AtomicU32,
    /// [`NotifyBlock::MAGIC`] once initialized.
    pub magic: AtomicU32,
    /// One past the highest committed ring position.
    pub committed: AtomicU64,
    _pad: [u8; 48],
}

impl NotifyBlock {
    /// "HNTF"
    pub const MAGIC: u32 = 0x484E_5446;

    /// Block size.
    pub const SIZE: usize = std::mem::size_of::<NotifyBlock>();
}

/// Handle on a channel's notify segment.
pub struct ChannelNotify {
    segment: ShmSegment,
}

impl ChannelNotify {
    /// Create the segment (fails if it exists).
    pub fn create(name: &str) -> Result<Self> {
        let segment = ShmSegment::create(name, NotifyBlock::SIZE)?;
        let notify = Self { segment };
        notify.block().magic.store(NotifyBlock::MAGIC, Ordering::Release);
        Ok(notify)
    }

    /// Open an existing, initialized segment.
    pub fn open(name: &str) -> Result<Self> {
        let segment = ShmSegment::open(name)?;
        if segment.size() < NotifyBlock::SIZE {
            return Err(ShmError::TooSmall {
                size: segment.size(),
                needed: NotifyBlock::SIZE,
            });
        }
        let notify = Self { segment };
        let magic = notify.block().magic.load(Ordering::Acquire);
        if magic != NotifyBlock::MAGIC {
            return Err(ShmError::Corruption(format!(
                "notify segment {} has magic 0x{:08x}",
                name, magic
            )));
        }
        Ok(notify)
    }

    #[inline]
    fn block(&self) -> &NotifyBlock {
        // SAFETY:
        // - the mapping is at least NotifyBlock::SIZE bytes (checked or created so)
        // - mmap returns page-aligned memory, enough for align(64)
        // - every field is atomic or padding
        unsafe { &*(self.segment.as_ptr() as *const NotifyBlock) }
    }

    /// Record that `pos` is committed and wake all readers.
    #[inline]
    pub fn notify(&self, pos: u64) {
        let block = self.block();
        block.committed.fetch_max(pos + 1, Ordering::AcqRel);
        block.word.fetch_add(1, Ordering::Release);
        futex_wake_all(&block.word);
    }

    /// Futex word snapshot taken before the re-poll.
    #[inline]
    pub fn snapshot(&self) -> u32 {
        self.block().word.load(Ordering::Acquire)
    }

    /// Wait until the word moves away from `snapshot`, at most `timeout`.
    #[inline]
    pub fn wait(&self, snapshot: u32, timeout: Duration) {
        futex_wait(&self.block().word, snapshot, timeout);
    }

    /// One past the highest committed position.
    #[inline]
    pub fn committed(&self) -> u64 {
        self.block().committed.load(Ordering::Acquire)
    }

    /// Segment name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.segment.name()
    }
}
