// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Multi-producer shared-memory ring with overwrite-on-wrap.
//!
//! # Writer push
//! 1. Claim a position: `control.reserved.fetch_add(1)`
//! 2. Mark the slot as writing (odd marker)
//! 3. Write header (sender, seq, timestamp, len) and payload
//! 4. Commit (even marker, Release)
//! 5. Bump the notify word and wake readers
//!
//! Writers never wait for readers.
//!
//! # Reader
//! Each reader keeps a private cursor. A cursor more than `capacity` behind
//! `reserved` has been lapped: the skipped positions are reported as lost.
//! Payloads are copied out and the marker re-checked before anything is
//! returned, so no reference into the segment escapes.

use bytes::Bytes;
use std::ptr;
use std::time::{Duration, Instant};

use super::notify::ChannelNotify;
use super::segment::ShmSegment;
use super::slot::{
    acquire_fence, ring_segment_size, slot_state, slot_stride, ShmControl, SlotHeader, SlotState,
};
use super::{Result, SegmentNames, ShmError};
use crate::config::SHM_STALL_TIMEOUT_MS;
use crate::message::MessageInfo;

/// How long a joiner waits for a concurrent creator to finish initializing.
const INIT_WAIT: Duration = Duration::from_millis(200);

/// Raw view over a mapped ring segment.
struct RingView {
    segment: ShmSegment,
    capacity: u64,
    mask: u64,
    slot_payload: usize,
    stride: usize,
}

impl RingView {
    fn new(segment: ShmSegment) -> Result<Self> {
        if segment.size() < ShmControl::SIZE {
            return Err(ShmError::TooSmall {
                size: segment.size(),
                needed: ShmControl::SIZE,
            });
        }
        // SAFETY: the mapping holds at least a control block and is page aligned
        let control = unsafe { &*(segment.as_ptr() as *const ShmControl) };
        control.validate().map_err(|why| {
            if why.starts_with("version mismatch") {
                ShmError::Incompatible(why)
            } else {
                ShmError::Corruption(why)
            }
        })?;

        let capacity = control.capacity as usize;
        let slot_payload = control.slot_payload as usize;
        let needed = ring_segment_size(capacity, slot_payload);
        if segment.size() < needed {
            return Err(ShmError::TooSmall {
                size: segment.size(),
                needed,
            });
        }

        Ok(Self {
            segment,
            capacity: capacity as u64,
            mask: capacity as u64 - 1,
            slot_payload,
            stride: slot_stride(slot_payload),
        })
    }

    #[inline]
    fn control(&self) -> &ShmControl {
        // SAFETY: validated in RingView::new; atomics only are mutated
        unsafe { &*(self.segment.as_ptr() as *const ShmControl) }
    }

    #[inline]
    fn slot_base(&self, pos: u64) -> *mut u8 {
        let index = (pos & self.mask) as usize;
        // SAFETY: index < capacity and the mapping covers
        // ShmControl::SIZE + capacity * stride bytes (checked in new)
        unsafe {
            self.segment
                .as_ptr()
                .add(ShmControl::SIZE + index * self.stride)
        }
    }

    #[inline]
    fn header(&self, pos: u64) -> &SlotHeader {
        // SAFETY: slot_base is 64-byte aligned (control and stride are
        // multiples of 64 on a page-aligned mapping) and in bounds
        unsafe { &*(self.slot_base(pos) as *const SlotHeader) }
    }

    #[inline]
    fn payload_ptr(&self, pos: u64) -> *mut u8 {
        // SAFETY: payload follows the header inside the same slot
        unsafe { self.slot_base(pos).add(SlotHeader::SIZE) }
    }
}

/// Writer side of a channel ring.
///
/// Shared by every transmitter of the channel in this process. The
/// instance that created the segments unlinks them on drop.
pub struct ShmRingWriter {
    view: RingView,
    notify: ChannelNotify,
    names: SegmentNames,
    owner: bool,
}

impl ShmRingWriter {
    /// Create the channel segments, or join them if another writer did.
    pub fn create_or_join(names: &SegmentNames, capacity: u32, slot_payload: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_power_of_two() {
            return Err(ShmError::InvalidCapacity(capacity));
        }

        match ShmSegment::create(&names.ring, ring_segment_size(capacity as usize, slot_payload)) {
            Ok(segment) => {
                // SAFETY: freshly created, zeroed, page aligned and large
                // enough; no other process validates it until magic is set
                let control = unsafe { &mut *(segment.as_ptr() as *mut ShmControl) };
                control.init(capacity, slot_payload as u32);

                // A leftover notify segment from a crashed writer is replaced
                ShmSegment::unlink(&names.notify)?;
                let notify = match ChannelNotify::create(&names.notify) {
                    Ok(n) => n,
                    Err(e) => {
                        let _ = ShmSegment::unlink(&names.ring);
                        return Err(e);
                    }
                };

                log::debug!(
                    "[SHM] Ring {} created (capacity={}, slot={})",
                    names.ring,
                    capacity,
                    slot_payload
                );
                Ok(Self {
                    view: RingView::new(segment)?,
                    notify,
                    names: names.clone(),
                    owner: true,
                })
            }
            Err(ShmError::AlreadyExists(_)) => Self::join(names),
            Err(e) => Err(e),
        }
    }

    fn join(names: &SegmentNames) -> Result<Self> {
        let deadline = Instant::now() + INIT_WAIT;
        loop {
            let attempt = ShmSegment::open(&names.ring)
                .and_then(RingView::new)
                .and_then(|view| Ok((view, ChannelNotify::open(&names.notify)?)));
            match attempt {
                Ok((view, notify)) => {
                    log::debug!("[SHM] Joined existing ring {}", names.ring);
                    return Ok(Self {
                        view,
                        notify,
                        names: names.clone(),
                        owner: false,
                    });
                }
                // Creator still initializing
                Err(ShmError::Corruption(_) | ShmError::NotFound(_) | ShmError::TooSmall { .. })
                    if Instant::now() < deadline =>
                {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Write one message. Returns the ring position used.
    pub fn push(&self, info: &MessageInfo, payload: &[u8]) -> Result<u64> {
        if payload.len() > self.view.slot_payload {
            return Err(ShmError::PayloadTooLarge {
                size: payload.len(),
                capacity: self.view.slot_payload,
            });
        }

        let pos = self.view.control().claim();
        let header = self.view.header(pos);
        header.begin_write(pos);
        header.write_info(info, payload.len() as u32);
        // SAFETY:
        // - payload.len() <= slot_payload, the destination has slot_payload bytes
        // - the odd marker tells readers not to trust this slot until commit
        // - source is process memory, destination is the mapping: no overlap
        unsafe {
            ptr::copy_nonoverlapping(payload.as_ptr(), self.view.payload_ptr(pos), payload.len());
        }
        header.commit(pos);
        self.notify.notify(pos);
        Ok(pos)
    }

    /// Largest payload accepted.
    #[must_use]
    pub fn slot_payload(&self) -> usize {
        self.view.slot_payload
    }

    /// Ring capacity in slots.
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.view.capacity
    }

    /// Positions claimed so far (all writers).
    #[must_use]
    pub fn reserved(&self) -> u64 {
        self.view.control().reserved()
    }

    /// True if this writer created (and will unlink) the segments.
    #[must_use]
    pub fn is_owner(&self) -> bool {
        self.owner
    }

    /// Segment names.
    #[must_use]
    pub fn names(&self) -> &SegmentNames {
        &self.names
    }
}

impl Drop for ShmRingWriter {
    fn drop(&mut self) {
        if self.owner {
            for name in [&self.names.ring, &self.names.notify] {
                if let Err(e) = ShmSegment::unlink(name) {
                    log::debug!("[SHM] Failed to unlink {}: {}", name, e);
                }
            }
            log::debug!("[SHM] Ring {} unlinked", self.names.ring);
        }
    }
}

/// Result of one read attempt.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A message copied out of the ring.
    Message(MessageInfo, Bytes),
    /// `n` positions were overwritten or abandoned before they could be read.
    Lost(u64),
    /// Nothing new.
    Empty,
}

/// Reader side of a channel ring.
pub struct ShmRingReader {
    view: RingView,
    notify: ChannelNotify,
    cursor: u64,
    stalled_since: Option<Instant>,
    scratch: Vec<u8>,
}

impl ShmRingReader {
    /// Attach to an existing channel ring.
    ///
    /// The cursor starts `replay_depth` positions before the newest claimed
    /// one (bounded by the ring capacity), so up to that many recent
    /// messages are delivered first.
    pub fn attach(names: &SegmentNames, replay_depth: usize) -> Result<Self> {
        let view = RingView::new(ShmSegment::open(&names.ring)?)?;
        let notify = ChannelNotify::open(&names.notify)?;

        let reserved = view.control().reserved();
        let back = (replay_depth as u64).min(view.capacity);
        let cursor = reserved.saturating_sub(back);
        let scratch = Vec::with_capacity(view.slot_payload);

        log::debug!(
            "[SHM] Attached to {} at position {} (reserved={})",
            names.ring,
            cursor,
            reserved
        );
        Ok(Self {
            view,
            notify,
            cursor,
            stalled_since: None,
            scratch,
        })
    }

    /// Try to read the next message without blocking.
    pub fn try_read(&mut self) -> ReadOutcome {
        let reserved = self.view.control().reserved();
        if self.cursor >= reserved {
            return ReadOutcome::Empty;
        }

        // Lapped by the writers
        let behind = reserved - self.cursor;
        if behind > self.view.capacity {
            let lost = behind - self.view.capacity;
            self.cursor += lost;
            self.stalled_since = None;
            return ReadOutcome::Lost(lost);
        }

        let pos = self.cursor;
        let header = self.view.header(pos);
        let marker = header.marker();
        match slot_state(marker, pos) {
            SlotState::Ready => {}
            SlotState::Overwritten => return self.skip(),
            SlotState::Writing | SlotState::Pending => {
                // Claimed but not committed. Give up on it only if a writer
                // died mid-write while later positions keep committing.
                let since = *self.stalled_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= Duration::from_millis(SHM_STALL_TIMEOUT_MS)
                    && self.notify.committed() > pos + 1
                {
                    log::debug!("[SHM] Skipping abandoned position {}", pos);
                    return self.skip();
                }
                return ReadOutcome::Empty;
            }
        }

        let (info, len) = header.read_info();
        let len = len as usize;
        if len > self.view.slot_payload {
            return self.skip();
        }

        self.scratch.clear();
        self.scratch.resize(len, 0);
        // SAFETY:
        // - len <= slot_payload, so the source range lies inside the slot
        // - scratch has exactly len bytes
        // - a concurrent overwrite can tear the copy; the marker re-check
        //   below discards it
        unsafe {
            ptr::copy_nonoverlapping(self.view.payload_ptr(pos), self.scratch.as_mut_ptr(), len);
        }
        acquire_fence();
        if header.marker() != marker {
            return self.skip();
        }

        self.cursor = pos + 1;
        self.stalled_since = None;
        ReadOutcome::Message(info, Bytes::copy_from_slice(&self.scratch))
    }

    fn skip(&mut self) -> ReadOutcome {
        self.cursor += 1;
        self.stalled_since = None;
        ReadOutcome::Lost(1)
    }

    /// Read, waiting at most `timeout` for a commit.
    ///
    /// Poll, snapshot the notify word, poll again, then wait on the
    /// snapshot so a commit between the two polls is never slept through.
    pub fn read_timeout(&mut self, timeout: Duration) -> ReadOutcome {
        match self.try_read() {
            ReadOutcome::Empty => {}
            other => return other,
        }
        let snapshot = self.notify.snapshot();
        match self.try_read() {
            ReadOutcome::Empty => {}
            other => return other,
        }
        // A stalled slot is re-checked on the next slice
        let wait = if self.stalled_since.is_some() {
            timeout.min(Duration::from_millis(SHM_STALL_TIMEOUT_MS / 4 + 1))
        } else {
            timeout
        };
        self.notify.wait(snapshot, wait);
        self.try_read()
    }

    /// Next position this reader will read.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.cursor
    }

    /// Positions claimed but not yet read.
    #[must_use]
    pub fn available(&self) -> u64 {
        self.view.control().reserved().saturating_sub(self.cursor)
    }
}
