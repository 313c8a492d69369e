// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Shared-memory transport for same-host, cross-process delivery.
//!
//! ```text
//! +------------------+                      +------------------+
//! |   Process A      |   /hermes_ns_c_...   |   Process B      |
//! |  ShmTransmitter  |   (ring, mmap)       |   ShmReceiver    |
//! |        |         |                      |        ^         |
//! |        v         |                      |        |         |
//! |  ShmRingWriter --+----------------------+-> ShmRingReader  |
//! +------------------+   /hermes_ns_n_...   +------------------+
//!                        (futex wake)
//! ```
//!
//! One ring segment and one notify segment per `(namespace, channel)`.
//! The writer that creates them unlinks them; readers only attach/detach.

mod futex;
mod notify;
mod policy;
mod ring;
mod segment;
mod slot;

pub use notify::{ChannelNotify, NotifyBlock};
pub use policy::{select_backend, ShmPolicy};
pub use ring::{ReadOutcome, ShmRingReader, ShmRingWriter};
pub use segment::ShmSegment;
pub use slot::{ring_segment_size, ShmControl, SlotHeader};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::Path;
use std::sync::{Arc, OnceLock, Weak};

use crate::config::{env, SHM_DEFAULT_NAMESPACE, SHM_RING_CAPACITY, SHM_SEGMENT_PREFIX, SHM_SLOT_PAYLOAD};

/// Errors of the shm transport.
#[derive(Debug)]
pub enum ShmError {
    /// Segment creation failed.
    SegmentCreate(io::Error),
    /// Segment open failed.
    SegmentOpen(io::Error),
    /// `mmap` failed.
    Mmap(io::Error),
    /// A segment with this name already exists.
    AlreadyExists(String),
    /// Segment not found (no publisher yet).
    NotFound(String),
    /// Segment smaller than its layout requires.
    TooSmall {
        /// Mapped size.
        size: usize,
        /// Required size.
        needed: usize,
    },
    /// Control block invalid (bad magic, geometry, still initializing).
    Corruption(String),
    /// Segment written with an incompatible layout version.
    Incompatible(String),
    /// Payload larger than a slot.
    PayloadTooLarge {
        /// Payload size.
        size: usize,
        /// Slot payload capacity.
        capacity: usize,
    },
    /// Invalid segment name.
    InvalidName(String),
    /// Ring capacity is not a power of two.
    InvalidCapacity(u32),
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SegmentCreate(e) => write!(f, "Shared memory segment creation failed: {e}"),
            Self::SegmentOpen(e) => write!(f, "Shared memory segment open failed: {e}"),
            Self::Mmap(e) => write!(f, "Memory mapping failed: {e}"),
            Self::AlreadyExists(name) => write!(f, "Segment already exists: {name}"),
            Self::NotFound(name) => write!(f, "Segment not found: {name}"),
            Self::TooSmall { size, needed } => {
                write!(f, "Segment too small: {size} bytes, layout needs {needed}")
            }
            Self::Corruption(why) => write!(f, "Invalid segment: {why}"),
            Self::Incompatible(why) => write!(f, "Incompatible segment: {why}"),
            Self::PayloadTooLarge { size, capacity } => write!(
                f,
                "Payload too large: {size} bytes exceeds slot capacity {capacity}"
            ),
            Self::InvalidName(name) => write!(f, "Invalid segment name: {name}"),
            Self::InvalidCapacity(cap) => {
                write!(f, "Invalid ring capacity: {cap} (must be power of 2)")
            }
        }
    }
}

impl std::error::Error for ShmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SegmentCreate(e) | Self::SegmentOpen(e) | Self::Mmap(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ShmError> for crate::Error {
    fn from(e: ShmError) -> Self {
        match e {
            ShmError::PayloadTooLarge { size, capacity } => {
                crate::Error::PayloadTooLarge { size, capacity }
            }
            ShmError::InvalidName(_) | ShmError::InvalidCapacity(_) => {
                crate::Error::InvalidConfig(e.to_string())
            }
            other => crate::Error::TransportUnavailable(other.to_string()),
        }
    }
}

/// Result type of shm operations.
pub type Result<T> = std::result::Result<T, ShmError>;

/// Ring and notify segment names of one channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SegmentNames {
    /// `/hermes_{ns}_c_{channel}_{hash}`
    pub ring: String,
    /// `/hermes_{ns}_n_{channel}_{hash}`
    pub notify: String,
}

impl SegmentNames {
    /// Deterministic names for `channel` in `namespace`.
    ///
    /// Characters outside `[A-Za-z0-9-]` become `-`; the FNV-1a hash of the
    /// raw channel name keeps sanitized collisions apart.
    #[must_use]
    pub fn for_channel(namespace: &str, channel: &str) -> Self {
        let ns = sanitize(namespace, 32);
        let chan = sanitize(channel, 96);
        let hash = fnv1a(channel);
        Self {
            ring: format!("/{SHM_SEGMENT_PREFIX}_{ns}_c_{chan}_{hash:08x}"),
            notify: format!("/{SHM_SEGMENT_PREFIX}_{ns}_n_{chan}_{hash:08x}"),
        }
    }
}

/// Segment namespace and ring geometry used by shm endpoints.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShmSettings {
    /// Namespace component of segment names.
    pub namespace: String,
    /// Slots per ring (power of two). Only used by the creating writer.
    pub capacity: u32,
    /// Payload bytes per slot. Only used by the creating writer.
    pub slot_payload: usize,
}

impl Default for ShmSettings {
    /// `HERMES_SHM_NAMESPACE` (or `default`), 256 slots of 4096 bytes.
    fn default() -> Self {
        let namespace = std::env::var(env::SHM_NAMESPACE)
            .ok()
            .filter(|ns| !ns.trim().is_empty())
            .unwrap_or_else(|| SHM_DEFAULT_NAMESPACE.to_string());
        Self {
            namespace,
            capacity: SHM_RING_CAPACITY,
            slot_payload: SHM_SLOT_PAYLOAD,
        }
    }
}

impl ShmSettings {
    /// Default geometry in `namespace`.
    #[must_use]
    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    /// Segment names of `channel` in this namespace.
    #[must_use]
    pub fn names_for(&self, channel: &str) -> SegmentNames {
        SegmentNames::for_channel(&self.namespace, channel)
    }
}

fn sanitize(raw: &str, max: usize) -> String {
    let mut out: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .take(max)
        .collect();
    if out.is_empty() {
        out.push('-');
    }
    out
}

fn fnv1a(s: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in s.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

/// Process-wide writer for a channel ring.
///
/// Transmitters of the same channel in one process share a single writer;
/// the segments live until the last of them is dropped.
pub fn shared_writer(
    names: &SegmentNames,
    capacity: u32,
    slot_payload: usize,
) -> Result<Arc<ShmRingWriter>> {
    static WRITERS: OnceLock<Mutex<HashMap<String, Weak<ShmRingWriter>>>> = OnceLock::new();
    let mut writers = WRITERS.get_or_init(|| Mutex::new(HashMap::new())).lock();

    if let Some(existing) = writers.get(&names.ring).and_then(Weak::upgrade) {
        return Ok(existing);
    }
    writers.retain(|_, w| w.strong_count() > 0);

    let writer = Arc::new(ShmRingWriter::create_or_join(names, capacity, slot_payload)?);
    writers.insert(names.ring.clone(), Arc::downgrade(&writer));
    Ok(writer)
}

/// Names (without leading `/`) of hermes segments in `namespace`.
#[must_use]
pub fn list_segments(namespace: &str) -> Vec<String> {
    let prefix = format!("{}_{}_", SHM_SEGMENT_PREFIX, sanitize(namespace, 32));
    let dir = Path::new("/dev/shm");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| name.starts_with(&prefix))
        .collect();
    names.sort();
    names
}

/// Unlink stale hermes segments of `namespace`.
///
/// A ring is stale when its control block fails validation (zero or wrong
/// magic, other version, truncated). A notify segment is stale when its
/// ring no longer exists. Returns the number of segments removed.
pub fn cleanup_stale_segments(namespace: &str) -> usize {
    let ns = sanitize(namespace, 32);
    let ring_prefix = format!("{SHM_SEGMENT_PREFIX}_{ns}_c_");
    let notify_prefix = format!("{SHM_SEGMENT_PREFIX}_{ns}_n_");
    let mut cleaned = 0;

    for name in list_segments(namespace) {
        let path = format!("/{name}");
        let stale = if name.starts_with(&ring_prefix) {
            is_ring_stale(&path)
        } else if let Some(rest) = name.strip_prefix(&notify_prefix) {
            !ShmSegment::exists(&format!("/{ring_prefix}{rest}"))
        } else {
            false
        };

        if stale && ShmSegment::unlink(&path).is_ok() {
            log::debug!("[SHM] Cleaned up stale segment: {}", path);
            cleaned += 1;
        }
    }
    cleaned
}

fn is_ring_stale(name: &str) -> bool {
    let Ok(segment) = ShmSegment::open(name) else {
        // Unreadable (permissions) is not ours to judge
        return false;
    };
    if segment.size() < ShmControl::SIZE {
        return true;
    }
    // SAFETY: at least a control block is mapped, mmap is page aligned
    let control = unsafe { &*(segment.as_ptr() as *const ShmControl) };
    if control.validate().is_err() {
        return true;
    }
    segment.size() < ring_segment_size(control.capacity as usize, control.slot_payload as usize)
}

/// Unlink every hermes segment of `namespace`, live or not.
pub fn cleanup_namespace(namespace: &str) -> usize {
    list_segments(namespace)
        .into_iter()
        .filter(|name| ShmSegment::unlink(&format!("/{name}")).is_ok())
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::message::MessageInfo;

    #[test]
    fn test_segment_names() {
        let names = SegmentNames::for_channel("fleet", "/camera/front");
        assert!(names.ring.starts_with("/hermes_fleet_c_-camera-front_"));
        assert!(names.notify.starts_with("/hermes_fleet_n_-camera-front_"));
        assert!(!names.ring[1..].contains('/'));

        // Sanitized collisions stay distinct
        let other = SegmentNames::for_channel("fleet", "-camera-front");
        assert_ne!(names.ring, other.ring);
    }

    #[test]
    fn test_settings_names() {
        let settings = ShmSettings::with_namespace("unit");
        assert_eq!(settings.capacity, SHM_RING_CAPACITY);
        assert_eq!(settings.names_for("imu"), SegmentNames::for_channel("unit", "imu"));
    }

    #[test]
    fn test_error_mapping() {
        let e: crate::Error = ShmError::NotFound("/x".into()).into();
        assert!(matches!(e, crate::Error::TransportUnavailable(_)));
        let e: crate::Error = ShmError::PayloadTooLarge { size: 9, capacity: 8 }.into();
        assert!(matches!(e, crate::Error::PayloadTooLarge { size: 9, capacity: 8 }));
        let e: crate::Error = ShmError::InvalidCapacity(3).into();
        assert!(matches!(e, crate::Error::InvalidConfig(_)));
    }

    #[test]
    fn test_shared_writer_reused_in_process() {
        let ns = format!("sharedtest{:08x}", fastrand::u32(..));
        let names = SegmentNames::for_channel(&ns, "c");
        let a = shared_writer(&names, 8, 64).expect("writer");
        let b = shared_writer(&names, 8, 64).expect("writer");
        assert!(Arc::ptr_eq(&a, &b));
        drop(a);
        drop(b);
        assert!(!ShmSegment::exists(&names.ring));
    }

    #[test]
    fn test_cleanup_stale_segments() {
        let ns = format!("staletest{:08x}", fastrand::u32(..));
        let live = SegmentNames::for_channel(&ns, "live");
        let writer = ShmRingWriter::create_or_join(&live, 4, 64).expect("writer");
        writer
            .push(&MessageInfo::new(Identity::new(), 1), b"x")
            .expect("push");

        // Zeroed control block: never initialized
        let dead = SegmentNames::for_channel(&ns, "dead");
        let _raw = ShmSegment::create(&dead.ring, 4096).expect("create");
        // Orphan notify segment without ring
        let orphan = SegmentNames::for_channel(&ns, "orphan");
        let _n = ChannelNotify::create(&orphan.notify).expect("notify");

        assert_eq!(cleanup_stale_segments(&ns), 2);
        assert!(ShmSegment::exists(&live.ring));
        assert!(ShmSegment::exists(&live.notify));
        assert!(!ShmSegment::exists(&dead.ring));
        assert!(!ShmSegment::exists(&orphan.notify));

        drop(writer);
        assert_eq!(cleanup_namespace(&ns), 0);
    }
}
