// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transport backends.
//!
//! - [`intra`]: process-local registry, direct function-call delivery
//! - [`shm`]: POSIX shared-memory rings for same-host processes
//! - [`rtps`]: network transport seam (loopback and UDP implementations)

pub mod intra;
mod outbox;
pub mod rtps;
pub mod shm;

pub(crate) use outbox::Outbox;

use std::fmt;
use std::sync::Arc;

use crate::endpoint::Endpoint;
use crate::identity::Identity;
use crate::role::Reliability;

/// Concrete backend a message travelled through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Same process.
    Intra,
    /// Same host, shared memory.
    Shm,
    /// Network.
    Rtps,
}

impl BackendKind {
    /// Short lowercase name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intra => "intra",
            Self::Shm => "shm",
            Self::Rtps => "rtps",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery notification about a transmitter on a watched channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchEvent {
    /// A transmitter appeared (or announced again with new attributes).
    Matched(Endpoint),
    /// A transmitter went away (dropped, withdrawn or lease expired).
    Unmatched(Identity),
}

/// Watcher of [`MatchEvent`]s.
pub type MatchHandler = Arc<dyn Fn(&MatchEvent) + Send + Sync>;

/// Writer/reader reliability compatibility.
///
/// A reliable writer serves any reader; a best-effort writer only serves
/// best-effort readers.
#[must_use]
pub fn qos_compatible(writer: Reliability, reader: Reliability) -> bool {
    match (writer, reader) {
        (Reliability::Reliable, _) => true,
        (Reliability::BestEffort, Reliability::BestEffort) => true,
        (Reliability::BestEffort, Reliability::Reliable) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_compatibility() {
        assert!(qos_compatible(Reliability::Reliable, Reliability::Reliable));
        assert!(qos_compatible(Reliability::Reliable, Reliability::BestEffort));
        assert!(qos_compatible(Reliability::BestEffort, Reliability::BestEffort));
        assert!(!qos_compatible(Reliability::BestEffort, Reliability::Reliable));
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(BackendKind::Shm.to_string(), "shm");
    }
}
