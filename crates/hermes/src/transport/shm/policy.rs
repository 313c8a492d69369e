// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Backend selection by locality.
//!
//! | Remote location          | `Prefer` | `Disable` |
//! |--------------------------|----------|-----------|
//! | same host, same process  | Intra    | Intra     |
//! | same host, other process | Shm      | Rtps      |
//! | other host               | Rtps     | Rtps      |

use crate::role::{Locality, RoleAttributes};
use crate::transport::BackendKind;

/// Whether same-host peers use shared memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ShmPolicy {
    /// Use shm for same-host, other-process peers (default).
    #[default]
    Prefer,
    /// Never use shm; same-host peers go through the network backend.
    Disable,
}

/// Pick the backend that reaches `remote` from `local`.
#[must_use]
pub fn select_backend(local: &RoleAttributes, remote: &RoleAttributes, policy: ShmPolicy) -> BackendKind {
    match (local.locality_to(remote), policy) {
        (Locality::SameProcess, _) => BackendKind::Intra,
        (Locality::SameHost, ShmPolicy::Prefer) => BackendKind::Shm,
        (Locality::SameHost, ShmPolicy::Disable) => BackendKind::Rtps,
        (Locality::Remote, _) => BackendKind::Rtps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_table() {
        let local = RoleAttributes::new("hostA", 10, "n", "c");
        let same_proc = RoleAttributes::new("hostA", 10, "m", "c");
        let same_host = RoleAttributes::new("hostA", 11, "m", "c");
        let remote = RoleAttributes::new("hostB", 10, "m", "c");

        assert_eq!(select_backend(&local, &same_proc, ShmPolicy::Prefer), BackendKind::Intra);
        assert_eq!(select_backend(&local, &same_host, ShmPolicy::Prefer), BackendKind::Shm);
        assert_eq!(select_backend(&local, &remote, ShmPolicy::Prefer), BackendKind::Rtps);

        assert_eq!(select_backend(&local, &same_proc, ShmPolicy::Disable), BackendKind::Intra);
        assert_eq!(select_backend(&local, &same_host, ShmPolicy::Disable), BackendKind::Rtps);
    }

    #[test]
    fn test_random_locations_follow_rule() {
        let local = RoleAttributes::new("hostA", 100, "n", "c");
        for _ in 0..200 {
            let host = if fastrand::bool() { "hostA" } else { "hostZ" };
            let pid = if fastrand::bool() { 100 } else { fastrand::u32(101..) };
            let remote = RoleAttributes::new(host, pid, "r", "c");
            let expected = match (host == "hostA", pid == 100) {
                (true, true) => BackendKind::Intra,
                (true, false) => BackendKind::Shm,
                (false, _) => BackendKind::Rtps,
            };
            assert_eq!(select_backend(&local, &remote, ShmPolicy::Prefer), expected);
        }
    }
}
