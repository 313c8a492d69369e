// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Hermes configuration.
//!
//! - **Static**: compile-time constants (shm layout, UDP ports, timings).
//!   Never hardcode these values elsewhere.
//! - **Dynamic**: [`RuntimeConfig`] resolves the QoS profile of a channel
//!   (per-channel override, then default) and the shm policy.
//!
//! # Example
//!
//! ```ignore
//! use hermes::config::RuntimeConfig;
//! use hermes::QosProfile;
//!
//! let config = RuntimeConfig::from_env();
//! config.set_channel_qos("camera", QosProfile::best_effort().keep_last(5));
//! let attr = config.attributes_for("camera");
//! ```

#[cfg(feature = "qos-loaders")]
pub mod yaml;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::sync::Arc;

use crate::role::{QosProfile, Reliability, RoleAttributes};
use crate::transport::shm::ShmPolicy;

// =======================================================================
// History / scheduling
// =======================================================================

/// Default History depth when the channel does not configure one.
pub const DEFAULT_HISTORY_DEPTH: usize = 1;

/// Default bound on callbacks pending in the scheduler per receiver.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Worker threads started by [`WorkerPool::with_default_threads`](crate::WorkerPool::with_default_threads).
pub const DEFAULT_WORKER_THREADS: usize = 2;

// =======================================================================
// Shared memory
// =======================================================================

/// Prefix of every hermes shm segment name (`/hermes_...`).
pub const SHM_SEGMENT_PREFIX: &str = "hermes";

/// Default namespace used in segment names.
pub const SHM_DEFAULT_NAMESPACE: &str = "default";

/// Number of slots in a channel ring (power of two).
pub const SHM_RING_CAPACITY: u32 = 256;

/// Payload bytes per ring slot.
pub const SHM_SLOT_PAYLOAD: usize = 4096;

/// Longest futex wait before the reader re-checks its stop flag.
pub const SHM_WAIT_SLICE_MS: u64 = 50;

/// A claimed slot still uncommitted after this long, while later slots
/// commit, is treated as abandoned by a crashed writer.
pub const SHM_STALL_TIMEOUT_MS: u64 = 100;

// =======================================================================
// UDP
// =======================================================================

/// Base UDP port of the hermes network transport.
pub const UDP_PORT_BASE: u16 = 7650;

/// Default multicast group for announcements and data.
pub const MULTICAST_GROUP: [u8; 4] = [239, 255, 42, 1];

/// Period between endpoint announcements.
pub const ANNOUNCE_PERIOD_MS: u64 = 1_000;

/// A remote endpoint expires after this many missed announcement periods.
pub const LEASE_MULTIPLIER: u32 = 3;

/// Socket read timeout of the receive thread (stop flag granularity).
pub const UDP_READ_TIMEOUT_MS: u64 = 100;

/// Largest UDP datagram hermes sends or accepts.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

// =======================================================================
// Environment
// =======================================================================

/// Environment variable names read by [`RuntimeConfig::from_env`].
pub mod env {
    /// Default history depth (integer >= 1).
    pub const HISTORY_DEPTH: &str = "HERMES_HISTORY_DEPTH";
    /// Default reliability (`reliable` | `best_effort`).
    pub const RELIABILITY: &str = "HERMES_RELIABILITY";
    /// `0` disables the shm backend.
    pub const SHM: &str = "HERMES_SHM";
    /// Shared-memory namespace (segment name component).
    pub const SHM_NAMESPACE: &str = "HERMES_SHM_NAMESPACE";
    /// `1` sets `SO_REUSEPORT` on UDP sockets.
    pub const REUSE_PORT: &str = "HERMES_REUSEPORT";
}

// =======================================================================
// Runtime Configuration
// =======================================================================

/// Shared runtime configuration.
///
/// Clones share state (`Arc` inside). Reads are lock-free: the default
/// profile lives in an `ArcSwap`, per-channel overrides in a `DashMap`.
#[derive(Clone)]
pub struct RuntimeConfig {
    default_qos: Arc<ArcSwap<QosProfile>>,
    channel_qos: Arc<DashMap<Arc<str>, QosProfile>>,
    shm_policy: Arc<ArcSwap<ShmPolicy>>,
}

impl RuntimeConfig {
    /// Empty configuration: default profile, no overrides, shm preferred.
    #[must_use]
    pub fn new() -> Self {
        Self {
            default_qos: Arc::new(ArcSwap::from_pointee(QosProfile::default())),
            channel_qos: Arc::new(DashMap::new()),
            shm_policy: Arc::new(ArcSwap::from_pointee(ShmPolicy::default())),
        }
    }

    /// Configuration seeded from `HERMES_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration seeded from an arbitrary variable lookup.
    ///
    /// Invalid values are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self::new();
        let mut qos = QosProfile::default();

        if let Some(raw) = lookup(env::HISTORY_DEPTH) {
            match raw.trim().parse::<usize>() {
                Ok(depth) if depth >= 1 => qos.history_depth = depth,
                _ => log::warn!(
                    "[config] Ignoring {}='{}' (expected integer >= 1)",
                    env::HISTORY_DEPTH,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(env::RELIABILITY) {
            match Reliability::parse(&raw) {
                Some(r) => qos.reliability = r,
                None => log::warn!(
                    "[config] Ignoring {}='{}' (expected reliable|best_effort)",
                    env::RELIABILITY,
                    raw
                ),
            }
        }

        if let Some(raw) = lookup(env::SHM) {
            if raw.trim() == "0" {
                config.set_shm_policy(ShmPolicy::Disable);
            }
        }

        config.set_default_qos(qos);
        config
    }

    /// Replace the default profile.
    pub fn set_default_qos(&self, qos: QosProfile) {
        self.default_qos.store(Arc::new(qos));
    }

    /// Current default profile.
    #[must_use]
    pub fn default_qos(&self) -> QosProfile {
        **self.default_qos.load()
    }

    /// Override the profile of one channel.
    pub fn set_channel_qos(&self, channel: &str, qos: QosProfile) {
        self.channel_qos.insert(Arc::from(channel), qos);
    }

    /// Remove a channel override. Returns true if one existed.
    pub fn clear_channel_qos(&self, channel: &str) -> bool {
        self.channel_qos.remove(channel).is_some()
    }

    /// Resolve the profile of `channel`: explicit override, then default.
    #[must_use]
    pub fn qos_for(&self, channel: &str) -> QosProfile {
        match self.channel_qos.get(channel) {
            Some(entry) => *entry.value(),
            None => self.default_qos(),
        }
    }

    /// Channels carrying an explicit override (sorted).
    #[must_use]
    pub fn configured_channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channel_qos
            .iter()
            .map(|e| e.key().to_string())
            .collect();
        names.sort();
        names
    }

    /// Set the shm selection policy.
    pub fn set_shm_policy(&self, policy: ShmPolicy) {
        self.shm_policy.store(Arc::new(policy));
    }

    /// Current shm selection policy.
    #[must_use]
    pub fn shm_policy(&self) -> ShmPolicy {
        **self.shm_policy.load()
    }

    /// Local role attributes for `channel` with its resolved profile.
    #[must_use]
    pub fn attributes_for(&self, channel: &str) -> RoleAttributes {
        RoleAttributes::local(channel).with_qos(self.qos_for(channel))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeConfig")
            .field("default_qos", &self.default_qos())
            .field("channels", &self.channel_qos.len())
            .field("shm_policy", &self.shm_policy())
            .finish()
    }
}
