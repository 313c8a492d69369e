// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Role attributes: where an endpoint lives and what it asks of the transport.
//!
//! `(host_name, process_id)` is the physical location used by hybrid
//! selection; `channel_name` is the pub/sub address; [`QosProfile`] carries
//! the transport hints (history depth, queue depth, reliability).

use std::ffi::CStr;
use std::fmt;
use std::sync::OnceLock;

use crate::config::{DEFAULT_HISTORY_DEPTH, DEFAULT_QUEUE_DEPTH};
use crate::{Error, Result};

/// Delivery guarantee requested for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Reliability {
    /// Every published message reaches every matched subscriber, in order.
    #[default]
    Reliable,
    /// Messages may be lost; ordering per sender still holds.
    BestEffort,
}

impl Reliability {
    /// Parse `reliable` / `best_effort` (case-insensitive, `RELIABLE` style accepted).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reliable" => Some(Self::Reliable),
            "best_effort" | "besteffort" | "best-effort" => Some(Self::BestEffort),
            _ => None,
        }
    }

    /// Wire encoding (one byte).
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        match self {
            Self::Reliable => 1,
            Self::BestEffort => 0,
        }
    }

    /// Decode the wire byte; unknown values map to best-effort.
    #[must_use]
    pub const fn from_u8(v: u8) -> Self {
        if v == 1 {
            Self::Reliable
        } else {
            Self::BestEffort
        }
    }
}

impl fmt::Display for Reliability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reliable => f.write_str("reliable"),
            Self::BestEffort => f.write_str("best_effort"),
        }
    }
}

/// Transport hints attached to an endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct QosProfile {
    /// Capacity of the receiver History (KEEP_LAST depth). Must be >= 1.
    pub history_depth: usize,
    /// Maximum callbacks pending in the scheduler per receiver.
    pub queue_depth: usize,
    /// Reliable vs best-effort delivery.
    pub reliability: Reliability,
}

impl QosProfile {
    /// Reliable profile with default depths.
    #[must_use]
    pub const fn reliable() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            reliability: Reliability::Reliable,
        }
    }

    /// Best-effort profile with default depths.
    #[must_use]
    pub const fn best_effort() -> Self {
        Self {
            history_depth: DEFAULT_HISTORY_DEPTH,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            reliability: Reliability::BestEffort,
        }
    }

    /// Set the history depth.
    #[must_use]
    pub const fn keep_last(mut self, depth: usize) -> Self {
        self.history_depth = depth;
        self
    }

    /// Set the scheduler queue depth.
    #[must_use]
    pub const fn queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth;
        self
    }

    /// Check the profile is usable.
    pub fn validate(&self) -> Result<()> {
        if self.history_depth == 0 {
            return Err(Error::InvalidConfig("history depth must be >= 1".into()));
        }
        if self.queue_depth == 0 {
            return Err(Error::InvalidConfig("queue depth must be >= 1".into()));
        }
        Ok(())
    }
}

impl Default for QosProfile {
    fn default() -> Self {
        Self::reliable()
    }
}

/// Physical relationship between two endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Locality {
    /// Same host, same process.
    SameProcess,
    /// Same host, different process.
    SameHost,
    /// Different host.
    Remote,
}

/// Descriptive addressing data of an endpoint.
///
/// Supplied once at endpoint construction and never mutated afterwards;
/// endpoints share it behind an `Arc` with their transport backends.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RoleAttributes {
    /// Host the endpoint runs on.
    pub host_name: String,
    /// OS process id of the endpoint.
    pub process_id: u32,
    /// Owning node (component) name, may be empty.
    pub node_name: String,
    /// Pub/sub channel. Non-empty for any endpoint taking part in pub/sub.
    pub channel_name: String,
    /// Transport hints.
    pub qos: QosProfile,
}

impl RoleAttributes {
    /// Attributes for an endpoint of the current process on `channel`.
    pub fn local(channel_name: impl Into<String>) -> Self {
        Self {
            host_name: local_host_name().to_string(),
            process_id: std::process::id(),
            node_name: String::new(),
            channel_name: channel_name.into(),
            qos: QosProfile::default(),
        }
    }

    /// Fully explicit attributes (discovery, tests, simulated participants).
    pub fn new(
        host_name: impl Into<String>,
        process_id: u32,
        node_name: impl Into<String>,
        channel_name: impl Into<String>,
    ) -> Self {
        Self {
            host_name: host_name.into(),
            process_id,
            node_name: node_name.into(),
            channel_name: channel_name.into(),
            qos: QosProfile::default(),
        }
    }

    /// Set the node name.
    #[must_use]
    pub fn with_node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    /// Replace the QoS profile.
    #[must_use]
    pub fn with_qos(mut self, qos: QosProfile) -> Self {
        self.qos = qos;
        self
    }

    /// Set the history depth.
    #[must_use]
    pub fn with_history_depth(mut self, depth: usize) -> Self {
        self.qos.history_depth = depth;
        self
    }

    /// Set the reliability mode.
    #[must_use]
    pub fn with_reliability(mut self, reliability: Reliability) -> Self {
        self.qos.reliability = reliability;
        self
    }

    /// Check the attributes describe a pub/sub endpoint.
    pub fn validate(&self) -> Result<()> {
        if self.channel_name.is_empty() {
            return Err(Error::InvalidConfig("channel name must not be empty".into()));
        }
        if self.host_name.is_empty() {
            return Err(Error::InvalidConfig("host name must not be empty".into()));
        }
        self.qos.validate()
    }

    /// Where `other` lives relative to `self`.
    #[must_use]
    pub fn locality_to(&self, other: &RoleAttributes) -> Locality {
        if self.host_name != other.host_name {
            Locality::Remote
        } else if self.process_id != other.process_id {
            Locality::SameHost
        } else {
            Locality::SameProcess
        }
    }

    /// Scheduler task name for callbacks on this endpoint.
    ///
    /// `"{node}_{channel}"`, or the bare channel name when no node is set.
    #[must_use]
    pub fn task_name(&self) -> String {
        if self.node_name.is_empty() {
            self.channel_name.clone()
        } else {
            format!("{}_{}", self.node_name, self.channel_name)
        }
    }
}

/// Host name of this machine.
///
/// Uses `gethostname(2)`, then `$HOSTNAME`, then `localhost`.
pub fn local_host_name() -> &'static str {
    static HOST: OnceLock<String> = OnceLock::new();
    HOST.get_or_init(|| {
        let mut buf = [0u8; 256];
        // SAFETY:
        // - buf is a valid writable buffer of buf.len() bytes
        // - gethostname writes at most len bytes and NUL-terminates when it fits
        let ret = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
        if ret == 0 {
            if let Ok(name) = CStr::from_bytes_until_nul(&buf) {
                if let Ok(name) = name.to_str() {
                    if !name.is_empty() {
                        return name.to_string();
                    }
                }
            }
        }
        std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
}
