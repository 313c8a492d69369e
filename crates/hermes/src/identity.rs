// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint identity.
//!
//! Every transmitter and receiver owns one [`Identity`]: a 128-bit random
//! value (UUID v4) that names that endpoint instance on every transport.
//! It travels in each message header so receivers can scope sequence
//! numbers per sender.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

/// Globally unique endpoint identity.
///
/// Equality, ordering and hashing are defined over the 128-bit value only.
/// The textual form is rendered once per instance and cached, so it can be
/// used freely in log lines.
///
/// # Wire Format
/// 16 bytes, big-endian UUID byte order.
#[derive(Clone)]
pub struct Identity {
    value: Uuid,
    text: OnceLock<Arc<str>>,
}

impl Identity {
    /// Length of the identity on the wire.
    pub const WIRE_LEN: usize = 16;

    /// Generate a fresh identity.
    #[must_use]
    pub fn new() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    fn from_uuid(value: Uuid) -> Self {
        Self {
            value,
            text: OnceLock::new(),
        }
    }

    /// Rebuild an identity received from a transport header.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self::from_uuid(Uuid::from_bytes(bytes))
    }

    /// Raw 16-byte form (for wire headers).
    #[must_use]
    pub fn as_bytes(&self) -> [u8; 16] {
        *self.value.as_bytes()
    }

    /// Underlying 128-bit value.
    #[must_use]
    pub fn as_u128(&self) -> u128 {
        self.value.as_u128()
    }

    /// Nil identity (all zeros). Never produced by [`Identity::new`].
    #[must_use]
    pub fn nil() -> Self {
        Self::from_uuid(Uuid::nil())
    }

    /// Check for the nil identity.
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.value.is_nil()
    }

    /// Cached string form, e.g. `1f0c3e2a-9d1b-4c55-8f0e-2b7d6c1a9e44`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.text
            .get_or_init(|| Arc::from(self.value.hyphenated().to_string()))
    }

    /// FNV-1a hash of the identity bytes (stable across processes).
    #[must_use]
    pub fn stable_hash(&self) -> u32 {
        let mut hash: u32 = 2_166_136_261;
        for byte in self.value.as_bytes() {
            hash ^= u32::from(*byte);
            hash = hash.wrapping_mul(16_777_619);
        }
        hash
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl PartialOrd for Identity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.as_str())
    }
}
