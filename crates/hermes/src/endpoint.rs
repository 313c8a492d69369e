// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint base shared by every transmitter and receiver.

use std::fmt;
use std::sync::Arc;

use crate::identity::Identity;
use crate::role::RoleAttributes;

/// An addressable participant bound to a channel.
///
/// Binds one fresh [`Identity`] to one [`RoleAttributes`] snapshot. Both are
/// fixed at construction, so transport threads read them without locking.
/// Cloning shares the attributes (`Arc`) and copies the identity value.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    id: Identity,
    attributes: Arc<RoleAttributes>,
}

impl Endpoint {
    /// Create an endpoint with a fresh identity.
    #[must_use]
    pub fn new(attributes: RoleAttributes) -> Self {
        Self::with_identity(Identity::new(), attributes)
    }

    /// Rebuild an endpoint descriptor with a known identity (discovery).
    #[must_use]
    pub fn with_identity(id: Identity, attributes: RoleAttributes) -> Self {
        Self {
            id,
            attributes: Arc::new(attributes),
        }
    }

    /// Endpoint identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &Identity {
        &self.id
    }

    /// Endpoint attributes.
    #[inline]
    #[must_use]
    pub fn attributes(&self) -> &RoleAttributes {
        &self.attributes
    }

    /// Shared handle on the attributes.
    #[inline]
    #[must_use]
    pub fn shared_attributes(&self) -> Arc<RoleAttributes> {
        Arc::clone(&self.attributes)
    }

    /// Channel this endpoint is bound to.
    #[inline]
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.attributes.channel_name
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{} ({})",
            self.attributes.channel_name, self.attributes.host_name, self.attributes.process_id, self.id
        )
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("channel", &self.attributes.channel_name)
            .field("host", &self.attributes.host_name)
            .field("pid", &self.attributes.process_id)
            .finish()
    }
}
