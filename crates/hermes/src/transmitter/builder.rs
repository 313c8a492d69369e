// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Transmitter construction, mirroring [`crate::ReceiverBuilder`].

use std::sync::Arc;

use super::{HybridTransmitter, IntraTransmitter, RtpsTransmitter, ShmTransmitter};
use crate::config::RuntimeConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::role::RoleAttributes;
use crate::transport::intra::IntraRegistry;
use crate::transport::rtps::NetworkTransport;
use crate::transport::shm::{ShmPolicy, ShmSettings};

/// Builder for every transmitter backend.
#[must_use]
pub struct TransmitterBuilder {
    attributes: RoleAttributes,
    registry: Option<Arc<IntraRegistry>>,
    use_intra: bool,
    network: Option<Arc<dyn NetworkTransport>>,
    shm_settings: Option<ShmSettings>,
    shm_policy: ShmPolicy,
}

impl TransmitterBuilder {
    /// Builder for a transmitter described by `attributes`.
    pub fn new(attributes: RoleAttributes) -> Self {
        Self {
            attributes,
            registry: None,
            use_intra: true,
            network: None,
            shm_settings: None,
            shm_policy: ShmPolicy::default(),
        }
    }

    /// Take the channel's QoS profile and the shm policy from `config`.
    pub fn config(mut self, config: &RuntimeConfig) -> Self {
        self.attributes.qos = config.qos_for(&self.attributes.channel_name);
        self.shm_policy = config.shm_policy();
        self
    }

    /// Use an explicit intra registry.
    pub fn registry(mut self, registry: Arc<IntraRegistry>) -> Self {
        self.registry = Some(registry);
        self.use_intra = true;
        self
    }

    /// Hybrid only: skip the same-process path.
    pub fn without_intra(mut self) -> Self {
        self.use_intra = false;
        self.registry = None;
        self
    }

    /// Network transport for the rtps path.
    pub fn network(mut self, network: Arc<dyn NetworkTransport>) -> Self {
        self.network = Some(network);
        self
    }

    /// Shared-memory namespace and geometry.
    pub fn shm_settings(mut self, settings: ShmSettings) -> Self {
        self.shm_settings = Some(settings);
        self
    }

    /// Hybrid only: whether to open the shm path.
    pub fn shm_policy(mut self, policy: ShmPolicy) -> Self {
        self.shm_policy = policy;
        self
    }

    /// Same-process transmitter.
    pub fn intra(self) -> Result<IntraTransmitter> {
        let registry = self.registry.clone().unwrap_or_else(IntraRegistry::global);
        Ok(IntraTransmitter::attach(self.endpoint()?, registry))
    }

    /// Same-host shared-memory transmitter.
    pub fn shm(self) -> Result<ShmTransmitter> {
        let settings = self.shm_settings.clone().unwrap_or_default();
        ShmTransmitter::attach(self.endpoint()?, &settings)
    }

    /// Network transmitter. Requires [`network`](Self::network).
    pub fn rtps(self) -> Result<RtpsTransmitter> {
        let network = self.network.clone().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "rtps transmitter on '{}' needs a network transport",
                self.attributes.channel_name
            ))
        })?;
        RtpsTransmitter::attach(self.endpoint()?, network)
    }

    /// Transmitter on every configured path.
    pub fn hybrid(self) -> Result<HybridTransmitter> {
        let registry = if self.use_intra {
            Some(self.registry.clone().unwrap_or_else(IntraRegistry::global))
        } else {
            None
        };
        let network = self.network.clone();
        let settings = self.shm_settings.clone().unwrap_or_default();
        let policy = self.shm_policy;
        HybridTransmitter::attach(self.endpoint()?, registry, network, &settings, policy)
    }

    fn endpoint(self) -> Result<Endpoint> {
        self.attributes.validate()?;
        let endpoint = Endpoint::new(self.attributes);
        log::debug!("[Transmitter] created {}", endpoint);
        Ok(endpoint)
    }
}

impl std::fmt::Debug for TransmitterBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransmitterBuilder")
            .field("attributes", &self.attributes)
            .field("use_intra", &self.use_intra)
            .field("network", &self.network.as_ref().map(|n| n.name().to_string()))
            .field("shm_settings", &self.shm_settings)
            .field("shm_policy", &self.shm_policy)
            .finish()
    }
}
