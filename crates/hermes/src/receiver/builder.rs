// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver construction.
//!
//! ```ignore
//! let receiver = Receiver::builder(RoleAttributes::local("lidar").with_history_depth(5))
//!     .network(udp)
//!     .scheduler(pool)
//!     .hybrid(|payload, info| println!("{} bytes, seq {}", payload.len(), info.seq))?;
//! receiver.enable()?;
//! ```

use bytes::Bytes;
use std::sync::Arc;

use super::{Delivery, HybridReceiver, IntraReceiver, ReceiverBase, RtpsReceiver, ShmReceiver};
use crate::config::RuntimeConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::scheduler::Scheduler;
use crate::transport::intra::IntraRegistry;
use crate::transport::rtps::NetworkTransport;
use crate::transport::shm::{ShmPolicy, ShmSettings};

/// Builder for every receiver backend.
///
/// Defaults: process-wide [`IntraRegistry`], no network, shm settings from
/// the environment, [`ShmPolicy::Prefer`], callbacks run on the delivering
/// transport thread.
#[must_use]
pub struct ReceiverBuilder {
    attributes: RoleAttributes,
    scheduler: Option<Arc<dyn Scheduler>>,
    registry: Option<Arc<IntraRegistry>>,
    use_intra: bool,
    network: Option<Arc<dyn NetworkTransport>>,
    shm_settings: Option<ShmSettings>,
    shm_policy: ShmPolicy,
}

impl ReceiverBuilder {
    /// Builder for a receiver described by `attributes`.
    pub fn new(attributes: RoleAttributes) -> Self {
        Self {
            attributes,
            scheduler: None,
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

    /// Post callbacks to `scheduler` instead of running them inline.
    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Use an explicit intra registry (isolated tests, embedded runtimes).
    pub fn registry(mut self, registry: Arc<IntraRegistry>) -> Self {
        self.registry = Some(registry);
        self.use_intra = true;
        self
    }

    /// Hybrid only: do not watch same-process transmitters.
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

    /// Hybrid only: whether same-host transmitters go through shm.
    pub fn shm_policy(mut self, policy: ShmPolicy) -> Self {
        self.shm_policy = policy;
        self
    }

    /// Same-process receiver.
    pub fn intra<F>(self, callback: F) -> Result<IntraReceiver>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        let registry = self.registry.clone().unwrap_or_else(IntraRegistry::global);
        let delivery = self.delivery(callback)?;
        Ok(IntraReceiver::from_base(ReceiverBase::owned(delivery), registry))
    }

    /// Same-host shared-memory receiver.
    pub fn shm<F>(self, callback: F) -> Result<ShmReceiver>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        let settings = self.shm_settings.clone().unwrap_or_default();
        let delivery = self.delivery(callback)?;
        Ok(ShmReceiver::from_base(ReceiverBase::owned(delivery), settings))
    }

    /// Network receiver. Requires [`network`](Self::network).
    pub fn rtps<F>(self, callback: F) -> Result<RtpsReceiver>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        let network = self.network.clone().ok_or_else(|| {
            Error::InvalidConfig(format!(
                "rtps receiver on '{}' needs a network transport",
                self.attributes.channel_name
            ))
        })?;
        let delivery = self.delivery(callback)?;
        Ok(RtpsReceiver::from_base(ReceiverBase::owned(delivery), network))
    }

    /// Locality-routing receiver over every configured backend.
    pub fn hybrid<F>(self, callback: F) -> Result<HybridReceiver>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        let registry = if self.use_intra {
            Some(self.registry.clone().unwrap_or_else(IntraRegistry::global))
        } else {
            None
        };
        let network = self.network.clone();
        let shm_settings = self.shm_settings.clone().unwrap_or_default();
        let shm_policy = self.shm_policy;
        let delivery = self.delivery(callback)?;
        Ok(HybridReceiver::from_parts(
            delivery,
            registry,
            network,
            shm_settings,
            shm_policy,
        ))
    }

    fn delivery<F>(self, callback: F) -> Result<Arc<Delivery>>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        self.attributes.validate()?;
        let endpoint = Endpoint::new(self.attributes);
        log::debug!("[Receiver] created {}", endpoint);
        Ok(Delivery::new(endpoint, Arc::new(callback), self.scheduler))
    }
}

impl std::fmt::Debug for ReceiverBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiverBuilder")
            .field("attributes", &self.attributes)
            .field("scheduler", &self.scheduler.is_some())
            .field("use_intra", &self.use_intra)
            .field("network", &self.network.as_ref().map(|n| n.name().to_string()))
            .field("shm_settings", &self.shm_settings)
            .field("shm_policy", &self.shm_policy)
            .finish()
    }
}
