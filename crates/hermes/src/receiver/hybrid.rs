// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Receiver that picks a backend per matched transmitter.
//!
//! # Architecture
//!
//! ```text
//!             IntraRegistry watch ──┐
//!                                   ├─> on_match ─> select_backend(local, remote)
//!          NetworkTransport watch ──┘                 |
//!                                                     v
//!                          routes[writer] = kind, children[kind] created lazily
//!
//!  intra child ─┐
//!  shm child   ─┼─> HybridSink (origin == routes[sender]?) ─> Delivery (one History)
//!  rtps child  ─┘                 no: counted as misrouted
//! ```
//!
//! Sub-receivers share the hybrid's delivery core, so History depth and the
//! one-callback-at-a-time guarantee hold whatever backend a message used.
//! A writer reachable through several backends (a hybrid transmitter fans
//! out) is only accepted from the backend its locality selects.
//!
//! If the shm sub-receiver cannot start and a network is configured,
//! same-host writers are routed to rtps instead until the next enable.

use bytes::Bytes;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

use super::{
    Delivery, DeliverySink, IntraReceiver, Receiver, ReceiverBase, ReceiverStatsSnapshot, RtpsReceiver,
    ShmReceiver,
};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::history::HistoryEntry;
use crate::identity::Identity;
use crate::message::MessageInfo;
use crate::role::RoleAttributes;
use crate::transport::intra::{IntraRegistry, IntraToken};
use crate::transport::rtps::{NetworkTransport, SubscriptionId};
use crate::transport::shm::{select_backend, ShmPolicy, ShmSettings};
use crate::transport::{BackendKind, MatchEvent, MatchHandler};

/// Forwards to the shared delivery core only what arrives on the route
/// chosen for its sender.
struct HybridSink {
    delivery: Arc<Delivery>,
    routes: RwLock<HashMap<Identity, BackendKind>>,
}

impl DeliverySink for HybridSink {
    fn deliver(&self, origin: BackendKind, info: &MessageInfo, payload: &Bytes) {
        let route = self.routes.read().get(&info.sender).copied();
        if route != Some(origin) {
            let stats = self.delivery.stats();
            stats.inc_received();
            stats.inc_misrouted();
            log::debug!(
                "[Hybrid] {} dropped seq {} from {} via {} (route {:?})",
                self.delivery.endpoint().channel(),
                info.seq,
                info.sender,
                origin,
                route
            );
            return;
        }
        self.delivery.deliver(origin, info, payload);
    }

    fn report_loss(&self, origin: BackendKind, count: u64) {
        self.delivery.report_loss(origin, count);
    }
}

#[derive(Default)]
struct HybridState {
    enabled: bool,
    intra_watch: Option<IntraToken>,
    net_watch: Option<SubscriptionId>,
    children: HashMap<BackendKind, Arc<Receiver>>,
    // Backends wanted by writers matched during enable(), started once
    // every known writer has a route
    batch: Option<Vec<BackendKind>>,
    shm_down: bool,
}

struct HybridInner {
    me: Weak<HybridInner>,
    delivery: Arc<Delivery>,
    sink: Arc<HybridSink>,
    registry: Option<Arc<IntraRegistry>>,
    network: Option<Arc<dyn NetworkTransport>>,
    shm_settings: ShmSettings,
    shm_policy: ShmPolicy,
    // Serializes enable, disable and match handling; reentrant because a
    // watch may report known writers synchronously from inside enable()
    lifecycle: ReentrantMutex<()>,
    state: Mutex<HybridState>,
}

/// Receiver routing each matched transmitter to intra, shm or rtps.
pub struct HybridReceiver {
    inner: Arc<HybridInner>,
}

impl HybridReceiver {
    /// Hybrid receiver on the process-wide registry, without network.
    pub fn new<F>(attributes: RoleAttributes, callback: F) -> Result<Self>
    where
        F: Fn(&Bytes, &MessageInfo) + Send + Sync + 'static,
    {
        Receiver::builder(attributes).hybrid(callback)
    }

    pub(crate) fn from_parts(
        delivery: Arc<Delivery>,
        registry: Option<Arc<IntraRegistry>>,
        network: Option<Arc<dyn NetworkTransport>>,
        shm_settings: ShmSettings,
        shm_policy: ShmPolicy,
    ) -> Self {
        let sink = Arc::new(HybridSink {
            delivery: Arc::clone(&delivery),
            routes: RwLock::new(HashMap::new()),
        });
        let inner = Arc::new_cyclic(|me| HybridInner {
            me: me.clone(),
            delivery,
            sink,
            registry,
            network,
            shm_settings,
            shm_policy,
            lifecycle: ReentrantMutex::new(()),
            state: Mutex::new(HybridState::default()),
        });
        Self { inner }
    }

    /// Endpoint of this receiver.
    pub fn endpoint(&self) -> &Endpoint {
        self.inner.delivery.endpoint()
    }

    /// Start discovery on every configured source.
    ///
    /// A source that fails is logged and skipped. Fails with
    /// `TransportUnavailable` only if no source could be started:
    /// sub-receivers are created per matched writer, possibly later, so a
    /// sub-receiver that fails to start is logged rather than reported
    /// here.
    pub fn enable(&self) -> Result<()> {
        self.inner.enable()
    }

    /// Stop discovery and tear down every sub-receiver. Idempotent.
    pub fn disable(&self) {
        self.inner.disable();
    }

    /// Whether the receiver is enabled.
    pub fn is_enabled(&self) -> bool {
        self.inner.state.lock().enabled
    }

    /// Set History capacity before enabling.
    pub fn set_history_attributes(&self, depth: usize) -> Result<()> {
        self.inner.delivery.set_history_depth(depth)
    }

    /// Current History capacity.
    pub fn history_depth(&self) -> usize {
        self.inner.delivery.history().depth()
    }

    /// Copy of the History, oldest first.
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.delivery.history().snapshot()
    }

    /// Walk the History oldest first.
    pub fn replay<F>(&self, f: F) -> usize
    where
        F: FnMut(&Bytes, &MessageInfo),
    {
        self.inner.delivery.history().replay(f)
    }

    /// Delivery counters.
    pub fn stats(&self) -> ReceiverStatsSnapshot {
        self.inner.delivery.stats().snapshot()
    }

    /// Backends with a live sub-receiver, in `Intra, Shm, Rtps` order.
    pub fn active_backends(&self) -> Vec<BackendKind> {
        let state = self.inner.state.lock();
        [BackendKind::Intra, BackendKind::Shm, BackendKind::Rtps]
            .into_iter()
            .filter(|kind| state.children.contains_key(kind))
            .collect()
    }

    /// Backend selected for a matched transmitter.
    pub fn route_of(&self, writer: &Identity) -> Option<BackendKind> {
        self.inner.sink.routes.read().get(writer).copied()
    }

    /// Transmitters currently matched.
    pub fn matched_writers(&self) -> usize {
        self.inner.sink.routes.read().len()
    }
}

impl HybridInner {
    fn channel(&self) -> &str {
        self.delivery.endpoint().channel()
    }

    fn handler(&self) -> MatchHandler {
        let me = self.me.clone();
        Arc::new(move |event: &MatchEvent| {
            if let Some(inner) = me.upgrade() {
                inner.on_event(event);
            }
        })
    }

    fn enable(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock();
        {
            let mut state = self.state.lock();
            if state.enabled {
                return Ok(());
            }
            state.enabled = true;
            state.shm_down = false;
            state.batch = Some(Vec::new());
        }
        self.delivery.activate();

        // Discovery sources, not backends: children start per matched writer
        let mut sources = 0;
        let mut failures = Vec::new();

        if let Some(registry) = &self.registry {
            let (token, current) = registry.watch(self.channel(), self.handler());
            self.state.lock().intra_watch = Some(token);
            for writer in current {
                self.on_event(&MatchEvent::Matched(writer));
            }
            sources += 1;
        }

        if let Some(network) = &self.network {
            match network.watch(self.channel(), self.handler()) {
                Ok(id) => {
                    self.state.lock().net_watch = Some(id);
                    sources += 1;
                }
                Err(e) => {
                    log::warn!(
                        "[Hybrid] {} discovery on {} failed: {}",
                        self.channel(),
                        network.name(),
                        e
                    );
                    failures.push(e.to_string());
                }
            }
        }

        let batched = self.state.lock().batch.take().unwrap_or_default();
        if sources == 0 {
            self.state.lock().enabled = false;
            self.delivery.deactivate();
            let why = if failures.is_empty() {
                "no backend configured".to_string()
            } else {
                failures.join("; ")
            };
            return Err(Error::TransportUnavailable(format!(
                "hybrid receiver on '{}': {}",
                self.channel(),
                why
            )));
        }
        for kind in batched {
            self.start_backend(kind);
        }

        log::info!(
            "[Hybrid] enabled {} ({} discovery source(s), {} matched)",
            self.delivery.endpoint(),
            sources,
            self.sink.routes.read().len()
        );
        Ok(())
    }

    fn disable(&self) {
        // Stop callbacks before queuing on the lifecycle lock
        self.delivery.deactivate();
        let _lifecycle = self.lifecycle.lock();

        let (intra_watch, net_watch, children) = {
            let mut state = self.state.lock();
            if !state.enabled {
                return;
            }
            state.enabled = false;
            (
                state.intra_watch.take(),
                state.net_watch.take(),
                std::mem::take(&mut state.children),
            )
        };
        self.delivery.deactivate();

        drop(intra_watch);
        if let (Some(id), Some(network)) = (net_watch, &self.network) {
            network.unsubscribe(id);
        }
        for (kind, child) in children {
            child.disable();
            log::debug!("[Hybrid] {} {} backend torn down", self.channel(), kind);
        }
        self.sink.routes.write().clear();
        log::info!("[Hybrid] disabled {}", self.delivery.endpoint());
    }

    fn on_event(&self, event: &MatchEvent) {
        let _lifecycle = self.lifecycle.lock();
        if !self.state.lock().enabled {
            return;
        }

        match event {
            MatchEvent::Matched(remote) => {
                let kind = self.route_for(remote);
                let previous = self.sink.routes.write().insert(remote.id().clone(), kind);
                if previous != Some(kind) {
                    log::debug!(
                        "[Hybrid] {} matched {} -> {}",
                        self.channel(),
                        remote,
                        kind
                    );
                }
                let deferred = match self.state.lock().batch.as_mut() {
                    Some(batch) => {
                        if !batch.contains(&kind) {
                            batch.push(kind);
                        }
                        true
                    }
                    None => false,
                };
                if !deferred {
                    self.start_backend(kind);
                }
            }
            MatchEvent::Unmatched(id) => {
                if let Some(kind) = self.sink.routes.write().remove(id) {
                    log::debug!("[Hybrid] {} unmatched {} (was {})", self.channel(), id, kind);
                }
            }
        }
    }

    fn route_for(&self, remote: &Endpoint) -> BackendKind {
        let kind = select_backend(
            self.delivery.endpoint().attributes(),
            remote.attributes(),
            self.shm_policy,
        );
        if kind == BackendKind::Shm && self.network.is_some() && self.state.lock().shm_down {
            BackendKind::Rtps
        } else {
            kind
        }
    }

    /// Start the sub-receiver for `kind`, moving shm routes to rtps if the
    /// shm one cannot start.
    fn start_backend(&self, kind: BackendKind) {
        if self.ensure_backend(kind) || kind != BackendKind::Shm || self.network.is_none() {
            return;
        }
        self.state.lock().shm_down = true;
        let mut moved = 0;
        for route in self.sink.routes.write().values_mut() {
            if *route == BackendKind::Shm {
                *route = BackendKind::Rtps;
                moved += 1;
            }
        }
        log::warn!(
            "[Hybrid] {} shm backend unavailable, {} writer(s) fall back to {}",
            self.channel(),
            moved,
            BackendKind::Rtps
        );
        self.ensure_backend(BackendKind::Rtps);
    }

    /// Create and enable the sub-receiver for `kind` if there is none.
    /// Returns whether it is running.
    fn ensure_backend(&self, kind: BackendKind) -> bool {
        if self.state.lock().children.contains_key(&kind) {
            return true;
        }
        let child = match self.build_child(kind) {
            Some(child) => Arc::new(child),
            None => {
                log::warn!(
                    "[Hybrid] {} selected {} but that backend is not configured",
                    self.channel(),
                    kind
                );
                return false;
            }
        };

        // Visible before enable: an intra child replays history from enable()
        self.state.lock().children.insert(kind, Arc::clone(&child));
        match child.enable() {
            Ok(()) => {
                log::debug!("[Hybrid] {} {} backend instantiated", self.channel(), kind);
                true
            }
            Err(e) => {
                self.state.lock().children.remove(&kind);
                log::warn!("[Hybrid] {} {} backend unavailable: {}", self.channel(), kind, e);
                false
            }
        }
    }

    fn build_child(&self, kind: BackendKind) -> Option<Receiver> {
        let base = ReceiverBase::shared(Arc::clone(&self.delivery), self.sink.clone());
        let child = match kind {
            BackendKind::Intra => {
                IntraReceiver::from_base(base, Arc::clone(self.registry.as_ref()?)).into()
            }
            BackendKind::Shm => ShmReceiver::from_base(base, self.shm_settings.clone()).into(),
            BackendKind::Rtps => {
                RtpsReceiver::from_base(base, Arc::clone(self.network.as_ref()?)).into()
            }
        };
        Some(child)
    }
}

impl Drop for HybridReceiver {
    fn drop(&mut self) {
        self.inner.disable();
    }
}

impl std::fmt::Debug for HybridReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridReceiver")
            .field("endpoint", self.endpoint())
            .field("enabled", &self.is_enabled())
            .field("backends", &self.active_backends())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transmitter::Transmitter;
    use crate::transport::rtps::LoopbackNetwork;

    fn collector() -> (Arc<Mutex<Vec<(u64, String)>>>, impl Fn(&Bytes, &MessageInfo) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback = move |payload: &Bytes, info: &MessageInfo| {
            sink.lock().push((info.seq, String::from_utf8_lossy(payload).into_owned()));
        };
        (seen, callback)
    }

    #[test]
    fn test_same_process_writer_routes_intra() {
        let registry = IntraRegistry::new();
        let net = LoopbackNetwork::new();
        let (seen, callback) = collector();
        let receiver = Receiver::builder(RoleAttributes::local("hy_intra"))
            .registry(Arc::clone(&registry))
            .network(net.clone())
            .hybrid(callback)
            .expect("receiver");
        receiver.enable().expect("enable");

        let writer = Transmitter::builder(RoleAttributes::local("hy_intra"))
            .registry(Arc::clone(&registry))
            .network(net.clone())
            .shm_policy(ShmPolicy::Disable)
            .hybrid()
            .expect("writer");
        writer.transmit("a").expect("transmit");
        writer.transmit("b").expect("transmit");

        assert_eq!(receiver.active_backends(), vec![BackendKind::Intra]);
        assert_eq!(receiver.route_of(writer.endpoint().id()), Some(BackendKind::Intra));
        assert_eq!(
            *seen.lock(),
            vec![(1, "a".to_string()), (2, "b".to_string())]
        );
        // Routed intra, so no rtps sub-receiver picks up the network copies
        let stats = receiver.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.misrouted, 0);
    }

    #[test]
    fn test_remote_writer_routes_rtps() {
        let registry = IntraRegistry::new();
        let net = LoopbackNetwork::new();
        let (seen, callback) = collector();
        let receiver = Receiver::builder(RoleAttributes::local("hy_far"))
            .registry(Arc::clone(&registry))
            .network(net.clone())
            .hybrid(callback)
            .expect("receiver");
        receiver.enable().expect("enable");

        let far = Transmitter::builder(RoleAttributes::new("far-host", 4242, "sim", "hy_far"))
            .network(net.clone())
            .rtps()
            .expect("writer");
        far.transmit("hello").expect("transmit");

        assert_eq!(receiver.active_backends(), vec![BackendKind::Rtps]);
        assert_eq!(*seen.lock(), vec![(1, "hello".to_string())]);
        assert_eq!(receiver.matched_writers(), 1);

        drop(far);
        assert_eq!(receiver.matched_writers(), 0);
    }

    #[test]
    fn test_writer_known_before_enable_is_matched() {
        let net = LoopbackNetwork::new();
        let far = Transmitter::builder(RoleAttributes::new("far-host", 1, "sim", "hy_early"))
            .network(net.clone())
            .rtps()
            .expect("writer");

        let (seen, callback) = collector();
        let receiver = Receiver::builder(RoleAttributes::local("hy_early"))
            .without_intra()
            .network(net.clone())
            .hybrid(callback)
            .expect("receiver");
        receiver.enable().expect("enable");
        assert_eq!(receiver.route_of(far.endpoint().id()), Some(BackendKind::Rtps));

        far.transmit("x").expect("transmit");
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_partial_failure_keeps_intra() {
        let registry = IntraRegistry::new();
        let net = LoopbackNetwork::new();
        net.set_available(false);
        let (seen, callback) = collector();
        let receiver = Receiver::builder(RoleAttributes::local("hy_partial"))
            .registry(Arc::clone(&registry))
            .network(net.clone())
            .hybrid(callback)
            .expect("receiver");
        receiver.enable().expect("intra discovery still works");

        let writer = Transmitter::builder(RoleAttributes::local("hy_partial"))
            .registry(Arc::clone(&registry))
            .intra()
            .expect("writer");
        writer.transmit("ok").expect("transmit");
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_all_sources_down_is_unavailable() {
        let net = LoopbackNetwork::new();
        net.set_available(false);
        let receiver = Receiver::builder(RoleAttributes::local("hy_down"))
            .without_intra()
            .network(net.clone())
            .hybrid(|_, _| {})
            .expect("receiver");
        assert!(matches!(receiver.enable(), Err(Error::TransportUnavailable(_))));
        assert!(!receiver.is_enabled());

        net.set_available(true);
        receiver.enable().expect("retry");
        assert!(receiver.is_enabled());
    }

    #[test]
    fn test_disable_tears_down_children() {
        let net = LoopbackNetwork::new();
        let (_, callback) = collector();
        let receiver = Receiver::builder(RoleAttributes::local("hy_down2"))
            .without_intra()
            .network(net.clone())
            .hybrid(callback)
            .expect("receiver");
        receiver.enable().expect("enable");
        let _far = Transmitter::builder(RoleAttributes::new("far-host", 2, "sim", "hy_down2"))
            .network(net.clone())
            .rtps()
            .expect("writer");
        assert_eq!(net.reader_count(), 1);

        receiver.disable();
        assert_eq!(net.reader_count(), 0);
        assert!(receiver.active_backends().is_empty());
        assert_eq!(receiver.matched_writers(), 0);
    }

    #[test]
    fn test_sink_drops_unrouted_sender() {
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local("hy_sink")),
            Arc::new(|_: &Bytes, _: &MessageInfo| {}),
            None,
        );
        delivery.activate();
        let sink = HybridSink {
            delivery: Arc::clone(&delivery),
            routes: RwLock::new(HashMap::new()),
        };
        let writer = Identity::new();
        sink.routes.write().insert(writer.clone(), BackendKind::Shm);

        sink.deliver(BackendKind::Rtps, &MessageInfo::new(writer.clone(), 1), &Bytes::new());
        sink.deliver(BackendKind::Shm, &MessageInfo::new(writer, 1), &Bytes::new());
        sink.deliver(BackendKind::Intra, &MessageInfo::new(Identity::new(), 1), &Bytes::new());

        let stats = delivery.stats().snapshot();
        assert_eq!(stats.received, 3);
        assert_eq!(stats.misrouted, 2);
        assert_eq!(stats.delivered, 1);
    }
}
