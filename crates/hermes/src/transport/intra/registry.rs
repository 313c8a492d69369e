// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-scoped channel registry for same-process delivery.
//!
//! # Architecture
//!
//! ```text
//! IntraRegistry (one per process via global(), or one per test via new())
//! +-- channels: RwLock<HashMap<channel, ChannelEntry>>
//!
//! ChannelEntry
//! +-- receivers:    Vec<(token, Endpoint, Arc<dyn DeliverySink>)>
//! +-- transmitters: Vec<(token, Endpoint, Arc<History>)>
//! +-- watchers:     Vec<(token, MatchHandler)>
//! ```
//!
//! Registration returns an [`IntraToken`] that unregisters on drop. Lookups
//! clone the sink list under the read lock and deliver after releasing it,
//! so callbacks may register or unregister endpoints freely.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use bytes::Bytes;

use crate::endpoint::Endpoint;
use crate::history::History;
use crate::message::MessageInfo;
use crate::receiver::DeliverySink;
use crate::transport::{qos_compatible, BackendKind, MatchEvent, MatchHandler};

struct ReceiverEntry {
    token: u64,
    endpoint: Endpoint,
    sink: Arc<dyn DeliverySink>,
}

struct TransmitterEntry {
    token: u64,
    endpoint: Endpoint,
    history: Arc<History>,
}

struct WatcherEntry {
    token: u64,
    handler: MatchHandler,
}

#[derive(Default)]
struct ChannelEntry {
    receivers: Vec<ReceiverEntry>,
    transmitters: Vec<TransmitterEntry>,
    watchers: Vec<WatcherEntry>,
}

impl ChannelEntry {
    fn is_empty(&self) -> bool {
        self.receivers.is_empty() && self.transmitters.is_empty() && self.watchers.is_empty()
    }

    fn handlers(&self) -> Vec<MatchHandler> {
        self.watchers.iter().map(|w| Arc::clone(&w.handler)).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenKind {
    Receiver,
    Transmitter,
    Watcher,
}

/// Registration handle. Dropping it unregisters the entry.
#[must_use = "dropping the token unregisters immediately"]
pub struct IntraToken {
    registry: Weak<IntraRegistry>,
    channel: String,
    token: u64,
    kind: TokenKind,
}

impl IntraToken {
    /// Channel the entry is registered on.
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

impl Drop for IntraToken {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.channel, self.token, self.kind);
        }
    }
}

impl std::fmt::Debug for IntraToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntraToken")
            .field("channel", &self.channel)
            .field("token", &self.token)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Same-process endpoint registry keyed by channel name.
pub struct IntraRegistry {
    me: Weak<IntraRegistry>,
    channels: RwLock<HashMap<String, ChannelEntry>>,
    next_token: AtomicU64,
}

impl IntraRegistry {
    /// Fresh, isolated registry.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            channels: RwLock::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        })
    }

    /// Registry shared by the whole process, created on first use.
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<IntraRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(IntraRegistry::new))
    }

    fn token(&self, channel: &str, kind: TokenKind) -> IntraToken {
        IntraToken {
            registry: self.me.clone(),
            channel: channel.to_string(),
            token: self.next_token.fetch_add(1, Ordering::Relaxed),
            kind,
        }
    }

    /// Register a receiver; messages dispatched on its channel go to `sink`.
    pub fn register_receiver(&self, endpoint: &Endpoint, sink: Arc<dyn DeliverySink>) -> IntraToken {
        let token = self.token(endpoint.channel(), TokenKind::Receiver);
        self.channels
            .write()
            .entry(endpoint.channel().to_string())
            .or_default()
            .receivers
            .push(ReceiverEntry {
                token: token.token,
                endpoint: endpoint.clone(),
                sink,
            });
        log::debug!("[IntraRegistry] Registered receiver {}", endpoint);
        token
    }

    /// Register a transmitter and its writer-side history.
    ///
    /// Watchers of the channel are told about it after the lock is released.
    pub fn register_transmitter(&self, endpoint: &Endpoint, history: Arc<History>) -> IntraToken {
        let token = self.token(endpoint.channel(), TokenKind::Transmitter);
        let handlers = {
            let mut channels = self.channels.write();
            let entry = channels.entry(endpoint.channel().to_string()).or_default();
            entry.transmitters.push(TransmitterEntry {
                token: token.token,
                endpoint: endpoint.clone(),
                history,
            });
            entry.handlers()
        };
        log::debug!("[IntraRegistry] Registered transmitter {}", endpoint);

        let event = MatchEvent::Matched(endpoint.clone());
        for handler in handlers {
            handler(&event);
        }
        token
    }

    /// Watch transmitters coming and going on `channel`.
    ///
    /// Returns the token and the transmitters already registered; those are
    /// not reported through `handler`.
    pub fn watch(&self, channel: &str, handler: MatchHandler) -> (IntraToken, Vec<Endpoint>) {
        let token = self.token(channel, TokenKind::Watcher);
        let mut channels = self.channels.write();
        let entry = channels.entry(channel.to_string()).or_default();
        entry.watchers.push(WatcherEntry {
            token: token.token,
            handler,
        });
        let current = entry.transmitters.iter().map(|t| t.endpoint.clone()).collect();
        (token, current)
    }

    /// Hand a published message to every compatible receiver on the
    /// sender's channel. Returns the number of receivers reached.
    pub fn dispatch(&self, sender: &Endpoint, info: &MessageInfo, payload: &Bytes) -> usize {
        let writer_reliability = sender.attributes().qos.reliability;
        let sinks: Vec<Arc<dyn DeliverySink>> = {
            let channels = self.channels.read();
            let Some(entry) = channels.get(sender.channel()) else {
                return 0;
            };
            entry
                .receivers
                .iter()
                .filter(|r| qos_compatible(writer_reliability, r.endpoint.attributes().qos.reliability))
                .map(|r| Arc::clone(&r.sink))
                .collect()
        };

        for sink in &sinks {
            sink.deliver(BackendKind::Intra, info, payload);
        }
        sinks.len()
    }

    /// Replay writer-side history of the reader's channel into `sink`.
    ///
    /// Each compatible transmitter contributes its newest
    /// `min(writer depth, depth)` entries, oldest first. Returns the number
    /// of messages replayed.
    pub fn replay_history(&self, reader: &Endpoint, depth: usize, sink: &dyn DeliverySink) -> usize {
        let reader_reliability = reader.attributes().qos.reliability;
        let histories: Vec<Arc<History>> = {
            let channels = self.channels.read();
            let Some(entry) = channels.get(reader.channel()) else {
                return 0;
            };
            entry
                .transmitters
                .iter()
                .filter(|t| qos_compatible(t.endpoint.attributes().qos.reliability, reader_reliability))
                .map(|t| Arc::clone(&t.history))
                .collect()
        };

        let mut replayed = 0;
        for history in histories {
            for entry in history.latest(depth) {
                sink.deliver(BackendKind::Intra, &entry.info, &entry.payload);
                replayed += 1;
            }
        }
        if replayed > 0 {
            log::debug!("[IntraRegistry] Replayed {} messages to {}", replayed, reader);
        }
        replayed
    }

    fn unregister(&self, channel: &str, token: u64, kind: TokenKind) {
        let mut unmatched = None;
        {
            let mut channels = self.channels.write();
            let Some(entry) = channels.get_mut(channel) else {
                return;
            };
            match kind {
                TokenKind::Receiver => entry.receivers.retain(|r| r.token != token),
                TokenKind::Watcher => entry.watchers.retain(|w| w.token != token),
                TokenKind::Transmitter => {
                    if let Some(index) = entry.transmitters.iter().position(|t| t.token == token) {
                        let removed = entry.transmitters.remove(index);
                        unmatched = Some((removed.endpoint.id().clone(), entry.handlers()));
                    }
                }
            }
            if entry.is_empty() {
                channels.remove(channel);
            }
        }
        log::debug!("[IntraRegistry] Unregistered {:?} on '{}'", kind, channel);

        if let Some((id, handlers)) = unmatched {
            let event = MatchEvent::Unmatched(id);
            for handler in handlers {
                handler(&event);
            }
        }
    }

    /// Receivers currently registered on `channel`.
    #[must_use]
    pub fn receiver_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, |e| e.receivers.len())
    }

    /// Transmitters currently registered on `channel`.
    #[must_use]
    pub fn transmitter_count(&self, channel: &str) -> usize {
        self.channels.read().get(channel).map_or(0, |e| e.transmitters.len())
    }

    /// Channels with at least one registration (sorted).
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for IntraRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntraRegistry")
            .field("channels", &self.channels.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;
    use crate::role::{Reliability, RoleAttributes};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Collect {
        seen: Mutex<Vec<(BackendKind, u64)>>,
    }

    impl DeliverySink for Collect {
        fn deliver(&self, origin: BackendKind, info: &MessageInfo, _payload: &Bytes) {
            self.seen.lock().push((origin, info.seq));
        }

        fn report_loss(&self, _origin: BackendKind, _count: u64) {}
    }

    fn endpoint(channel: &str) -> Endpoint {
        Endpoint::new(RoleAttributes::local(channel))
    }

    #[test]
    fn test_dispatch_reaches_channel_receivers_only() {
        let registry = IntraRegistry::new();
        let on_c1 = Arc::new(Collect::default());
        let on_c2 = Arc::new(Collect::default());
        let _t1 = registry.register_receiver(&endpoint("c1"), on_c1.clone());
        let _t2 = registry.register_receiver(&endpoint("c2"), on_c2.clone());

        let writer = endpoint("c1");
        let reached = registry.dispatch(&writer, &MessageInfo::new(writer.id().clone(), 1), &Bytes::from_static(b"x"));

        assert_eq!(reached, 1);
        assert_eq!(*on_c1.seen.lock(), vec![(BackendKind::Intra, 1)]);
        assert!(on_c2.seen.lock().is_empty());
    }

    #[test]
    fn test_token_drop_unregisters() {
        let registry = IntraRegistry::new();
        let token = registry.register_receiver(&endpoint("c"), Arc::new(Collect::default()));
        assert_eq!(registry.receiver_count("c"), 1);
        assert_eq!(token.channel(), "c");

        drop(token);
        assert_eq!(registry.receiver_count("c"), 0);
        assert!(registry.channels().is_empty());
    }

    #[test]
    fn test_watchers_see_match_and_unmatch() {
        let registry = IntraRegistry::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let early = endpoint("c");
        let _early_token = registry.register_transmitter(&early, Arc::new(History::new(1)));

        let (_watch, current) = registry.watch(
            "c",
            Arc::new(move |event: &MatchEvent| sink.lock().push(event.clone())),
        );
        assert_eq!(current, vec![early.clone()]);

        let late = endpoint("c");
        let late_token = registry.register_transmitter(&late, Arc::new(History::new(1)));
        drop(late_token);

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], MatchEvent::Matched(late.clone()));
        assert_eq!(events[1], MatchEvent::Unmatched(late.id().clone()));
    }

    #[test]
    fn test_replay_uses_smaller_depth() {
        let registry = IntraRegistry::new();
        let writer = endpoint("c");
        let history = Arc::new(History::new(4));
        for seq in 1..=6 {
            history.push(Bytes::from_static(b"m"), MessageInfo::new(writer.id().clone(), seq));
        }
        let _w = registry.register_transmitter(&writer, history);

        let shallow = Collect::default();
        let reader = endpoint("c");
        assert_eq!(registry.replay_history(&reader, 2, &shallow), 2);
        let seqs: Vec<u64> = shallow.seen.lock().iter().map(|(_, s)| *s).collect();
        assert_eq!(seqs, vec![5, 6]);

        let deep = Collect::default();
        assert_eq!(registry.replay_history(&reader, 10, &deep), 4);
    }

    #[test]
    fn test_best_effort_writer_skips_reliable_reader() {
        let registry = IntraRegistry::new();
        let reliable = Arc::new(Collect::default());
        let best_effort = Arc::new(Collect::default());
        let _a = registry.register_receiver(&endpoint("c"), reliable.clone());
        let _b = registry.register_receiver(
            &Endpoint::new(RoleAttributes::local("c").with_reliability(Reliability::BestEffort)),
            best_effort.clone(),
        );

        let writer = Endpoint::new(RoleAttributes::local("c").with_reliability(Reliability::BestEffort));
        let reached = registry.dispatch(&writer, &MessageInfo::new(Identity::new(), 1), &Bytes::new());

        assert_eq!(reached, 1);
        assert!(reliable.seen.lock().is_empty());
        assert_eq!(best_effort.seen.lock().len(), 1);
    }

    #[test]
    fn test_isolated_registries() {
        let a = IntraRegistry::new();
        let b = IntraRegistry::new();
        let _t = a.register_receiver(&endpoint("c"), Arc::new(Collect::default()));
        assert_eq!(a.receiver_count("c"), 1);
        assert_eq!(b.receiver_count("c"), 0);
        assert!(Arc::ptr_eq(&IntraRegistry::global(), &IntraRegistry::global()));
    }
}
