// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process simulated network.
//!
//! Behaves like a reliable network black box with instant discovery:
//! participants on the same `LoopbackNetwork` see each other whatever
//! host name or process id their attributes claim, which is how remote
//! participants are simulated in tests.
//!
//! [`LoopbackNetwork::partition`] cuts the wire: messages from reliable
//! writers queue until [`LoopbackNetwork::heal`], best-effort ones are
//! dropped. [`LoopbackNetwork::set_available`] makes new subscriptions
//! fail as if the socket could not be bound.
//!
//! Published messages pass through one network outbox. Whichever thread
//! finds it idle delivers the queue in order; the others return at once.
//! No lock is held while reader handlers run.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::{DataHandler, NetworkTransport, SubscriptionId};
use crate::config::MAX_DATAGRAM_SIZE;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::message::MessageInfo;
use crate::role::Reliability;
use crate::transport::{qos_compatible, MatchEvent, MatchHandler, Outbox};

struct Reader {
    endpoint: Endpoint,
    handler: DataHandler,
}

struct Watcher {
    channel: String,
    handler: MatchHandler,
}

struct Queued {
    channel: String,
    reliability: Reliability,
    info: MessageInfo,
    payload: Bytes,
}

#[derive(Default)]
struct Wire {
    writers: HashMap<Identity, Endpoint>,
    readers: BTreeMap<SubscriptionId, Reader>,
    watchers: BTreeMap<SubscriptionId, Watcher>,
}

/// Simulated network shared by every participant holding the same `Arc`.
pub struct LoopbackNetwork {
    wire: RwLock<Wire>,
    next_id: AtomicU64,
    available: AtomicBool,
    partitioned: AtomicBool,
    // Also orders the partition check against heal
    backlog: Mutex<VecDeque<Queued>>,
    outbox: Outbox<Queued>,
}

impl LoopbackNetwork {
    /// Empty network, reachable and available.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            wire: RwLock::new(Wire::default()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
            partitioned: AtomicBool::new(false),
            backlog: Mutex::new(VecDeque::new()),
            outbox: Outbox::new(),
        })
    }

    /// Make new subscriptions and watches fail (`TransportUnavailable`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Cut the network. Reliable traffic queues, best-effort traffic drops.
    pub fn partition(&self) {
        self.partitioned.store(true, Ordering::Release);
        log::debug!("[Loopback] network partitioned");
    }

    /// Restore the network and flush queued reliable traffic in order.
    pub fn heal(&self) {
        {
            let mut backlog = self.backlog.lock();
            self.partitioned.store(false, Ordering::Release);
            log::debug!("[Loopback] network healed, flushing {} queued messages", backlog.len());
            for msg in backlog.drain(..) {
                self.outbox.push(msg);
            }
        }
        self.flush();
    }

    /// Messages waiting for the partition to heal.
    #[must_use]
    pub fn backlog_len(&self) -> usize {
        self.backlog.lock().len()
    }

    /// Writers currently advertised.
    #[must_use]
    pub fn writer_count(&self) -> usize {
        self.wire.read().writers.len()
    }

    /// Data subscriptions currently registered.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.wire.read().readers.len()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn ensure_available(&self, what: &str) -> Result<()> {
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(Error::TransportUnavailable(format!("loopback network down ({})", what)))
        }
    }

    fn watchers_of(&self, channel: &str) -> Vec<MatchHandler> {
        self.wire
            .read()
            .watchers
            .values()
            .filter(|w| w.channel == channel)
            .map(|w| Arc::clone(&w.handler))
            .collect()
    }

    fn flush(&self) {
        self.outbox.drain(|msg| self.deliver(&msg));
    }

    fn deliver(&self, msg: &Queued) {
        let handlers: Vec<DataHandler> = self
            .wire
            .read()
            .readers
            .values()
            .filter(|r| r.endpoint.channel() == msg.channel)
            .filter(|r| qos_compatible(msg.reliability, r.endpoint.attributes().qos.reliability))
            .map(|r| Arc::clone(&r.handler))
            .collect();
        for handler in handlers {
            handler(&msg.info, &msg.payload);
        }
    }
}

impl NetworkTransport for LoopbackNetwork {
    fn name(&self) -> &str {
        "loopback"
    }

    fn advertise(&self, writer: &Endpoint) -> Result<()> {
        self.wire
            .write()
            .writers
            .insert(writer.id().clone(), writer.clone());
        log::debug!("[Loopback] advertised writer {}", writer);

        let event = MatchEvent::Matched(writer.clone());
        for handler in self.watchers_of(writer.channel()) {
            handler(&event);
        }
        Ok(())
    }

    fn withdraw(&self, writer: &Identity) {
        let removed = self.wire.write().writers.remove(writer);
        if let Some(endpoint) = removed {
            log::debug!("[Loopback] withdrew writer {}", endpoint);
            let event = MatchEvent::Unmatched(writer.clone());
            for handler in self.watchers_of(endpoint.channel()) {
                handler(&event);
            }
        }
    }

    fn publish(&self, writer: &Endpoint, info: &MessageInfo, payload: &Bytes) -> Result<()> {
        if payload.len() > self.max_payload() {
            return Err(Error::PayloadTooLarge {
                size: payload.len(),
                capacity: self.max_payload(),
            });
        }
        let msg = Queued {
            channel: writer.channel().to_string(),
            reliability: writer.attributes().qos.reliability,
            info: info.clone(),
            payload: payload.clone(),
        };

        {
            let mut backlog = self.backlog.lock();
            if !self.partitioned.load(Ordering::Acquire) {
                self.outbox.push(msg);
            } else if msg.reliability == Reliability::Reliable {
                backlog.push_back(msg);
                return Ok(());
            } else {
                log::debug!("[Loopback] partitioned, dropping best-effort seq {}", info.seq);
                return Ok(());
            }
        }
        self.flush();
        Ok(())
    }

    fn subscribe(&self, reader: &Endpoint, handler: DataHandler) -> Result<SubscriptionId> {
        self.ensure_available("subscribe")?;
        let id = self.next_id();
        self.wire.write().readers.insert(
            id,
            Reader {
                endpoint: reader.clone(),
                handler,
            },
        );
        log::debug!("[Loopback] {} subscribed {}", id, reader);
        Ok(id)
    }

    fn watch(&self, channel: &str, handler: MatchHandler) -> Result<SubscriptionId> {
        self.ensure_available("watch")?;
        let id = self.next_id();
        let known: Vec<Endpoint> = {
            let mut wire = self.wire.write();
            wire.watchers.insert(
                id,
                Watcher {
                    channel: channel.to_string(),
                    handler: Arc::clone(&handler),
                },
            );
            wire.writers
                .values()
                .filter(|w| w.channel() == channel)
                .cloned()
                .collect()
        };
        for writer in known {
            handler(&MatchEvent::Matched(writer));
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        let mut wire = self.wire.write();
        if wire.readers.remove(&id).is_none() {
            wire.watchers.remove(&id);
        }
    }

    fn max_payload(&self) -> usize {
        MAX_DATAGRAM_SIZE
    }
}

impl std::fmt::Debug for LoopbackNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let wire = self.wire.read();
        f.debug_struct("LoopbackNetwork")
            .field("writers", &wire.writers.len())
            .field("readers", &wire.readers.len())
            .field("watchers", &wire.watchers.len())
            .field("partitioned", &self.partitioned.load(Ordering::Relaxed))
            .finish()
    }
}
