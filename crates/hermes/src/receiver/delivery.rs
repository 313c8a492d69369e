// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Serialized delivery path shared by every receiver backend.
//!
//! ```text
//!  intra dispatch ─┐
//!  shm reader      ├─> DeliverySink::deliver ─> [gate] seq check ─> History ─> callback
//!  rtps listener  ─┘                                   |                 (or Scheduler::post)
//!                                                      └─ stale: counted, dropped
//! ```
//!
//! The gate is one `parking_lot::Mutex` per receiver. It is held across the
//! sequence check, the History append and the callback itself, so a receiver
//! never runs two callbacks at once even when several backends deliver
//! concurrently. `disable()` flips the enabled flag and then takes the gate
//! once: any callback in flight has finished when it returns, and every
//! later arrival sees the flag and is dropped.

use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::history::History;
use crate::identity::Identity;
use crate::message::MessageInfo;
use crate::receiver::stats::ReceiverStats;
use crate::scheduler::Scheduler;
use crate::transport::BackendKind;

/// Application callback: payload bytes plus metadata.
pub type Callback = Arc<dyn Fn(&Bytes, &MessageInfo) + Send + Sync>;

/// Entry point transports push received messages into.
///
/// Implemented by the receiver delivery core; transport code only ever sees
/// this trait.
pub trait DeliverySink: Send + Sync {
    /// A message arrived through `origin`.
    fn deliver(&self, origin: BackendKind, info: &MessageInfo, payload: &Bytes);

    /// `count` messages were lost inside the transport (ring overwrite).
    fn report_loss(&self, origin: BackendKind, count: u64);
}

/// Outcome of the per-sender sequence check.
#[derive(Debug, PartialEq, Eq)]
enum SeqCheck {
    /// Newer than anything seen; `gap` messages were skipped.
    Fresh { gap: u64 },
    /// Already seen or older.
    Stale { last: u64 },
}

#[derive(Default)]
struct SeqTracker {
    last_seen: HashMap<Identity, u64>,
}

impl SeqTracker {
    fn check(&mut self, info: &MessageInfo) -> SeqCheck {
        match self.last_seen.get_mut(&info.sender) {
            Some(last) if info.seq <= *last => SeqCheck::Stale { last: *last },
            Some(last) => {
                let gap = info.seq - *last - 1;
                *last = info.seq;
                SeqCheck::Fresh { gap }
            }
            None => {
                // First message from this sender: late joiners start mid-stream
                self.last_seen.insert(info.sender.clone(), info.seq);
                SeqCheck::Fresh { gap: 0 }
            }
        }
    }
}

/// Delivery core owned by one receiver (or shared by a hybrid receiver's
/// sub-receivers through [`DeliverySink`]).
pub(crate) struct Delivery {
    me: Weak<Delivery>,
    endpoint: Endpoint,
    task_name: String,
    history: History,
    stats: ReceiverStats,
    callback: Callback,
    scheduler: Option<Arc<dyn Scheduler>>,
    queue_depth: usize,
    pending: AtomicUsize,
    enabled: AtomicBool,
    epoch: AtomicU64,
    gate: Mutex<SeqTracker>,
    callback_thread: Mutex<Option<ThreadId>>,
    deferred: Mutex<VecDeque<(MessageInfo, Bytes)>>,
}

impl Delivery {
    pub(crate) fn new(
        endpoint: Endpoint,
        callback: Callback,
        scheduler: Option<Arc<dyn Scheduler>>,
    ) -> Arc<Self> {
        let qos = endpoint.attributes().qos;
        let task_name = endpoint.attributes().task_name();
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            endpoint,
            task_name,
            history: History::new(qos.history_depth),
            stats: ReceiverStats::new(),
            callback,
            scheduler,
            queue_depth: qos.queue_depth.max(1),
            pending: AtomicUsize::new(0),
            enabled: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
            gate: Mutex::new(SeqTracker::default()),
            callback_thread: Mutex::new(None),
            deferred: Mutex::new(VecDeque::new()),
        })
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub(crate) fn is_active(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Start accepting messages. Returns false if already active.
    pub(crate) fn activate(&self) -> bool {
        !self.enabled.swap(true, Ordering::AcqRel)
    }

    /// Stop accepting messages and wait for the callback in flight.
    ///
    /// Called from inside this receiver's own callback, it returns without
    /// waiting (the running callback is the caller). Returns false if
    /// already inactive.
    pub(crate) fn deactivate(&self) -> bool {
        let was_active = self.enabled.swap(false, Ordering::AcqRel);
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if self.is_callback_thread() {
            log::debug!(
                "[Delivery] {} disabled from its own callback, not waiting",
                self.endpoint
            );
            return was_active;
        }
        // Quiesce: the gate is held by any callback still running
        drop(self.gate.lock());
        self.deferred.lock().clear();
        was_active
    }

    /// Resize History. Only allowed while inactive.
    pub(crate) fn set_history_depth(&self, depth: usize) -> Result<()> {
        if self.is_active() {
            return Err(Error::InvalidState(format!(
                "history depth of {} cannot change while enabled",
                self.endpoint
            )));
        }
        if depth == 0 {
            return Err(Error::InvalidConfig("history depth must be >= 1".into()));
        }
        self.history.set_depth(depth);
        Ok(())
    }

    /// Callbacks posted to the scheduler and not yet run.
    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    fn is_callback_thread(&self) -> bool {
        *self.callback_thread.lock() == Some(thread::current().id())
    }

    fn process(&self, tracker: &mut SeqTracker, info: &MessageInfo, payload: &Bytes) {
        if !self.is_active() {
            self.stats.inc_rejected_disabled();
            return;
        }

        match tracker.check(info) {
            SeqCheck::Stale { last } => {
                self.stats.inc_duplicates();
                log::debug!(
                    "[Delivery] {} dropped stale seq {} from {} (last {})",
                    self.endpoint.channel(),
                    info.seq,
                    info.sender,
                    last
                );
                return;
            }
            SeqCheck::Fresh { gap } if gap > 0 => {
                self.stats.add_lost(gap);
                log::debug!(
                    "[Delivery] {} gap of {} before seq {} from {}",
                    self.endpoint.channel(),
                    gap,
                    info.seq,
                    info.sender
                );
            }
            SeqCheck::Fresh { .. } => {}
        }

        match &self.scheduler {
            None => {
                self.history.push(payload.clone(), info.clone());
                self.invoke(info, payload);
            }
            Some(scheduler) => self.post(scheduler.as_ref(), info, payload),
        }
    }

    fn post(&self, scheduler: &dyn Scheduler, info: &MessageInfo, payload: &Bytes) {
        if self.pending.load(Ordering::Acquire) >= self.queue_depth {
            self.stats.inc_queue_overflows();
            log::debug!(
                "[Delivery] {} queue full ({}), dropping seq {}",
                self.task_name,
                self.queue_depth,
                info.seq
            );
            return;
        }
        self.history.push(payload.clone(), info.clone());

        let me = self.me.clone();
        let epoch = self.epoch.load(Ordering::Acquire);
        let info = info.clone();
        let payload = payload.clone();
        self.pending.fetch_add(1, Ordering::AcqRel);
        let posted = scheduler.post(
            &self.task_name,
            Box::new(move || {
                if let Some(delivery) = me.upgrade() {
                    delivery.run_posted(epoch, &info, &payload);
                }
            }),
        );
        if !posted {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            self.stats.inc_queue_overflows();
            log::warn!("[Delivery] scheduler refused task '{}'", self.task_name);
        }
    }

    fn run_posted(&self, epoch: u64, info: &MessageInfo, payload: &Bytes) {
        self.pending.fetch_sub(1, Ordering::AcqRel);
        let mut tracker = self.gate.lock();
        if !self.is_active() || self.epoch.load(Ordering::Acquire) != epoch {
            self.stats.inc_rejected_disabled();
            return;
        }
        self.invoke(info, payload);
        self.drain_deferred(&mut tracker);
    }

    fn invoke(&self, info: &MessageInfo, payload: &Bytes) {
        *self.callback_thread.lock() = Some(thread::current().id());
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.callback)(payload, info)));
        *self.callback_thread.lock() = None;

        self.stats.inc_delivered();
        if outcome.is_err() {
            self.stats.inc_callback_panics();
            log::error!(
                "[Delivery] callback of {} panicked on seq {} from {}",
                self.endpoint,
                info.seq,
                info.sender
            );
        }
    }

    /// Messages published to this receiver from inside its own callback.
    fn drain_deferred(&self, tracker: &mut SeqTracker) {
        loop {
            let next = self.deferred.lock().pop_front();
            match next {
                Some((info, payload)) => self.process(tracker, &info, &payload),
                None => break,
            }
        }
    }
}

impl DeliverySink for Delivery {
    fn deliver(&self, origin: BackendKind, info: &MessageInfo, payload: &Bytes) {
        self.stats.inc_received();
        if !self.is_active() {
            self.stats.inc_rejected_disabled();
            return;
        }

        if self.is_callback_thread() {
            // The gate is ours already; run after the current callback
            self.deferred.lock().push_back((info.clone(), payload.clone()));
            return;
        }

        let mut tracker = self.gate.lock();
        log::trace!(
            "[Delivery] {} seq {} via {}",
            self.endpoint.channel(),
            info.seq,
            origin
        );
        self.process(&mut tracker, info, payload);
        self.drain_deferred(&mut tracker);
    }

    fn report_loss(&self, origin: BackendKind, count: u64) {
        self.stats.add_overruns(count);
        log::debug!(
            "[Delivery] {} lost {} messages in {} transport",
            self.endpoint.channel(),
            count,
            origin
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleAttributes;
    use crate::scheduler::{Task, WorkerPool};
    use std::sync::atomic::AtomicU32;

    fn collecting(channel: &str) -> (Arc<Delivery>, Arc<Mutex<Vec<u64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local(channel).with_history_depth(3)),
            Arc::new(move |_: &Bytes, info: &MessageInfo| sink.lock().push(info.seq)),
            None,
        );
        (delivery, seen)
    }

    fn msg(sender: Identity, seq: u64) -> (MessageInfo, Bytes) {
        (
            MessageInfo::new(sender, seq),
            Bytes::from(format!("m{}", seq)),
        )
    }

    #[test]
    fn test_rejects_while_disabled() {
        let (delivery, seen) = collecting("c");
        let (info, payload) = msg(Identity::new(), 1);
        delivery.deliver(BackendKind::Intra, &info, &payload);

        assert!(seen.lock().is_empty());
        assert_eq!(delivery.stats().snapshot().rejected_disabled, 1);
    }

    #[test]
    fn test_sequence_regression_dropped_once() {
        let (delivery, seen) = collecting("c");
        delivery.activate();
        let sender = Identity::new();

        for seq in [1, 2, 3, 2, 4] {
            let (info, payload) = msg(sender.clone(), seq);
            delivery.deliver(BackendKind::Intra, &info, &payload);
        }

        assert_eq!(*seen.lock(), vec![1, 2, 3, 4]);
        let stats = delivery.stats().snapshot();
        assert_eq!(stats.duplicates, 1);
        assert_eq!(stats.delivered, 4);
        let history: Vec<u64> = delivery.history().snapshot().iter().map(|e| e.info.seq).collect();
        assert_eq!(history, vec![2, 3, 4]);
    }

    #[test]
    fn test_gaps_counted_per_sender() {
        let (delivery, seen) = collecting("c");
        delivery.activate();
        let a = Identity::new();
        let b = Identity::new();

        for (sender, seq) in [(&a, 5), (&b, 1), (&a, 8), (&b, 2)] {
            let (info, payload) = msg(sender.clone(), seq);
            delivery.deliver(BackendKind::Rtps, &info, &payload);
        }

        assert_eq!(seen.lock().len(), 4);
        assert_eq!(delivery.stats().snapshot().lost, 2);
    }

    #[test]
    fn test_history_depth_locked_while_enabled() {
        let (delivery, _) = collecting("c");
        assert!(delivery.set_history_depth(5).is_ok());
        assert_eq!(delivery.history().depth(), 5);
        assert!(matches!(delivery.set_history_depth(0), Err(Error::InvalidConfig(_))));

        delivery.activate();
        assert!(matches!(delivery.set_history_depth(2), Err(Error::InvalidState(_))));
        delivery.deactivate();
        assert!(delivery.set_history_depth(2).is_ok());
    }

    #[test]
    fn test_callback_panic_is_contained() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local("c")),
            Arc::new(move |_: &Bytes, info: &MessageInfo| {
                counter.fetch_add(1, Ordering::SeqCst);
                if info.seq == 1 {
                    panic!("boom");
                }
            }),
            None,
        );
        delivery.activate();
        let sender = Identity::new();
        for seq in 1..=2 {
            let (info, payload) = msg(sender.clone(), seq);
            delivery.deliver(BackendKind::Intra, &info, &payload);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(delivery.stats().snapshot().callback_panics, 1);
    }

    #[test]
    fn test_disable_from_own_callback() {
        let slot: Arc<Mutex<Option<Arc<Delivery>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local("c")),
            Arc::new(move |_: &Bytes, _: &MessageInfo| {
                if let Some(me) = inner.lock().as_ref() {
                    me.deactivate();
                }
            }),
            None,
        );
        *slot.lock() = Some(Arc::clone(&delivery));
        delivery.activate();

        let sender = Identity::new();
        let (info, payload) = msg(sender.clone(), 1);
        delivery.deliver(BackendKind::Intra, &info, &payload);
        assert!(!delivery.is_active());

        let (info, payload) = msg(sender, 2);
        delivery.deliver(BackendKind::Intra, &info, &payload);
        assert_eq!(delivery.stats().snapshot().delivered, 1);

        slot.lock().take();
    }

    #[test]
    fn test_reentrant_deliver_is_deferred() {
        let slot: Arc<Mutex<Option<Arc<Delivery>>>> = Arc::new(Mutex::new(None));
        let inner = Arc::clone(&slot);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        let echo_sender = Identity::new();
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local("c")),
            Arc::new(move |_: &Bytes, info: &MessageInfo| {
                record.lock().push(info.seq);
                if info.sender != echo_sender {
                    if let Some(me) = inner.lock().as_ref() {
                        let echo = MessageInfo::new(echo_sender.clone(), info.seq);
                        me.deliver(BackendKind::Intra, &echo, &Bytes::new());
                    }
                }
            }),
            None,
        );
        *slot.lock() = Some(Arc::clone(&delivery));
        delivery.activate();

        let (info, payload) = msg(Identity::new(), 7);
        delivery.deliver(BackendKind::Intra, &info, &payload);

        // Echo ran after the outer callback returned, on the same thread
        assert_eq!(*seen.lock(), vec![7, 7]);
        slot.lock().take();
    }

    #[test]
    fn test_scheduled_delivery_keeps_order() {
        let pool: Arc<dyn Scheduler> = Arc::new(WorkerPool::new(2).expect("workers"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local("sched")),
            Arc::new(move |_: &Bytes, info: &MessageInfo| sink.lock().push(info.seq)),
            Some(Arc::clone(&pool)),
        );
        delivery.activate();

        let sender = Identity::new();
        for seq in 1..=100 {
            let (info, payload) = msg(sender.clone(), seq);
            delivery.deliver(BackendKind::Intra, &info, &payload);
        }

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while seen.lock().len() < 100 && std::time::Instant::now() < deadline {
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(*seen.lock(), (1..=100).collect::<Vec<_>>());
        assert_eq!(delivery.pending(), 0);
    }

    struct Refusing;

    impl Scheduler for Refusing {
        fn post(&self, _task_name: &str, _task: Task) -> bool {
            false
        }
    }

    struct Parking {
        tasks: Mutex<Vec<Task>>,
    }

    impl Scheduler for Parking {
        fn post(&self, _task_name: &str, task: Task) -> bool {
            self.tasks.lock().push(task);
            true
        }
    }

    #[test]
    fn test_refused_post_counts_overflow() {
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local("c")),
            Arc::new(|_: &Bytes, _: &MessageInfo| {}),
            Some(Arc::new(Refusing)),
        );
        delivery.activate();
        let (info, payload) = msg(Identity::new(), 1);
        delivery.deliver(BackendKind::Intra, &info, &payload);

        assert_eq!(delivery.stats().snapshot().queue_overflows, 1);
        assert_eq!(delivery.pending(), 0);
    }

    #[test]
    fn test_queue_bound_and_stale_tasks() {
        let parking = Arc::new(Parking {
            tasks: Mutex::new(Vec::new()),
        });
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let scheduler: Arc<dyn Scheduler> = parking.clone();
        let delivery = Delivery::new(
            Endpoint::new(RoleAttributes::local("c").with_qos(
                crate::role::QosProfile::reliable().queue_depth(2),
            )),
            Arc::new(move |_: &Bytes, _: &MessageInfo| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
            Some(scheduler),
        );
        delivery.activate();

        let sender = Identity::new();
        for seq in 1..=3 {
            let (info, payload) = msg(sender.clone(), seq);
            delivery.deliver(BackendKind::Intra, &info, &payload);
        }
        assert_eq!(delivery.pending(), 2);
        assert_eq!(delivery.stats().snapshot().queue_overflows, 1);

        // Tasks queued before disable never reach the callback
        delivery.deactivate();
        delivery.activate();
        let tasks: Vec<Task> = parking.tasks.lock().drain(..).collect();
        for task in tasks {
            task();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(delivery.pending(), 0);
    }
}
