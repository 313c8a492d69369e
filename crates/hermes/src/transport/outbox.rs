// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered hand-off between publishers and whichever thread delivers.
//!
//! Publishers append under a short lock and return. The first caller of
//! [`Outbox::drain`] becomes the drainer and delivers every queued item in
//! FIFO order; concurrent or nested callers find the drainer active and
//! return at once. No lock is held while items are delivered, so a
//! receiver callback may publish again without waiting on the thread that
//! is delivering to it.

use parking_lot::Mutex;
use std::collections::VecDeque;

struct State<T> {
    queue: VecDeque<T>,
    draining: bool,
}

/// FIFO drained by one thread at a time.
pub(crate) struct Outbox<T> {
    state: Mutex<State<T>>,
}

impl<T> Outbox<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                draining: false,
            }),
        }
    }

    /// Append one item.
    pub(crate) fn push(&self, item: T) {
        self.state.lock().queue.push_back(item);
    }

    /// Build the item under the queue lock and append it.
    ///
    /// Whatever `make` computes (a sequence number) is therefore ordered
    /// exactly like the queue.
    pub(crate) fn push_with<R>(&self, make: impl FnOnce() -> (T, R)) -> R {
        let mut state = self.state.lock();
        let (item, out) = make();
        state.queue.push_back(item);
        out
    }

    /// Deliver queued items until the queue is empty.
    ///
    /// Returns `false` without delivering if another call is draining; that
    /// call picks up whatever was queued.
    pub(crate) fn drain(&self, mut deliver: impl FnMut(T)) -> bool {
        {
            let mut state = self.state.lock();
            if state.draining {
                return false;
            }
            state.draining = true;
        }
        let _unwind = ResetOnUnwind(&self.state);
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.queue.pop_front() {
                    Some(item) => item,
                    None => {
                        state.draining = false;
                        return true;
                    }
                }
            };
            deliver(next);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

// A panicking deliver must not leave the outbox claimed forever
struct ResetOnUnwind<'a, T>(&'a Mutex<State<T>>);

impl<T> Drop for ResetOnUnwind<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock().draining = false;
        }
    }
}
