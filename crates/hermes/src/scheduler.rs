// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Callback scheduling.
//!
//! Receivers either run the application callback on the transport thread
//! or post it to a [`Scheduler`] under a task name derived from the
//! endpoint (`"{node}_{channel}"`). [`WorkerPool`] is the bundled
//! implementation: tasks with the same name always land on the same worker,
//! so per-channel posting order is kept.

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::io;
use std::thread::{self, JoinHandle};

use crate::config::DEFAULT_WORKER_THREADS;

/// Unit of work posted by a receiver.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Post-callback contract consumed by receivers.
pub trait Scheduler: Send + Sync {
    /// Queue `task` for eventual execution under `task_name`.
    ///
    /// Returns false if the scheduler no longer accepts work; the task is
    /// dropped without running.
    fn post(&self, task_name: &str, task: Task) -> bool;
}

/// Fixed pool of worker threads fed by crossbeam channels.
pub struct WorkerPool {
    senders: Mutex<Vec<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
}

impl WorkerPool {
    /// Start `threads` workers (at least one).
    pub fn new(threads: usize) -> io::Result<Self> {
        let size = threads.max(1);
        let mut senders = Vec::with_capacity(size);
        let mut workers = Vec::with_capacity(size);

        for index in 0..size {
            let (tx, rx) = channel::unbounded::<Task>();
            let handle = thread::Builder::new()
                .name(format!("hermes-worker-{}", index))
                .spawn(move || {
                    log::debug!("[WorkerPool] worker {} started", index);
                    // Ends when every sender is dropped
                    for task in rx.iter() {
                        task();
                    }
                    log::debug!("[WorkerPool] worker {} stopped", index);
                })?;
            senders.push(tx);
            workers.push(handle);
        }

        Ok(Self {
            senders: Mutex::new(senders),
            workers: Mutex::new(workers),
            size,
        })
    }

    /// Pool with [`DEFAULT_WORKER_THREADS`] workers.
    pub fn with_default_threads() -> io::Result<Self> {
        Self::new(DEFAULT_WORKER_THREADS)
    }

    /// Number of workers.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Stop accepting work, drain queued tasks and join the workers.
    ///
    /// Must not be called from a worker thread.
    pub fn shutdown(&self) {
        self.senders.lock().clear();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in workers {
            if handle.join().is_err() {
                log::warn!("[WorkerPool] worker panicked during shutdown");
            }
        }
    }

    fn worker_for(&self, task_name: &str) -> usize {
        // FNV-1a
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in task_name.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.size as u64) as usize
    }
}

impl Scheduler for WorkerPool {
    fn post(&self, task_name: &str, task: Task) -> bool {
        let index = self.worker_for(task_name);
        let senders = self.senders.lock();
        match senders.get(index) {
            Some(tx) => tx.send(task).is_ok(),
            None => {
                log::debug!("[WorkerPool] rejecting task '{}' after shutdown", task_name);
                false
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
