// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Futex wait/wake on a word living in shared memory.
//!
//! Uses the SHARED opcodes (`FUTEX_WAIT` = 0, `FUTEX_WAKE` = 1). The
//! `_PRIVATE` variants never wake waiters in another process.
//! Non-Linux targets fall back to a short sleep.

use std::sync::atomic::AtomicU32;
use std::time::Duration;

#[cfg(target_os = "linux")]
const FUTEX_WAIT: i32 = 0;
#[cfg(target_os = "linux")]
const FUTEX_WAKE: i32 = 1;

/// Block while `*word == expected`, at most `timeout`.
///
/// Returns on wake, timeout, value mismatch or signal; callers re-check
/// their condition in every case.
#[cfg(target_os = "linux")]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    // SAFETY:
    // - word is a live reference, so the address is valid for the whole call
    // - ts outlives the syscall
    // - uaddr2/val3 are unused by FUTEX_WAIT
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *const u32,
            FUTEX_WAIT,
            expected,
            &ts as *const libc::timespec,
            std::ptr::null::<u32>(),
            0i32,
        );
    }
}

/// Wake every waiter blocked on `word`. Returns the number woken.
#[cfg(target_os = "linux")]
pub fn futex_wake_all(word: &AtomicU32) -> i32 {
    // SAFETY:
    // - word is a live reference
    // - timeout/uaddr2/val3 are unused by FUTEX_WAKE
    unsafe {
        libc::syscall(
            libc::SYS_futex,
            word as *const AtomicU32 as *const u32,
            FUTEX_WAKE,
            i32::MAX,
            std::ptr::null::<libc::timespec>(),
            std::ptr::null::<u32>(),
            0i32,
        ) as i32
    }
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Duration) {
    use std::sync::atomic::Ordering;
    if word.load(Ordering::Acquire) == expected {
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
    }
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake_all(_word: &AtomicU32) -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wake_without_waiters() {
        let word = AtomicU32::new(0);
        assert!(futex_wake_all(&word) >= 0);
    }

    #[test]
    fn test_mismatch_returns_immediately() {
        let word = AtomicU32::new(7);
        let start = Instant::now();
        futex_wait(&word, 0, Duration::from_secs(2));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_wait_times_out() {
        let word = AtomicU32::new(1);
        let start = Instant::now();
        futex_wait(&word, 1, Duration::from_millis(30));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_wake_releases_waiter() {
        let word = Arc::new(AtomicU32::new(0));
        let waiter = {
            let word = Arc::clone(&word);
            thread::spawn(move || {
                while word.load(Ordering::Acquire) == 0 {
                    futex_wait(&word, 0, Duration::from_millis(500));
                }
                word.load(Ordering::Acquire)
            })
        };
        thread::sleep(Duration::from_millis(10));
        word.store(5, Ordering::Release);
        futex_wake_all(&word);
        assert_eq!(waiter.join().expect("waiter thread"), 5);
    }
}
