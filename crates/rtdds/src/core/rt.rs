// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Timed-event resource: one background thread running all periodic work.
//!
//! The driver exposes `schedule(deadline, callback) -> CancelToken`; the
//! periodic engines (PDP announce, lease scan, WLP assertions, server sync)
//! are built on [`TimedEvent`], which re-arms itself after each firing.
//! A cancelled event that was already scheduled but not yet fired is
//! dropped without running.

use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

type Callback = Box<dyn FnOnce() + Send>;

#[derive(PartialEq, Eq)]
struct Entry {
    deadline: Instant,
    id: u64,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

struct DriverState {
    queue: BinaryHeap<Reverse<Entry>>,
    callbacks: HashMap<u64, Callback>,
    next_id: u64,
    shutdown: bool,
}

struct DriverInner {
    state: Mutex<DriverState>,
    wakeup: Condvar,
}

/// Handle to cancel a scheduled callback.
///
/// Dropping the token does NOT cancel the event; call
/// [`cancel`](CancelToken::cancel) explicitly.
pub struct CancelToken {
    id: u64,
    driver: Weak<DriverInner>,
}

impl CancelToken {
    /// Cancel the scheduled callback. No-op if it already fired.
    pub fn cancel(&self) {
        if let Some(inner) = self.driver.upgrade() {
            let mut state = inner.state.lock();
            state.callbacks.remove(&self.id);
        }
    }
}

/// Single-threaded timer wheel driving all periodic discovery work.
pub struct TimerDriver {
    inner: Arc<DriverInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerDriver {
    /// Spawn the event thread.
    pub fn new() -> Arc<Self> {
        let inner = Arc::new(DriverInner {
            state: Mutex::new(DriverState {
                queue: BinaryHeap::new(),
                callbacks: HashMap::new(),
                next_id: 1,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });
        let thread_inner = Arc::clone(&inner);
        let handle = thread::Builder::new()
            .name("rtdds-timed-events".to_string())
            .spawn(move || run_loop(thread_inner))
            .expect("spawn timed-event thread");

        Arc::new(Self {
            inner,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Schedule `callback` to run at `deadline` on the event thread.
    pub fn schedule(&self, deadline: Instant, callback: Callback) -> CancelToken {
        let mut state = self.inner.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.queue.push(Reverse(Entry { deadline, id }));
        state.callbacks.insert(id, callback);
        drop(state);
        self.inner.wakeup.notify_one();
        CancelToken {
            id,
            driver: Arc::downgrade(&self.inner),
        }
    }

    /// Convenience: schedule relative to now.
    pub fn schedule_after(&self, delay: Duration, callback: Callback) -> CancelToken {
        self.schedule(Instant::now() + delay, callback)
    }

    /// Stop the event thread. Pending events are dropped unfired.
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            state.callbacks.clear();
        }
        self.inner.wakeup.notify_one();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }
}

enum LoopAction {
    Idle,
    Fire,
    Sleep(Instant),
}

fn run_loop(inner: Arc<DriverInner>) {
    let mut state = inner.state.lock();
    loop {
        if state.shutdown {
            break;
        }
        let now = Instant::now();
        let action = match state.queue.peek() {
            None => LoopAction::Idle,
            Some(Reverse(entry)) if entry.deadline <= now => LoopAction::Fire,
            Some(Reverse(entry)) => LoopAction::Sleep(entry.deadline),
        };
        match action {
            LoopAction::Idle => {
                inner.wakeup.wait(&mut state);
            }
            LoopAction::Fire => {
                let Some(Reverse(entry)) = state.queue.pop() else {
                    continue;
                };
                let callback = state.callbacks.remove(&entry.id);
                if let Some(callback) = callback {
                    // Run outside the driver lock: callbacks take the
                    // participant mutex and may schedule further events.
                    drop(state);
                    callback();
                    state = inner.state.lock();
                }
            }
            LoopAction::Sleep(deadline) => {
                inner.wakeup.wait_until(&mut state, deadline);
            }
        }
    }
}

// ===== Periodic events =====

struct TimedEventState {
    interval: Duration,
    token: Option<CancelToken>,
    next_deadline: Option<Instant>,
    active: bool,
}

/// Self-rearming periodic event on the shared timer driver.
///
/// Mirrors the classic RTPS timed-event contract: `restart_timer` arms the
/// event one interval from now, the callback re-arms it after each firing,
/// `cancel_timer` stops it, and `update_interval` takes effect on the next
/// restart.
pub struct TimedEvent {
    driver: Arc<TimerDriver>,
    state: Mutex<TimedEventState>,
    callback: Box<dyn Fn() + Send + Sync>,
    self_weak: Weak<TimedEvent>,
}

impl TimedEvent {
    pub fn new(
        driver: Arc<TimerDriver>,
        interval: Duration,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_weak| Self {
            driver,
            state: Mutex::new(TimedEventState {
                interval,
                token: None,
                next_deadline: None,
                active: false,
            }),
            callback: Box::new(callback),
            self_weak: self_weak.clone(),
        })
    }

    /// Arm (or re-arm) the event one interval from now.
    pub fn restart_timer(&self) {
        let mut state = self.state.lock();
        if let Some(token) = state.token.take() {
            token.cancel();
        }
        state.active = true;
        let deadline = Instant::now() + state.interval;
        state.next_deadline = Some(deadline);
        let weak = self.self_weak.clone();
        state.token = Some(self.driver.schedule(
            deadline,
            Box::new(move || {
                if let Some(event) = weak.upgrade() {
                    event.fire();
                }
            }),
        ));
    }

    fn fire(&self) {
        {
            let state = self.state.lock();
            if !state.active {
                return;
            }
        }
        (self.callback)();
        // Re-arm unless cancelled from inside the callback.
        let still_active = self.state.lock().active;
        if still_active {
            self.restart_timer();
        }
    }

    /// Stop the event. A firing already scheduled is dropped.
    pub fn cancel_timer(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.next_deadline = None;
        if let Some(token) = state.token.take() {
            token.cancel();
        }
    }

    /// Change the period. Takes effect on the next restart.
    pub fn update_interval(&self, interval: Duration) {
        self.state.lock().interval = interval;
    }

    pub fn interval(&self) -> Duration {
        self.state.lock().interval
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Time until the next scheduled firing, if armed.
    pub fn remaining_time(&self) -> Option<Duration> {
        self.state
            .lock()
            .next_deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_schedule_fires_in_order() {
        let driver = TimerDriver::new();
        let hits = Arc::new(Mutex::new(Vec::new()));

        let now = Instant::now();
        for (label, offset_ms) in [("b", 40u64), ("a", 10)] {
            let hits = Arc::clone(&hits);
            driver.schedule(
                now + Duration::from_millis(offset_ms),
                Box::new(move || hits.lock().push(label)),
            );
        }

        thread::sleep(Duration::from_millis(120));
        assert_eq!(*hits.lock(), vec!["a", "b"]);
        driver.shutdown();
    }

    #[test]
    fn test_cancel_before_fire() {
        let driver = TimerDriver::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let token = driver.schedule_after(
            Duration::from_millis(50),
            Box::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        token.cancel();

        thread::sleep(Duration::from_millis(120));
        assert_eq!(count.load(Ordering::SeqCst), 0); // Cancelled event never fires
        driver.shutdown();
    }

    #[test]
    fn test_timed_event_repeats_until_cancelled() {
        let driver = TimerDriver::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let event = TimedEvent::new(
            Arc::clone(&driver),
            Duration::from_millis(20),
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
        );
        event.restart_timer();

        thread::sleep(Duration::from_millis(130));
        event.cancel_timer();
        let fired = count.load(Ordering::SeqCst);
        assert!(fired >= 3, "expected >=3 firings, got {}", fired);

        thread::sleep(Duration::from_millis(60));
        assert_eq!(count.load(Ordering::SeqCst), fired); // No firings after cancel
        driver.shutdown();
    }

    #[test]
    fn test_timed_event_remaining_time() {
        let driver = TimerDriver::new();
        let event = TimedEvent::new(Arc::clone(&driver), Duration::from_secs(5), || {});
        assert!(event.remaining_time().is_none());

        event.restart_timer();
        let remaining = event.remaining_time().expect("armed");
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));

        event.cancel_timer();
        assert!(event.remaining_time().is_none());
        driver.shutdown();
    }

    #[test]
    fn test_shutdown_drops_pending() {
        let driver = TimerDriver::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        driver.schedule_after(
            Duration::from_millis(50),
            Box::new(move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        driver.shutdown();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
