//! # TaskScheduler: micro / scheduled / timer queues.
//!
//! ## Rules
//! - `schedule(cb)` runs after the current synchronous execution and after any
//!   queued microtasks, but **before** zero-delay timers queued earlier in the
//!   same turn.
//! - No cancellation: a queued callback always runs unless the driver is stopped.
//! - A panicking callback is caught and logged; later callbacks still run.
//! - Callbacks never run while the queue lock is held, so they may re-enter the
//!   scheduler freely.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::panic_message;

/// A deferred unit of work.
pub type Callback = Box<dyn FnOnce() + Send + 'static>;

struct Timer {
    due: Instant,
    seq: u64,
    cb: Callback,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // BinaryHeap is a max-heap; the earliest (due, seq) must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct Queues {
    micro: VecDeque<Callback>,
    scheduled: VecDeque<Callback>,
    timers: BinaryHeap<Timer>,
    timer_seq: u64,
}

/// Three-queue callback scheduler.
///
/// Can be driven manually ([`run_turn`](Self::run_turn),
/// [`run_until_idle`](Self::run_until_idle)) or by a background tokio task
/// ([`start`](Self::start)).
#[derive(Default)]
pub struct TaskScheduler {
    queues: Mutex<Queues>,
    wake: Notify,
}

impl TaskScheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a high-priority callback.
    pub fn queue_microtask(&self, cb: impl FnOnce() + Send + 'static) {
        self.queues.lock().micro.push_back(Box::new(cb));
        self.wake.notify_one();
    }

    /// Queues a callback for the scheduled phase of the current (or next) turn.
    pub fn schedule(&self, cb: impl FnOnce() + Send + 'static) {
        self.queues.lock().scheduled.push_back(Box::new(cb));
        self.wake.notify_one();
    }

    /// Queues a timer that becomes runnable once `delay` has elapsed.
    pub fn set_timeout(&self, delay: Duration, cb: impl FnOnce() + Send + 'static) {
        let mut q = self.queues.lock();
        q.timer_seq += 1;
        let seq = q.timer_seq;
        q.timers.push(Timer {
            due: Instant::now() + delay,
            seq,
            cb: Box::new(cb),
        });
        drop(q);
        self.wake.notify_one();
    }

    /// Number of callbacks waiting in any queue (timers included).
    pub fn pending(&self) -> usize {
        let q = self.queues.lock();
        q.micro.len() + q.scheduled.len() + q.timers.len()
    }

    /// Runs one turn and returns how many callbacks ran.
    pub fn run_turn(&self) -> usize {
        let mut ran = self.drain_micro();

        let scheduled = self.queues.lock().scheduled.len();
        for _ in 0..scheduled {
            let Some(cb) = self.queues.lock().scheduled.pop_front() else {
                break;
            };
            run_guarded(cb);
            ran += 1 + self.drain_micro();
        }

        let now = Instant::now();
        let due = {
            let mut q = self.queues.lock();
            let mut due = Vec::new();
            while q.timers.peek().is_some_and(|t| t.due <= now) {
                if let Some(timer) = q.timers.pop() {
                    due.push(timer.cb);
                }
            }
            due
        };
        for cb in due {
            run_guarded(cb);
            ran += 1 + self.drain_micro();
        }

        ran
    }

    /// Runs turns until nothing is runnable (future timers stay queued).
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.run_turn();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Spawns a driver that runs turns whenever work is queued or a timer is due.
    ///
    /// Stops when `token` is cancelled; callbacks still queued at that point are dropped.
    pub fn start(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                me.run_until_idle();
                let next_due = me.queues.lock().timers.peek().map(|t| t.due);
                let timer = async {
                    match next_due {
                        Some(due) => tokio::time::sleep_until(due).await,
                        None => std::future::pending::<()>().await,
                    }
                };
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = me.wake.notified() => {}
                    _ = timer => {}
                }
            }
        })
    }

    fn drain_micro(&self) -> usize {
        let mut ran = 0;
        loop {
            let Some(cb) = self.queues.lock().micro.pop_front() else {
                return ran;
            };
            run_guarded(cb);
            ran += 1;
        }
    }
}

fn run_guarded(cb: Callback) {
    if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(cb)) {
        warn!(info = %panic_message(&*payload), "scheduled callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let make = move |tag: &'static str| -> Callback {
            let l = l.clone();
            Box::new(move || l.lock().push(tag))
        };
        (log, make)
    }

    #[test]
    fn scheduled_runs_before_earlier_zero_delay_timer() {
        let sched = TaskScheduler::new();
        let (log, cb) = recorder();

        sched.set_timeout(Duration::ZERO, cb("timer"));
        sched.schedule(cb("scheduled"));
        sched.queue_microtask(cb("micro"));

        sched.run_until_idle();
        assert_eq!(*log.lock(), vec!["micro", "scheduled", "timer"]);
    }

    #[test]
    fn microtasks_drain_after_each_callback() {
        let sched = TaskScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let s = sched.clone();
            let l = log.clone();
            sched.schedule(move || {
                l.lock().push(tag);
                let l2 = l.clone();
                s.queue_microtask(move || l2.lock().push("micro"));
            });
        }

        sched.run_turn();
        assert_eq!(*log.lock(), vec!["a", "micro", "b", "micro"]);
    }

    #[test]
    fn callbacks_scheduled_during_scheduled_phase_wait_for_next_turn() {
        let sched = TaskScheduler::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let s = sched.clone();
        let l = log.clone();
        sched.set_timeout(Duration::ZERO, {
            let l = log.clone();
            move || l.lock().push("timer")
        });
        sched.schedule(move || {
            l.lock().push("first");
            let l2 = l.clone();
            s.schedule(move || l2.lock().push("second"));
        });

        sched.run_turn();
        assert_eq!(*log.lock(), vec!["first", "timer"]);
        sched.run_turn();
        assert_eq!(*log.lock(), vec!["first", "timer", "second"]);
    }

    #[test]
    fn panicking_callback_does_not_stop_the_turn() {
        let sched = TaskScheduler::new();
        let (log, cb) = recorder();
        sched.schedule(|| panic!("boom"));
        sched.schedule(cb("after"));
        assert_eq!(sched.run_until_idle(), 2);
        assert_eq!(*log.lock(), vec!["after"]);
        assert_eq!(sched.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn driver_fires_timers_in_deadline_order() {
        let sched = TaskScheduler::new();
        let token = CancellationToken::new();
        let driver = sched.start(token.clone());
        let (log, cb) = recorder();

        sched.set_timeout(Duration::from_millis(20), cb("late"));
        sched.set_timeout(Duration::from_millis(10), cb("early"));
        sched.schedule(cb("now"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(*log.lock(), vec!["now", "early", "late"]);

        token.cancel();
        driver.await.expect("driver join");
    }
}
