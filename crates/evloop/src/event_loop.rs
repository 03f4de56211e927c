//! Single-threaded dispatch loop
//!
//! The loop owns a dispatch queue, a [`WorkerPool`] and a [`TimerWheel`].
//! Each cycle it checks whether any source could still produce work, ticks
//! the wheel, runs one dispatch event on its own stack, then sleeps for the
//! poll interval. Timer callbacks and async completions are routed through
//! the dispatch queue, so application callbacks never run concurrently with
//! each other.

use crate::async_fn::AsyncHandle;
use crate::config::LoopConfig;
use crate::error::{LoopError, SubmitError, TaskError};
use crate::scheduler::{Clock, MonotonicClock, Task, TimerHandle, TimerWheel, WorkerPool};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

enum EventKind {
    Run(Box<dyn FnOnce() + Send + 'static>),
    /// A failure nobody handled; surfaces as an error from `run`
    Fault(TaskError),
}

/// Unit of work that must run on the loop thread.
pub(crate) struct DispatchEvent {
    kind: EventKind,
}

impl DispatchEvent {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            kind: EventKind::Run(Box::new(f)),
        }
    }

    pub(crate) fn fault(error: TaskError) -> Self {
        Self {
            kind: EventKind::Fault(error),
        }
    }
}

/// FIFO of dispatch events with a front "next tick" lane.
pub(crate) struct DispatchQueue {
    events: Mutex<VecDeque<DispatchEvent>>,
}

impl DispatchQueue {
    fn new() -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn push_back(&self, event: DispatchEvent) {
        self.events.lock().push_back(event);
    }

    pub(crate) fn push_front(&self, event: DispatchEvent) {
        self.events.lock().push_front(event);
    }

    fn pop_front(&self) -> Option<DispatchEvent> {
        self.events.lock().pop_front()
    }

    fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    fn len(&self) -> usize {
        self.events.lock().len()
    }
}

struct LoopInner {
    dispatch: Arc<DispatchQueue>,
    pool: WorkerPool,
    timers: Arc<TimerWheel>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    running: AtomicBool,
}

/// Cooperative event loop. Cloning yields another handle to the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

/// Clears the running flag when `run` exits, including by panic
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl EventLoop {
    /// Create a loop driven by the monotonic clock
    pub fn new(config: &LoopConfig) -> Result<Self, LoopError> {
        Self::with_clock(config, Arc::new(MonotonicClock::new()))
    }

    /// Create a loop driven by `clock`
    pub fn with_clock(config: &LoopConfig, clock: Arc<dyn Clock>) -> Result<Self, LoopError> {
        let pool = WorkerPool::new(config.resolved_workers())?;
        let timers = TimerWheel::new(clock.now_ms());

        Ok(Self {
            inner: Arc::new(LoopInner {
                dispatch: Arc::new(DispatchQueue::new()),
                pool,
                timers,
                clock,
                poll_interval: config.poll_interval(),
                running: AtomicBool::new(false),
            }),
        })
    }

    /// Append an event to the dispatch queue
    pub fn push_event<F>(&self, event: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.dispatch.push_back(DispatchEvent::new(event));
    }

    /// Insert an event ahead of everything queued.
    ///
    /// Among several next-tick pushes the most recent runs first.
    pub fn push_next_tick<F>(&self, event: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.dispatch.push_front(DispatchEvent::new(event));
    }

    /// Queue `callback` on the dispatch queue once `delay` has elapsed
    pub fn set_timeout<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let dispatch = self.inner.dispatch.clone();
        let mut callback = Some(callback);
        self.inner.timers.schedule(to_millis(delay), false, move || {
            if let Some(callback) = callback.take() {
                dispatch.push_back(DispatchEvent::new(callback));
            }
        })
    }

    /// Queue `callback` on the dispatch queue every `interval`.
    ///
    /// At most one invocation is queued at a time: firings that fall due
    /// while one is still waiting on the dispatch queue collapse into it. A
    /// queued invocation is skipped once the timer has been cancelled.
    pub fn set_interval<F>(&self, interval: Duration, callback: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let dispatch = self.inner.dispatch.clone();
        let callback = Arc::new(Mutex::new(callback));
        let queued = Arc::new(AtomicBool::new(false));
        let timer: Arc<OnceLock<TimerHandle>> = Arc::new(OnceLock::new());

        let slot = timer.clone();
        let handle = self.inner.timers.schedule(to_millis(interval), true, move || {
            if queued.swap(true, Ordering::AcqRel) {
                return;
            }
            let callback = callback.clone();
            let queued = queued.clone();
            let slot = slot.clone();
            dispatch.push_back(DispatchEvent::new(move || {
                queued.store(false, Ordering::Release);
                if slot.get().is_some_and(|handle| !handle.is_pending()) {
                    return;
                }
                let mut callback = callback.lock();
                (*callback)();
            }));
        });
        let _ = timer.set(handle.clone());
        handle
    }

    /// Run `task` on the worker pool
    pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
        self.inner.pool.put(task)
    }

    /// Bind `func` to this loop; see [`AsyncHandle`]
    pub fn async_fn<A, R, F>(&self, func: F) -> AsyncHandle<A, R>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        AsyncHandle::new(self.clone(), Arc::new(func))
    }

    /// True while the pool is busy, an event is queued, or a timer is pending.
    ///
    /// The pool is consulted first: a worker pushes its completion event
    /// before it stops counting as busy.
    pub fn has_pending_work(&self) -> bool {
        self.inner.pool.busy() || !self.inner.dispatch.is_empty() || !self.inner.timers.empty()
    }

    /// One cycle without the termination check or sleep: tick the timers,
    /// then run the front dispatch event. Returns whether an event ran.
    pub fn turn(&self) -> Result<bool, LoopError> {
        self.inner.timers.tick(self.inner.clock.now_ms());

        let Some(event) = self.inner.dispatch.pop_front() else {
            return Ok(false);
        };

        match event.kind {
            EventKind::Run(body) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
                    let error = TaskError::from_panic(payload);
                    tracing::error!(%error, "dispatch event panicked");
                }
                Ok(true)
            }
            EventKind::Fault(error) => Err(LoopError::Unhandled(error)),
        }
    }

    /// Poll until `stop` returns true or no work remains.
    ///
    /// Returns an error if an unhandled async failure reaches the loop, or
    /// if the loop is already running on another thread.
    pub fn run<P>(&self, poll_interval: Duration, mut stop: P) -> Result<(), LoopError>
    where
        P: FnMut() -> bool,
    {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LoopError::AlreadyRunning);
        }
        let _guard = RunGuard(&self.inner.running);

        loop {
            if stop() {
                tracing::debug!("event loop stopped by predicate");
                return Ok(());
            }
            if !self.has_pending_work() {
                tracing::debug!("event loop idle, exiting");
                return Ok(());
            }

            self.turn()?;

            if !poll_interval.is_zero() {
                thread::sleep(poll_interval);
            }
        }
    }

    /// Run with the configured poll interval until no work remains
    pub fn run_until_idle(&self) -> Result<(), LoopError> {
        self.run(self.inner.poll_interval, || false)
    }

    /// Configured poll interval
    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Current loop time in ms
    pub fn now_ms(&self) -> u64 {
        self.inner.clock.now_ms()
    }

    /// Number of queued dispatch events
    pub fn pending_events(&self) -> usize {
        self.inner.dispatch.len()
    }

    /// The loop's worker pool
    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    /// The loop's timer wheel
    pub fn timers(&self) -> &Arc<TimerWheel> {
        &self.inner.timers
    }

    pub(crate) fn dispatch_queue(&self) -> Arc<DispatchQueue> {
        self.inner.dispatch.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn manual_loop(workers: usize) -> (EventLoop, ManualClock) {
        let clock = ManualClock::new(0);
        let config = LoopConfig::default().with_workers(workers);
        let event_loop = EventLoop::with_clock(&config, Arc::new(clock.clone())).unwrap();
        (event_loop, clock)
    }

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_idle_loop_exits_immediately() {
        let (event_loop, _) = manual_loop(1);
        assert!(!event_loop.has_pending_work());
        event_loop.run(Duration::ZERO, || false).unwrap();
    }

    #[test]
    fn test_fifo_and_next_tick_order() {
        let (event_loop, _) = manual_loop(1);
        let log = recorder();

        for name in ["a", "b"] {
            let log = log.clone();
            event_loop.push_event(move || log.lock().push(name));
        }
        for name in ["n1", "n2"] {
            let log = log.clone();
            event_loop.push_next_tick(move || log.lock().push(name));
        }

        event_loop.run(Duration::ZERO, || false).unwrap();
        assert_eq!(*log.lock(), vec!["n2", "n1", "a", "b"]);
    }

    #[test]
    fn test_next_tick_then_event() {
        let (event_loop, _) = manual_loop(1);
        let log = recorder();

        let e = log.clone();
        event_loop.push_next_tick(move || e.lock().push("e"));
        let f = log.clone();
        event_loop.push_event(move || f.lock().push("f"));

        event_loop.run(Duration::ZERO, || false).unwrap();
        assert_eq!(*log.lock(), vec!["e", "f"]);
    }

    #[test]
    fn test_one_event_per_turn() {
        let (event_loop, _) = manual_loop(1);
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let count = count.clone();
            event_loop.push_event(move || {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(event_loop.turn().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(event_loop.pending_events(), 2);
    }

    #[test]
    fn test_timeout_is_queued_not_run_in_tick() {
        let (event_loop, clock) = manual_loop(1);
        let count = Arc::new(AtomicUsize::new(0));

        let inner = count.clone();
        event_loop.set_timeout(Duration::from_millis(10), move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        clock.set(10);
        event_loop.timers().tick(clock.now_ms());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(event_loop.pending_events(), 1);
        assert!(event_loop.timers().empty());

        assert!(event_loop.turn().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interval_until_cancelled() {
        let (event_loop, clock) = manual_loop(1);
        let count = Arc::new(AtomicUsize::new(0));

        let inner = count.clone();
        let handle = event_loop.set_interval(Duration::from_millis(5), move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        let cancel = handle.clone();
        let observed = count.clone();
        event_loop
            .run(Duration::ZERO, move || {
                if observed.load(Ordering::SeqCst) >= 3 {
                    cancel.cancel();
                }
                clock.advance(1);
                false
            })
            .unwrap();

        assert!(count.load(Ordering::SeqCst) >= 3);
        assert!(!handle.is_pending());
    }

    #[test]
    fn test_fast_interval_does_not_flood_dispatch_queue() {
        let event_loop = EventLoop::new(&LoopConfig::default().with_workers(1)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));

        let inner = count.clone();
        let handle = event_loop.set_interval(Duration::from_millis(1), move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        let mut cycles = 0;
        let mut backlog = 0;
        let observer = event_loop.clone();
        event_loop
            .run(Duration::from_millis(6), || {
                backlog = backlog.max(observer.pending_events());
                cycles += 1;
                cycles > 100
            })
            .unwrap();

        assert!(backlog <= 1, "backlog grew to {}", backlog);
        assert!(count.load(Ordering::SeqCst) > 0);

        assert!(handle.cancel());
        let after_cancel = count.load(Ordering::SeqCst);
        event_loop.run(Duration::from_millis(1), || false).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
        assert!(!event_loop.has_pending_work());
    }

    #[test]
    fn test_queued_interval_skipped_after_cancel() {
        let (event_loop, clock) = manual_loop(1);
        let count = Arc::new(AtomicUsize::new(0));

        let inner = count.clone();
        let handle = event_loop.set_interval(Duration::from_millis(10), move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        // three firings due at once collapse into one queued invocation
        clock.set(30);
        event_loop.timers().tick(clock.now_ms());
        assert_eq!(event_loop.pending_events(), 1);

        assert!(handle.cancel());
        assert!(event_loop.turn().unwrap());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_predicate_abandons_pending_work() {
        let (event_loop, _) = manual_loop(1);
        event_loop.set_timeout(Duration::from_secs(3600), || {});
        event_loop.push_event(|| {});

        let mut calls = 0;
        event_loop
            .run(Duration::ZERO, || {
                calls += 1;
                calls > 1
            })
            .unwrap();

        assert!(event_loop.has_pending_work());
        assert!(event_loop.timers().len() == 1);
    }

    #[test]
    fn test_panicking_event_is_contained() {
        let (event_loop, _) = manual_loop(1);
        let count = Arc::new(AtomicUsize::new(0));

        event_loop.push_event(|| panic!("bad event"));
        let inner = count.clone();
        event_loop.push_event(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });

        event_loop.run(Duration::ZERO, || false).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fault_event_ends_run() {
        let (event_loop, _) = manual_loop(1);
        event_loop
            .dispatch_queue()
            .push_back(DispatchEvent::fault(TaskError::Failed("lost".into())));
        event_loop.push_event(|| {});

        let err = event_loop.run(Duration::ZERO, || false).unwrap_err();
        assert!(matches!(err, LoopError::Unhandled(TaskError::Failed(ref m)) if m == "lost"));
        // loop can be resumed afterwards
        event_loop.run(Duration::ZERO, || false).unwrap();
        assert_eq!(event_loop.pending_events(), 0);
    }

    #[test]
    fn test_loop_waits_for_pool() {
        let (event_loop, _) = manual_loop(2);
        let count = Arc::new(AtomicUsize::new(0));

        let inner = count.clone();
        let dispatch = event_loop.clone();
        event_loop
            .submit(Box::new(move || {
                thread::sleep(Duration::from_millis(30));
                dispatch.push_event(move || {
                    inner.fetch_add(1, Ordering::SeqCst);
                });
            }))
            .unwrap();

        event_loop.run(Duration::from_millis(1), || false).unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_run_is_rejected() {
        let (event_loop, _) = manual_loop(1);
        event_loop.set_timeout(Duration::from_secs(3600), || {});

        let (tx, rx) = crossbeam::channel::bounded(1);
        let other = event_loop.clone();
        event_loop.push_event(move || {
            let _ = tx.send(other.run(Duration::ZERO, || true));
        });

        let mut turns = 0;
        event_loop
            .run(Duration::ZERO, || {
                turns += 1;
                turns > 2
            })
            .unwrap();

        let nested = rx.try_recv().unwrap();
        assert!(matches!(nested, Err(LoopError::AlreadyRunning)));
    }
}
