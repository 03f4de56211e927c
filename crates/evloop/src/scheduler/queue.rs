//! Blocking FIFO of tasks shared by the worker pool.
//!
//! Every entry is a [`SignalTask`]: ordinary submissions carry
//! `proceed = true`, shutdown sentinels carry a no-op body and
//! `proceed = false`. Shutdown therefore travels through the same queue and
//! condvar as normal work.

use crate::error::SubmitError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// A zero-argument unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task paired with a "keep running" flag for the worker that pops it.
pub(crate) struct SignalTask {
    body: Task,
    proceed: bool,
}

impl SignalTask {
    fn work(body: Task) -> Self {
        Self { body, proceed: true }
    }

    fn stop() -> Self {
        Self {
            body: Box::new(|| {}),
            proceed: false,
        }
    }

    /// Whether the worker should loop again after running this entry
    pub(crate) fn proceed(&self) -> bool {
        self.proceed
    }

    pub(crate) fn into_body(self) -> Task {
        self.body
    }
}

struct QueueState {
    entries: VecDeque<SignalTask>,
    /// Entries popped but not yet finished
    active: usize,
    closed: bool,
}

/// Thread-safe FIFO of tasks.
pub(crate) struct WorkQueue {
    state: Mutex<QueueState>,
    not_empty: Condvar,
}

impl WorkQueue {
    /// Create an empty, open queue
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                active: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
        }
    }

    /// Append a task and wake one waiting worker.
    ///
    /// Fails only once the queue has been closed for shutdown.
    pub(crate) fn put(&self, task: Task) -> Result<(), SubmitError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(SubmitError::ShuttingDown);
            }
            state.entries.push_back(SignalTask::work(task));
        }
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an entry is available and pop it.
    ///
    /// The active count is bumped under the same lock as the pop, so
    /// [`busy`](Self::busy) never sees the entry as neither queued nor running.
    pub(crate) fn pop_blocking(&self) -> SignalTask {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.entries.pop_front() {
                state.active += 1;
                return entry;
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Mark one popped entry as finished
    pub(crate) fn finish(&self) {
        let mut state = self.state.lock();
        state.active = state.active.saturating_sub(1);
    }

    /// True if an entry is queued or executing.
    ///
    /// Point-in-time answer; only suitable for "keep polling" decisions.
    pub(crate) fn busy(&self) -> bool {
        let state = self.state.lock();
        state.active > 0 || !state.entries.is_empty()
    }

    /// Number of queued (not yet popped) entries
    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True once [`close_with_signals`](Self::close_with_signals) has run
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Refuse further submissions and queue `count` stop sentinels behind
    /// everything already queued. Returns `false` if already closed.
    pub(crate) fn close_with_signals(&self, count: usize) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            for _ in 0..count {
                state.entries.push_back(SignalTask::stop());
            }
        }
        self.not_empty.notify_all();
        true
    }
}
