//! Timer wheel for one-shot and repeating callbacks
//!
//! Entries live in a map keyed by id plus an ordered index keyed by
//! `(expires_at, seq)`. Cancellation removes an entry from both at once, so
//! a cancelled timer never lingers until the next tick. The lock guards only
//! structural changes: callbacks run with it released, which lets a callback
//! schedule or cancel timers on the same wheel.

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use crate::error::panic_message;

/// Callback stored in the wheel
pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

/// Unique identifier of a scheduled timer
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerId(u64);

impl TimerId {
    /// Raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// A scheduled entry
struct Timeout {
    id: TimerId,
    expires_at: u64,
    interval: u64,
    repeating: bool,
    /// Tie-break for equal expiry: insertion order
    seq: u64,
    /// Taken out while the callback is running
    callback: Option<TimerCallback>,
}

impl Timeout {
    fn key(&self) -> (u64, u64, TimerId) {
        (self.expires_at, self.seq, self.id)
    }
}

struct WheelState {
    now: u64,
    next_id: u64,
    next_seq: u64,
    entries: FxHashMap<TimerId, Timeout>,
    order: BTreeSet<(u64, u64, TimerId)>,
}

impl WheelState {
    fn bump_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

/// Ordered collection of timed callbacks driven by [`tick`](Self::tick).
pub struct TimerWheel {
    state: Mutex<WheelState>,
}

impl TimerWheel {
    /// Create a wheel whose current time is `start_ms`
    pub fn new(start_ms: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WheelState {
                now: start_ms,
                next_id: 0,
                next_seq: 0,
                entries: FxHashMap::default(),
                order: BTreeSet::new(),
            }),
        })
    }

    /// Schedule `callback` to fire `delay` ms after the wheel's current time.
    ///
    /// Repeating entries fire every `delay` ms thereafter (a zero interval is
    /// treated as 1 ms).
    pub fn schedule<F>(self: &Arc<Self>, delay: u64, repeating: bool, callback: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.state.lock();

        let id = TimerId(state.next_id);
        state.next_id += 1;
        let seq = state.bump_seq();

        let interval = if repeating { delay.max(1) } else { delay };
        let entry = Timeout {
            id,
            expires_at: state.now.saturating_add(delay),
            interval,
            repeating,
            seq,
            callback: Some(Box::new(callback)),
        };
        state.order.insert(entry.key());
        state.entries.insert(id, entry);

        TimerHandle {
            id,
            wheel: Arc::downgrade(self),
        }
    }

    /// Advance to `now` and fire every entry due at or before it, earliest first.
    ///
    /// Time never moves backwards; an older `now` fires against the current
    /// time. Returns the number of callbacks invoked.
    pub fn tick(&self, now: u64) -> usize {
        let now = {
            let mut state = self.state.lock();
            state.now = state.now.max(now);
            state.now
        };

        let mut fired = 0;
        loop {
            let (id, repeating, mut callback) = {
                let mut state = self.state.lock();
                let Some(&key) = state.order.first() else {
                    break;
                };
                let (expires_at, _, id) = key;
                if expires_at > now {
                    break;
                }
                state.order.remove(&key);

                let repeating = match state.entries.get(&id) {
                    Some(entry) => entry.repeating,
                    None => continue,
                };
                let callback = if repeating {
                    state.entries.get_mut(&id).and_then(|e| e.callback.take())
                } else {
                    state.entries.remove(&id).and_then(|e| e.callback)
                };
                match callback {
                    Some(callback) => (id, repeating, callback),
                    None => continue,
                }
            };

            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                tracing::warn!(
                    timer = id.as_u64(),
                    error = %panic_message(payload.as_ref()),
                    "timer callback panicked"
                );
            }
            fired += 1;

            if repeating {
                let mut state = self.state.lock();
                let seq = state.bump_seq();
                if let Some(entry) = state.entries.get_mut(&id) {
                    entry.expires_at = entry.expires_at.saturating_add(entry.interval);
                    entry.seq = seq;
                    entry.callback = Some(callback);
                    let key = entry.key();
                    state.order.insert(key);
                } else {
                    // cancelled from inside its own callback
                    drop(state);
                    drop(callback);
                }
            }
        }

        fired
    }

    /// Cancel a timer. Unknown or already-fired ids are a no-op.
    pub fn cancel(&self, id: TimerId) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.entries.remove(&id);
            if let Some(entry) = &removed {
                state.order.remove(&entry.key());
            }
            removed
        };
        // drop the callback outside the lock
        removed.is_some()
    }

    /// True when no timers remain
    pub fn empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Number of pending timers
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// The wheel's current time
    pub fn now(&self) -> u64 {
        self.state.lock().now
    }

    /// Earliest pending expiry, if any
    pub fn next_expiry(&self) -> Option<u64> {
        self.state.lock().order.first().map(|&(expires_at, _, _)| expires_at)
    }

    /// Expiry of a pending timer
    pub fn expires_at(&self, id: TimerId) -> Option<u64> {
        self.state.lock().entries.get(&id).map(|e| e.expires_at)
    }

    /// Whether `id` is still scheduled
    pub fn contains(&self, id: TimerId) -> bool {
        self.state.lock().entries.contains_key(&id)
    }
}

/// Handle to a scheduled timer; cancels by id through a weak back-pointer.
#[derive(Clone)]
pub struct TimerHandle {
    id: TimerId,
    wheel: Weak<TimerWheel>,
}

impl TimerHandle {
    /// Id of the timer
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Cancel the timer. Returns `false` if it had already fired, been
    /// cancelled, or the wheel is gone.
    pub fn cancel(&self) -> bool {
        match self.wheel.upgrade() {
            Some(wheel) => wheel.cancel(self.id),
            None => false,
        }
    }

    /// Whether the timer is still scheduled
    pub fn is_pending(&self) -> bool {
        self.wheel
            .upgrade()
            .map(|wheel| wheel.contains(self.id))
            .unwrap_or(false)
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle").field("id", &self.id).finish()
    }
}
