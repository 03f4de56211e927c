//! Bridge from blocking functions to the event loop
//!
//! An [`AsyncHandle`] binds a function to an [`EventLoop`]. Calls run the
//! function on the worker pool and deliver an [`Outcome`] back through the
//! loop's dispatch queue, so continuations always execute on the loop
//! thread. Each call delivers at most one outcome.

use crate::error::{SubmitError, TaskError};
use crate::event_loop::{DispatchEvent, EventLoop};
use crate::scheduler::TimerHandle;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Result of an asynchronous call as seen by its continuation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The function returned normally
    Success(T),

    /// The function panicked or returned an error
    Failure(TaskError),

    /// The call was never run (the pool was shutting down)
    Cancelled,

    /// No result arrived before the deadline
    TimedOut,
}

impl<T> Outcome<T> {
    /// True for `Success`
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The success value, if any
    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(value) => Some(value),
            _ => None,
        }
    }

    /// Map the success value
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Outcome<U> {
        match self {
            Outcome::Success(value) => Outcome::Success(f(value)),
            Outcome::Failure(error) => Outcome::Failure(error),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::TimedOut => Outcome::TimedOut,
        }
    }
}

impl<T, E: fmt::Display> Outcome<Result<T, E>> {
    /// Fold an `Err` return value into `Failure`
    pub fn flatten(self) -> Outcome<T> {
        match self {
            Outcome::Success(Ok(value)) => Outcome::Success(value),
            Outcome::Success(Err(error)) => Outcome::Failure(TaskError::Failed(error.to_string())),
            Outcome::Failure(error) => Outcome::Failure(error),
            Outcome::Cancelled => Outcome::Cancelled,
            Outcome::TimedOut => Outcome::TimedOut,
        }
    }
}

type Continuation<R> = Box<dyn FnOnce(Outcome<R>) + Send + 'static>;

/// One-shot slot holding a continuation; the first outcome delivered wins.
struct Delivery<R> {
    slot: Arc<Mutex<Option<Continuation<R>>>>,
}

impl<R> Clone for Delivery<R> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
        }
    }
}

impl<R> Delivery<R> {
    fn new<C>(continuation: C) -> Self
    where
        C: FnOnce(Outcome<R>) + Send + 'static,
    {
        Self {
            slot: Arc::new(Mutex::new(Some(Box::new(continuation)))),
        }
    }

    fn deliver(&self, outcome: Outcome<R>) -> bool {
        let continuation = self.slot.lock().take();
        match continuation {
            Some(continuation) => {
                continuation(outcome);
                true
            }
            None => false,
        }
    }
}

/// A function bound to an event loop.
pub struct AsyncHandle<A, R> {
    event_loop: EventLoop,
    func: Arc<dyn Fn(A) -> R + Send + Sync + 'static>,
}

impl<A, R> Clone for AsyncHandle<A, R> {
    fn clone(&self) -> Self {
        Self {
            event_loop: self.event_loop.clone(),
            func: self.func.clone(),
        }
    }
}

impl<A, R> AsyncHandle<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(event_loop: EventLoop, func: Arc<dyn Fn(A) -> R + Send + Sync + 'static>) -> Self {
        Self { event_loop, func }
    }

    /// Run on the pool and discard the result.
    ///
    /// A panic has no handler here, so it reaches the loop as
    /// [`LoopError::Unhandled`](crate::LoopError::Unhandled).
    pub fn spawn(&self, args: A) -> Result<(), SubmitError> {
        let func = self.func.clone();
        let dispatch = self.event_loop.dispatch_queue();
        self.event_loop.submit(Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| func(args))) {
                dispatch.push_back(DispatchEvent::fault(TaskError::from_panic(payload)));
            }
        }))
    }

    /// Run on the pool and hand the outcome to `continuation` on the loop thread
    pub fn call<C>(&self, args: A, continuation: C)
    where
        C: FnOnce(Outcome<R>) + Send + 'static,
    {
        self.submit_with(args, Delivery::new(continuation));
    }

    /// Like [`call`](Self::call), but delivers `TimedOut` if the result has
    /// not reached the loop within `timeout`. A late result is dropped.
    pub fn call_with_timeout<C>(&self, args: A, timeout: Duration, continuation: C)
    where
        C: FnOnce(Outcome<R>) + Send + 'static,
    {
        let timer: Arc<Mutex<Option<TimerHandle>>> = Arc::new(Mutex::new(None));

        let pending = timer.clone();
        let delivery = Delivery::new(move |outcome| {
            if let Some(handle) = pending.lock().take() {
                handle.cancel();
            }
            continuation(outcome);
        });

        let expired = delivery.clone();
        let handle = self.event_loop.set_timeout(timeout, move || {
            expired.deliver(Outcome::TimedOut);
        });
        *timer.lock() = Some(handle);

        self.submit_with(args, delivery);
    }

    /// Run on the pool and pass a successful result to `on_success`.
    ///
    /// A failure has no handler, so it is escalated to the loop as
    /// [`LoopError::Unhandled`](crate::LoopError::Unhandled).
    pub fn then<C>(&self, args: A, on_success: C)
    where
        C: FnOnce(R) + Send + 'static,
    {
        let dispatch = self.event_loop.dispatch_queue();
        self.call(args, move |outcome| match outcome {
            Outcome::Success(value) => on_success(value),
            Outcome::Failure(error) => dispatch.push_front(DispatchEvent::fault(error)),
            Outcome::Cancelled | Outcome::TimedOut => {
                tracing::debug!("async call dropped without a result");
            }
        });
    }

    /// Call the function directly on this thread, bypassing pool and loop
    pub fn sync(&self, args: A) -> R {
        (self.func)(args)
    }

    fn submit_with(&self, args: A, delivery: Delivery<R>) {
        let func = self.func.clone();
        let dispatch = self.event_loop.dispatch_queue();
        let completion = delivery.clone();

        let submitted = self.event_loop.submit(Box::new(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(|| func(args))) {
                Ok(value) => Outcome::Success(value),
                Err(payload) => Outcome::Failure(TaskError::from_panic(payload)),
            };
            dispatch.push_back(DispatchEvent::new(move || {
                completion.deliver(outcome);
            }));
        }));

        if submitted.is_err() {
            self.event_loop.push_event(move || {
                delivery.deliver(Outcome::Cancelled);
            });
        }
    }
}

impl<A, T, E> AsyncHandle<A, Result<T, E>>
where
    A: Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// [`call`](Self::call) for fallible functions: an `Err` is delivered as
    /// `Outcome::Failure(TaskError::Failed(..))`
    pub fn try_call<C>(&self, args: A, continuation: C)
    where
        C: FnOnce(Outcome<T>) + Send + 'static,
    {
        self.call(args, move |outcome| continuation(outcome.flatten()));
    }
}
