//! Process-wide default event loop and interrupt flag.
//!
//! The default loop is built from [`LoopConfig::default`] on first access
//! and lives until the process exits; there is no teardown. Applications
//! that want control over configuration should build their own
//! [`EventLoop`] at the composition root and pass it down instead.
//!
//! [`install_interrupt_handler`] routes SIGINT to a process-wide flag that
//! [`run_global`] uses as its stop predicate.

use crate::async_fn::AsyncHandle;
use crate::config::LoopConfig;
use crate::error::{LoopError, SubmitError};
use crate::event_loop::EventLoop;
use crate::scheduler::TimerHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

static DEFAULT_LOOP: OnceLock<EventLoop> = OnceLock::new();
static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static HANDLER_INSTALLED: OnceLock<bool> = OnceLock::new();

impl EventLoop {
    /// The process-wide default loop, created on first call.
    ///
    /// Fails if its worker threads cannot be spawned; a later call tries again.
    pub fn try_global() -> Result<&'static EventLoop, LoopError> {
        if let Some(event_loop) = DEFAULT_LOOP.get() {
            return Ok(event_loop);
        }
        tracing::debug!("creating default event loop");
        let created = EventLoop::new(&LoopConfig::default())?;
        // a racing initializer may have won; its loop is kept and ours dropped
        Ok(DEFAULT_LOOP.get_or_init(move || created))
    }

    /// [`try_global`](Self::try_global) for callers that cannot recover.
    ///
    /// Panics if the default loop's worker threads cannot be spawned.
    pub fn global() -> &'static EventLoop {
        match Self::try_global() {
            Ok(event_loop) => event_loop,
            Err(error) => panic!("failed to start the default event loop: {error}"),
        }
    }
}

#[cfg(unix)]
extern "C" fn on_interrupt(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Route SIGINT to the interrupt flag. Installs at most once; returns
/// whether a handler is in place.
pub fn install_interrupt_handler() -> bool {
    *HANDLER_INSTALLED.get_or_init(|| {
        #[cfg(unix)]
        {
            let handler = on_interrupt as extern "C" fn(libc::c_int);
            // SAFETY: the handler only performs an atomic store
            let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
            previous != libc::SIG_ERR
        }
        #[cfg(not(unix))]
        {
            false
        }
    })
}

/// True once an interrupt has been received or requested
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Raise the interrupt flag by hand
pub fn request_interrupt() {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler and run the default loop until it is idle or
/// interrupted
pub fn run_global() -> Result<(), LoopError> {
    if !install_interrupt_handler() {
        tracing::warn!("interrupt handler unavailable; loop stops only when idle");
    }
    let event_loop = EventLoop::try_global()?;
    event_loop.run(event_loop.poll_interval(), interrupted)
}

/// [`EventLoop::set_timeout`] on the default loop
pub fn set_timeout<F>(delay: Duration, callback: F) -> TimerHandle
where
    F: FnOnce() + Send + 'static,
{
    EventLoop::global().set_timeout(delay, callback)
}

/// [`EventLoop::set_interval`] on the default loop
pub fn set_interval<F>(interval: Duration, callback: F) -> TimerHandle
where
    F: FnMut() + Send + 'static,
{
    EventLoop::global().set_interval(interval, callback)
}

/// [`EventLoop::async_fn`] on the default loop
pub fn async_fn<A, R, F>(func: F) -> AsyncHandle<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
    F: Fn(A) -> R + Send + Sync + 'static,
{
    EventLoop::global().async_fn(func)
}

/// Queue `event` on the default loop
pub fn push_event<F>(event: F)
where
    F: FnOnce() + Send + 'static,
{
    EventLoop::global().push_event(event)
}

/// Run `task` on the default loop's pool
pub fn spawn<F>(task: F) -> Result<(), SubmitError>
where
    F: FnOnce() + Send + 'static,
{
    EventLoop::global().submit(Box::new(task))
}
