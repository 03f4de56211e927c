//! Evloop
//!
//! A cooperative event loop with a fixed worker pool and a timer wheel:
//! - **Scheduler**: task queue, worker pool, timer wheel and clocks (`scheduler` module)
//! - **EventLoop**: single-threaded dispatch of events and timer callbacks
//! - **AsyncHandle**: run a function on the pool, deliver its outcome on the loop
//! - **Global**: lazily created process-wide loop and SIGINT flag (`global` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use evloop::{EventLoop, LoopConfig, Outcome};
//! use std::time::Duration;
//!
//! let event_loop = EventLoop::new(&LoopConfig::default())?;
//! let fib = event_loop.async_fn(|n: u64| (1..=n).product::<u64>());
//! fib.call(10, |outcome| {
//!     if let Outcome::Success(value) = outcome {
//!         println!("10! = {value}");
//!     }
//! });
//! event_loop.set_timeout(Duration::from_millis(50), || println!("tick"));
//! event_loop.run_until_idle()?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Worker pool, task queue, timers and clocks
pub mod scheduler;

mod async_fn;
mod config;
mod error;
mod event_loop;

/// Process-wide default loop
pub mod global;

pub use async_fn::{AsyncHandle, Outcome};
pub use config::{LoopConfig, DEFAULT_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS};
pub use error::{ConfigError, LoopError, PoolError, SubmitError, TaskError};
pub use event_loop::EventLoop;
pub use scheduler::{Clock, ManualClock, MonotonicClock, TimerHandle, TimerId, WorkerPool};
