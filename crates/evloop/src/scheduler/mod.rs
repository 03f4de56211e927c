//! Worker pool, task queue, timers and clocks
//!
//! These are the building blocks the [`EventLoop`](crate::EventLoop)
//! coordinates. Each is usable on its own.

mod clock;
mod pool;
mod queue;
mod timer;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use pool::{PoolStats, WorkerPool};
pub use queue::Task;
pub use timer::{TimerCallback, TimerHandle, TimerId, TimerWheel};
