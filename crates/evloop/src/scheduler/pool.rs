//! Fixed-size worker pool
//!
//! Workers block on a shared task queue and run tasks until they pop a
//! stop sentinel. `stop()` queues one sentinel per worker behind any pending
//! work, so already-queued tasks drain before the threads exit.

use crate::error::{PoolError, SubmitError, TaskError};
use crate::scheduler::queue::{Task, WorkQueue};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Tasks that ran to completion
    pub executed: u64,

    /// Tasks whose body panicked
    pub panicked: u64,
}

struct PoolShared {
    queue: WorkQueue,
    executed: AtomicU64,
    panicked: AtomicU64,
    /// Workers that have left their run loop
    exited: Mutex<usize>,
    all_exited: Condvar,
}

/// Counts a worker as exited when its run loop returns, even by panic
struct ExitGuard<'a>(&'a PoolShared);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        *self.0.exited.lock() += 1;
        self.0.all_exited.notify_all();
    }
}

/// Fixed set of worker threads pulling from one shared FIFO.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    worker_ids: Vec<ThreadId>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn `worker_count` workers.
    pub fn new(worker_count: usize) -> Result<Self, PoolError> {
        if worker_count == 0 {
            return Err(PoolError::NoWorkers);
        }

        let shared = Arc::new(PoolShared {
            queue: WorkQueue::new(),
            executed: AtomicU64::new(0),
            panicked: AtomicU64::new(0),
            exited: Mutex::new(0),
            all_exited: Condvar::new(),
        });

        let mut pool = Self {
            shared,
            handles: Mutex::new(Vec::with_capacity(worker_count)),
            worker_ids: Vec::with_capacity(worker_count),
            worker_count,
        };

        for id in 0..worker_count {
            let shared = pool.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("evloop-worker-{}", id))
                .spawn(move || Self::run_loop(id, shared));

            match spawned {
                Ok(handle) => {
                    pool.worker_ids.push(handle.thread().id());
                    pool.handles.lock().push(handle);
                }
                Err(e) => {
                    // Dropping `pool` retires the workers already started
                    pool.worker_count = id;
                    return Err(PoolError::Spawn(e));
                }
            }
        }

        tracing::debug!(workers = worker_count, "worker pool started");
        Ok(pool)
    }

    /// Submit a task. Never blocks.
    pub fn put(&self, task: Task) -> Result<(), SubmitError> {
        self.shared.queue.put(task)
    }

    /// True while any task is queued or running
    pub fn busy(&self) -> bool {
        self.shared.queue.busy()
    }

    /// Number of tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Number of worker threads
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// True once `stop()` has been requested
    pub fn is_stopping(&self) -> bool {
        self.shared.queue.is_closed()
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            executed: self.shared.executed.load(Ordering::Acquire),
            panicked: self.shared.panicked.load(Ordering::Acquire),
        }
    }

    /// Stop accepting work, drain what is queued, and join the workers.
    ///
    /// Idempotent, and every caller returns only after all workers have
    /// exited. When called from one of the pool's own workers it only queues
    /// the stop signals and returns, since that worker cannot wait for itself.
    pub fn stop(&self) {
        if self.shared.queue.close_with_signals(self.worker_count) {
            tracing::debug!(workers = self.worker_count, "worker pool stopping");
        }

        if self.worker_ids.contains(&thread::current().id()) {
            return;
        }

        {
            let mut exited = self.shared.exited.lock();
            while *exited < self.worker_count {
                self.shared.all_exited.wait(&mut exited);
            }
        }

        let handles: Vec<_> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("worker thread terminated abnormally");
            }
        }
    }

    fn run_loop(id: usize, shared: Arc<PoolShared>) {
        let _exit = ExitGuard(&shared);
        tracing::debug!(worker = id, "worker started");

        loop {
            let entry = shared.queue.pop_blocking();
            let proceed = entry.proceed();

            match panic::catch_unwind(AssertUnwindSafe(entry.into_body())) {
                Ok(()) => {
                    if proceed {
                        shared.executed.fetch_add(1, Ordering::AcqRel);
                    }
                }
                Err(payload) => {
                    shared.panicked.fetch_add(1, Ordering::AcqRel);
                    let error = TaskError::from_panic(payload);
                    tracing::error!(worker = id, %error, "task failed on worker");
                }
            }

            shared.queue.finish();

            if !proceed {
                break;
            }
        }

        tracing::debug!(worker = id, "worker shutting down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}
