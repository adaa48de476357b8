//! Bounded worker pool for per-sample work.
//!
//! Jobs are sample indices; every worker runs its forward passes on a
//! private clone of the network and partial results are merged with a
//! commutative reduce.

use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::thread;

/// Share of the hardware threads the pool uses by default
pub const DEFAULT_CPU_SHARE: f64 = 0.8;

/// A dedicated rayon pool
pub struct WorkerPool {
    pool: ThreadPool,
    workers: usize,
}

impl WorkerPool {
    /// Pool with `workers` threads, or 80% of the hardware threads if `None`
    pub fn new(workers: Option<usize>) -> Result<Self, ThreadPoolBuildError> {
        let workers = workers.unwrap_or_else(Self::default_worker_count).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("phasegraph-worker-{}", i))
            .build()?;
        log::debug!("Worker pool started with {} threads", workers);
        Ok(Self { pool, workers })
    }

    /// `max(1, floor(0.8 * available_parallelism))`
    pub fn default_worker_count() -> usize {
        let cores = thread::available_parallelism().map_or(1, |n| n.get());
        ((cores as f64 * DEFAULT_CPU_SHARE) as usize).max(1)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run `op` inside the pool; rayon parallel iterators used by `op`
    /// are scheduled on this pool's threads
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("workers", &self.workers).finish()
    }
}
