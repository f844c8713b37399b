//! Execution backends: worker identity, the intra-worker thread pool and
//! cross-worker collective reductions.
//!
//! The solver and generator are written against a single trait; backends
//! differ only in how they execute the primitives. A single-worker backend
//! turns every collective into an identity, so the solver's one code path
//! also covers the serial and no-threading configurations.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to build worker thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Handle to an in-flight non-blocking sum reduction.
pub trait PendingReduction {
    /// Complete the reduction and return the summed value.
    fn wait(self) -> f64;
}

pub trait ExecutionBackend {
    type Pending: PendingReduction;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn num_threads(&self) -> usize;

    /// Run `op` inside this worker's thread pool so the data-parallel
    /// kernels it calls use the configured execution units.
    fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send;

    /// Blocking sum reduction over all workers. Partial values are combined
    /// in rank order, so every worker observes the identical result.
    fn allreduce_sum(&self, value: f64) -> f64;

    fn allreduce_sum_u64(&self, value: u64) -> u64;

    /// Logical-and over all workers, used to agree on fatal conditions
    /// before any worker bails out.
    fn allreduce_and(&self, value: bool) -> bool;

    /// Begin a non-blocking sum reduction. At most one may be outstanding
    /// per worker; complete it with [`PendingReduction::wait`].
    fn allreduce_sum_start(&self, value: f64) -> Self::Pending;
}

/// Already-completed reduction, returned by single-worker backends.
pub struct ReadySum(pub f64);

impl PendingReduction for ReadySum {
    fn wait(self) -> f64 {
        self.0
    }
}

/// Single-worker backend. Collectives are identities; intra-worker
/// parallelism comes from a dedicated rayon pool, and a pool of one thread
/// is the no-threading configuration.
pub struct SingleWorker {
    pool: rayon::ThreadPool,
    threads: usize,
}

impl SingleWorker {
    pub fn new(threads: usize) -> Result<Self, BackendError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        Ok(Self { pool, threads })
    }
}

impl ExecutionBackend for SingleWorker {
    type Pending = ReadySum;

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn num_threads(&self) -> usize {
        self.threads
    }

    fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }

    fn allreduce_sum(&self, value: f64) -> f64 {
        value
    }

    fn allreduce_sum_u64(&self, value: u64) -> u64 {
        value
    }

    fn allreduce_and(&self, value: bool) -> bool {
        value
    }

    fn allreduce_sum_start(&self, value: f64) -> ReadySum {
        ReadySum(value)
    }
}
