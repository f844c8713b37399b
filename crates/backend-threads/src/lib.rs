//! Multi-worker execution backend: N cooperating worker threads in one
//! process, with deterministic collective reductions and a channel-based
//! halo transport.
//!
//! Collectives run through a two-generation atomic slot ring: a worker
//! publishes its partial into the slot for (generation parity, rank), then
//! combines all published slots in rank order, so every worker observes the
//! identical result. Two generations are enough because collectives
//! complete in order and at most one non-blocking reduction is outstanding
//! at a time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;

use cgbench_core::backend::{BackendError, ExecutionBackend, PendingReduction};
use cgbench_core::geometry::GlobalIndex;

mod transport;

pub use transport::ChannelTransport;

#[cfg(test)]
mod _tests_lib;

/// One worker's view of the cluster: its backend and halo transport.
pub struct WorkerContext {
    pub backend: ThreadWorker,
    pub transport: ChannelTransport,
}

/// Spawn `workers` worker threads, hand each its context, and collect their
/// results in rank order. Every worker gets its own rayon pool of
/// `threads_per_worker` execution units.
pub fn run_workers<R, F>(
    workers: usize,
    threads_per_worker: usize,
    f: F,
) -> Result<Vec<R>, BackendError>
where
    R: Send,
    F: Fn(WorkerContext) -> R + Sync,
{
    let workers = workers.max(1);
    let ring = Arc::new(SlotRing::new(workers));

    // Full mesh of setup and data channels; worker `from` holds a sender
    // towards every peer, worker `to` holds a receiver from every peer.
    let mut setup_tx: Vec<Vec<mpsc::Sender<Vec<GlobalIndex>>>> =
        (0..workers).map(|_| Vec::with_capacity(workers)).collect();
    let mut data_tx: Vec<Vec<mpsc::Sender<Vec<f64>>>> =
        (0..workers).map(|_| Vec::with_capacity(workers)).collect();
    let mut setup_rx: Vec<Vec<mpsc::Receiver<Vec<GlobalIndex>>>> = Vec::with_capacity(workers);
    let mut data_rx: Vec<Vec<mpsc::Receiver<Vec<f64>>>> = Vec::with_capacity(workers);
    for _to in 0..workers {
        let mut setup_col = Vec::with_capacity(workers);
        let mut data_col = Vec::with_capacity(workers);
        for from in 0..workers {
            let (tx, rx) = mpsc::channel();
            setup_tx[from].push(tx);
            setup_col.push(rx);
            let (tx, rx) = mpsc::channel();
            data_tx[from].push(tx);
            data_col.push(rx);
        }
        setup_rx.push(setup_col);
        data_rx.push(data_col);
    }

    let mut contexts = Vec::with_capacity(workers);
    for (rank, (((setup_tx, setup_rx), data_tx), data_rx)) in setup_tx
        .into_iter()
        .zip(setup_rx)
        .zip(data_tx)
        .zip(data_rx)
        .enumerate()
    {
        let backend = ThreadWorker::new(rank, workers, threads_per_worker, Arc::clone(&ring))?;
        let transport =
            ChannelTransport::new(rank, workers, setup_tx, setup_rx, data_tx, data_rx);
        contexts.push(WorkerContext { backend, transport });
    }

    Ok(std::thread::scope(|scope| {
        let handles: Vec<_> = contexts
            .into_iter()
            .map(|context| scope.spawn(|| f(context)))
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread panicked"))
            .collect()
    }))
}

/// One worker of the in-process cluster.
pub struct ThreadWorker {
    rank: usize,
    size: usize,
    threads: usize,
    pool: rayon::ThreadPool,
    ring: Arc<SlotRing>,
    /// Id of the next collective; advances identically on every worker
    /// because all workers issue collectives in the same order.
    generation: AtomicU64,
}

impl ThreadWorker {
    fn new(
        rank: usize,
        size: usize,
        threads: usize,
        ring: Arc<SlotRing>,
    ) -> Result<Self, BackendError> {
        let threads = threads.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()?;
        Ok(Self {
            rank,
            size,
            threads,
            pool,
            ring,
            generation: AtomicU64::new(0),
        })
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl ExecutionBackend for ThreadWorker {
    type Pending = RingPending;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
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
        let generation = self.next_generation();
        self.ring.publish(self.rank, generation, value.to_bits());
        self.ring
            .collect(generation, 0.0, |acc, bits| acc + f64::from_bits(bits))
    }

    fn allreduce_sum_u64(&self, value: u64) -> u64 {
        let generation = self.next_generation();
        self.ring.publish(self.rank, generation, value);
        self.ring.collect(generation, 0u64, |acc, bits| acc + bits)
    }

    fn allreduce_and(&self, value: bool) -> bool {
        let generation = self.next_generation();
        self.ring.publish(self.rank, generation, u64::from(value));
        let agreeing = self.ring.collect(generation, 0u64, |acc, bits| acc + bits);
        agreeing == self.size as u64
    }

    fn allreduce_sum_start(&self, value: f64) -> RingPending {
        let generation = self.next_generation();
        self.ring.publish(self.rank, generation, value.to_bits());
        RingPending {
            ring: Arc::clone(&self.ring),
            generation,
        }
    }
}

/// In-flight sum reduction; the local partial is already published, peers
/// make progress independently, and `wait` combines once all have arrived.
pub struct RingPending {
    ring: Arc<SlotRing>,
    generation: u64,
}

impl PendingReduction for RingPending {
    fn wait(self) -> f64 {
        self.ring
            .collect(self.generation, 0.0, |acc, bits| acc + f64::from_bits(bits))
    }
}

struct SlotRing {
    size: usize,
    slots: Vec<AtomicU64>,
    stamps: Vec<AtomicU64>,
}

impl SlotRing {
    fn new(size: usize) -> Self {
        Self {
            size,
            slots: (0..2 * size).map(|_| AtomicU64::new(0)).collect(),
            stamps: (0..2 * size).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    fn publish(&self, rank: usize, generation: u64, bits: u64) {
        let index = (generation as usize % 2) * self.size + rank;
        self.slots[index].store(bits, Ordering::Relaxed);
        self.stamps[index].store(generation, Ordering::Release);
    }

    /// Combine all workers' slots for `generation` in rank order.
    fn collect<A>(&self, generation: u64, init: A, mut fold: impl FnMut(A, u64) -> A) -> A {
        let mut acc = init;
        for rank in 0..self.size {
            let index = (generation as usize % 2) * self.size + rank;
            let mut spins = 0u32;
            while self.stamps[index].load(Ordering::Acquire) < generation {
                spins = spins.wrapping_add(1);
                if spins % 1024 == 0 {
                    std::thread::yield_now();
                } else {
                    std::hint::spin_loop();
                }
            }
            acc = fold(acc, self.slots[index].load(Ordering::Relaxed));
        }
        acc
    }
}
