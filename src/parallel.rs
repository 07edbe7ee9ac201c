//! Data-parallel maps over particle slots.
//!
//! Every phase of both engines is a barrier: a closure runs once for each
//! slot index, all of them finish, and only then does the next phase start.
//! Mutable per-slot state is handed out as `&mut` elements of a slice, so two
//! workers can never reach the same slot.

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

/// A bounded pool of workers for slot-parallel phases.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// Build a pool with at most `worker_budget` threads. A budget of zero
    /// lets rayon pick the number of threads.
    pub fn new(worker_budget: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(worker_budget)
            .thread_name(|i| format!("anneal-worker-{}", i))
            .build()
            .context("Could not start thread pool")?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `unit_of_work` for every index in `0..n`.
    ///
    /// Blocks until every index has completed or one of them failed. The
    /// first error observed is returned and the remaining work is abandoned.
    pub fn process<F>(&self, n: usize, unit_of_work: F) -> Result<()>
    where
        F: Fn(usize) -> Result<()> + Send + Sync,
    {
        self.pool
            .install(|| (0..n).into_par_iter().try_for_each(&unit_of_work))
    }

    /// Run `unit_of_work` with exclusive access to each slot.
    pub fn for_each_slot<T, F>(&self, slots: &mut [T], unit_of_work: F) -> Result<()>
    where
        T: Send,
        F: Fn(usize, &mut T) -> Result<()> + Send + Sync,
    {
        self.pool.install(|| {
            slots
                .par_iter_mut()
                .enumerate()
                .try_for_each(|(idx, slot)| unit_of_work(idx, slot))
        })
    }

    /// Compute one value per slot from shared read-only access.
    ///
    /// The output is in slot order regardless of scheduling.
    pub fn map_slots<T, U, F>(&self, slots: &[T], unit_of_work: F) -> Result<Vec<U>>
    where
        T: Sync,
        U: Send,
        F: Fn(usize, &T) -> Result<U> + Send + Sync,
    {
        self.pool.install(|| {
            slots
                .par_iter()
                .enumerate()
                .map(|(idx, slot)| unit_of_work(idx, slot))
                .collect()
        })
    }
}

/// Run `unit_of_work` once for each index in `0..n` on a fresh pool of at
/// most `worker_budget` threads.
///
/// Callers must make sure that distinct indices touch disjoint state.
pub fn process<F>(n: usize, worker_budget: usize, unit_of_work: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Send + Sync,
{
    WorkerPool::new(worker_budget)?.process(n, unit_of_work)
}

/// Stream reserved for the sequential decisions of an engine (resampling).
const MAIN_STREAM: u64 = u64::MAX;

/// The random stream used outside of parallel phases.
pub fn main_stream(seed: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(MAIN_STREAM);
    rng
}

/// One independent random stream per slot.
///
/// Streams belong to slots, not to worker threads, so a run is reproducible
/// for a fixed seed whatever the size of the pool.
pub fn slot_streams(seed: u64, n: usize) -> Vec<ChaCha8Rng> {
    (0..n)
        .map(|slot| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(slot as u64);
            rng
        })
        .collect()
}
