//! Parallel loop facility
//!
//! A small pool for embarrassingly parallel per-scanline or per-tile work.
//! Loop invocations are fully sequentialized: at most one loop is in flight
//! through a pool at any time, so callers must not assume two submissions
//! overlap.

use parking_lot::Mutex;
use std::num::NonZeroUsize;

/// Loops shorter than this run inline on the calling thread
const MIN_PARALLEL_ITEMS: usize = 16;

/// Parallel loop executor
pub struct ThreadPool {
    num_threads: usize,
    /// Serializes loop execution
    loop_lock: Mutex<()>,
}

impl ThreadPool {
    /// Create a pool with `num_threads` workers (0 = one per available core)
    pub fn new(num_threads: usize) -> Self {
        let num_threads = if num_threads == 0 {
            std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        } else {
            num_threads
        };

        Self {
            num_threads,
            loop_lock: Mutex::new(()),
        }
    }

    /// Number of workers used per loop
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Run `work(start, end)` over `[lower, upper)` split into contiguous ranges.
    pub fn parallel_loop<F>(&self, lower: usize, upper: usize, work: F)
    where
        F: Fn(usize, usize) + Sync,
    {
        if upper <= lower {
            return;
        }

        let _guard = self.loop_lock.lock();
        let range = upper - lower;
        if self.num_threads <= 1 || range < MIN_PARALLEL_ITEMS {
            work(lower, upper);
            return;
        }

        let workers = self.num_threads.min(range);
        let chunk = range.div_ceil(workers);
        let work = &work;

        let result = crossbeam::thread::scope(|scope| {
            let mut start = lower;
            while start < upper {
                let end = (start + chunk).min(upper);
                scope.spawn(move |_| work(start, end));
                start = end;
            }
        });

        if result.is_err() {
            tracing::error!("parallel loop worker panicked ({}..{})", lower, upper);
        }
    }

    /// Run `work(first_row, rows)` over disjoint bands of `row_len`-sized rows.
    pub fn parallel_rows_mut<T, F>(&self, data: &mut [T], row_len: usize, work: F)
    where
        T: Send,
        F: Fn(usize, &mut [T]) + Sync,
    {
        if row_len == 0 || data.is_empty() {
            return;
        }

        let _guard = self.loop_lock.lock();
        let rows = data.len() / row_len;
        if self.num_threads <= 1 || rows < MIN_PARALLEL_ITEMS {
            work(0, data);
            return;
        }

        let rows_per_band = rows.div_ceil(self.num_threads.min(rows));
        let work = &work;

        let result = crossbeam::thread::scope(|scope| {
            for (band, chunk) in data.chunks_mut(rows_per_band * row_len).enumerate() {
                scope.spawn(move |_| work(band * rows_per_band, chunk));
            }
        });

        if result.is_err() {
            tracing::error!("parallel row worker panicked ({} rows)", rows);
        }
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new(0)
    }
}
