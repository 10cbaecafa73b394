use crossbeam_channel as channel;
use once_cell::sync::Lazy;

use crate::error::{Error, Result};

/// Number of worker threads used when none is configured: the available parallelism.
pub static DEFAULT_NTHREADS: Lazy<usize> = Lazy::new(|| {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
});

/// A fixed number of worker threads that session tasks are fanned out to.
///
/// The pool is only a handle; threads are scoped to each [`execute`](WorkerPool::execute) call
/// so that tasks may borrow from the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerPool {
    nthreads: usize,
}

impl Default for WorkerPool {
    fn default() -> Self {
        WorkerPool::new(*DEFAULT_NTHREADS)
    }
}

impl WorkerPool {
    /// A pool of `nthreads` workers; zero is treated as one.
    pub fn new(nthreads: usize) -> Self {
        WorkerPool {
            nthreads: nthreads.max(1),
        }
    }

    /// Number of worker threads.
    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Runs `f` on every job and returns the results in job order.
    ///
    /// Blocks until every job has finished. With a single worker (or a single job) everything
    /// runs on the calling thread.
    pub fn execute<T, R, F>(&self, jobs: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(T) -> R + Sync,
    {
        let njobs = jobs.len();
        let nthreads = self.nthreads.min(njobs);
        if nthreads <= 1 {
            return Ok(jobs.into_iter().map(f).collect());
        }

        let (tx_input, rx_input) = channel::bounded::<(usize, T)>(2 * nthreads);
        let (tx_output, rx_output) = channel::unbounded::<(usize, R)>();
        let f = &f;

        let scoped = crossbeam_utils::thread::scope(|scope| {
            for _ in 0..nthreads {
                let rx_input = rx_input.clone();
                let tx_output = tx_output.clone();
                scope.spawn(move |_| {
                    for (index, job) in rx_input.iter() {
                        // The receiver outlives every worker.
                        let _ = tx_output.send((index, f(job)));
                    }
                });
            }
            drop(rx_input);
            drop(tx_output);

            for job in jobs.into_iter().enumerate() {
                // Fails only if every worker has died, which the scope reports below.
                if tx_input.send(job).is_err() {
                    break;
                }
            }
            drop(tx_input);

            let mut results: Vec<Option<R>> = (0..njobs).map(|_| None).collect();
            for (index, result) in rx_output.iter() {
                results[index] = Some(result);
            }
            results
        });

        let results = scoped.map_err(|_| Error::Processing("a worker thread panicked".into()))?;
        results
            .into_iter()
            .enumerate()
            .map(|(index, r)| {
                r.ok_or_else(|| Error::Processing(format!("job {} produced no result", index)))
            })
            .collect()
    }
}
