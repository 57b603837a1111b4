use anyhow::{Context, Result};
use std::convert::Infallible;
use std::sync::Arc;

use crate::error::Failure;
use crate::task::{guarded, Task};

/// The process-wide set of worker threads tasks run on.
///
/// Build it once at startup and hand clones to whoever needs to submit
/// work. The threads exit when the last clone is dropped.
///
/// The pool has a fixed size. A job that blocks on [`Task::wait`] holds its
/// worker until the awaited task settles, so enough of those can starve the
/// pool.
#[derive(Clone)]
pub struct WorkerPool {
    pool: Arc<rayon::ThreadPool>,
}

impl WorkerPool {
    /// Create a pool with `threads` workers (0 picks one per CPU)
    pub fn new(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|index| format!("geofuture-worker-{}", index))
            .panic_handler(|payload| {
                log::error!("Worker job panicked: {}", Failure::from_panic(payload));
            })
            .build()
            .context("Failed to build worker pool")?;

        log::debug!(
            "Started worker pool with {} threads",
            pool.current_num_threads()
        );

        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Submit a raw job with no task attached
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.pool.spawn(job);
    }

    /// Run `f` on a worker; the task fails if `f` returns an error or panics
    pub fn try_supply_async<T, E, F>(&self, f: F) -> Task<T>
    where
        T: Clone + Send + 'static,
        E: Into<anyhow::Error>,
        F: FnOnce() -> Result<T, E> + Send + 'static,
    {
        let task = Task::pending();
        let sink = task.clone();
        self.pool.spawn(move || {
            let outcome = guarded(f).and_then(|result| result.map_err(Failure::new));
            sink.settle(outcome);
        });
        task
    }

    /// Run `f` on a worker and complete with its return value
    pub fn supply_async<T, F>(&self, f: F) -> Task<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.try_supply_async(move || Ok::<T, Infallible>(f()))
    }

    /// Run `f` on a worker for its side effects
    pub fn run_async<F>(&self, f: F) -> Task<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.supply_async(f)
    }

    /// Release this handle. Workers finish their queued jobs and exit once
    /// no other clone is alive.
    pub fn shutdown(self) {
        let others = Arc::strong_count(&self.pool) - 1;
        if others > 0 {
            log::debug!("Worker pool handle released, {} still alive", others);
        } else {
            log::debug!("Shutting down worker pool");
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("threads", &self.threads())
            .finish()
    }
}
