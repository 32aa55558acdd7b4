//! Reader Pool
//!
//! Worker threads that run packet reads off the update thread. Work items are
//! plain closures queued FIFO; each packet stream keeps at most one of its
//! reads in the queue at a time, so the pool needs no per-stream bookkeeping.
//!
//! A pool built with zero threads runs every job inline on the submitting
//! thread. Tests use that mode to get deterministic packet delivery.

use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Unit of work executed by a reader thread
pub type ReadJob = Box<dyn FnOnce() + Send + 'static>;

/// Shared state for reader pool
struct SharedPoolState {
    /// Pending jobs in submission order
    queue: Mutex<VecDeque<ReadJob>>,

    /// Condition variable for notifying workers
    condvar: Condvar,

    /// Stop flag for shutdown
    stop_flag: AtomicBool,
}

/// Cloneable submission handle
///
/// Jobs capture one of these so a finished read can queue its successor.
#[derive(Clone)]
pub struct ReaderPoolHandle {
    /// `None` = inline mode
    state: Option<Arc<SharedPoolState>>,
}

impl ReaderPoolHandle {
    /// Queue a job (or run it now, in inline mode)
    pub fn submit(&self, job: ReadJob) -> Result<()> {
        let Some(state) = &self.state else {
            run_job(job);
            return Ok(());
        };

        if state.stop_flag.load(Ordering::Relaxed) {
            return Err(Error::ReaderPool("Reader pool is shutting down".to_string()));
        }

        state.queue.lock().unwrap().push_back(job);
        state.condvar.notify_one();
        Ok(())
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.state
            .as_ref()
            .map(|state| state.queue.lock().unwrap().len())
            .unwrap_or(0)
    }

    pub fn is_inline(&self) -> bool {
        self.state.is_none()
    }
}

/// Multi-threaded packet reader pool
pub struct ReaderPool {
    handle: ReaderPoolHandle,

    /// Worker thread handles
    threads: Vec<JoinHandle<()>>,
}

impl ReaderPool {
    /// Create a pool with `thread_count` workers (0 = inline)
    pub fn new(thread_count: usize) -> Self {
        if thread_count == 0 {
            return Self::inline();
        }

        let state = Arc::new(SharedPoolState {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stop_flag: AtomicBool::new(false),
        });

        let mut threads = Vec::with_capacity(thread_count);
        for worker_id in 0..thread_count {
            let state_clone = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(format!("sfx-reader-{}", worker_id))
                .spawn(move || Self::worker_loop(worker_id, state_clone));

            match handle {
                Ok(handle) => threads.push(handle),
                Err(e) => error!("Failed to spawn reader thread {}: {}", worker_id, e),
            }
        }

        if threads.is_empty() {
            error!("No reader threads could be started, reading inline");
            return Self::inline();
        }

        info!("Reader pool started with {} worker threads", threads.len());

        Self {
            handle: ReaderPoolHandle { state: Some(state) },
            threads,
        }
    }

    /// Pool that runs every job on the submitting thread
    pub fn inline() -> Self {
        Self {
            handle: ReaderPoolHandle { state: None },
            threads: Vec::new(),
        }
    }

    pub fn handle(&self) -> ReaderPoolHandle {
        self.handle.clone()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// Worker thread main loop
    fn worker_loop(worker_id: usize, state: Arc<SharedPoolState>) {
        debug!("Reader {} started", worker_id);

        loop {
            let job = {
                let mut queue = state.queue.lock().unwrap();

                // Wait for work or shutdown signal
                while queue.is_empty() && !state.stop_flag.load(Ordering::Relaxed) {
                    queue = state.condvar.wait(queue).unwrap();
                }

                if state.stop_flag.load(Ordering::Relaxed) {
                    debug!("Reader {} received shutdown signal", worker_id);
                    break;
                }

                queue.pop_front()
            };

            if let Some(job) = job {
                run_job(job);
            }
        }

        debug!("Reader {} stopped", worker_id);
    }

    /// Stop the workers and join them
    ///
    /// Queued jobs that never started are dropped.
    pub fn shutdown(&mut self) {
        let Some(state) = &self.handle.state else {
            return;
        };
        if self.threads.is_empty() {
            return;
        }

        info!("Shutting down reader pool");
        state.stop_flag.store(true, Ordering::Relaxed);
        let dropped = {
            let mut queue = state.queue.lock().unwrap();
            let n = queue.len();
            queue.clear();
            n
        };
        state.condvar.notify_all();

        for (idx, handle) in self.threads.drain(..).enumerate() {
            if let Err(e) = handle.join() {
                error!("Reader {} join failed: {:?}", idx, e);
            }
        }

        info!("Reader pool shut down ({} queued reads dropped)", dropped);
    }
}

impl Drop for ReaderPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run one job, containing any panic to that job
fn run_job(job: ReadJob) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic>".to_string());
        error!("Read job panicked: {}", message);
    }
}
