//! Priority thread pool.
//!
//! Every priority level has its own channel. Workers always take from the
//! highest non-empty channel, so jobs run by priority and FIFO within one.

use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Select, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use super::{Job, Priority, Scheduler, WeakQueue};

/// Thread name prefix for pool workers.
pub const DEFAULT_WORKER_PREFIX: &str = "tile-worker";

const PRIORITY_LEVELS: usize = Priority::Highest as usize + 1;

struct QueuedJob {
    priority: Priority,
    queue: WeakQueue,
    job: Job,
}

/// Jobs submitted but not yet finished, queued or running.
#[derive(Default)]
struct Outstanding {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Outstanding {
    fn add(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

/// Fixed-size pool of worker threads executing jobs by priority.
///
/// A job that panics is a defect: the panic is logged and the process is
/// aborted. Dropping the pool lets workers drain every queued job, then
/// joins them.
pub struct ThreadPool {
    /// Indexed by `Priority as usize`.
    senders: Vec<Sender<QueuedJob>>,
    outstanding: Arc<Outstanding>,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPool {
    /// Start a pool with `workers` threads (at least one).
    pub fn new(workers: usize) -> Self {
        Self::with_name(workers, DEFAULT_WORKER_PREFIX)
    }

    /// Start a pool whose threads are named `{prefix}-{index}`.
    pub fn with_name(workers: usize, prefix: &str) -> Self {
        let workers = workers.max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..PRIORITY_LEVELS).map(|_| unbounded()).unzip();
        let outstanding = Arc::new(Outstanding::default());

        let handles = (0..workers)
            .filter_map(|index| {
                let receivers = receivers.clone();
                let outstanding = Arc::clone(&outstanding);
                let spawned = thread::Builder::new()
                    .name(format!("{}-{}", prefix, index))
                    .spawn(move || worker_loop(&receivers, &outstanding));

                match spawned {
                    Ok(handle) => Some(handle),
                    Err(e) => {
                        error!("Failed to spawn worker {}: {}", index, e);
                        None
                    }
                }
            })
            .collect::<Vec<_>>();

        assert!(!handles.is_empty(), "thread pool could not start any worker");
        debug!(workers = handles.len(), prefix, "thread pool started");

        Self {
            senders,
            outstanding,
            workers: handles,
        }
    }

    /// Number of running worker threads.
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Number of jobs waiting to run.
    pub fn pending(&self) -> usize {
        self.senders.iter().map(Sender::len).sum()
    }

    /// Block until no job is queued or running.
    ///
    /// Jobs submitted by running jobs are waited for as well.
    pub fn wait_idle(&self) {
        let mut count = self.outstanding.count.lock();
        while *count > 0 {
            self.outstanding.idle.wait(&mut count);
        }
    }
}

impl Scheduler for ThreadPool {
    fn submit(&self, priority: Priority, queue: WeakQueue, job: Job) {
        self.outstanding.add();
        let queued = QueuedJob {
            priority,
            queue,
            job,
        };
        if self.senders[priority as usize].send(queued).is_err() {
            error!(?priority, "Job submitted to a stopped thread pool");
            self.outstanding.finish();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        // Workers exit once every channel is drained and disconnected.
        self.senders.clear();

        let current = thread::current().id();
        for handle in self.workers.drain(..) {
            // The last reference may be released by one of our own jobs.
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }
    }
}

fn worker_loop(receivers: &[Receiver<QueuedJob>], outstanding: &Outstanding) {
    while let Some(next) = next_job(receivers) {
        let QueuedJob {
            priority,
            queue,
            job,
        } = next;

        if queue.is_alive() {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                error!(?priority, "Scheduled job panicked, aborting");
                process::abort();
            }
        } else {
            trace!(?priority, "Skipping job of a cancelled queue");
            drop(job);
        }

        outstanding.finish();
    }
}

/// Take the oldest job of the highest non-empty priority, blocking while all
/// channels are empty. `None` once every channel is drained and closed.
fn next_job(receivers: &[Receiver<QueuedJob>]) -> Option<QueuedJob> {
    loop {
        let mut open = Vec::with_capacity(receivers.len());
        for receiver in receivers.iter().rev() {
            match receiver.try_recv() {
                Ok(job) => return Some(job),
                Err(TryRecvError::Empty) => open.push(receiver),
                Err(TryRecvError::Disconnected) => {}
            }
        }
        if open.is_empty() {
            return None;
        }

        let mut select = Select::new();
        for receiver in open {
            select.recv(receiver);
        }
        // Another worker may win the job; the loop rescans either way.
        select.ready();
    }
}
