//! Job scheduling.
//!
//! Background work (bulk tile fills, blob compression, asynchronous tile
//! loads) is submitted to a [`Scheduler`] with a [`Priority`] and a task
//! queue. A queue is a cancellation scope: jobs hold only a [`WeakQueue`],
//! and once every [`TaskQueue`] handle is gone, pending jobs of that queue are
//! dropped instead of run.
//!
//! # Components
//!
//! - [`ThreadPool`]: worker threads draining one channel per priority
//! - [`InlineScheduler`]: runs jobs on the submitting thread
//! - [`JobHandle`]: the eventual result of a scheduled job, usable both
//!   blocking ([`JobHandle::wait`]) and as a `Future`

mod pool;

pub use pool::{ThreadPool, DEFAULT_WORKER_PREFIX};

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use tokio::sync::oneshot;

// =============================================================================
// Priorities
// =============================================================================

/// Fixed priority scale, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Lowest,
    Lower,
    Low,
    Normal,
    High,
    Higher,
    Highest,
}

/// Asynchronous tile loads requested by observers.
pub const LOAD_PRIORITY: Priority = Priority::Higher;

/// Bulk filling of tiles from a data source.
pub const DATA_FETCH_PRIORITY: Priority = Priority::High;

/// Compressing idle blobs. Starved by everything else.
pub const COMPRESS_PRIORITY: Priority = Priority::Lowest;

// =============================================================================
// Task Queues
// =============================================================================

#[derive(Debug)]
struct QueueToken;

/// Owning handle to a cancellation scope.
///
/// Clones share the scope; jobs submitted against it run only while at least
/// one handle is alive.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    token: Arc<QueueToken>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            token: Arc::new(QueueToken),
        }
    }

    /// Non-owning reference for submitting jobs.
    pub fn downgrade(&self) -> WeakQueue {
        WeakQueue {
            token: Some(Arc::downgrade(&self.token)),
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-owning reference to a [`TaskQueue`].
#[derive(Debug, Clone, Default)]
pub struct WeakQueue {
    token: Option<Weak<QueueToken>>,
}

impl WeakQueue {
    /// A queue that is never cancelled.
    pub fn detached() -> Self {
        Self { token: None }
    }

    /// Whether jobs on this queue should still run.
    pub fn is_alive(&self) -> bool {
        match &self.token {
            None => true,
            Some(token) => token.strong_count() > 0,
        }
    }

    /// Recover an owning handle if the queue is still alive.
    pub fn upgrade(&self) -> Option<TaskQueue> {
        self.token
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|token| TaskQueue { token })
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes jobs, honouring priority and queue cancellation.
pub trait Scheduler: Send + Sync {
    /// Submit a job. Jobs whose queue has died by the time they would run
    /// are dropped without running.
    fn submit(&self, priority: Priority, queue: WeakQueue, job: Job);
}

impl dyn Scheduler {
    /// Schedule `f` and get a handle to its result.
    pub fn schedule<R, F>(&self, priority: Priority, queue: WeakQueue, f: F) -> JobHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(
            priority,
            queue,
            Box::new(move || {
                // The caller may have dropped the handle; the job still ran.
                let _ = tx.send(f());
            }),
        );
        JobHandle::new(rx)
    }
}

/// Runs every job immediately on the submitting thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl Scheduler for InlineScheduler {
    fn submit(&self, _priority: Priority, queue: WeakQueue, job: Job) {
        if queue.is_alive() {
            job();
        }
    }
}

// =============================================================================
// Job Handles
// =============================================================================

/// The pending result of a scheduled job.
///
/// Resolves to `None` if the job was dropped without running.
#[derive(Debug)]
pub struct JobHandle<R> {
    rx: oneshot::Receiver<R>,
}

impl<R> JobHandle<R> {
    pub(crate) fn new(rx: oneshot::Receiver<R>) -> Self {
        Self { rx }
    }

    /// Block the current thread until the job finishes.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; await
    /// the handle there instead.
    pub fn wait(self) -> Option<R> {
        self.rx.blocking_recv().ok()
    }

    /// Take the result if the job has already finished.
    pub fn try_take(&mut self) -> Option<R> {
        self.rx.try_recv().ok()
    }
}

impl<R> Future for JobHandle<R> {
    type Output = Option<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}
