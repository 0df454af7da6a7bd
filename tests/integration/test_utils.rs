//! Test utilities for integration tests.
//!
//! This module provides recording data sources, recording observers and a
//! scheduler that runs jobs only when told to.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use tiled_bitmap::error::SourceError;
use tiled_bitmap::sched::Job;
use tiled_bitmap::{
    BlobContext, CompressedTile, ConstTile, InlineScheduler, PageProvider, PatternSource,
    Priority, Scheduler, SourcePresentation, ThreadPool, Tile, TileInitializationObserver,
    TileLoadingObserver, WeakQueue,
};

// =============================================================================
// Contexts
// =============================================================================

/// Context running every job on the calling thread.
pub fn inline_context(pages_per_block: usize, page_size: usize) -> BlobContext {
    BlobContext::new(
        PageProvider::new(pages_per_block, page_size),
        Arc::new(InlineScheduler),
    )
}

/// Context backed by a thread pool, returned alongside for `wait_idle`.
pub fn pool_context(
    workers: usize,
    pages_per_block: usize,
    page_size: usize,
) -> (Arc<ThreadPool>, BlobContext) {
    let pool = Arc::new(ThreadPool::new(workers));
    let context = BlobContext::new(PageProvider::new(pages_per_block, page_size), pool.clone());
    (pool, context)
}

// =============================================================================
// Manual Scheduler
// =============================================================================

/// Scheduler that queues jobs until the test runs them.
#[derive(Default)]
pub struct ManualScheduler {
    jobs: Mutex<VecDeque<(Priority, WeakQueue, Job)>>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn pending_at(&self, priority: Priority) -> usize {
        self.jobs
            .lock()
            .iter()
            .filter(|(p, _, _)| *p == priority)
            .count()
    }

    /// Run the oldest job. Returns false when nothing was queued.
    pub fn run_next(&self) -> bool {
        let next = self.jobs.lock().pop_front();
        match next {
            Some((_, queue, job)) => {
                if queue.is_alive() {
                    job();
                }
                true
            }
            None => false,
        }
    }

    /// Run jobs until none are left, including those queued meanwhile.
    pub fn run_all(&self) {
        while self.run_next() {}
    }
}

impl Scheduler for ManualScheduler {
    fn submit(&self, priority: Priority, queue: WeakQueue, job: Job) {
        self.jobs.lock().push_back((priority, queue, job));
    }
}

// =============================================================================
// Recording Source
// =============================================================================

/// A pattern source that counts calls and can fail on a given tile row.
pub struct RecordingSource {
    pattern: PatternSource,
    tile_size: u32,
    fail_on_row: Option<u32>,
    fills: AtomicUsize,
    done_calls: AtomicUsize,
    lines: Mutex<Vec<(u32, u32)>>,
}

impl RecordingSource {
    pub fn new(width: u32, height: u32, bpp: u32, tile_size: u32) -> Self {
        Self {
            pattern: PatternSource::new(width, height, bpp),
            tile_size,
            fail_on_row: None,
            fills: AtomicUsize::new(0),
            done_calls: AtomicUsize::new(0),
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on_row(mut self, row: u32) -> Self {
        self.fail_on_row = Some(row);
        self
    }

    pub fn pattern(&self) -> &PatternSource {
        &self.pattern
    }

    pub fn fills(&self) -> usize {
        self.fills.load(Ordering::SeqCst)
    }

    pub fn done_calls(&self) -> usize {
        self.done_calls.load(Ordering::SeqCst)
    }

    /// `(start_line, line_count)` of every fill, in call order.
    pub fn lines(&self) -> Vec<(u32, u32)> {
        self.lines.lock().clone()
    }
}

impl SourcePresentation for RecordingSource {
    fn fill_tiles(
        &self,
        start_line: u32,
        line_count: u32,
        tile_width: u32,
        first_tile: u32,
        tiles: &[Arc<Tile>],
    ) -> Result<(), SourceError> {
        self.fills.fetch_add(1, Ordering::SeqCst);
        self.lines.lock().push((start_line, line_count));

        if self.fail_on_row == Some(start_line / self.tile_size) {
            return Err(SourceError::Read("simulated read failure".to_string()));
        }

        self.pattern
            .fill_tiles(start_line, line_count, tile_width, first_tile, tiles)
    }

    fn done(&self) {
        self.done_calls.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Recording Observer
// =============================================================================

/// Records every notification it receives.
#[derive(Default)]
pub struct RecordingObserver {
    created: Mutex<Vec<(i32, i32)>>,
    finished: Mutex<Vec<(i32, i32)>>,
    loaded: Mutex<Vec<(i32, i32)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> Vec<(i32, i32)> {
        self.created.lock().clone()
    }

    pub fn finished(&self) -> Vec<(i32, i32)> {
        self.finished.lock().clone()
    }

    pub fn loaded(&self) -> Vec<(i32, i32)> {
        self.loaded.lock().clone()
    }
}

impl TileInitializationObserver for RecordingObserver {
    fn tile_created(&self, tile: &Arc<CompressedTile>) {
        self.created.lock().push((tile.x(), tile.y()));
    }

    fn tile_finished(&self, tile: &Arc<CompressedTile>) {
        self.finished.lock().push((tile.x(), tile.y()));
    }
}

impl TileLoadingObserver for RecordingObserver {
    fn tile_loaded(&self, tile: &Arc<ConstTile>) {
        let geometry = tile.geometry();
        self.loaded.lock().push((geometry.x, geometry.y));
    }
}

/// Byte pattern used by blob tests: a distinct value per blob.
pub fn blob_pattern(size: usize, seed: u8) -> Vec<u8> {
    (0..size)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
