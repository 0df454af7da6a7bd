//! Bulk load progress.
//!
//! [`LoadProgress`] observes tile initialization and counts tiles created and
//! finished against the expected total.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::compressed::{CompressedTile, TileInitializationObserver};

/// Counts tiles of a load as they are created and finished.
#[derive(Debug)]
pub struct LoadProgress {
    total: usize,
    created: AtomicUsize,
    finished: AtomicUsize,
}

/// Snapshot of a [`LoadProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressReport {
    pub total: usize,
    pub created: usize,
    pub finished: usize,
    pub fraction: f64,
}

impl LoadProgress {
    /// Track a load of `total` tiles.
    pub fn new(total: usize) -> Self {
        Self {
            total,
            created: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::Relaxed)
    }

    /// Finished share of the load, 1.0 for an empty load.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.finished() as f64 / self.total as f64).min(1.0)
    }

    pub fn is_complete(&self) -> bool {
        self.finished() >= self.total
    }

    pub fn report(&self) -> ProgressReport {
        ProgressReport {
            total: self.total,
            created: self.created(),
            finished: self.finished(),
            fraction: self.fraction(),
        }
    }
}

impl TileInitializationObserver for LoadProgress {
    fn tile_created(&self, _tile: &Arc<CompressedTile>) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    fn tile_finished(&self, _tile: &Arc<CompressedTile>) {
        self.finished.fetch_add(1, Ordering::Relaxed);
    }
}
