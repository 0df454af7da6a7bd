//! Memory accounting.
//!
//! Blobs report raw and compressed bytes as they change state. A
//! [`MemoryReport`] is a serializable copy of the totals.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;

/// Byte and event accounting shared by every blob of a context.
#[derive(Debug, Default)]
pub struct MemoryCounters {
    resident_bytes: AtomicUsize,
    compressed_bytes: AtomicUsize,
    compressions: AtomicU64,
    aborted_compressions: AtomicU64,
    decompressions: AtomicU64,
}

/// Point-in-time copy of [`MemoryCounters`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryReport {
    /// Raw bytes currently held in memory by blobs
    pub resident_bytes: usize,
    /// Compressed stream bytes currently held in pages
    pub compressed_bytes: usize,
    /// Compressions committed
    pub compressions: u64,
    /// Compressions discarded because the blob was touched again
    pub aborted_compressions: u64,
    /// Blobs decompressed back into memory
    pub decompressions: u64,
}

impl MemoryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_resident(&self, bytes: usize) {
        self.resident_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn remove_resident(&self, bytes: usize) {
        self.resident_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_compressed(&self, bytes: usize) {
        self.compressed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn remove_compressed(&self, bytes: usize) {
        self.compressed_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_compression(&self) {
        self.compressions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.aborted_compressions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_decompression(&self) {
        self.decompressions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MemoryReport {
        MemoryReport {
            resident_bytes: self.resident_bytes.load(Ordering::Relaxed),
            compressed_bytes: self.compressed_bytes.load(Ordering::Relaxed),
            compressions: self.compressions.load(Ordering::Relaxed),
            aborted_compressions: self.aborted_compressions.load(Ordering::Relaxed),
            decompressions: self.decompressions.load(Ordering::Relaxed),
        }
    }
}
