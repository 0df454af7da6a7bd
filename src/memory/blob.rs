//! Lazily compressed byte buffers.
//!
//! A [`Blob`] is a fixed-size byte buffer that is, at any time, in one of
//! four states:
//!
//! | State | Raw buffer | Page list |
//! |---|---|---|
//! | `Uninitialized` | no | no |
//! | `Clean` | no | yes |
//! | `Dirty` | yes | no |
//! | `Compressing` | yes | no (being produced) |
//!
//! Accessor handles ([`BlobRef`], [`BlobConstRef`]) are only ever issued in
//! `Dirty`. Issuing one materializes the raw buffer (zero-filled, or
//! decompressed from the page list) and aborts any compression in flight.
//! When the last handle is dropped the blob moves to `Compressing` and a
//! compression job is submitted at [`COMPRESS_PRIORITY`]. The job commits
//! its page list only if no handle was issued in the meantime; otherwise the
//! pages go straight back to the pool.

use std::mem;
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, Mutex, RwLock, RwLockReadGuard,
    RwLockWriteGuard,
};
use serde::Serialize;
use tracing::{debug, error, trace, warn};

use super::codec::{DeflateCodec, PageCodec, PageList};
use super::provider::PageProvider;
use super::stats::{MemoryCounters, MemoryReport};
use crate::sched::{Scheduler, WeakQueue, COMPRESS_PRIORITY};

type SharedBuffer = Arc<RwLock<BytesMut>>;

// =============================================================================
// Context
// =============================================================================

/// Everything a blob needs besides its own bytes.
///
/// One context is built at startup and shared by every blob of a bitmap.
#[derive(Clone)]
pub struct BlobContext {
    provider: PageProvider,
    codec: Arc<dyn PageCodec>,
    scheduler: Arc<dyn Scheduler>,
    counters: Arc<MemoryCounters>,
}

impl BlobContext {
    /// Context compressing with the default [`DeflateCodec`].
    pub fn new(provider: PageProvider, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            provider,
            codec: Arc::new(DeflateCodec::default()),
            scheduler,
            counters: Arc::new(MemoryCounters::new()),
        }
    }

    /// Replace the codec.
    pub fn with_codec(mut self, codec: Arc<dyn PageCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn provider(&self) -> &PageProvider {
        &self.provider
    }

    pub fn codec(&self) -> &Arc<dyn PageCodec> {
        &self.codec
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub fn counters(&self) -> &Arc<MemoryCounters> {
        &self.counters
    }

    /// Snapshot of the byte accounting of all blobs in this context.
    pub fn report(&self) -> MemoryReport {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for BlobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobContext")
            .field("provider", &self.provider)
            .field("codec", &self.codec.name())
            .finish()
    }
}

// =============================================================================
// State
// =============================================================================

/// Observable state of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobStatus {
    /// Never touched; holds no memory
    Uninitialized,
    /// Compressed on pages
    Clean,
    /// Raw in memory
    Dirty,
    /// Raw in memory, compression job pending or running
    Compressing,
}

enum BlobState {
    Uninitialized,
    Clean(PageList),
    Dirty { buffer: SharedBuffer, refs: usize },
    Compressing { buffer: SharedBuffer, attempt: u64 },
}

impl BlobState {
    fn status(&self) -> BlobStatus {
        match self {
            BlobState::Uninitialized => BlobStatus::Uninitialized,
            BlobState::Clean(_) => BlobStatus::Clean,
            BlobState::Dirty { .. } => BlobStatus::Dirty,
            BlobState::Compressing { .. } => BlobStatus::Compressing,
        }
    }
}

struct BlobCell {
    state: BlobState,
    /// Compression attempts started so far; identifies the job in flight.
    attempts: u64,
}

struct BlobInner {
    size: usize,
    context: BlobContext,
    cell: Mutex<BlobCell>,
}

impl BlobInner {
    /// Issue one more accessor reference, making the blob resident.
    fn acquire(&self) -> SharedBuffer {
        let mut cell = self.cell.lock();
        let counters = &self.context.counters;

        // Decompress before leaving `Clean`: a failing codec panics with the
        // page list still in place.
        if let BlobState::Clean(pages) = &cell.state {
            let buffer = self.decompress(pages);
            counters.remove_compressed(pages.compressed_len());
            counters.add_resident(self.size);
            counters.record_decompression();
            cell.state = BlobState::Dirty { buffer, refs: 0 };
        }

        let (buffer, refs) = match mem::replace(&mut cell.state, BlobState::Uninitialized) {
            BlobState::Uninitialized => {
                trace!(size = self.size, "materializing blob");
                counters.add_resident(self.size);
                (new_buffer(self.size), 0)
            }
            BlobState::Clean(_) => unreachable!("clean blob decompressed above"),
            BlobState::Dirty { buffer, refs } => (buffer, refs),
            BlobState::Compressing { buffer, attempt } => {
                debug!(attempt, "blob touched while compressing, aborting");
                counters.record_abort();
                (buffer, 0)
            }
        };

        cell.state = BlobState::Dirty {
            buffer: Arc::clone(&buffer),
            refs: refs + 1,
        };
        buffer
    }

    /// Issue a reference only if the raw buffer is already in memory.
    fn try_acquire_resident(&self) -> Option<SharedBuffer> {
        let mut cell = self.cell.lock();
        match mem::replace(&mut cell.state, BlobState::Uninitialized) {
            BlobState::Dirty { buffer, refs } => {
                cell.state = BlobState::Dirty {
                    buffer: Arc::clone(&buffer),
                    refs: refs + 1,
                };
                Some(buffer)
            }
            BlobState::Compressing { buffer, attempt } => {
                debug!(attempt, "blob touched while compressing, aborting");
                self.context.counters.record_abort();
                cell.state = BlobState::Dirty {
                    buffer: Arc::clone(&buffer),
                    refs: 1,
                };
                Some(buffer)
            }
            other => {
                cell.state = other;
                None
            }
        }
    }

    /// Drop one accessor reference. The last one schedules compression.
    fn release(self: &Arc<Self>) {
        let attempt = {
            let mut cell = self.cell.lock();
            match mem::replace(&mut cell.state, BlobState::Uninitialized) {
                BlobState::Dirty { buffer, refs } if refs > 1 => {
                    cell.state = BlobState::Dirty {
                        buffer,
                        refs: refs - 1,
                    };
                    None
                }
                BlobState::Dirty { .. } if self.size == 0 => {
                    // Nothing to store; stay uninitialized.
                    None
                }
                BlobState::Dirty { buffer, .. } => {
                    cell.attempts += 1;
                    let attempt = cell.attempts;
                    cell.state = BlobState::Compressing { buffer, attempt };
                    Some(attempt)
                }
                other => {
                    let status = other.status();
                    cell.state = other;
                    drop(cell);
                    error!(?status, "Blob handle released outside the dirty state");
                    panic!("blob handle released while blob is {:?}", status);
                }
            }
        };

        if let Some(attempt) = attempt {
            let blob = Arc::downgrade(self);
            self.context.scheduler.submit(
                COMPRESS_PRIORITY,
                WeakQueue::detached(),
                Box::new(move || compress_blob(blob, attempt)),
            );
        }
    }

    fn decompress(&self, pages: &PageList) -> SharedBuffer {
        let mut raw = BytesMut::zeroed(self.size);
        if let Err(e) = self.context.codec.decompress(&mut raw, pages) {
            error!(size = self.size, "Blob decompression failed: {}", e);
            panic!("corrupt compressed blob: {}", e);
        }
        Arc::new(RwLock::new(raw))
    }

    fn run_compression(&self, attempt: u64) {
        let buffer = {
            let cell = self.cell.lock();
            match &cell.state {
                BlobState::Compressing {
                    buffer,
                    attempt: current,
                } if *current == attempt => Arc::clone(buffer),
                _ => {
                    trace!(attempt, "compression attempt superseded before start");
                    return;
                }
            }
        };

        // Runs without the state lock so new handles can be issued meanwhile.
        let result = {
            let raw = buffer.read();
            self.context.codec.compress(&raw, &self.context.provider)
        };

        let mut cell = self.cell.lock();
        let still_current = matches!(
            &cell.state,
            BlobState::Compressing { attempt: current, .. } if *current == attempt
        );

        if !still_current {
            drop(cell);
            debug!(attempt, "discarding aborted compression");
            // Dropping the list hands its pages back to the pool.
            drop(result);
            return;
        }

        match result {
            Ok(pages) => {
                let counters = &self.context.counters;
                counters.remove_resident(self.size);
                counters.add_compressed(pages.compressed_len());
                counters.record_compression();
                debug!(
                    attempt,
                    size = self.size,
                    compressed = pages.compressed_len(),
                    pages = pages.page_count(),
                    "blob compressed"
                );
                cell.state = BlobState::Clean(pages);
            }
            Err(e) => {
                warn!(attempt, "Blob compression failed, keeping it in memory: {}", e);
                cell.state = BlobState::Dirty { buffer, refs: 0 };
            }
        }
    }
}

impl Drop for BlobInner {
    fn drop(&mut self) {
        let counters = &self.context.counters;
        match &self.cell.get_mut().state {
            BlobState::Uninitialized => {}
            BlobState::Clean(pages) => counters.remove_compressed(pages.compressed_len()),
            BlobState::Dirty { .. } | BlobState::Compressing { .. } => {
                counters.remove_resident(self.size)
            }
        }
    }
}

fn new_buffer(size: usize) -> SharedBuffer {
    Arc::new(RwLock::new(BytesMut::zeroed(size)))
}

fn compress_blob(blob: Weak<BlobInner>, attempt: u64) {
    match blob.upgrade() {
        Some(blob) => blob.run_compression(attempt),
        None => trace!(attempt, "blob dropped before compression"),
    }
}

// =============================================================================
// Blob
// =============================================================================

/// A fixed-size byte buffer that compresses itself when nobody holds it.
///
/// Cloning yields another handle to the same buffer.
#[derive(Clone)]
pub struct Blob {
    inner: Arc<BlobInner>,
}

impl Blob {
    /// Create an uninitialized blob of `size` bytes. No memory is allocated
    /// until first access.
    pub fn new(size: usize, context: &BlobContext) -> Self {
        Self {
            inner: Arc::new(BlobInner {
                size,
                context: context.clone(),
                cell: Mutex::new(BlobCell {
                    state: BlobState::Uninitialized,
                    attempts: 0,
                }),
            }),
        }
    }

    /// Size of the buffer in bytes.
    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Mutable access. Blocks while decompressing if the blob is clean.
    pub fn get(&self) -> BlobRef {
        BlobRef {
            lease: self.lease(),
        }
    }

    /// Read-only access. Blocks while decompressing if the blob is clean.
    pub fn get_const(&self) -> BlobConstRef {
        BlobConstRef {
            lease: self.lease(),
        }
    }

    /// Read-only access if the bytes are already in memory.
    ///
    /// Never decompresses. Returns `None` for clean or uninitialized blobs.
    pub fn try_get_const(&self) -> Option<BlobConstRef> {
        self.inner.try_acquire_resident().map(|buffer| BlobConstRef {
            lease: Lease {
                blob: Arc::clone(&self.inner),
                buffer,
            },
        })
    }

    /// Mutable access with every byte set to `value`.
    pub fn initialize(&self, value: u8) -> BlobRef {
        let blob = self.get();
        blob.write().fill(value);
        blob
    }

    pub fn status(&self) -> BlobStatus {
        self.inner.cell.lock().state.status()
    }

    /// Whether the raw bytes are in memory.
    pub fn is_resident(&self) -> bool {
        matches!(
            self.status(),
            BlobStatus::Dirty | BlobStatus::Compressing
        )
    }

    /// Number of live accessor handles.
    pub fn ref_count(&self) -> usize {
        match self.inner.cell.lock().state {
            BlobState::Dirty { refs, .. } => refs,
            _ => 0,
        }
    }

    fn lease(&self) -> Lease {
        Lease {
            buffer: self.inner.acquire(),
            blob: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("size", &self.inner.size)
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Accessor handles
// =============================================================================

struct Lease {
    blob: Arc<BlobInner>,
    buffer: SharedBuffer,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.blob.release();
    }
}

/// Mutable accessor. The blob stays in memory while any accessor lives.
pub struct BlobRef {
    lease: Lease,
}

impl BlobRef {
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.lease.buffer.read(), |raw| &raw[..])
    }

    pub fn write(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        RwLockWriteGuard::map(self.lease.buffer.write(), |raw| &mut raw[..])
    }

    pub fn len(&self) -> usize {
        self.lease.blob.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Give up write access, keeping the blob in memory.
    pub fn into_const(self) -> BlobConstRef {
        BlobConstRef { lease: self.lease }
    }
}

impl std::fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobRef").field("len", &self.len()).finish()
    }
}

/// Read-only accessor.
pub struct BlobConstRef {
    lease: Lease,
}

impl BlobConstRef {
    pub fn read(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        RwLockReadGuard::map(self.lease.buffer.read(), |raw| &raw[..])
    }

    pub fn len(&self) -> usize {
        self.lease.blob.size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for BlobConstRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobConstRef")
            .field("len", &self.len())
            .finish()
    }
}
