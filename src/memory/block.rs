//! Bulk page allocation.
//!
//! A [`Block`] is one contiguous allocation of `count * size` bytes, carved
//! into `count` pages of `size` bytes. Pages hold a reference to their block,
//! so the block's memory lives exactly as long as the last page (or the block
//! handle itself) does.
//!
//! [`BlockFactory`] is the seam for alternative backing stores (for instance
//! a swap-file-backed allocator); [`HeapBlockFactory`] is the default.

use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::trace;

use crate::error::BlockError;

/// A bulk allocation subdivided into fixed-size pages.
pub trait Block: Send + Sync {
    /// Number of pages in this block.
    fn count(&self) -> usize;

    /// Size of each page in bytes.
    fn page_size(&self) -> usize;

    /// Raw access to page `id`.
    ///
    /// Returns [`BlockError::OutOfRange`] if `id >= count()`.
    fn raw(&self, id: usize) -> Result<MappedMutexGuard<'_, [u8]>, BlockError>;
}

impl dyn Block {
    /// Hand out one [`Page`] for every page in the block.
    ///
    /// Each page keeps the block alive. Calling this twice yields aliasing
    /// pages; the page provider calls it exactly once per block.
    pub fn pages(self: &Arc<Self>) -> Vec<Page> {
        (0..self.count())
            .map(|id| Page {
                block: Arc::clone(self),
                id,
            })
            .collect()
    }
}

/// Creates blocks of pages.
pub trait BlockFactory: Send + Sync {
    /// Allocate a block of `count` pages of `size` bytes each.
    ///
    /// Allocation failure aborts the process.
    fn create(&self, count: usize, size: usize) -> Result<Arc<dyn Block>, BlockError>;
}

// =============================================================================
// Page
// =============================================================================

/// A fixed-size chunk of memory inside a [`Block`].
pub struct Page {
    block: Arc<dyn Block>,
    id: usize,
}

impl Page {
    /// Access the page's bytes.
    pub fn get(&self) -> Result<MappedMutexGuard<'_, [u8]>, BlockError> {
        self.block.raw(self.id)
    }

    /// Index of this page within its block.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Size of this page in bytes.
    pub fn size(&self) -> usize {
        self.block.page_size()
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("size", &self.block.page_size())
            .finish()
    }
}

// =============================================================================
// Heap-backed blocks
// =============================================================================

/// A block backed by a single heap allocation.
///
/// The allocation is split into per-page views that share the underlying
/// buffer, so the memory is contiguous while each page is independently
/// lockable.
pub struct HeapBlock {
    size: usize,
    pages: Vec<Mutex<BytesMut>>,
}

impl HeapBlock {
    fn new(count: usize, size: usize) -> Self {
        let mut buffer = BytesMut::zeroed(count * size);
        let pages = (0..count)
            .map(|_| Mutex::new(buffer.split_to(size)))
            .collect();

        Self { size, pages }
    }
}

impl Block for HeapBlock {
    fn count(&self) -> usize {
        self.pages.len()
    }

    fn page_size(&self) -> usize {
        self.size
    }

    fn raw(&self, id: usize) -> Result<MappedMutexGuard<'_, [u8]>, BlockError> {
        let page = self.pages.get(id).ok_or(BlockError::OutOfRange {
            id,
            count: self.pages.len(),
        })?;

        Ok(MutexGuard::map(page.lock(), |bytes| &mut bytes[..]))
    }
}

/// Default factory: allocates blocks on the heap.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapBlockFactory;

impl BlockFactory for HeapBlockFactory {
    fn create(&self, count: usize, size: usize) -> Result<Arc<dyn Block>, BlockError> {
        if count == 0 || size == 0 {
            return Err(BlockError::InvalidGeometry { count, size });
        }

        trace!(count, size, "allocating heap block");
        Ok(Arc::new(HeapBlock::new(count, size)))
    }
}
