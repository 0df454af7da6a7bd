//! Pooled page allocation.
//!
//! The [`PageProvider`] keeps a free-list of pages drawn from blocks. When
//! the free-list runs dry it asks its [`BlockFactory`] for exactly one more
//! block. Pages are handed out as [`PooledPage`]s, which push themselves back
//! onto the front of the free-list when dropped. Pools only grow.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{MappedMutexGuard, Mutex};
use serde::Serialize;
use tracing::{debug, error};

use super::block::{Block, BlockFactory, HeapBlockFactory, Page};
use crate::error::BlockError;

/// Snapshot of a provider's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Size of each page in bytes
    pub page_size: usize,
    /// Pages allocated per block
    pub pages_per_block: usize,
    /// Blocks allocated so far
    pub blocks: usize,
    /// Pages carved from all blocks
    pub total_pages: usize,
    /// Pages currently sitting in the free-list
    pub free_pages: usize,
}

impl PoolStats {
    /// Pages currently handed out.
    pub fn live_pages(&self) -> usize {
        self.total_pages - self.free_pages
    }
}

struct Pool {
    blocks: Vec<Arc<dyn Block>>,
    free: VecDeque<Page>,
}

struct ProviderInner {
    pages_per_block: usize,
    page_size: usize,
    factory: Arc<dyn BlockFactory>,
    pool: Mutex<Pool>,
}

impl ProviderInner {
    fn mark_page_free(&self, page: Page) {
        self.pool.lock().free.push_front(page);
    }
}

/// Thread-safe pool of fixed-size pages.
///
/// Cloning a provider is cheap and yields a handle to the same pool. The pool
/// outlives the last provider handle for as long as any page drawn from it is
/// still alive.
#[derive(Clone)]
pub struct PageProvider {
    inner: Arc<ProviderInner>,
}

impl PageProvider {
    /// Create a provider that allocates blocks of `pages_per_block` pages of
    /// `page_size` bytes from the heap.
    ///
    /// # Panics
    ///
    /// Panics if either argument is zero.
    pub fn new(pages_per_block: usize, page_size: usize) -> Self {
        Self::with_factory(pages_per_block, page_size, Arc::new(HeapBlockFactory))
    }

    /// Create a provider backed by a custom block factory.
    ///
    /// # Panics
    ///
    /// Panics if either size argument is zero.
    pub fn with_factory(
        pages_per_block: usize,
        page_size: usize,
        factory: Arc<dyn BlockFactory>,
    ) -> Self {
        assert!(
            pages_per_block > 0 && page_size > 0,
            "page provider needs a non-zero geometry, got {} pages of {} bytes",
            pages_per_block,
            page_size
        );

        Self {
            inner: Arc::new(ProviderInner {
                pages_per_block,
                page_size,
                factory,
                pool: Mutex::new(Pool {
                    blocks: Vec::new(),
                    free: VecDeque::new(),
                }),
            }),
        }
    }

    /// Take a page from the free-list, growing the pool by one block if it
    /// is empty.
    ///
    /// Out of memory is not recoverable here: a block factory failure is
    /// logged and turned into a panic.
    pub fn get_free_page(&self) -> PooledPage {
        let mut pool = self.inner.pool.lock();

        if pool.free.is_empty() {
            let block = match self
                .inner
                .factory
                .create(self.inner.pages_per_block, self.inner.page_size)
            {
                Ok(block) => block,
                Err(e) => {
                    error!("Block allocation failed: {}", e);
                    panic!("block allocation failed: {}", e);
                }
            };

            pool.free.extend(block.pages());
            pool.blocks.push(block);

            debug!(
                blocks = pool.blocks.len(),
                page_size = self.inner.page_size,
                "page pool grew by one block"
            );
        }

        let page = pool
            .free
            .pop_front()
            .unwrap_or_else(|| unreachable!("free-list refilled above"));

        PooledPage {
            page: Some(page),
            provider: Arc::clone(&self.inner),
        }
    }

    /// Size of the pages handed out by this provider.
    pub fn page_size(&self) -> usize {
        self.inner.page_size
    }

    /// Number of pages allocated per block.
    pub fn pages_per_block(&self) -> usize {
        self.inner.pages_per_block
    }

    /// Snapshot the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let pool = self.inner.pool.lock();
        PoolStats {
            page_size: self.inner.page_size,
            pages_per_block: self.inner.pages_per_block,
            blocks: pool.blocks.len(),
            total_pages: pool.blocks.len() * self.inner.pages_per_block,
            free_pages: pool.free.len(),
        }
    }
}

impl std::fmt::Debug for PageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageProvider")
            .field("pages_per_block", &self.inner.pages_per_block)
            .field("page_size", &self.inner.page_size)
            .finish()
    }
}

// =============================================================================
// Pooled Page
// =============================================================================

/// A page on loan from a [`PageProvider`].
///
/// Dropping it returns the page to the front of the provider's free-list.
pub struct PooledPage {
    page: Option<Page>,
    provider: Arc<ProviderInner>,
}

impl PooledPage {
    /// Access the page's bytes.
    pub fn get(&self) -> Result<MappedMutexGuard<'_, [u8]>, BlockError> {
        self.page().get()
    }

    /// Size of the page in bytes.
    pub fn size(&self) -> usize {
        self.page().size()
    }

    fn page(&self) -> &Page {
        self.page
            .as_ref()
            .unwrap_or_else(|| unreachable!("page is only taken on drop"))
    }
}

impl Drop for PooledPage {
    fn drop(&mut self) {
        if let Some(page) = self.page.take() {
            self.provider.mark_page_free(page);
        }
    }
}

impl std::fmt::Debug for PooledPage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PooledPage").field(self.page()).finish()
    }
}
