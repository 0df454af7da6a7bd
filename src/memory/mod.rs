//! Memory management for tile data.
//!
//! This module stacks four layers, leaf first:
//!
//! 1. **Blocks** ([`block`]): bulk allocations carved into fixed-size pages
//! 2. **Page provider** ([`provider`]): a growing pool of pages with a LIFO
//!    free-list
//! 3. **Codec** ([`codec`]): streams a buffer into a list of pooled pages
//! 4. **Blobs** ([`blob`]): byte buffers that live either raw in memory or
//!    compressed on pages, switching lazily as accessors come and go
//!
//! Byte accounting for a whole context lives in [`stats`].

pub mod blob;
pub mod block;
pub mod codec;
pub mod provider;
pub mod stats;

pub use blob::{Blob, BlobConstRef, BlobContext, BlobRef, BlobStatus};
pub use block::{Block, BlockFactory, HeapBlock, HeapBlockFactory, Page};
pub use codec::{DeflateCodec, PageCodec, PageList};
pub use provider::{PageProvider, PoolStats, PooledPage};
pub use stats::{MemoryCounters, MemoryReport};
