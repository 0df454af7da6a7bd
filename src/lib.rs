//! # Tiled Bitmap
//!
//! Memory management for bitmaps far larger than RAM.
//!
//! A bitmap is cut into square tiles per zoom level. Each tile keeps its
//! pixels in a blob: raw in memory while somebody holds it, compressed into
//! pooled pages once the last holder lets go. Compression runs on background
//! workers at the lowest priority and is abandoned as soon as the tile is
//! touched again.
//!
//! ## Architecture
//!
//! - [`memory`] - Blocks, the page pool, the page codec and blobs
//! - [`sched`] - Priority thread pool and cancellable task queues
//! - [`observe`] - Observer registration tokens
//! - [`tile`] - Compressed tiles, layers and data sources
//! - [`config`] - CLI configuration of the measurement tool
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tiled_bitmap::{BlobContext, Layer, PageProvider, PatternSource, TaskQueue, ThreadPool};
//!
//! let pool = Arc::new(ThreadPool::new(4));
//! let context = BlobContext::new(PageProvider::new(16, 64 * 1024), pool.clone());
//! let layer = Layer::new(0, 10_000, 8_000, 8, 4096, &context).unwrap();
//!
//! let queue = TaskQueue::new();
//! let source = Arc::new(PatternSource::new(10_000, 8_000, 8));
//! let summary = layer.fetch_data(source, queue.downgrade()).wait();
//! println!("{:?}", summary);
//!
//! // Render path: never blocks.
//! let tile = layer.get_tile(1, 1).get_const_tile_async();
//! ```

pub mod config;
pub mod error;
pub mod memory;
pub mod observe;
pub mod sched;
pub mod tile;

// Re-export commonly used types
pub use config::{Cli, Command, CompressConfig, LoadConfig, MemoryConfig, OutputFormat};
pub use error::{BlockError, CodecError, SourceError, TileError};
pub use memory::{
    Blob, BlobConstRef, BlobContext, BlobRef, BlobStatus, Block, BlockFactory, DeflateCodec,
    HeapBlockFactory, MemoryCounters, MemoryReport, Page, PageCodec, PageList, PageProvider,
    PoolStats, PooledPage,
};
pub use observe::{Observable, Registration};
pub use sched::{
    InlineScheduler, JobHandle, Priority, Scheduler, TaskQueue, ThreadPool, WeakQueue,
    COMPRESS_PRIORITY, DATA_FETCH_PRIORITY, LOAD_PRIORITY,
};
pub use tile::{
    CompressedTile, ConstTile, FetchSummary, Layer, LoadProgress, PatternSource, ProgressReport,
    SourcePresentation, Tile, TileGeometry, TileInitializationObserver, TileLoadingObserver,
    TileState, TileStateInternal,
};
