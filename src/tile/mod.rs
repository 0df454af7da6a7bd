//! Tiled layers.
//!
//! A [`Layer`] cuts one zoom level of a bitmap into square tiles. Each
//! [`CompressedTile`] keeps its pixels in a blob, so only tiles somebody is
//! holding take raw memory; the rest sit compressed in the page pool.
//!
//! ```text
//! SourcePresentation ──fill_tiles──▶ Layer::fetch_data (one job per row)
//!                                        │
//!                                        ▼
//!                          CompressedTile::initialize / report_finished
//!                                        │
//!                                        ▼
//!                                 Blob (memory module)
//! ```
//!
//! Rendering goes the other way: [`Layer::get_tile`] followed by
//! [`CompressedTile::get_const_tile_async`], which never blocks.

mod compressed;
mod handle;
mod layer;
mod progress;
mod source;

pub use compressed::{
    CompressedTile, TileInitializationObserver, TileLoadingObserver, TileState,
    TileStateInternal,
};
pub use handle::{ConstTile, Tile, TileGeometry};
pub use layer::{FetchSummary, Layer};
pub use progress::{LoadProgress, ProgressReport};
pub use source::{PatternSource, SourcePresentation};
