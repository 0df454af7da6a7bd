use thiserror::Error;

/// Errors raised by the page allocator.
#[derive(Debug, Clone, Error)]
pub enum BlockError {
    /// Requested page id does not exist in the block
    #[error("Page id out of range: requested page {id}, block holds {count} pages")]
    OutOfRange { id: usize, count: usize },

    /// A page was requested with a zero size or zero count
    #[error("Invalid block geometry: {count} pages of {size} bytes")]
    InvalidGeometry { count: usize, size: usize },
}

/// Errors produced by a page codec.
///
/// Compressed pages are only ever written by the codec that reads them back,
/// so any of these while decompressing indicates a defect, not bad input.
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    /// The compressor rejected its input or state
    #[error("Compression failed: {0}")]
    Compress(String),

    /// The decompressor found a corrupt stream
    #[error("Decompression failed: {0}")]
    Decompress(String),

    /// The stream ended before the expected number of bytes was produced
    #[error("Compressed stream truncated: expected {expected} bytes, produced {produced}")]
    Truncated { expected: usize, produced: usize },
}

/// Errors reported by a data source while filling tiles.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The underlying medium could not be read
    #[error("Read error: {0}")]
    Read(String),

    /// The data read does not match the expected layout
    #[error("Format error: {0}")]
    Format(String),
}

/// Errors surfaced by the tile layer.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// The source failed while filling a row of tiles
    #[error("Source failed on tile row {row}: {source}")]
    Source { row: u32, source: SourceError },

    /// The job was dropped before it could run (its task queue went away)
    #[error("Tile job cancelled")]
    Cancelled,

    /// Layer dimensions cannot be tiled
    #[error("Invalid layer geometry: {0}")]
    InvalidGeometry(String),
}
