//! Producers of tile data.

use std::sync::Arc;

use super::handle::{ConstTile, Tile};
use crate::error::SourceError;

/// A data source that fills a layer's tiles, one row of tiles at a time.
///
/// Implementations are typically file-format readers.
pub trait SourcePresentation: Send + Sync {
    /// Fill `line_count` pixel lines starting at bitmap line `start_line`
    /// into `tiles`, which hold consecutive tiles of one row starting at
    /// column `first_tile`. Every tile is `tile_width` pixels wide; line `n`
    /// of the request lands on line `n` of each tile.
    fn fill_tiles(
        &self,
        start_line: u32,
        line_count: u32,
        tile_width: u32,
        first_tile: u32,
        tiles: &[Arc<Tile>],
    ) -> Result<(), SourceError>;

    /// Called once after the last fill, successful or not.
    fn done(&self) {}
}

/// Synthetic source producing a deterministic byte pattern.
///
/// Bytes outside the bitmap's width stay untouched (zero in a fresh tile).
#[derive(Debug, Clone, Copy)]
pub struct PatternSource {
    width: u32,
    height: u32,
    bpp: u32,
}

impl PatternSource {
    pub fn new(width: u32, height: u32, bpp: u32) -> Self {
        Self { width, height, bpp }
    }

    /// Byte at column `byte_x` of bitmap line `line`.
    pub fn expected_byte(byte_x: usize, line: usize) -> u8 {
        ((byte_x * 3 + line * 7) % 251) as u8
    }

    fn line_bytes(&self) -> usize {
        self.width as usize * self.bpp as usize / 8
    }

    /// Whether a tile holds exactly the bytes this source would write into
    /// it, including zero padding outside the bitmap.
    pub fn matches(&self, tile: &ConstTile) -> bool {
        let geometry = tile.geometry();
        if geometry.x < 0 || geometry.y < 0 {
            return false;
        }

        let stride = geometry.stride();
        let first_byte = geometry.x as usize * stride;
        let first_line = geometry.y as usize * geometry.height as usize;
        let data = tile.data();

        data.chunks(stride).enumerate().all(|(row, bytes)| {
            let line = first_line + row;
            bytes.iter().enumerate().all(|(col, &b)| {
                let byte_x = first_byte + col;
                let expected = if line < self.height as usize && byte_x < self.line_bytes() {
                    Self::expected_byte(byte_x, line)
                } else {
                    0
                };
                b == expected
            })
        })
    }
}

impl SourcePresentation for PatternSource {
    fn fill_tiles(
        &self,
        start_line: u32,
        line_count: u32,
        tile_width: u32,
        first_tile: u32,
        tiles: &[Arc<Tile>],
    ) -> Result<(), SourceError> {
        if start_line + line_count > self.height {
            return Err(SourceError::Format(format!(
                "lines {}..{} outside bitmap of height {}",
                start_line,
                start_line + line_count,
                self.height
            )));
        }

        let tile_bytes = tile_width as usize * self.bpp as usize / 8;
        let line_bytes = self.line_bytes();

        for (index, tile) in tiles.iter().enumerate() {
            let first_byte = (first_tile as usize + index) * tile_bytes;
            if first_byte >= line_bytes {
                break;
            }
            let count = tile_bytes.min(line_bytes - first_byte);
            let stride = tile.stride();
            let mut data = tile.data_mut();

            for row in 0..line_count as usize {
                let line = start_line as usize + row;
                let target = &mut data[row * stride..row * stride + count];
                for (col, byte) in target.iter_mut().enumerate() {
                    *byte = Self::expected_byte(first_byte + col, line);
                }
            }
        }

        Ok(())
    }
}
