//! Accessor handles for a tile's pixel data.
//!
//! A [`Tile`] grants write access, a [`ConstTile`] read access. Either one
//! keeps the tile's blob in memory for as long as it lives.

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard};

use crate::memory::{BlobConstRef, BlobRef};

/// Position and pixel geometry of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    /// Zoom depth of the owning layer
    pub depth: i32,
    /// Column in the layer grid (-1 for the out-of-bounds tile)
    pub x: i32,
    /// Row in the layer grid (-1 for the out-of-bounds tile)
    pub y: i32,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Bits per pixel
    pub bpp: u32,
}

impl TileGeometry {
    /// Bytes per pixel row.
    pub fn stride(&self) -> usize {
        self.width as usize * self.bpp as usize / 8
    }

    /// Bytes of pixel data in the whole tile.
    pub fn byte_len(&self) -> usize {
        self.stride() * self.height as usize
    }
}

/// Writable view of a tile's pixels.
#[derive(Debug)]
pub struct Tile {
    geometry: TileGeometry,
    data: BlobRef,
}

impl Tile {
    pub(crate) fn new(geometry: TileGeometry, data: BlobRef) -> Self {
        Self { geometry, data }
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn bpp(&self) -> u32 {
        self.geometry.bpp
    }

    pub fn stride(&self) -> usize {
        self.geometry.stride()
    }

    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        self.data.read()
    }

    pub fn data_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        self.data.write()
    }
}

/// Read-only view of a tile's pixels.
#[derive(Debug)]
pub struct ConstTile {
    geometry: TileGeometry,
    data: BlobConstRef,
}

impl ConstTile {
    pub(crate) fn new(geometry: TileGeometry, data: BlobConstRef) -> Self {
        Self { geometry, data }
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    pub fn bpp(&self) -> u32 {
        self.geometry.bpp
    }

    pub fn stride(&self) -> usize {
        self.geometry.stride()
    }

    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        self.data.read()
    }
}
