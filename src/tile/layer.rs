//! One zoom level of a tiled bitmap.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::compressed::{CompressedTile, TileInitializationObserver};
use super::handle::Tile;
use super::source::SourcePresentation;
use crate::error::{SourceError, TileError};
use crate::memory::BlobContext;
use crate::observe::Registration;
use crate::sched::{JobHandle, WeakQueue, DATA_FETCH_PRIORITY};

/// Outcome of a completed [`Layer::fetch_data`].
#[derive(Debug, Clone, Copy)]
pub struct FetchSummary {
    /// Tile rows filled
    pub rows: u32,
    /// Tiles filled and reported finished
    pub tiles: usize,
    /// Time from the first row job to the last
    pub elapsed: Duration,
}

/// A grid of tiles covering a `width` x `height` bitmap.
///
/// Positions outside the grid all map to one shared out-of-bounds tile.
pub struct Layer {
    depth: i32,
    width: u32,
    height: u32,
    bpp: u32,
    tile_size: u32,
    columns: u32,
    tiles: Vec<Vec<Arc<CompressedTile>>>,
    out_of_bounds: Arc<CompressedTile>,
    out_of_bounds_row: Vec<Arc<CompressedTile>>,
    context: BlobContext,
}

impl Layer {
    /// Build the grid. Every tile starts uninitialized and allocates nothing.
    pub fn new(
        depth: i32,
        width: u32,
        height: u32,
        bpp: u32,
        tile_size: u32,
        context: &BlobContext,
    ) -> Result<Arc<Self>, TileError> {
        if tile_size == 0 {
            return Err(TileError::InvalidGeometry("tile size must be non-zero".into()));
        }
        if bpp == 0 || (bpp % 8 != 0 && 8 % bpp != 0) {
            return Err(TileError::InvalidGeometry(format!(
                "unsupported bits per pixel: {}",
                bpp
            )));
        }
        if (tile_size as u64 * bpp as u64) % 8 != 0 {
            return Err(TileError::InvalidGeometry(format!(
                "{} pixels of {} bits do not fill whole bytes",
                tile_size, bpp
            )));
        }

        let columns = width.div_ceil(tile_size);
        let rows = height.div_ceil(tile_size);

        let tiles = (0..rows)
            .map(|j| {
                (0..columns)
                    .map(|i| CompressedTile::new(depth, i as i32, j as i32, bpp, tile_size, context))
                    .collect()
            })
            .collect();

        let out_of_bounds = CompressedTile::out_of_bounds(depth, bpp, tile_size, context);
        let out_of_bounds_row = vec![Arc::clone(&out_of_bounds); columns as usize];

        info!(
            depth,
            bpp,
            width,
            height,
            columns,
            rows,
            "Layer created"
        );

        Ok(Arc::new(Self {
            depth,
            width,
            height,
            bpp,
            tile_size,
            columns,
            tiles,
            out_of_bounds,
            out_of_bounds_row,
            context: context.clone(),
        }))
    }

    pub fn depth(&self) -> i32 {
        self.depth
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bpp(&self) -> u32 {
        self.bpp
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Number of tile columns.
    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Number of tile rows.
    pub fn rows(&self) -> u32 {
        self.tiles.len() as u32
    }

    pub fn tile_count(&self) -> usize {
        self.columns as usize * self.tiles.len()
    }

    /// Tile at column `i`, row `j`, or the out-of-bounds tile.
    pub fn get_tile(&self, i: i32, j: i32) -> &Arc<CompressedTile> {
        usize::try_from(j)
            .ok()
            .and_then(|j| self.tiles.get(j))
            .and_then(|row| usize::try_from(i).ok().and_then(|i| row.get(i)))
            .unwrap_or(&self.out_of_bounds)
    }

    /// Row `j` of tiles, or a row of out-of-bounds tiles.
    pub fn tile_row(&self, j: i32) -> &[Arc<CompressedTile>] {
        usize::try_from(j)
            .ok()
            .and_then(|j| self.tiles.get(j))
            .map_or(&self.out_of_bounds_row[..], |row| &row[..])
    }

    /// Iterate over every tile of the grid, row by row.
    pub fn tiles(&self) -> impl Iterator<Item = &Arc<CompressedTile>> {
        self.tiles.iter().flatten()
    }

    /// Register `observer` with every tile of the grid.
    ///
    /// The returned token unregisters it from all of them.
    pub fn register_init_observer(
        &self,
        observer: Arc<dyn TileInitializationObserver>,
    ) -> Registration {
        Registration::merge(
            self.tiles()
                .map(|tile| tile.register_init_observer(Arc::clone(&observer)))
                .collect(),
        )
    }

    /// Fill every tile from `source`, one row of tiles per job.
    ///
    /// Each row job initializes its tiles, hands them to
    /// [`SourcePresentation::fill_tiles`], reports them finished, and
    /// schedules the next row on `queue`. The handle resolves once the last
    /// row is done, or with the first source error (later rows are skipped
    /// and the failing row is not reported finished). Dropping every owner
    /// of `queue` cancels the remaining rows. `source.done()` is called
    /// exactly once in every case.
    pub fn fetch_data(
        self: &Arc<Self>,
        source: Arc<dyn SourcePresentation>,
        queue: WeakQueue,
    ) -> JobHandle<Result<FetchSummary, TileError>> {
        let (tx, rx) = oneshot::channel();
        let fetcher = DataFetcher {
            layer: Arc::clone(self),
            source,
            queue,
            row: 0,
            tiles: 0,
            started: Instant::now(),
            reply: Some(tx),
        };
        fetcher.schedule();
        JobHandle::new(rx)
    }
}

impl std::fmt::Debug for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("depth", &self.depth)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bpp", &self.bpp)
            .field("columns", &self.columns)
            .field("rows", &self.tiles.len())
            .finish()
    }
}

// =============================================================================
// Data Fetcher
// =============================================================================

struct DataFetcher {
    layer: Arc<Layer>,
    source: Arc<dyn SourcePresentation>,
    queue: WeakQueue,
    row: u32,
    tiles: usize,
    started: Instant,
    reply: Option<oneshot::Sender<Result<FetchSummary, TileError>>>,
}

impl DataFetcher {
    fn schedule(self) {
        let scheduler = Arc::clone(self.layer.context.scheduler());
        let queue = self.queue.clone();
        scheduler.submit(DATA_FETCH_PRIORITY, queue, Box::new(move || self.run()));
    }

    fn run(mut self) {
        if self.row < self.layer.rows() {
            if let Err(source) = self.fetch_row() {
                warn!(
                    depth = self.layer.depth,
                    row = self.row,
                    "Tile source failed: {}",
                    source
                );
                let row = self.row;
                self.finish(Err(TileError::Source { row, source }));
                return;
            }
            self.row += 1;
        }

        if self.row < self.layer.rows() {
            self.schedule();
        } else {
            let summary = FetchSummary {
                rows: self.row,
                tiles: self.tiles,
                elapsed: self.started.elapsed(),
            };
            info!(
                depth = self.layer.depth,
                rows = summary.rows,
                tiles = summary.tiles,
                elapsed_ms = summary.elapsed.as_millis() as u64,
                "Layer data fetched"
            );
            self.finish(Ok(summary));
        }
    }

    fn fetch_row(&mut self) -> Result<(), SourceError> {
        let layer = Arc::clone(&self.layer);
        let row = layer.tile_row(self.row as i32);

        let tiles: Vec<Arc<Tile>> = row.iter().filter_map(|tile| tile.initialize()).collect();

        let start_line = self.row * layer.tile_size;
        let line_count = layer.tile_size.min(layer.height - start_line);
        debug!(
            depth = layer.depth,
            row = self.row,
            start_line,
            line_count,
            "filling tile row"
        );

        self.source
            .fill_tiles(start_line, line_count, layer.tile_size, 0, &tiles)?;

        for tile in row {
            tile.report_finished();
        }
        self.tiles += tiles.len();

        Ok(())
    }

    fn finish(&mut self, result: Result<FetchSummary, TileError>) {
        if let Some(reply) = self.reply.take() {
            self.source.done();
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }
}

impl Drop for DataFetcher {
    fn drop(&mut self) {
        if self.reply.is_some() {
            debug!(
                depth = self.layer.depth,
                row = self.row,
                "tile fetch cancelled"
            );
            self.finish(Err(TileError::Cancelled));
        }
    }
}
