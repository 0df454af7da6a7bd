//! Tiles backed by compressible blobs.
//!
//! A [`CompressedTile`] ties one grid position of a layer to a [`Blob`]
//! holding its pixels and runs the tile lifecycle on top of the blob's own
//! state machine:
//!
//! ```text
//! Uninitialized --initialize()--> Normal <--> LoadingSynchronously
//!                                    ^
//!                                    +------> LoadingAsynchronously
//! OutOfBounds (never changes)
//! ```
//!
//! Observers see a coarser [`TileState`], computed by
//! [`TileStateInternal::project`] from the internal state and whether the
//! blob is resident.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};

use super::handle::{ConstTile, Tile, TileGeometry};
use crate::memory::{Blob, BlobContext, BlobStatus};
use crate::observe::{Observable, Registration};
use crate::sched::{Scheduler, TaskQueue, WeakQueue, LOAD_PRIORITY};

// =============================================================================
// Observers
// =============================================================================

/// Notified when a tile gets its memory and when its data is complete.
pub trait TileInitializationObserver: Send + Sync {
    /// The tile has been initialized. Observers registering later receive
    /// this immediately on registration.
    fn tile_created(&self, _tile: &Arc<CompressedTile>) {}

    /// Bulk filling of the tile has completed.
    fn tile_finished(&self, _tile: &Arc<CompressedTile>) {}
}

/// Notified whenever a tile's data is loaded into memory.
pub trait TileLoadingObserver: Send + Sync {
    fn tile_loaded(&self, tile: &Arc<ConstTile>);
}

// =============================================================================
// States
// =============================================================================

/// Lifecycle of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileStateInternal {
    /// No data yet
    Uninitialized,
    /// Backed by a blob, resident or not
    Normal,
    /// Placeholder outside the bitmap; never holds data
    OutOfBounds,
    /// A caller is loading the blob on its own thread
    LoadingSynchronously,
    /// A load job is queued on behalf of loading observers
    LoadingAsynchronously,
}

/// Tile state as presented to observers and renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TileState {
    Uninitialized,
    Unloaded,
    Loaded,
    OutOfBounds,
}

impl TileStateInternal {
    /// Map the internal state onto the observer vocabulary.
    ///
    /// `Normal` splits into `Loaded` and `Unloaded` depending on whether the
    /// blob is resident. A tile in the middle of loading is `Unloaded`.
    pub fn project(self, resident: bool) -> TileState {
        match self {
            TileStateInternal::Uninitialized => TileState::Uninitialized,
            TileStateInternal::OutOfBounds => TileState::OutOfBounds,
            TileStateInternal::Normal if resident => TileState::Loaded,
            TileStateInternal::Normal
            | TileStateInternal::LoadingSynchronously
            | TileStateInternal::LoadingAsynchronously => TileState::Unloaded,
        }
    }
}

struct Control {
    state: TileStateInternal,
    /// Queue of the pending asynchronous load, kept alive by the
    /// registrations of the observers waiting for it.
    queue: WeakQueue,
}

impl Control {
    /// An asynchronous load whose queue died will never run.
    fn cleanup(&mut self) {
        if self.state == TileStateInternal::LoadingAsynchronously && !self.queue.is_alive() {
            trace!("asynchronous load abandoned");
            self.state = TileStateInternal::Normal;
        }
    }
}

#[derive(Default)]
struct Handles {
    tile: Weak<Tile>,
    const_tile: Weak<ConstTile>,
}

// =============================================================================
// Compressed Tile
// =============================================================================

/// One tile of a layer.
pub struct CompressedTile {
    geometry: TileGeometry,
    blob: Blob,
    scheduler: Arc<dyn Scheduler>,
    control: Mutex<Control>,
    handles: Mutex<Handles>,
    init_observers: Observable<dyn TileInitializationObserver>,
    loading_observers: Observable<dyn TileLoadingObserver>,
}

impl CompressedTile {
    /// Create an uninitialized square tile of `tile_size` pixels.
    pub fn new(
        depth: i32,
        x: i32,
        y: i32,
        bpp: u32,
        tile_size: u32,
        context: &BlobContext,
    ) -> Arc<Self> {
        Self::with_state(
            TileGeometry {
                depth,
                x,
                y,
                width: tile_size,
                height: tile_size,
                bpp,
            },
            TileStateInternal::Uninitialized,
            context,
        )
    }

    /// Create the placeholder used for positions outside a layer.
    pub fn out_of_bounds(depth: i32, bpp: u32, tile_size: u32, context: &BlobContext) -> Arc<Self> {
        Self::with_state(
            TileGeometry {
                depth,
                x: -1,
                y: -1,
                width: tile_size,
                height: tile_size,
                bpp,
            },
            TileStateInternal::OutOfBounds,
            context,
        )
    }

    fn with_state(
        geometry: TileGeometry,
        state: TileStateInternal,
        context: &BlobContext,
    ) -> Arc<Self> {
        Arc::new(Self {
            geometry,
            blob: Blob::new(geometry.byte_len(), context),
            scheduler: Arc::clone(context.scheduler()),
            control: Mutex::new(Control {
                state,
                queue: WeakQueue::default(),
            }),
            handles: Mutex::new(Handles::default()),
            init_observers: Observable::new(),
            loading_observers: Observable::new(),
        })
    }

    pub fn geometry(&self) -> &TileGeometry {
        &self.geometry
    }

    pub fn depth(&self) -> i32 {
        self.geometry.depth
    }

    pub fn x(&self) -> i32 {
        self.geometry.x
    }

    pub fn y(&self) -> i32 {
        self.geometry.y
    }

    pub fn bpp(&self) -> u32 {
        self.geometry.bpp
    }

    /// State of the backing blob.
    pub fn blob_status(&self) -> BlobStatus {
        self.blob.status()
    }

    /// Observer-facing state.
    pub fn state(&self) -> TileState {
        self.internal_state().project(self.blob.is_resident())
    }

    pub fn internal_state(&self) -> TileStateInternal {
        let mut control = self.control.lock();
        control.cleanup();
        control.state
    }

    /// Give the tile zero-filled memory and return a writable handle.
    ///
    /// An already initialized tile keeps its data; its handle is returned as
    /// by [`get_tile_sync`](Self::get_tile_sync). The out-of-bounds tile
    /// yields `None`.
    pub fn initialize(self: &Arc<Self>) -> Option<Arc<Tile>> {
        let (zeroed, observers) = {
            let mut control = self.control.lock();
            match control.state {
                TileStateInternal::Uninitialized => {
                    let zeroed = self.blob.initialize(0);
                    control.state = TileStateInternal::Normal;
                    (Some(zeroed), self.init_observers.observers())
                }
                TileStateInternal::OutOfBounds => return None,
                _ => (None, Vec::new()),
            }
        };

        if zeroed.is_some() {
            debug!(
                depth = self.geometry.depth,
                x = self.geometry.x,
                y = self.geometry.y,
                "tile initialized"
            );
            for observer in observers {
                observer.tile_created(self);
            }
        }

        // Loading through the regular path notifies loading observers.
        let tile = self.get_tile_sync();
        drop(zeroed);
        tile
    }

    /// Writable handle, loading the blob on this thread if needed.
    ///
    /// Returns `None` for uninitialized and out-of-bounds tiles.
    pub fn get_tile_sync(&self) -> Option<Arc<Tile>> {
        if let Some(tile) = self.handles.lock().tile.upgrade() {
            return Some(tile);
        }

        // Keeps the blob resident until the writable handle exists.
        let _loaded = self.get_const_tile_sync()?;

        let mut handles = self.handles.lock();
        if let Some(tile) = handles.tile.upgrade() {
            return Some(tile);
        }
        let tile = Arc::new(Tile::new(self.geometry, self.blob.get()));
        handles.tile = Arc::downgrade(&tile);
        Some(tile)
    }

    /// Read-only handle, loading the blob on this thread if needed.
    ///
    /// Returns `None` for uninitialized and out-of-bounds tiles.
    pub fn get_const_tile_sync(&self) -> Option<Arc<ConstTile>> {
        self.load().map(|(tile, _)| tile)
    }

    /// Read-only handle if the data is already in memory.
    ///
    /// Never blocks on a load and never starts one; a tile that is being
    /// loaded by another thread yields `None`.
    pub fn get_const_tile_async(&self) -> Option<Arc<ConstTile>> {
        if matches!(
            self.control.lock().state,
            TileStateInternal::Uninitialized | TileStateInternal::OutOfBounds
        ) {
            return None;
        }

        let mut handles = self.handles.try_lock()?;
        if let Some(tile) = handles.const_tile.upgrade() {
            return Some(tile);
        }

        let data = self.blob.try_get_const()?;
        let tile = Arc::new(ConstTile::new(self.geometry, data));
        handles.const_tile = Arc::downgrade(&tile);
        Some(tile)
    }

    /// Signal that bulk filling of this tile is complete.
    ///
    /// Initialization observers get `tile_finished`; loading observers get
    /// `tile_loaded` so they pick up the new data.
    pub fn report_finished(self: &Arc<Self>) {
        let Some((tile, did_load)) = self.load() else {
            warn!(
                depth = self.geometry.depth,
                x = self.geometry.x,
                y = self.geometry.y,
                "Finished reported for a tile without data"
            );
            return;
        };

        for observer in self.init_observers.observers() {
            observer.tile_finished(self);
        }
        if !did_load {
            for observer in self.loading_observers.observers() {
                observer.tile_loaded(&tile);
            }
        }
    }

    /// Register an initialization observer.
    ///
    /// If the tile is already initialized the observer gets `tile_created`
    /// before this returns.
    pub fn register_init_observer(
        self: &Arc<Self>,
        observer: Arc<dyn TileInitializationObserver>,
    ) -> Registration {
        let (registration, initialized) = {
            let control = self.control.lock();
            let registration = self.init_observers.register(Arc::clone(&observer));
            let initialized = !matches!(
                control.state,
                TileStateInternal::Uninitialized | TileStateInternal::OutOfBounds
            );
            (registration, initialized)
        };

        if initialized {
            observer.tile_created(self);
        }
        registration
    }

    /// Register a loading observer.
    ///
    /// A resident tile reports `tile_loaded` right away. Otherwise an
    /// asynchronous load is queued; dropping every registration waiting for
    /// it cancels the load.
    pub fn register_loading_observer(
        self: &Arc<Self>,
        observer: Arc<dyn TileLoadingObserver>,
    ) -> Registration {
        // Loads create the read-only handle and snapshot observers under the
        // handles lock, so holding it here means any later load sees us.
        let (mut registration, loaded, queue, start_load) = {
            let handles = self.handles.lock();
            let mut control = self.control.lock();
            let registration = self.loading_observers.register(Arc::clone(&observer));

            match handles.const_tile.upgrade() {
                Some(tile) => (registration, Some(tile), None, false),
                None => {
                    control.cleanup();
                    match control.state {
                        TileStateInternal::Normal => {
                            let queue = control.queue.upgrade().unwrap_or_else(|| {
                                let queue = TaskQueue::new();
                                control.queue = queue.downgrade();
                                queue
                            });
                            control.state = TileStateInternal::LoadingAsynchronously;
                            (registration, None, Some(queue), true)
                        }
                        TileStateInternal::LoadingAsynchronously => {
                            (registration, None, control.queue.upgrade(), false)
                        }
                        _ => (registration, None, None, false),
                    }
                }
            }
        };

        if let Some(queue) = queue {
            if start_load {
                trace!(
                    depth = self.geometry.depth,
                    x = self.geometry.x,
                    y = self.geometry.y,
                    "queueing asynchronous load"
                );
                let tile = Arc::downgrade(self);
                self.scheduler.submit(
                    LOAD_PRIORITY,
                    queue.downgrade(),
                    Box::new(move || {
                        if let Some(tile) = tile.upgrade() {
                            let _ = tile.load();
                        }
                    }),
                );
            }
            registration.attach(queue);
        }

        if let Some(tile) = loaded {
            observer.tile_loaded(&tile);
        }
        registration
    }

    /// Make the blob resident behind a read-only handle.
    ///
    /// The flag tells whether a new handle was created, in which case the
    /// loading observers have been notified.
    fn load(&self) -> Option<(Arc<ConstTile>, bool)> {
        {
            let mut control = self.control.lock();
            control.cleanup();
            match control.state {
                TileStateInternal::Uninitialized | TileStateInternal::OutOfBounds => return None,
                _ => control.state = TileStateInternal::LoadingSynchronously,
            }
        }

        let (tile, observers) = {
            let mut handles = self.handles.lock();
            let (tile, observers) = match handles.const_tile.upgrade() {
                Some(tile) => (tile, None),
                None => {
                    let tile = Arc::new(ConstTile::new(self.geometry, self.blob.get_const()));
                    handles.const_tile = Arc::downgrade(&tile);
                    (tile, Some(self.loading_observers.observers()))
                }
            };

            let mut control = self.control.lock();
            control.cleanup();
            control.state = TileStateInternal::Normal;
            (tile, observers)
        };

        let did_load = observers.is_some();
        for observer in observers.into_iter().flatten() {
            observer.tile_loaded(&tile);
        }

        Some((tile, did_load))
    }
}

impl std::fmt::Debug for CompressedTile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompressedTile")
            .field("depth", &self.geometry.depth)
            .field("x", &self.geometry.x)
            .field("y", &self.geometry.y)
            .field("bpp", &self.geometry.bpp)
            .field("state", &self.internal_state())
            .finish()
    }
}
