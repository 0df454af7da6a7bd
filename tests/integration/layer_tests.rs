//! Layer integration tests.
//!
//! Tests verify:
//! - fetch_data fills every tile row by row and reports it finished
//! - Source failures stop the load and leave the failing row unfinished
//! - Dropping the task queue cancels the remaining rows
//! - Filled tiles compress and read back intact

use std::sync::Arc;

use tiled_bitmap::{
    BlobContext, BlobStatus, Layer, LoadProgress, PageProvider, Priority, TaskQueue, TileError,
    TileState, WeakQueue, DATA_FETCH_PRIORITY,
};

use super::test_utils::{
    inline_context, pool_context, ManualScheduler, RecordingObserver, RecordingSource,
};

#[test]
fn test_fetch_fills_every_tile() {
    let context = inline_context(16, 1024);
    let layer = Layer::new(0, 100, 70, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(100, 70, 8, 32));
    let observer = RecordingObserver::new();
    let _registration = layer.register_init_observer(observer.clone());

    let summary = layer
        .fetch_data(source.clone(), WeakQueue::detached())
        .wait()
        .unwrap()
        .unwrap();

    assert_eq!(summary.rows, 3);
    assert_eq!(summary.tiles, 12);
    assert_eq!(source.lines(), vec![(0, 32), (32, 32), (64, 6)]);
    assert_eq!(source.done_calls(), 1);
    assert_eq!(observer.created().len(), 12);
    assert_eq!(observer.finished().len(), 12);

    for tile in layer.tiles() {
        assert_eq!(tile.state(), TileState::Unloaded);
        assert_eq!(tile.blob_status(), BlobStatus::Clean);
        let data = tile.get_const_tile_sync().unwrap();
        assert!(source.pattern().matches(&data), "tile {:?}", data.geometry());
    }
}

#[test]
fn test_fetch_on_thread_pool() {
    let (pool, context) = pool_context(4, 16, 4096);
    let layer = Layer::new(1, 300, 200, 24, 64, &context).unwrap();
    let source = Arc::new(RecordingSource::new(300, 200, 24, 64));
    let progress = Arc::new(LoadProgress::new(layer.tile_count()));
    let _registration = layer.register_init_observer(progress.clone());
    let queue = TaskQueue::new();

    let result = layer.fetch_data(source.clone(), queue.downgrade()).wait();
    assert!(matches!(result, Some(Ok(_))));
    assert!(progress.is_complete());
    assert_eq!(progress.created(), 20);

    pool.wait_idle();
    assert_eq!(context.report().resident_bytes, 0);

    for tile in layer.tiles() {
        let data = tile.get_const_tile_sync().unwrap();
        assert!(source.pattern().matches(&data));
    }
}

#[tokio::test]
async fn test_fetch_handle_is_awaitable() {
    let (_pool, context) = pool_context(2, 16, 1024);
    let layer = Layer::new(0, 64, 64, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(64, 64, 8, 32));
    let queue = TaskQueue::new();

    let summary = layer
        .fetch_data(source.clone(), queue.downgrade())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(summary.tiles, 4);
    assert_eq!(source.done_calls(), 1);
}

#[test]
fn test_empty_layer_fetch_completes() {
    let context = inline_context(16, 1024);
    let layer = Layer::new(0, 0, 0, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(0, 0, 8, 32));

    let summary = layer
        .fetch_data(source.clone(), WeakQueue::detached())
        .wait()
        .unwrap()
        .unwrap();

    assert_eq!(summary.rows, 0);
    assert_eq!(summary.tiles, 0);
    assert_eq!(source.fills(), 0);
    assert_eq!(source.done_calls(), 1);
}

#[test]
fn test_source_failure_stops_load() {
    let context = inline_context(16, 1024);
    let layer = Layer::new(0, 64, 96, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(64, 96, 8, 32).failing_on_row(1));
    let observer = RecordingObserver::new();
    let _registration = layer.register_init_observer(observer.clone());

    let result = layer
        .fetch_data(source.clone(), WeakQueue::detached())
        .wait()
        .unwrap();

    assert!(matches!(result, Err(TileError::Source { row: 1, .. })));
    assert_eq!(source.fills(), 2);
    assert_eq!(source.done_calls(), 1);

    // Row 1 was initialized but never finished; row 2 was never touched.
    let mut finished = observer.finished();
    finished.sort();
    assert_eq!(finished, vec![(0, 0), (1, 0)]);
    assert_eq!(observer.created().len(), 4);
    assert_eq!(layer.get_tile(0, 2).state(), TileState::Uninitialized);
}

#[test]
fn test_rows_are_pipelined_through_the_queue() {
    let scheduler = ManualScheduler::new();
    let context = BlobContext::new(PageProvider::new(16, 1024), scheduler.clone());
    let layer = Layer::new(0, 64, 96, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(64, 96, 8, 32));
    let queue = TaskQueue::new();

    let mut handle = layer.fetch_data(source.clone(), queue.downgrade());
    assert_eq!(scheduler.pending_at(DATA_FETCH_PRIORITY), 1);
    assert_eq!(DATA_FETCH_PRIORITY, Priority::High);

    // One row per job; the next row is queued behind compression jobs.
    assert!(scheduler.run_next());
    assert_eq!(source.fills(), 1);
    assert!(handle.try_take().is_none());

    scheduler.run_all();
    assert_eq!(source.fills(), 3);
    assert!(matches!(handle.try_take(), Some(Ok(_))));
}

#[test]
fn test_dropping_queue_cancels_remaining_rows() {
    let scheduler = ManualScheduler::new();
    let context = BlobContext::new(PageProvider::new(16, 1024), scheduler.clone());
    let layer = Layer::new(0, 64, 96, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(64, 96, 8, 32));
    let queue = TaskQueue::new();

    let handle = layer.fetch_data(source.clone(), queue.downgrade());
    assert!(scheduler.run_next());
    drop(queue);
    scheduler.run_all();

    assert_eq!(source.fills(), 1);
    assert_eq!(source.done_calls(), 1);
    assert!(matches!(handle.wait(), Some(Err(TileError::Cancelled))));
    assert_eq!(layer.get_tile(0, 1).state(), TileState::Uninitialized);
}

#[test]
fn test_renderer_sees_only_resident_tiles() {
    let context = inline_context(16, 1024);
    let layer = Layer::new(0, 64, 64, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(64, 64, 8, 32));
    layer
        .fetch_data(source, WeakQueue::detached())
        .wait()
        .unwrap()
        .unwrap();

    // Everything is compressed; the render path gets nothing and loads nothing.
    for tile in layer.tiles() {
        assert!(tile.get_const_tile_async().is_none());
        assert_eq!(tile.blob_status(), BlobStatus::Clean);
    }
    assert!(layer.get_tile(5, 5).get_const_tile_async().is_none());

    let held = layer.get_tile(1, 0).get_const_tile_sync().unwrap();
    let fast = layer.get_tile(1, 0).get_const_tile_async().unwrap();
    assert!(Arc::ptr_eq(&held, &fast));
}

#[test]
fn test_sentinel_is_shared_and_stays_out_of_bounds() {
    let context = inline_context(16, 1024);
    let layer = Layer::new(3, 64, 64, 8, 32, &context).unwrap();
    let sentinel = layer.get_tile(-1, -1);

    for (i, j) in [(2, 0), (0, 2), (-5, 1), (100, 100)] {
        let tile = layer.get_tile(i, j);
        assert!(Arc::ptr_eq(tile, sentinel));
        assert!(tile.initialize().is_none());
        assert!(tile.get_tile_sync().is_none());
        assert_eq!(tile.state(), TileState::OutOfBounds);
    }
    assert_eq!(sentinel.depth(), 3);
}
