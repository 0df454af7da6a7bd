//! Tile observer integration tests.
//!
//! Tests verify:
//! - Initialization observers see every tile created and finished
//! - Late observers are told about tiles that already exist
//! - Loading observers trigger one shared asynchronous load
//! - Dropping the last registration cancels a pending load

use std::sync::Arc;

use tiled_bitmap::{
    BlobContext, BlobStatus, Layer, PageProvider, TileState, TileStateInternal, WeakQueue,
    LOAD_PRIORITY,
};

use super::test_utils::{
    inline_context, pool_context, ManualScheduler, RecordingObserver, RecordingSource,
};

/// A 2x2 layer filled and compressed through a manual scheduler.
fn filled_layer() -> (Arc<ManualScheduler>, Arc<Layer>) {
    let scheduler = ManualScheduler::new();
    let context = BlobContext::new(PageProvider::new(16, 1024), scheduler.clone());
    let layer = Layer::new(0, 64, 64, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(64, 64, 8, 32));

    let handle = layer.fetch_data(source, WeakQueue::detached());
    scheduler.run_all();
    assert!(matches!(handle.wait(), Some(Ok(_))));
    assert!(layer
        .tiles()
        .all(|tile| tile.blob_status() == BlobStatus::Clean));

    (scheduler, layer)
}

#[test]
fn test_init_observer_follows_the_fetch() {
    let context = inline_context(16, 1024);
    let layer = Layer::new(0, 96, 64, 8, 32, &context).unwrap();
    let observer = RecordingObserver::new();
    let registration = layer.register_init_observer(observer.clone());
    assert!(observer.created().is_empty());

    layer
        .fetch_data(
            Arc::new(RecordingSource::new(96, 64, 8, 32)),
            WeakQueue::detached(),
        )
        .wait()
        .unwrap()
        .unwrap();

    // Rows are processed in order, left to right.
    assert_eq!(
        observer.finished(),
        vec![(0, 0), (1, 0), (2, 0), (0, 1), (1, 1), (2, 1)]
    );
    assert_eq!(observer.created(), observer.finished());

    drop(registration);
    for tile in layer.tiles() {
        tile.report_finished();
    }
    assert_eq!(observer.finished().len(), 6);
}

#[test]
fn test_late_observer_sees_existing_tiles() {
    let (_scheduler, layer) = filled_layer();
    let observer = RecordingObserver::new();

    let _registration = layer.register_init_observer(observer.clone());

    let mut created = observer.created();
    created.sort();
    assert_eq!(created, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
    assert!(observer.finished().is_empty());
}

#[test]
fn test_loading_observer_triggers_async_load() {
    let (scheduler, layer) = filled_layer();
    let tile = layer.get_tile(1, 0);
    let observer = RecordingObserver::new();

    let _registration = tile.register_loading_observer(observer.clone());
    assert_eq!(scheduler.pending_at(LOAD_PRIORITY), 1);
    assert_eq!(
        tile.internal_state(),
        TileStateInternal::LoadingAsynchronously
    );
    assert_eq!(tile.state(), TileState::Unloaded);
    assert!(observer.loaded().is_empty());

    scheduler.run_all();
    assert_eq!(observer.loaded(), vec![(1, 0)]);
    assert_eq!(tile.internal_state(), TileStateInternal::Normal);
}

#[test]
fn test_observers_share_one_load() {
    let (scheduler, layer) = filled_layer();
    let tile = layer.get_tile(0, 1);
    let first = RecordingObserver::new();
    let second = RecordingObserver::new();

    let first_registration = tile.register_loading_observer(first.clone());
    let _second_registration = tile.register_loading_observer(second.clone());
    assert_eq!(scheduler.pending_at(LOAD_PRIORITY), 1);

    // The remaining registration keeps the load alive.
    drop(first_registration);
    assert_eq!(
        tile.internal_state(),
        TileStateInternal::LoadingAsynchronously
    );

    scheduler.run_all();
    assert!(first.loaded().is_empty());
    assert_eq!(second.loaded(), vec![(0, 1)]);
}

#[test]
fn test_dropping_registrations_cancels_load() {
    let (scheduler, layer) = filled_layer();
    let tile = layer.get_tile(1, 1);
    let observer = RecordingObserver::new();

    let registration = tile.register_loading_observer(observer.clone());
    drop(registration);
    assert_eq!(tile.internal_state(), TileStateInternal::Normal);

    scheduler.run_all();
    assert!(observer.loaded().is_empty());
    assert_eq!(tile.blob_status(), BlobStatus::Clean);
}

#[test]
fn test_async_load_on_thread_pool() {
    let (pool, context) = pool_context(2, 16, 1024);
    let layer = Layer::new(0, 64, 32, 8, 32, &context).unwrap();
    let source = Arc::new(RecordingSource::new(64, 32, 8, 32));
    layer
        .fetch_data(source.clone(), WeakQueue::detached())
        .wait()
        .unwrap()
        .unwrap();
    pool.wait_idle();

    let observer = RecordingObserver::new();
    let _registrations: Vec<_> = layer
        .tiles()
        .map(|tile| tile.register_loading_observer(observer.clone()))
        .collect();
    pool.wait_idle();

    let mut loaded = observer.loaded();
    loaded.sort();
    assert_eq!(loaded, vec![(0, 0), (1, 0)]);
    for tile in layer.tiles() {
        assert_eq!(tile.internal_state(), TileStateInternal::Normal);
        let data = tile.get_const_tile_sync().unwrap();
        assert!(source.pattern().matches(&data));
    }
}

#[test]
fn test_fast_path_notifies_nobody() {
    let (scheduler, layer) = filled_layer();
    let tile = layer.get_tile(0, 0);
    let observer = RecordingObserver::new();

    let held = tile.get_const_tile_sync().unwrap();
    let _registration = tile.register_loading_observer(observer.clone());
    assert_eq!(observer.loaded(), vec![(0, 0)]);
    assert_eq!(scheduler.pending_at(LOAD_PRIORITY), 0);

    // Handing out the resident data again is not a load.
    let fast = tile.get_const_tile_async().unwrap();
    assert!(Arc::ptr_eq(&held, &fast));
    assert_eq!(observer.loaded().len(), 1);

    // A fresh load after compression is.
    drop(held);
    drop(fast);
    scheduler.run_all();
    assert_eq!(tile.blob_status(), BlobStatus::Clean);
    let _again = tile.get_const_tile_sync().unwrap();
    assert_eq!(observer.loaded().len(), 2);
}
