//! Blob integration tests.
//!
//! Tests verify:
//! - Data survives compression triggered by handles going out of scope
//! - Newer writes win over compressions still in flight
//! - Aborted compressions hand their pages back to the pool
//! - Memory accounting returns to zero

use std::sync::Arc;
use std::thread;

use tiled_bitmap::{Blob, BlobStatus, Priority, COMPRESS_PRIORITY};

use super::test_utils::{blob_pattern, inline_context, pool_context, ManualScheduler};

const BLOB_SIZE: usize = 16 * 1024;

#[test]
fn test_sixteen_blobs_keep_distinct_values() {
    let context = inline_context(16, 64);
    let blobs: Vec<_> = (0..16).map(|_| Blob::new(BLOB_SIZE, &context)).collect();

    for (value, blob) in blobs.iter().enumerate() {
        drop(blob.initialize(value as u8));
    }
    assert!(blobs.iter().all(|blob| blob.status() == BlobStatus::Clean));

    for (value, blob) in blobs.iter().enumerate() {
        let data = blob.get_const();
        assert!(data.read().iter().all(|&b| b == value as u8));
    }
}

#[test]
fn test_blobs_survive_background_compression() {
    let (pool, context) = pool_context(4, 16, 64);
    let blobs: Vec<_> = (0..16).map(|_| Blob::new(BLOB_SIZE, &context)).collect();

    for (i, blob) in blobs.iter().enumerate() {
        blob.get()
            .write()
            .copy_from_slice(&blob_pattern(BLOB_SIZE, i as u8));
    }
    pool.wait_idle();

    for (i, blob) in blobs.iter().enumerate() {
        assert_eq!(blob.status(), BlobStatus::Clean);
        assert_eq!(
            &blob.get_const().read()[..],
            &blob_pattern(BLOB_SIZE, i as u8)[..]
        );
    }

    pool.wait_idle();
    let report = context.report();
    assert_eq!(report.resident_bytes, 0);
    assert!(report.compressed_bytes > 0);
    assert_eq!(report.decompressions, 16);
}

#[test]
fn test_update_while_compression_is_queued() {
    let scheduler = ManualScheduler::new();
    let context = tiled_bitmap::BlobContext::new(
        tiled_bitmap::PageProvider::new(16, 64),
        scheduler.clone(),
    );
    let blob = Blob::new(BLOB_SIZE, &context);

    blob.get()
        .write()
        .copy_from_slice(&blob_pattern(BLOB_SIZE, 1));
    assert_eq!(blob.status(), BlobStatus::Compressing);
    assert_eq!(scheduler.pending_at(COMPRESS_PRIORITY), 1);
    assert_eq!(COMPRESS_PRIORITY, Priority::Lowest);

    // Touching the blob aborts the queued compression.
    blob.get().write().fill(255);
    assert_eq!(context.report().aborted_compressions, 1);
    assert_eq!(scheduler.pending(), 2);

    scheduler.run_all();
    assert_eq!(blob.status(), BlobStatus::Clean);
    assert_eq!(context.report().compressions, 1);
    assert!(blob.get_const().read().iter().all(|&b| b == 255));
}

#[test]
fn test_concurrent_updates_keep_latest_value() {
    let (pool, context) = pool_context(4, 16, 256);
    let blobs: Arc<Vec<Blob>> = Arc::new((0..8).map(|_| Blob::new(BLOB_SIZE, &context)).collect());

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let blobs = Arc::clone(&blobs);
            thread::spawn(move || {
                for round in 0..20u8 {
                    for (i, blob) in blobs.iter().enumerate() {
                        if i % 4 == t {
                            blob.get().write().fill(round);
                        }
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }
    pool.wait_idle();

    for blob in blobs.iter() {
        assert_eq!(blob.status(), BlobStatus::Clean);
        assert!(blob.get_const().read().iter().all(|&b| b == 19));
    }
}

#[test]
fn test_aborted_compressions_do_not_leak_pages() {
    let (pool, context) = pool_context(2, 16, 64);
    let blob = Blob::new(BLOB_SIZE, &context);

    for round in 0..50u8 {
        blob.get().write().fill(round);
    }
    pool.wait_idle();

    let held = blob.get_const();
    assert!(held.read().iter().all(|&b| b == 49));

    // Resident again: every page is back in the pool.
    assert_eq!(context.provider().stats().live_pages(), 0);
    drop(held);
    pool.wait_idle();
    assert!(context.provider().stats().live_pages() > 0);
}

#[test]
fn test_dropping_blobs_releases_everything() {
    let (pool, context) = pool_context(2, 16, 64);
    let blobs: Vec<_> = (0..4).map(|_| Blob::new(BLOB_SIZE, &context)).collect();
    for (i, blob) in blobs.iter().enumerate() {
        drop(blob.initialize(i as u8));
    }
    pool.wait_idle();
    assert!(context.provider().stats().live_pages() > 0);

    drop(blobs);
    let report = context.report();
    assert_eq!(report.resident_bytes, 0);
    assert_eq!(report.compressed_bytes, 0);
    assert_eq!(context.provider().stats().live_pages(), 0);
}
