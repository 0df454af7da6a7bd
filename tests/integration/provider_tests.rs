//! Page provider integration tests.
//!
//! Tests verify:
//! - Concurrent allocation never hands the same page to two owners
//! - Pages keep their contents after the provider is gone

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tiled_bitmap::PageProvider;

#[test]
fn test_concurrent_pages_are_distinct() {
    const THREADS: usize = 8;
    const PAGES: usize = 200;

    let provider = PageProvider::new(16, 64);

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let provider = provider.clone();
            thread::spawn(move || {
                let pages: Vec<_> = (0..PAGES)
                    .map(|_| {
                        let page = provider.get_free_page();
                        page.get().unwrap().fill(t as u8);
                        page
                    })
                    .collect();
                // Nobody else wrote into our pages meanwhile.
                for page in &pages {
                    assert!(page.get().unwrap().iter().all(|&b| b == t as u8));
                }
                pages
            })
        })
        .collect();

    let all: Vec<_> = handles
        .into_iter()
        .flat_map(|handle| handle.join().unwrap())
        .collect();

    let addresses: HashSet<usize> = all
        .iter()
        .map(|page| page.get().unwrap().as_ptr() as usize)
        .collect();
    assert_eq!(addresses.len(), THREADS * PAGES);

    let stats = provider.stats();
    assert_eq!(stats.live_pages(), THREADS * PAGES);
    assert_eq!(stats.total_pages % 16, 0);

    drop(all);
    assert_eq!(provider.stats().live_pages(), 0);
}

#[test]
fn test_pages_outlive_provider() {
    let provider = PageProvider::new(16, 256);
    let pages: Vec<_> = (0..48u8)
        .map(|i| {
            let page = provider.get_free_page();
            page.get().unwrap().fill(i);
            page
        })
        .collect();
    drop(provider);

    for (i, page) in pages.iter().enumerate() {
        let raw = page.get().unwrap();
        assert_eq!(raw.len(), 256);
        assert!(raw.iter().all(|&b| b == i as u8));
    }
}

#[test]
fn test_pool_is_reused_after_release() {
    let provider = Arc::new(PageProvider::new(4, 128));

    for _ in 0..10 {
        let pages: Vec<_> = (0..8).map(|_| provider.get_free_page()).collect();
        drop(pages);
    }

    let stats = provider.stats();
    assert_eq!(stats.blocks, 2);
    assert_eq!(stats.free_pages, 8);
}
