//! Consistency properties of the cache layer under churn, misses and outages

mod common;

use common::{ids, thread, Harness};
use feed_cache::{CacheBackend, CacheKey, CursorRequest, PageRequest, Provenance};

#[tokio::test]
async fn test_index_never_exceeds_cap() {
    let harness = Harness::with_max_len(200);
    for i in 0..450 {
        harness.create(thread(&format!("t{:04}", i), "u1", i)).await;
        let (_, total) = harness.index.window(0, 1).await.unwrap();
        assert!(total <= 200, "index grew to {} after create {}", total, i);
    }
    let ids = harness.index_ids().await;
    assert_eq!(ids.len(), 200);
    assert_eq!(ids[0], "t0449");
    assert_eq!(ids[199], "t0250");
}

#[tokio::test]
async fn test_reconciled_pages_match_store_pages() {
    let harness = Harness::new();
    for i in 0..30 {
        // Pairs share a timestamp so the id tie-break matters
        harness.store.insert(thread(&format!("t{:02}", i), "u1", i / 2));
    }
    harness.index.preload(harness.store.as_ref()).await.unwrap();

    // Evict an irregular mix of snapshots
    let evicted: Vec<String> = (0..30)
        .filter(|i| i % 3 == 0 || i % 7 == 0)
        .map(|i| CacheKey::thread(&format!("t{:02}", i)))
        .collect();
    harness.backend.del(&evicted).await.unwrap();

    for page in 1..=4 {
        let request = PageRequest { page, limit: 8 };
        let reconciled = harness.reconciler.page(request).await.unwrap();

        harness.backend.set_available(false);
        let fallback = harness.reconciler.page(request).await.unwrap();
        harness.backend.set_available(true);

        assert_eq!(reconciled.provenance, Provenance::Cache);
        assert_eq!(fallback.provenance, Provenance::Store);
        assert_eq!(ids(&reconciled.items), ids(&fallback.items), "page {}", page);
        assert_eq!(reconciled.next_page, fallback.next_page, "page {}", page);
    }
}

#[tokio::test]
async fn test_preload_twice_equals_once() {
    let harness = Harness::new();
    for i in 0..12 {
        harness.store.insert(thread(&format!("t{}", i), "u1", i));
    }

    harness.index.preload(harness.store.as_ref()).await.unwrap();
    let once = harness.index_ids().await;
    harness.index.preload(harness.store.as_ref()).await.unwrap();
    assert_eq!(harness.index_ids().await, once);
}

#[tokio::test]
async fn test_total_outage_still_serves_and_writes() {
    let harness = Harness::new();
    for i in 1..=3 {
        harness.create(thread(&format!("t{}", i), "u1", i)).await;
    }
    harness.backend.set_available(false);

    let page = harness
        .reconciler
        .page(PageRequest { page: 1, limit: 2 })
        .await
        .unwrap();
    assert_eq!(ids(&page.items), vec!["t3", "t2"]);
    assert_eq!(page.provenance, Provenance::Store);

    // Store writes still go through; the caches are simply left behind
    harness.create(thread("t4", "u1", 4)).await;
    harness.delete("t1").await;
    let page = harness
        .reconciler
        .page(PageRequest { page: 1, limit: 10 })
        .await
        .unwrap();
    assert_eq!(ids(&page.items), vec!["t4", "t3", "t2"]);

    let home = harness
        .home
        .page("u1", &CursorRequest::new(Some(10), None))
        .await
        .unwrap();
    assert_eq!(home.items.len(), 3);
}

#[tokio::test]
async fn test_follower_pages_stay_stale_until_expiry() {
    let harness = Harness::new();
    harness.store.follow("reader", "writer");
    harness.create(thread("t1", "writer", 1)).await;
    let request = CursorRequest::new(Some(10), None);

    let before = harness.home.page("reader", &request).await.unwrap();
    assert_eq!(before.items.len(), 1);

    harness.create(thread("t2", "writer", 2)).await;
    // Author's pages are dropped, the follower's are not
    assert_eq!(harness.home.page("reader", &request).await.unwrap(), before);
    assert_eq!(harness.home.page("writer", &request).await.unwrap().items.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_home_page_expires_after_ttl() {
    let harness = Harness::new();
    harness.store.follow("reader", "writer");
    harness.create(thread("t1", "writer", 1)).await;
    let request = CursorRequest::new(Some(10), None);

    harness.home.page("reader", &request).await.unwrap();
    harness.create(thread("t2", "writer", 2)).await;

    tokio::time::advance(std::time::Duration::from_secs(feed_cache::ttl::HOME_PAGE + 1)).await;
    assert_eq!(harness.home.page("reader", &request).await.unwrap().items.len(), 2);
}

#[tokio::test]
async fn test_follow_bundle_and_page_invalidation() {
    let harness = Harness::new();
    harness.create(thread("t1", "writer", 1)).await;
    let request = CursorRequest::new(Some(10), None);
    assert!(harness.home.page("reader", &request).await.unwrap().items.is_empty());

    harness.store.follow("reader", "writer");
    let report = harness.writer.on_followed("reader", "writer").await;
    assert!(report.applied);
    assert_eq!(report.pages_invalidated, 1);

    assert_eq!(harness.home.page("reader", &request).await.unwrap().items.len(), 1);
    assert_eq!(
        harness.backend.get(&CacheKey::followers_count("writer")).await.unwrap(),
        Some("1".to_string())
    );
    assert_eq!(
        harness.backend.get(&CacheKey::following_count("reader")).await.unwrap(),
        Some("1".to_string())
    );
}

#[tokio::test]
async fn test_follow_counts_track_the_graph_under_replays() {
    let harness = Harness::new();
    harness.store.follow("fan", "writer");
    harness.store.follow("reader", "writer");

    // Trigger delivered twice for the same edge
    assert!(harness.writer.on_followed("reader", "writer").await.applied);
    assert!(harness.writer.on_followed("reader", "writer").await.applied);
    assert_eq!(
        harness.backend.get(&CacheKey::followers_count("writer")).await.unwrap(),
        Some("2".to_string())
    );

    // Unfollow for users the cache has never seen
    assert!(harness.writer.on_unfollowed("ghost", "nobody").await.applied);
    assert_eq!(
        harness.backend.get(&CacheKey::followers_count("nobody")).await.unwrap(),
        Some("0".to_string())
    );
    assert_eq!(
        harness.backend.get(&CacheKey::following_count("ghost")).await.unwrap(),
        Some("0".to_string())
    );
}
