// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests against a real Redis (cache + stream).
//!
//! These require Docker and are ignored by default.
//!
//! Run with: cargo test --test integration -- --ignored --nocapture

mod common;

use common::TestRedis;
use std::sync::Arc;
use std::time::Duration;
use stock_sync::resilience::{connect_redis, RetryConfig};
use stock_sync::stream::DeliverySource;
use stock_sync::{
    AvailabilityCache, ProductId, RedisCache, RedisStockService, RedisStreamSource, ServiceState,
    StockError, StockSyncConfig,
};
use testcontainers::clients::Cli;

const STREAM: &str = "stock.available";
const GROUP: &str = "processor";

async fn cache_for(redis: &TestRedis<'_>) -> RedisCache {
    let conn = connect_redis(&redis.url, &RetryConfig::testing(), "cache")
        .await
        .unwrap();
    RedisCache::new(conn, "stock:product:")
}

async fn source_for(redis: &TestRedis<'_>, consumer: &str) -> RedisStreamSource {
    let conn = connect_redis(&redis.url, &RetryConfig::testing(), "stream")
        .await
        .unwrap();
    RedisStreamSource::new(
        conn,
        STREAM,
        GROUP,
        consumer,
        Duration::from_millis(100),
        10,
    )
}

/// Poll `check` until it returns true or two seconds pass.
async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// =============================================================================
// RedisCache
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_cache_uses_namespace_and_ttl() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let cache = cache_for(&redis).await;

    cache
        .set(ProductId(42), 7, Duration::from_secs(600))
        .await
        .unwrap();

    assert_eq!(cache.get(ProductId(42)).await.unwrap(), Some(7));
    assert_eq!(redis.get_raw("stock:product:42").await.unwrap(), Some("7".to_string()));

    let pttl = redis.pttl("stock:product:42").await.unwrap();
    assert!(pttl > 0 && pttl <= 600_000, "pttl {}", pttl);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_cache_zero_ttl_leaves_key_absent() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let cache = cache_for(&redis).await;

    cache.set(ProductId(1), 5, Duration::from_secs(60)).await.unwrap();
    cache.set(ProductId(1), 9, Duration::ZERO).await.unwrap();

    assert_eq!(cache.get(ProductId(1)).await.unwrap(), None);
    assert_eq!(redis.pttl("stock:product:1").await.unwrap(), -2);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_cache_rejects_non_numeric_value() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let cache = cache_for(&redis).await;

    redis.set_raw("stock:product:3", "lots").await.unwrap();
    assert!(matches!(
        cache.get(ProductId(3)).await,
        Err(StockError::CacheFault { .. })
    ));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn redis_cache_expires_entries() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let cache = cache_for(&redis).await;

    cache.set(ProductId(2), 4, Duration::from_millis(50)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get(ProductId(2)).await.unwrap(), None);
}

// =============================================================================
// RedisStreamSource
// =============================================================================

#[tokio::test]
#[ignore] // Requires Docker
async fn stream_group_creation_is_idempotent() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let source = source_for(&redis, "c1").await;

    source.ensure_group().await.unwrap();
    source.ensure_group().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Docker
async fn stream_delivers_pending_until_acked() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let source = source_for(&redis, "c1").await;
    source.ensure_group().await.unwrap();

    let id = redis.publish_event(STREAM, 5, 3).await.unwrap();

    let fresh = source.fetch_new().await.unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].stream_id, id);
    assert_eq!(fresh[0].payload, br#"{"product_id":5,"available":3}"#.to_vec());

    // Delivered but unacknowledged: visible to pending replay, not to new reads.
    assert!(source.fetch_new().await.unwrap().is_empty());
    let pending = source.fetch_pending("0").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].stream_id, id);
    assert!(source.fetch_pending(&id).await.unwrap().is_empty());

    source.ack(&id).await.unwrap();
    assert!(source.fetch_pending("0").await.unwrap().is_empty());
    assert_eq!(redis.pending_count(STREAM, GROUP).await.unwrap(), 0);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn new_group_delivers_events_published_before_it() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);

    let early = redis.publish_event(STREAM, 12, 4).await.unwrap();

    let source = source_for(&redis, "c1").await;
    source.ensure_group().await.unwrap();
    redis.publish_event(STREAM, 13, 5).await.unwrap();

    let fresh = source.fetch_new().await.unwrap();
    assert_eq!(fresh.len(), 2);
    assert_eq!(fresh[0].stream_id, early);

    // An existing group keeps its position.
    source.ensure_group().await.unwrap();
    assert!(source.fetch_new().await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires Docker
async fn stream_pending_is_per_consumer() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);
    let first = source_for(&redis, "c1").await;
    let second = source_for(&redis, "c2").await;
    first.ensure_group().await.unwrap();

    redis.publish_event(STREAM, 1, 1).await.unwrap();
    assert_eq!(first.fetch_new().await.unwrap().len(), 1);

    assert!(second.fetch_pending("0").await.unwrap().is_empty());
    assert_eq!(first.fetch_pending("0").await.unwrap().len(), 1);
}

// =============================================================================
// Full service
// =============================================================================

fn service_config(redis_url: &str) -> StockSyncConfig {
    // Nothing listens on port 1: any read-through miss fails fast.
    StockSyncConfig::for_testing(redis_url, "http://127.0.0.1:1")
}

#[tokio::test]
#[ignore] // Requires Docker
async fn service_applies_stream_events_to_cache() {
    let docker = Cli::default();
    let redis = &TestRedis::new(&docker);

    let mut service = RedisStockService::connect(service_config(&redis.url))
        .await
        .unwrap();
    service.start().await.unwrap();
    assert_eq!(service.state(), ServiceState::Running);

    redis.publish_event(STREAM, 77, 15).await.unwrap();

    let sync = service.synchronizer().clone();
    assert!(
        eventually(|| {
            let sync = sync.clone();
            async move { matches!(sync.read_through(ProductId(77)).await, Ok(15)) }
        })
        .await,
        "event was not applied"
    );
    assert!(
        eventually(move || async move { redis.pending_count(STREAM, GROUP).await.unwrap() == 0 }).await,
        "event was not acknowledged"
    );
    assert!(service.health_check().ready);

    service.shutdown().await;
    assert_eq!(service.state(), ServiceState::Stopped);
}

#[tokio::test]
#[ignore] // Requires Docker
async fn service_leaves_undecodable_events_pending() {
    let docker = Cli::default();
    let redis = &TestRedis::new(&docker);

    let mut service = RedisStockService::connect(service_config(&redis.url))
        .await
        .unwrap();
    service.start().await.unwrap();

    redis.publish_raw(STREAM, b"{not json").await.unwrap();
    redis.publish_event(STREAM, 8, 2).await.unwrap();

    let cache = Arc::clone(service.synchronizer().cache());
    assert!(
        eventually(|| {
            let cache = Arc::clone(&cache);
            async move { matches!(cache.get(ProductId(8)).await, Ok(Some(2))) }
        })
        .await
    );
    assert_eq!(redis.pending_count(STREAM, GROUP).await.unwrap(), 1);

    service.shutdown().await;
}

#[tokio::test]
#[ignore] // Requires Docker
async fn service_read_through_fails_when_warehouse_unreachable() {
    let docker = Cli::default();
    let redis = TestRedis::new(&docker);

    let service = RedisStockService::connect(service_config(&redis.url))
        .await
        .unwrap();

    let err = service
        .synchronizer()
        .read_through(ProductId(404))
        .await
        .unwrap_err();
    assert!(matches!(err, StockError::UpstreamUnavailable { .. }));
}

#[tokio::test]
#[ignore] // Requires Docker
async fn service_resumes_pending_after_restart() {
    let docker = Cli::default();
    let redis = &TestRedis::new(&docker);

    // A previous incarnation received the entry but died before acking it.
    let crashed = source_for(&redis, "test-consumer").await;
    crashed.ensure_group().await.unwrap();
    redis.publish_event(STREAM, 31, 6).await.unwrap();
    assert_eq!(crashed.fetch_new().await.unwrap().len(), 1);

    let mut service = RedisStockService::connect(service_config(&redis.url))
        .await
        .unwrap();
    service.start().await.unwrap();

    let cache = Arc::clone(service.synchronizer().cache());
    assert!(
        eventually(|| {
            let cache = Arc::clone(&cache);
            async move { matches!(cache.get(ProductId(31)).await, Ok(Some(6))) }
        })
        .await,
        "pending entry was not replayed"
    );
    assert!(
        eventually(move || async move { redis.pending_count(STREAM, GROUP).await.unwrap() == 0 }).await
    );

    service.shutdown().await;
}
