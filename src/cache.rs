// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Availability cache.
//!
//! Maps a product id to its last known available quantity, with a TTL on
//! every write. The cache is volatile and never authoritative: an entry may
//! vanish at any moment, and callers must fall back to the warehouse.
//!
//! # Backends
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`RedisCache`] | Production, shared across service instances |
//! | [`MemoryCache`] | Single process, tests, local development |
//!
//! Each write is a single atomic key replacement on both backends, so
//! concurrent writers race with last-writer-wins semantics and no reader
//! ever observes a partial value.

use crate::error::{Result, StockError};
use crate::types::{epoch_millis, AvailabilityRecord, BoxFuture, ProductId};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Build the cache key for a product: `<prefix><product_id>`.
pub fn cache_key(prefix: &str, product_id: ProductId) -> String {
    format!("{}{}", prefix, product_id)
}

/// Key-value store for availability numbers.
///
/// `get` returns `Ok(None)` for absent or expired keys. An `Err` is a
/// backend fault; the synchronizer treats both the same way.
pub trait AvailabilityCache: Send + Sync + 'static {
    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Option<u64>>;

    /// Overwrite the entry with a fresh TTL. A zero TTL leaves the key absent.
    fn set(&self, product_id: ProductId, quantity: u64, ttl: Duration) -> BoxFuture<'_, ()>;
}

impl<C: AvailabilityCache + ?Sized> AvailabilityCache for Arc<C> {
    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Option<u64>> {
        (**self).get(product_id)
    }

    fn set(&self, product_id: ProductId, quantity: u64, ttl: Duration) -> BoxFuture<'_, ()> {
        (**self).set(product_id, quantity, ttl)
    }
}

// =============================================================================
// Redis backend
// =============================================================================

/// Redis-backed availability cache.
///
/// Values are stored as decimal strings under `stock:product:<id>` with a
/// millisecond expiry (`SET key value PX ttl`).
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    key_prefix: String,
}

impl RedisCache {
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            key_prefix: key_prefix.into(),
        }
    }

    pub fn key_for(&self, product_id: ProductId) -> String {
        cache_key(&self.key_prefix, product_id)
    }
}

impl AvailabilityCache for RedisCache {
    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Option<u64>> {
        let key = self.key_for(product_id);
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let raw: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(|e| StockError::cache("GET", e))?;

            match raw {
                None => Ok(None),
                Some(value) => value.trim().parse::<u64>().map(Some).map_err(|_| {
                    // A foreign or corrupted value is a fault, not a zero.
                    StockError::cache_msg("GET", format!("non-numeric value at {}: {:?}", key, value))
                }),
            }
        })
    }

    fn set(&self, product_id: ProductId, quantity: u64, ttl: Duration) -> BoxFuture<'_, ()> {
        let key = self.key_for(product_id);
        let mut conn = self.conn.clone();
        Box::pin(async move {
            let ttl_ms = ttl.as_millis().min(u64::MAX as u128) as u64;
            if ttl_ms == 0 {
                // Redis rejects PX 0; an entry that expires immediately is an absent one.
                let _: i64 = redis::cmd("DEL")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(|e| StockError::cache("DEL", e))?;
                return Ok(());
            }

            let _: () = redis::cmd("SET")
                .arg(&key)
                .arg(quantity)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await
                .map_err(|e| StockError::cache("SET", e))?;
            Ok(())
        })
    }
}

// =============================================================================
// In-process backend
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct MemoryEntry {
    quantity: u64,
    observed_at: u64,
    expires_at: Instant,
}

/// Writes between full sweeps of expired [`MemoryCache`] entries.
pub const MEMORY_SWEEP_INTERVAL: u64 = 1024;

/// In-process availability cache backed by `DashMap`.
///
/// Expired entries are evicted when read, and every
/// [`MEMORY_SWEEP_INTERVAL`] writes a sweep drops the ones nobody read, so a
/// long-running instance stays bounded by its live entries.
#[derive(Clone, Default)]
pub struct MemoryCache {
    entries: Arc<DashMap<ProductId, MemoryEntry>>,
    writes: Arc<AtomicU64>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full record for a live entry, if any.
    pub fn record(&self, product_id: ProductId) -> Option<AvailabilityRecord> {
        self.live_entry(product_id).map(|entry| AvailabilityRecord {
            product_id,
            quantity: entry.quantity,
            observed_at: entry.observed_at,
        })
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove all expired entries.
    pub fn evict_expired(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    fn live_entry(&self, product_id: ProductId) -> Option<MemoryEntry> {
        if let Some(entry) = self.entries.get(&product_id) {
            let value = *entry.value();
            if value.expires_at > Instant::now() {
                return Some(value);
            }
            // Drop the read guard before removing
            drop(entry);
            self.entries
                .remove_if(&product_id, |_, e| e.expires_at <= Instant::now());
        }
        None
    }
}

impl AvailabilityCache for MemoryCache {
    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Option<u64>> {
        Box::pin(async move { Ok(self.live_entry(product_id).map(|e| e.quantity)) })
    }

    fn set(&self, product_id: ProductId, quantity: u64, ttl: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let now = Instant::now();
            let expires_at = now.checked_add(ttl).unwrap_or(now + Duration::from_secs(86_400 * 365));
            self.entries.insert(
                product_id,
                MemoryEntry {
                    quantity,
                    observed_at: epoch_millis(),
                    expires_at,
                },
            );
            let writes = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
            if writes % MEMORY_SWEEP_INTERVAL == 0 {
                self.evict_expired();
            }
            Ok(())
        })
    }
}
