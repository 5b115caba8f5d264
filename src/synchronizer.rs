//! Stock synchronizer: the only component that writes the availability cache.
//!
//! # Operations
//!
//! | Operation | Cache | Authority | Failure surfaced |
//! |-----------|-------|-----------|------------------|
//! | [`read_through`](StockSynchronizer::read_through) | get, backfill on miss | fetch on miss | fetch failure only |
//! | [`provision`](StockSynchronizer::provision) | prime zero | create stock record | creation failure only |
//! | [`apply`](StockSynchronizer::apply) | overwrite | none | cache write failure |
//!
//! # Cache Entry Lifecycle
//!
//! ```text
//! ABSENT ──(fetch ok | provision | apply)──► PRESENT(q, expires_at)
//! PRESENT ──(TTL elapses)──────────────────► ABSENT
//! PRESENT ──(apply | read-through refresh)─► PRESENT(q', expires_at')
//! ```
//!
//! Writers for the same product race; whichever write lands last wins.
//! Staleness is bounded by the TTL.

use crate::authority::AuthorityClient;
use crate::cache::AvailabilityCache;
use crate::config::SloConfig;
use crate::error::{Result, StockError};
use crate::metrics;
use crate::stream::AvailabilityChangeEvent;
use crate::types::{ProductId, ShopId, StockInitRequest};
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Coordinates the availability cache with the warehouse authority.
pub struct StockSynchronizer<C: AvailabilityCache, A: AuthorityClient> {
    cache: Arc<C>,
    authority: Arc<A>,
    ttl: Duration,
    slo: SloConfig,
}

impl<C: AvailabilityCache, A: AuthorityClient> Clone for StockSynchronizer<C, A> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            authority: Arc::clone(&self.authority),
            ttl: self.ttl,
            slo: self.slo.clone(),
        }
    }
}

impl<C: AvailabilityCache, A: AuthorityClient> StockSynchronizer<C, A> {
    pub fn new(cache: Arc<C>, authority: Arc<A>, ttl: Duration) -> Self {
        Self {
            cache,
            authority,
            ttl,
            slo: SloConfig::default(),
        }
    }

    #[must_use]
    pub fn with_slo(mut self, slo: SloConfig) -> Self {
        self.slo = slo;
        self
    }

    pub fn cache(&self) -> &Arc<C> {
        &self.cache
    }

    pub fn authority(&self) -> &Arc<A> {
        &self.authority
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current available quantity for a product.
    ///
    /// Served from the cache when present. Otherwise fetched from the
    /// authority and written back before returning. A failed backfill does
    /// not fail the read. A failed fetch does, with `UpstreamUnavailable`;
    /// there is no stale fallback.
    pub async fn read_through(&self, product_id: ProductId) -> Result<u64> {
        if let Some(quantity) = self.cached(product_id).await {
            debug!(%product_id, quantity, "Availability cache hit");
            return Ok(quantity);
        }

        let start = Instant::now();
        let quantity = match self.authority.fetch_availability(product_id).await {
            Ok(quantity) => quantity,
            Err(e) => {
                metrics::record_error("read_through", e.kind());
                error!(%product_id, error = %e, "Availability unavailable: cache miss and authority failed");
                return Err(as_upstream("fetch_availability", e));
            }
        };
        let elapsed = start.elapsed();
        if self.slo.is_authority_violation(elapsed) {
            warn!(
                %product_id,
                elapsed_ms = elapsed.as_millis(),
                threshold_ms = self.slo.max_authority_latency_ms,
                "Authority fetch exceeded SLO"
            );
        }

        self.write_best_effort(product_id, quantity, "backfill").await;
        Ok(quantity)
    }

    /// [`read_through`](Self::read_through) for several products concurrently.
    ///
    /// Results come back in input order. One product failing does not fail
    /// the others.
    pub async fn read_through_many(&self, product_ids: &[ProductId]) -> Vec<(ProductId, Result<u64>)> {
        let reads = product_ids.iter().map(|&product_id| async move {
            (product_id, self.read_through(product_id).await)
        });
        join_all(reads).await
    }

    /// Create the warehouse stock record for a new product and prime the
    /// cache with zero.
    ///
    /// The cache is primed whatever the authority says, so a freshly created
    /// product always has a displayable quantity. A priming failure is
    /// swallowed. The authority outcome is returned for the caller to act on.
    pub async fn provision(&self, shop_id: ShopId, product_id: ProductId) -> Result<()> {
        let request = StockInitRequest::new(shop_id, product_id);
        let outcome = self.authority.initialize_stock(request).await;
        metrics::record_provision(outcome.is_ok());

        if let Err(e) = &outcome {
            warn!(%product_id, %shop_id, error = %e, "Stock provisioning failed, priming zero anyway");
        }

        self.write_best_effort(product_id, 0, "provision").await;
        outcome
    }

    /// Overwrite the cached quantity with a pushed value and a fresh TTL.
    ///
    /// Re-applying the same event leaves the same value. No ordering check
    /// is made; the last applied event wins.
    pub async fn apply(&self, event: &AvailabilityChangeEvent) -> Result<()> {
        let start = Instant::now();
        let result = self
            .cache
            .set(event.product_id, event.available, self.ttl)
            .await;
        metrics::record_cache_write("event", result.is_ok());
        metrics::record_cache_latency("set", start.elapsed());

        match result {
            Ok(()) => {
                debug!(product_id = %event.product_id, available = event.available, "Applied availability event");
                Ok(())
            }
            Err(e) => {
                warn!(product_id = %event.product_id, error = %e, "Failed to apply availability event");
                Err(e)
            }
        }
    }

    /// Cache lookup where a fault reads as a miss.
    async fn cached(&self, product_id: ProductId) -> Option<u64> {
        let start = Instant::now();
        let result = self.cache.get(product_id).await;
        let elapsed = start.elapsed();
        metrics::record_cache_latency("get", elapsed);
        if self.slo.is_cache_violation(elapsed) {
            warn!(%product_id, elapsed_ms = elapsed.as_millis(), "Cache lookup exceeded SLO");
        }

        match result {
            Ok(Some(quantity)) => {
                metrics::record_cache_lookup("hit");
                Some(quantity)
            }
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                None
            }
            Err(e) => {
                metrics::record_cache_lookup("fault");
                warn!(%product_id, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn write_best_effort(&self, product_id: ProductId, quantity: u64, source: &str) {
        let result = self.cache.set(product_id, quantity, self.ttl).await;
        metrics::record_cache_write(source, result.is_ok());
        if let Err(e) = result {
            warn!(%product_id, quantity, source, error = %e, "Cache write failed, continuing");
        }
    }
}

/// Any read-path failure from the authority surfaces as `UpstreamUnavailable`.
fn as_upstream(operation: &str, err: StockError) -> StockError {
    match err {
        StockError::UpstreamUnavailable { .. } => err,
        other => StockError::upstream(operation, other.to_string()),
    }
}
