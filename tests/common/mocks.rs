//! Recording mocks for the crate's trait seams.
//!
//! - [`MockAuthority`]: configurable warehouse, records every call
//! - [`FlakyCache`]: in-memory cache with switchable faults
//! - [`MockDeliverySource`]: at-least-once broker with a pending list
//! - [`FailingProductStore`]: product store with switchable insert/commit faults

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use stock_sync::cache::{AvailabilityCache, MemoryCache};
use stock_sync::product::{
    MemoryProductStore, MemoryTransaction, NewProduct, Product, ProductStore, ProductTransaction,
    ProductUpdate,
};
use stock_sync::stream::{Delivery, DeliverySource};
use stock_sync::types::{BoxFuture, ProductId, StockInitRequest};
use stock_sync::{AuthorityClient, StockError};
use tokio::sync::{Mutex, RwLock};

// =============================================================================
// Warehouse authority
// =============================================================================

/// Warehouse double. Unknown products report zero.
#[derive(Default)]
pub struct MockAuthority {
    quantities: RwLock<HashMap<ProductId, u64>>,
    fail_fetch: AtomicBool,
    fail_init: AtomicBool,
    fetch_delay_ms: AtomicUsize,
    fetches: AtomicUsize,
    inits: Mutex<Vec<StockInitRequest>>,
}

impl MockAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_quantity(&self, product_id: ProductId, quantity: u64) {
        self.quantities.write().await.insert(product_id, quantity);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_init(&self, fail: bool) {
        self.fail_init.store(fail, Ordering::SeqCst);
    }

    /// Delay every fetch, to widen race windows.
    pub fn set_fetch_delay(&self, delay: Duration) {
        self.fetch_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub async fn init_requests(&self) -> Vec<StockInitRequest> {
        self.inits.lock().await.clone()
    }
}

impl AuthorityClient for MockAuthority {
    fn fetch_availability(&self, product_id: ProductId) -> BoxFuture<'_, u64> {
        Box::pin(async move {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let delay = self.fetch_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(StockError::upstream(
                    "fetch_availability",
                    "warehouse returned 503 Service Unavailable",
                ));
            }
            Ok(self
                .quantities
                .read()
                .await
                .get(&product_id)
                .copied()
                .unwrap_or(0))
        })
    }

    fn initialize_stock(&self, request: StockInitRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.inits.lock().await.push(request);
            if self.fail_init.load(Ordering::SeqCst) {
                return Err(StockError::upstream(
                    "initialize_stock",
                    "warehouse returned 500 Internal Server Error",
                ));
            }
            Ok(())
        })
    }
}

// =============================================================================
// Cache
// =============================================================================

/// [`MemoryCache`] with switchable faults on either operation.
#[derive(Default)]
pub struct FlakyCache {
    inner: MemoryCache,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    set_delay_ms: AtomicU64,
    gets: AtomicUsize,
    sets: AtomicUsize,
}

impl FlakyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_get(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_set(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    /// Slow every write down by `delay`, after it has been counted.
    pub fn set_write_delay(&self, delay: Duration) {
        self.set_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    /// Peek at the stored value, ignoring injected faults.
    pub async fn peek(&self, product_id: ProductId) -> Option<u64> {
        self.inner.get(product_id).await.ok().flatten()
    }
}

impl AvailabilityCache for FlakyCache {
    fn get(&self, product_id: ProductId) -> BoxFuture<'_, Option<u64>> {
        Box::pin(async move {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail_get.load(Ordering::SeqCst) {
                return Err(StockError::cache_msg("GET", "connection reset by peer"));
            }
            self.inner.get(product_id).await
        })
    }

    fn set(&self, product_id: ProductId, quantity: u64, ttl: Duration) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.sets.fetch_add(1, Ordering::SeqCst);
            let delay = self.set_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail_set.load(Ordering::SeqCst) {
                return Err(StockError::cache_msg("SET", "connection reset by peer"));
            }
            self.inner.set(product_id, quantity, ttl).await
        })
    }
}

// =============================================================================
// Delivery source
// =============================================================================

/// Broker double with consumer-group semantics.
///
/// `fetch_new` moves queued entries to the pending list; `ack` removes them.
/// Pending entries are returned by `fetch_pending` in id order.
#[derive(Default)]
pub struct MockDeliverySource {
    next_seq: AtomicUsize,
    queue: Mutex<VecDeque<Delivery>>,
    pending: Mutex<BTreeMap<u64, Delivery>>,
    acked: Mutex<Vec<String>>,
    fail_fetch_remaining: AtomicUsize,
    fail_ack: AtomicBool,
    fetch_calls: AtomicUsize,
}

impl MockDeliverySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw payload; returns its stream id.
    pub async fn push_raw(&self, payload: &[u8]) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let id = format!("{}-0", seq);
        self.queue
            .lock()
            .await
            .push_back(Delivery::new(id.clone(), payload.to_vec()));
        id
    }

    pub async fn push_event(&self, product_id: i64, available: u64) -> String {
        let payload = format!(r#"{{"product_id":{},"available":{}}}"#, product_id, available);
        self.push_raw(payload.as_bytes()).await
    }

    /// Fail the next `n` fetches with a retryable error.
    pub fn fail_next_fetches(&self, n: usize) {
        self.fail_fetch_remaining.store(n, Ordering::SeqCst);
    }

    pub fn set_fail_ack(&self, fail: bool) {
        self.fail_ack.store(fail, Ordering::SeqCst);
    }

    pub async fn acked(&self) -> Vec<String> {
        self.acked.lock().await.clone()
    }

    pub async fn pending_ids(&self) -> Vec<String> {
        self.pending
            .lock()
            .await
            .values()
            .map(|d| d.stream_id.clone())
            .collect()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    fn take_fetch_failure(&self) -> bool {
        self.fail_fetch_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn seq_of(stream_id: &str) -> u64 {
    stream_id
        .split('-')
        .next()
        .and_then(|ms| ms.parse().ok())
        .unwrap_or(0)
}

impl DeliverySource for MockDeliverySource {
    fn ensure_group(&self) -> BoxFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn fetch_pending<'a>(&'a self, after: &'a str) -> BoxFuture<'a, Vec<Delivery>> {
        Box::pin(async move {
            let after = seq_of(after);
            Ok(self
                .pending
                .lock()
                .await
                .range(after + 1..)
                .map(|(_, d)| d.clone())
                .collect())
        })
    }

    fn fetch_new(&self) -> BoxFuture<'_, Vec<Delivery>> {
        Box::pin(async move {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.take_fetch_failure() {
                return Err(StockError::cache_msg("XREADGROUP", "broken pipe"));
            }

            let batch: Vec<Delivery> = self.queue.lock().await.drain(..).collect();
            if batch.is_empty() {
                // Stand-in for the blocking read timeout.
                tokio::time::sleep(Duration::from_millis(20)).await;
                return Ok(batch);
            }

            let mut pending = self.pending.lock().await;
            for delivery in &batch {
                pending.insert(seq_of(&delivery.stream_id), delivery.clone());
            }
            Ok(batch)
        })
    }

    fn ack<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_ack.load(Ordering::SeqCst) {
                return Err(StockError::cache_msg("XACK", "connection refused"));
            }
            self.pending.lock().await.remove(&seq_of(stream_id));
            self.acked.lock().await.push(stream_id.to_string());
            Ok(())
        })
    }
}

// =============================================================================
// Product store
// =============================================================================

/// [`MemoryProductStore`] with switchable insert and commit faults.
#[derive(Default)]
pub struct FailingProductStore {
    inner: MemoryProductStore,
    faults: Arc<StoreFaults>,
}

#[derive(Default)]
pub struct StoreFaults {
    pub fail_create: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
    pub commits: AtomicUsize,
    pub rollbacks: AtomicUsize,
}

impl FailingProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn faults(&self) -> &StoreFaults {
        &self.faults
    }

    pub fn committed_len(&self) -> usize {
        self.inner.len()
    }
}

pub struct FailingTransaction {
    inner: MemoryTransaction,
    faults: Arc<StoreFaults>,
}

impl ProductTransaction for FailingTransaction {
    fn create(&mut self, product: NewProduct) -> BoxFuture<'_, Product> {
        let fail = self.faults.fail_create.load(Ordering::SeqCst);
        Box::pin(async move {
            if fail {
                return Err(StockError::Store("duplicate key value".to_string()));
            }
            self.inner.create(product).await
        })
    }

    fn commit(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.faults.commits.fetch_add(1, Ordering::SeqCst);
            if self.faults.fail_commit.load(Ordering::SeqCst) {
                return Err(StockError::Store("could not serialize access".to_string()));
            }
            self.inner.commit().await
        })
    }

    fn rollback(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            self.faults.rollbacks.fetch_add(1, Ordering::SeqCst);
            if self.faults.fail_rollback.load(Ordering::SeqCst) {
                return Err(StockError::Store("connection closed".to_string()));
            }
            self.inner.rollback().await
        })
    }
}

impl ProductStore for FailingProductStore {
    type Tx = FailingTransaction;

    fn begin(&self) -> BoxFuture<'_, FailingTransaction> {
        Box::pin(async move {
            Ok(FailingTransaction {
                inner: self.inner.begin().await?,
                faults: Arc::clone(&self.faults),
            })
        })
    }

    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Option<Product>> {
        self.inner.get_by_id(id)
    }

    fn update(&self, id: ProductId, update: ProductUpdate) -> BoxFuture<'_, Product> {
        self.inner.update(id, update)
    }

    fn set_active_status(&self, id: ProductId, active: bool) -> BoxFuture<'_, ()> {
        self.inner.set_active_status(id, active)
    }
}
