//! Warehouse authority client.
//!
//! The warehouse service owns inventory. This module reads a product's
//! current availability from it and asks it to create the initial stock
//! record for a new product.
//!
//! # Wire Contract
//!
//! ```text
//! GET  {availability_path}  → [{product_id, warehouse_id, quantity, reserved, available?}] | null
//! POST {init_path}          ← {shop_id, product_id}        → 2xx, body ignored
//! ```
//!
//! Every request carries `Accept`/`Content-Type: application/json` and, when
//! configured, `X-Internal-Auth`. Creation requests also carry an
//! `Idempotency-Key` derived from `(shop_id, product_id)`; the warehouse is
//! not assumed to honor it.

use crate::circuit_breaker::AuthorityCircuit;
use crate::config::AuthorityConfig;
use crate::error::{Result, StockError};
use crate::metrics;
use crate::types::{BoxFuture, ProductId, StockInitRequest};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Header carrying the internal service token.
pub const INTERNAL_AUTH_HEADER: &str = "X-Internal-Auth";

/// Header carrying the provisioning idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// The two warehouse operations the synchronizer needs.
pub trait AuthorityClient: Send + Sync + 'static {
    /// Total available units across all stock locations of a product.
    fn fetch_availability(&self, product_id: ProductId) -> BoxFuture<'_, u64>;

    /// Create the initial stock record for a newly created product.
    fn initialize_stock(&self, request: StockInitRequest) -> BoxFuture<'_, ()>;
}

impl<A: AuthorityClient + ?Sized> AuthorityClient for Arc<A> {
    fn fetch_availability(&self, product_id: ProductId) -> BoxFuture<'_, u64> {
        (**self).fetch_availability(product_id)
    }

    fn initialize_stock(&self, request: StockInitRequest) -> BoxFuture<'_, ()> {
        (**self).initialize_stock(request)
    }
}

// =============================================================================
// Response model and aggregation
// =============================================================================

/// One stock-location record as reported by the warehouse.
///
/// Identifier fields are accepted but unused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StockRecord {
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub reserved: i64,
    /// Pre-computed available units, when the warehouse reports them.
    #[serde(default)]
    pub available: Option<i64>,
}

impl StockRecord {
    /// Available units at this location, never below zero.
    pub fn available_units(&self) -> u64 {
        let units = match self.available {
            Some(available) => available,
            None => self.quantity.saturating_sub(self.reserved),
        };
        units.max(0) as u64
    }
}

/// Sum of per-record available units.
pub fn aggregate_available(records: &[StockRecord]) -> u64 {
    records
        .iter()
        .fold(0u64, |total, record| total.saturating_add(record.available_units()))
}

/// Parse a warehouse availability body into a total.
///
/// `null` and `[]` both mean "no stock records".
pub fn parse_availability(body: &[u8]) -> Result<u64> {
    let records: Option<Vec<StockRecord>> = serde_json::from_slice(body)
        .map_err(|e| StockError::Decode(format!("invalid stock response: {}", e)))?;
    Ok(aggregate_available(records.as_deref().unwrap_or_default()))
}

/// Deterministic idempotency key for a stock creation request.
///
/// Hex SHA-256 of `"{shop_id}:{product_id}"`; identical across retries.
pub fn idempotency_key(request: &StockInitRequest) -> String {
    let digest = Sha256::digest(format!("{}:{}", request.shop_id, request.product_id).as_bytes());
    hex::encode(digest)
}

// =============================================================================
// HTTP client
// =============================================================================

/// `reqwest`-based warehouse client with per-operation circuit breakers.
pub struct HttpAuthorityClient {
    client: reqwest::Client,
    config: AuthorityConfig,
    circuit: Arc<AuthorityCircuit>,
}

impl HttpAuthorityClient {
    pub fn new(config: AuthorityConfig) -> Result<Self> {
        let circuit = AuthorityCircuit::with_configs(
            config.circuit_config(),
            crate::circuit_breaker::CircuitConfig::aggressive(),
        );
        Self::with_circuit(config, Arc::new(circuit))
    }

    pub fn with_circuit(config: AuthorityConfig, circuit: Arc<AuthorityCircuit>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = config.internal_auth_token.as_deref() {
            let value = HeaderValue::from_str(token).map_err(|_| {
                StockError::Config("authority.internal_auth_token is not a valid header value".to_string())
            })?;
            headers.insert(INTERNAL_AUTH_HEADER, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout_duration())
            .default_headers(headers)
            .build()
            .map_err(|e| StockError::Config(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            circuit,
        })
    }

    pub fn circuit(&self) -> &Arc<AuthorityCircuit> {
        &self.circuit
    }

    async fn get_availability(&self, product_id: ProductId) -> Result<u64> {
        let url = self.config.availability_url(product_id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StockError::upstream("fetch_availability", e.to_string()))?;

        if !resp.status().is_success() {
            return Err(StockError::upstream(
                "fetch_availability",
                format!("warehouse returned {}", resp.status()),
            ));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| StockError::upstream("fetch_availability", e.to_string()))?;
        parse_availability(&body)
    }

    async fn post_init(&self, request: StockInitRequest) -> Result<()> {
        let resp = self
            .client
            .post(self.config.init_url())
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key(&request))
            .json(&request)
            .send()
            .await
            .map_err(|e| StockError::upstream("initialize_stock", e.to_string()))?;

        if !resp.status().is_success() {
            return Err(StockError::upstream(
                "initialize_stock",
                format!("warehouse returned {}", resp.status()),
            ));
        }
        Ok(())
    }
}

impl AuthorityClient for HttpAuthorityClient {
    fn fetch_availability(&self, product_id: ProductId) -> BoxFuture<'_, u64> {
        Box::pin(async move {
            let start = Instant::now();
            let result = self
                .circuit
                .reads
                .call(|| self.get_availability(product_id))
                .await
                .map_err(|e| e.into_stock_error("fetch_availability"));
            let elapsed = start.elapsed();

            metrics::record_authority_call("fetch_availability", result.is_ok(), elapsed);
            match &result {
                Ok(quantity) => debug!(%product_id, quantity, elapsed_ms = elapsed.as_millis(), "Fetched availability"),
                Err(e) => warn!(%product_id, error = %e, "Availability fetch failed"),
            }
            result
        })
    }

    fn initialize_stock(&self, request: StockInitRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let start = Instant::now();
            let result = self
                .circuit
                .writes
                .call(|| self.post_init(request))
                .await
                .map_err(|e| e.into_stock_error("initialize_stock"));

            metrics::record_authority_call("initialize_stock", result.is_ok(), start.elapsed());
            if let Err(e) = &result {
                warn!(
                    product_id = %request.product_id,
                    shop_id = %request.shop_id,
                    error = %e,
                    "Stock initialization failed"
                );
            }
            result
        })
    }
}
