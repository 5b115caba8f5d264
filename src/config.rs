//! Configuration for the stock synchronization service.
//!
//! Configuration can be constructed programmatically or deserialized from
//! JSON, then adjusted with environment overrides.
//!
//! # Quick Start
//!
//! ```rust
//! use stock_sync::config::{StockSyncConfig, AuthorityConfig};
//!
//! let config = StockSyncConfig {
//!     authority: AuthorityConfig::for_testing("http://warehouse:8080"),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! StockSyncConfig
//! ├── service_name: String
//! ├── cache: CacheConfig           # Redis URL, TTL, key namespace
//! ├── authority: AuthorityConfig   # Warehouse base URL, paths, timeout, circuit
//! ├── consumer: ConsumerConfig     # Stream key, consumer group, drain timeout
//! └── slo: SloConfig               # Latency thresholds
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "service_name": "product-service",
//!   "cache": { "redis_url": "redis://cache:6379", "ttl": "10m" },
//!   "authority": {
//!     "base_url": "http://warehouse-service:8080",
//!     "availability_path": "/internal/warehouse-service/products/{product_id}/stocks",
//!     "init_path": "/internal/warehouse-service/stocks",
//!     "timeout": "30s"
//!   },
//!   "consumer": { "stream_key": "stock.available", "group": "processor" }
//! }
//! ```
//!
//! # Environment Overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `STOCK_SYNC_REDIS_URL` | `cache.redis_url` |
//! | `STOCK_SYNC_AUTHORITY_URL` | `authority.base_url` |
//! | `STOCK_SYNC_INTERNAL_AUTH` | `authority.internal_auth_token` |
//! | `STOCK_SYNC_CONSUMER_NAME` | `consumer.consumer_name` |

use crate::error::{Result, StockError};
use crate::types::ProductId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lower bound for authority request timeouts.
pub const MIN_AUTHORITY_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound for authority request timeouts.
pub const MAX_AUTHORITY_TIMEOUT: Duration = Duration::from_secs(30);

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to [`RedisStockService::connect()`](crate::RedisStockService::connect).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockSyncConfig {
    /// Service name used in logs and as the default consumer name prefix.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub authority: AuthorityConfig,

    #[serde(default)]
    pub consumer: ConsumerConfig,

    #[serde(default)]
    pub slo: SloConfig,
}

fn default_service_name() -> String {
    "product-service".to_string()
}

impl Default for StockSyncConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            cache: CacheConfig::default(),
            authority: AuthorityConfig::default(),
            consumer: ConsumerConfig::default(),
            slo: SloConfig::default(),
        }
    }
}

impl StockSyncConfig {
    /// Load a JSON config file.
    ///
    /// Missing sections fall back to their defaults. Environment overrides
    /// are not applied here; call [`apply_env_overrides`](Self::apply_env_overrides).
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            StockError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw)
            .map_err(|e| StockError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Apply `STOCK_SYNC_*` environment variables on top of this config.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("STOCK_SYNC_REDIS_URL") {
            self.cache.redis_url = url;
        }
        if let Some(url) = lookup("STOCK_SYNC_AUTHORITY_URL") {
            self.authority.base_url = url;
        }
        if let Some(token) = lookup("STOCK_SYNC_INTERNAL_AUTH") {
            self.authority.internal_auth_token = Some(token).filter(|t| !t.is_empty());
        }
        if let Some(name) = lookup("STOCK_SYNC_CONSUMER_NAME") {
            self.consumer.consumer_name = name;
        }
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.redis_url.trim().is_empty() {
            return Err(StockError::Config("cache.redis_url is empty".to_string()));
        }
        if self.authority.base_url.trim().is_empty() {
            return Err(StockError::Config("authority.base_url is empty".to_string()));
        }
        if !self.authority.availability_path.contains("{product_id}") {
            return Err(StockError::Config(
                "authority.availability_path must contain {product_id}".to_string(),
            ));
        }
        if self.consumer.batch_size == 0 {
            return Err(StockError::Config("consumer.batch_size must be > 0".to_string()));
        }
        if self.consumer.stream_key.is_empty() || self.consumer.group.is_empty() {
            return Err(StockError::Config(
                "consumer.stream_key and consumer.group are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a minimal config for testing.
    pub fn for_testing(redis_url: &str, authority_url: &str) -> Self {
        Self {
            service_name: "stock-sync-test".to_string(),
            cache: CacheConfig::for_testing(redis_url),
            authority: AuthorityConfig::for_testing(authority_url),
            consumer: ConsumerConfig::for_testing(),
            slo: SloConfig::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CacheConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Availability cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL for the availability cache.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Entry time-to-live as a duration string (e.g., "10m").
    /// "0s" makes every write immediately absent.
    #[serde(default = "default_cache_ttl")]
    pub ttl: String,

    /// Key namespace; the product id is appended.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_cache_ttl() -> String {
    "10m".to_string()
}

fn default_key_prefix() -> String {
    "stock:product:".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            ttl: default_cache_ttl(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl CacheConfig {
    /// Parse the ttl string to a Duration.
    pub fn ttl_duration(&self) -> Duration {
        humantime::parse_duration(&self.ttl).unwrap_or(Duration::from_secs(600))
    }

    /// Cache key for a product under this namespace.
    pub fn key_for(&self, product_id: ProductId) -> String {
        crate::cache::cache_key(&self.key_prefix, product_id)
    }

    pub fn for_testing(redis_url: &str) -> Self {
        Self {
            redis_url: redis_url.to_string(),
            ttl: "1m".to_string(),
            key_prefix: default_key_prefix(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// AuthorityConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Warehouse authority client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    /// Base URL of the warehouse service, without trailing slash.
    #[serde(default = "default_authority_url")]
    pub base_url: String,

    /// Per-request timeout as a duration string. Clamped to 5s..=30s.
    #[serde(default = "default_authority_timeout")]
    pub timeout: String,

    /// Service token sent as `X-Internal-Auth` when present.
    #[serde(default)]
    pub internal_auth_token: Option<String>,

    /// Read path template; `{product_id}` is substituted.
    #[serde(default = "default_availability_path")]
    pub availability_path: String,

    /// Stock record creation path.
    #[serde(default = "default_init_path")]
    pub init_path: String,

    /// Number of consecutive failures before circuit opens.
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// How long to wait before trying again after circuit opens (seconds).
    #[serde(default = "default_circuit_reset_timeout")]
    pub circuit_reset_timeout_sec: u64,
}

fn default_authority_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_authority_timeout() -> String {
    "10s".to_string()
}

fn default_availability_path() -> String {
    "/stock/{product_id}".to_string()
}

fn default_init_path() -> String {
    "/stock".to_string()
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout() -> u64 {
    30
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            base_url: default_authority_url(),
            timeout: default_authority_timeout(),
            internal_auth_token: None,
            availability_path: default_availability_path(),
            init_path: default_init_path(),
            circuit_failure_threshold: default_circuit_failure_threshold(),
            circuit_reset_timeout_sec: default_circuit_reset_timeout(),
        }
    }
}

impl AuthorityConfig {
    /// Parse the timeout string, clamped into the supported band.
    pub fn timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.timeout)
            .unwrap_or(Duration::from_secs(10))
            .clamp(MIN_AUTHORITY_TIMEOUT, MAX_AUTHORITY_TIMEOUT)
    }

    /// Full URL for the availability read of a product.
    pub fn availability_url(&self, product_id: ProductId) -> String {
        let path = self
            .availability_path
            .replace("{product_id}", &product_id.to_string());
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Full URL for stock record creation.
    pub fn init_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.init_path)
    }

    /// Circuit breaker settings derived from this config.
    pub fn circuit_config(&self) -> crate::circuit_breaker::CircuitConfig {
        crate::circuit_breaker::CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            recovery_timeout: Duration::from_secs(self.circuit_reset_timeout_sec),
            ..Default::default()
        }
    }

    pub fn for_testing(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            timeout: "5s".to_string(),
            internal_auth_token: Some("test-token".to_string()),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConsumerConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Availability-change stream consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Whether the event consumer runs at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Stream carrying `{product_id, available}` payloads.
    #[serde(default = "default_stream_key")]
    pub stream_key: String,

    /// Durable consumer group name.
    #[serde(default = "default_group")]
    pub group: String,

    /// Consumer name within the group. Pending deliveries are tracked per name,
    /// so it must be stable across restarts of the same instance.
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Maximum entries per XREADGROUP call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// XREADGROUP block timeout as a duration string (e.g., "5s").
    #[serde(default = "default_block_timeout")]
    pub block_timeout: String,

    /// How often to replay this consumer's unacknowledged deliveries.
    #[serde(default = "default_pending_retry_interval")]
    pub pending_retry_interval: String,

    /// How long shutdown waits for in-flight processing.
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout: String,
}

fn default_true() -> bool {
    true
}

fn default_stream_key() -> String {
    "stock.available".to_string()
}

fn default_group() -> String {
    "processor".to_string()
}

fn default_consumer_name() -> String {
    "processor-1".to_string()
}

fn default_batch_size() -> usize {
    32
}

fn default_block_timeout() -> String {
    "5s".to_string()
}

fn default_pending_retry_interval() -> String {
    "30s".to_string()
}

fn default_drain_timeout() -> String {
    "10s".to_string()
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stream_key: default_stream_key(),
            group: default_group(),
            consumer_name: default_consumer_name(),
            batch_size: default_batch_size(),
            block_timeout: default_block_timeout(),
            pending_retry_interval: default_pending_retry_interval(),
            drain_timeout: default_drain_timeout(),
        }
    }
}

impl ConsumerConfig {
    /// Parse the block_timeout string to a Duration.
    pub fn block_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.block_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn pending_retry_duration(&self) -> Duration {
        humantime::parse_duration(&self.pending_retry_interval).unwrap_or(Duration::from_secs(30))
    }

    pub fn drain_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.drain_timeout).unwrap_or(Duration::from_secs(10))
    }

    pub fn for_testing() -> Self {
        Self {
            consumer_name: "test-consumer".to_string(),
            batch_size: 10,
            block_timeout: "100ms".to_string(),
            pending_retry_interval: "200ms".to_string(),
            drain_timeout: "2s".to_string(),
            ..Default::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SloConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// SLO thresholds for detecting performance degradation.
///
/// Violations are logged at `warn`; they never fail an operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloConfig {
    /// Maximum acceptable warehouse call latency (ms).
    #[serde(default = "default_max_authority_latency_ms")]
    pub max_authority_latency_ms: u64,

    /// Maximum acceptable cache operation latency (ms).
    #[serde(default = "default_max_cache_latency_ms")]
    pub max_cache_latency_ms: u64,
}

fn default_max_authority_latency_ms() -> u64 {
    500
}

fn default_max_cache_latency_ms() -> u64 {
    50
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            max_authority_latency_ms: 500,
            max_cache_latency_ms: 50,
        }
    }
}

impl SloConfig {
    /// Check if a warehouse call latency violates SLO.
    pub fn is_authority_violation(&self, latency: Duration) -> bool {
        latency.as_millis() as u64 > self.max_authority_latency_ms
    }

    /// Check if a cache operation latency violates SLO.
    pub fn is_cache_violation(&self, latency: Duration) -> bool {
        latency.as_millis() as u64 > self.max_cache_latency_ms
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
