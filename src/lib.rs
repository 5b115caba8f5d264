//! # Stock Sync
//!
//! Keeps a local cache of product availability consistent with a remote
//! warehouse that owns the real inventory.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              stock-sync                                   │
//! │                                                                           │
//! │  read ───────────►┌───────────────────┐◄─── get / set ───┌─────────────┐  │
//! │                   │ StockSynchronizer │                  │ Availability│  │
//! │  create ─► Orch ─►│ read_through      │─────────────────►│ Cache (TTL) │  │
//! │                   │ provision         │                  └─────────────┘  │
//! │                   │ apply             │◄──┐                               │
//! │                   └───────────────────┘   │                               │
//! │                            │              │ decode + apply, then ack      │
//! │                     fetch / init          │                               │
//! │                            ▼              │                               │
//! │                  ┌───────────────────┐  ┌─┴──────────────┐                │
//! │                  │ Warehouse (HTTP)  │  │ Event consumer │◄── stream      │
//! │                  └───────────────────┘  └────────────────┘                │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Three Ways In
//!
//! 1. **Read-through**: cache hit, or fetch from the warehouse and backfill
//! 2. **Provisioning**: create the warehouse stock record for a new product,
//!    prime the cache with zero
//! 3. **Events**: availability pushed over a Redis stream overwrites the cache
//!
//! The cache is the only state shared between them. Writes race per product
//! and the last one wins; every write carries a fresh TTL, so staleness is
//! bounded.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use stock_sync::{ProductId, RedisStockService, StockSyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> stock_sync::Result<()> {
//!     let config = StockSyncConfig::default();
//!     let mut service = RedisStockService::connect(config).await?;
//!     service.start().await?;
//!
//!     let available = service.synchronizer().read_through(ProductId(42)).await?;
//!     println!("available: {}", available);
//!
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod authority;
pub mod cache;
pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod product;
pub mod resilience;
pub mod stream;
pub mod synchronizer;
pub mod types;

// Re-exports for convenience
pub use authority::{AuthorityClient, HttpAuthorityClient};
pub use cache::{AvailabilityCache, MemoryCache, RedisCache};
pub use circuit_breaker::{AuthorityCircuit, CircuitBreaker, CircuitConfig, CircuitError};
pub use config::{AuthorityConfig, CacheConfig, ConsumerConfig, SloConfig, StockSyncConfig};
pub use coordinator::{HealthCheck, RedisStockService, ServiceState, StockService};
pub use error::{Result, StockError};
pub use orchestrator::{ProductOrchestrator, ProductView};
pub use product::{MemoryProductStore, NewProduct, Product, ProductStore, ProductUpdate};
pub use stream::{AvailabilityChangeEvent, DeliverySource, RedisStreamSource};
pub use synchronizer::StockSynchronizer;
pub use types::{ProductId, ShopId};
