// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Stock service coordinator.
//!
//! Ties together:
//! - The [`StockSynchronizer`] (read-through, provisioning, apply)
//! - The event consumer task fed by a [`DeliverySource`]
//! - The warehouse circuit breakers, for health reporting
//!
//! # Lifecycle
//!
//! 1. [`RedisStockService::connect`] (or [`StockService::new`] with custom parts)
//! 2. [`start`](StockService::start) creates the consumer group and spawns
//!    the consumer
//! 3. [`shutdown`](StockService::shutdown) signals the consumer and waits
//!    for the in-flight batch to drain
//!
//! The synchronizer is usable in every state; handlers that only need
//! read-through never have to wait for the consumer.

mod consumer;
mod types;

pub use consumer::{
    process_batch, process_delivery, replay_pending, run_consumer, BatchSummary, DeliveryOutcome,
};
pub use types::{HealthCheck, ServiceState};

use crate::authority::{AuthorityClient, HttpAuthorityClient};
use crate::cache::{AvailabilityCache, RedisCache};
use crate::circuit_breaker::{AuthorityCircuit, CircuitState};
use crate::config::StockSyncConfig;
use crate::error::{Result, StockError};
use crate::metrics;
use crate::resilience::{connect_redis, RetryConfig};
use crate::stream::{DeliverySource, RedisStreamSource};
use crate::synchronizer::StockSynchronizer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Production wiring: Redis cache, HTTP warehouse, Redis stream.
pub type RedisStockService = StockService<RedisCache, HttpAuthorityClient, RedisStreamSource>;

/// Owns the synchronizer and the background event consumer.
pub struct StockService<C, A, D>
where
    C: AvailabilityCache,
    A: AuthorityClient,
    D: DeliverySource,
{
    config: StockSyncConfig,

    synchronizer: StockSynchronizer<C, A>,

    /// None when the consumer is disabled
    source: Option<Arc<D>>,

    /// Warehouse circuits, when the authority exposes them
    circuit: Option<Arc<AuthorityCircuit>>,

    state_tx: watch::Sender<ServiceState>,
    state_rx: watch::Receiver<ServiceState>,

    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    /// Set by the consumer task while it loops
    consumer_running: Arc<AtomicBool>,

    handles: RwLock<Vec<JoinHandle<()>>>,
}

impl RedisStockService {
    /// Validate `config`, connect to Redis and build the warehouse client.
    ///
    /// The cache and the stream get separate connections: a blocking
    /// XREADGROUP would otherwise stall cache reads queued behind it.
    pub async fn connect(config: StockSyncConfig) -> Result<Self> {
        config.validate()?;
        let retry = RetryConfig::startup();

        let cache_conn = connect_redis(&config.cache.redis_url, &retry, "cache").await?;
        let cache = RedisCache::new(cache_conn, config.cache.key_prefix.clone());

        let authority = HttpAuthorityClient::new(config.authority.clone())?;
        let circuit = Arc::clone(authority.circuit());

        let source = if config.consumer.enabled {
            let stream_conn = connect_redis(&config.cache.redis_url, &retry, "stream").await?;
            Some(Arc::new(RedisStreamSource::new(
                stream_conn,
                config.consumer.stream_key.clone(),
                config.consumer.group.clone(),
                config.consumer.consumer_name.clone(),
                config.consumer.block_timeout_duration(),
                config.consumer.batch_size,
            )))
        } else {
            info!("Event consumer disabled by configuration");
            None
        };

        let synchronizer = StockSynchronizer::new(
            Arc::new(cache),
            Arc::new(authority),
            config.cache.ttl_duration(),
        )
        .with_slo(config.slo.clone());

        Ok(Self::new(config, synchronizer, source).with_circuit(circuit))
    }
}

impl<C, A, D> StockService<C, A, D>
where
    C: AvailabilityCache,
    A: AuthorityClient,
    D: DeliverySource,
{
    /// Assemble a service from already-built parts.
    ///
    /// Starts in `Created`. Call [`start()`](Self::start) to run the consumer.
    pub fn new(
        config: StockSyncConfig,
        synchronizer: StockSynchronizer<C, A>,
        source: Option<Arc<D>>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ServiceState::Created);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            config,
            synchronizer,
            source,
            circuit: None,
            state_tx,
            state_rx,
            shutdown_tx,
            shutdown_rx,
            consumer_running: Arc::new(AtomicBool::new(false)),
            handles: RwLock::new(Vec::new()),
        }
    }

    /// Report this circuit in [`health_check`](Self::health_check).
    #[must_use]
    pub fn with_circuit(mut self, circuit: Arc<AuthorityCircuit>) -> Self {
        self.circuit = Some(circuit);
        self
    }

    pub fn synchronizer(&self) -> &StockSynchronizer<C, A> {
        &self.synchronizer
    }

    pub fn config(&self) -> &StockSyncConfig {
        &self.config
    }

    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state(), ServiceState::Running)
    }

    fn consumer_enabled(&self) -> bool {
        self.config.consumer.enabled && self.source.is_some()
    }

    /// Health snapshot for readiness and liveness endpoints. No I/O.
    pub fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let consumer_enabled = self.consumer_enabled();
        let consumer_running = self.consumer_running.load(Ordering::Acquire);
        let authority_circuit = self.circuit.as_ref().map(|c| c.state());

        let ready = state == ServiceState::Running && (!consumer_enabled || consumer_running);
        let healthy = ready && authority_circuit != Some(CircuitState::Open);

        HealthCheck {
            state,
            consumer_enabled,
            consumer_running,
            authority_circuit,
            ready,
            healthy,
        }
    }

    fn set_state(&self, state: ServiceState) {
        let _ = self.state_tx.send(state);
        metrics::set_service_state(&state.to_string());
    }

    /// Start the service.
    ///
    /// 1. Creates the consumer group if needed
    /// 2. Spawns the event consumer
    ///
    /// With the consumer disabled this only moves the state to `Running`.
    pub async fn start(&mut self) -> Result<()> {
        if self.state() != ServiceState::Created {
            return Err(StockError::InvalidState {
                expected: "Created".to_string(),
                actual: self.state().to_string(),
            });
        }

        info!(
            service = %self.config.service_name,
            consumer_enabled = self.consumer_enabled(),
            "Starting stock service"
        );
        self.set_state(ServiceState::Connecting);

        if self.config.consumer.enabled {
            let Some(source) = self.source.clone() else {
                error!("Consumer enabled but no delivery source configured");
                self.set_state(ServiceState::Failed);
                return Err(StockError::Config(
                    "consumer.enabled requires a delivery source".to_string(),
                ));
            };

            if let Err(e) = source.ensure_group().await {
                error!(error = %e, "Failed to create consumer group");
                self.set_state(ServiceState::Failed);
                return Err(e);
            }

            self.spawn_consumer(source).await;
        }

        self.set_state(ServiceState::Running);
        info!("Stock service running");
        Ok(())
    }

    async fn spawn_consumer(&self, source: Arc<D>) {
        let synchronizer = self.synchronizer.clone();
        let config = self.config.consumer.clone();
        let shutdown_rx = self.shutdown_rx.clone();
        let running = Arc::clone(&self.consumer_running);

        let handle = tokio::spawn(async move {
            run_consumer(synchronizer, source, config, shutdown_rx, running).await;
        });

        debug!("Spawned event consumer");
        self.handles.write().await.push(handle);
    }

    /// Stop the consumer, waiting up to `consumer.drain_timeout` for the
    /// in-flight batch. Unacknowledged deliveries are redelivered on restart.
    pub async fn shutdown(&mut self) {
        info!("Shutting down stock service");
        self.set_state(ServiceState::ShuttingDown);

        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = {
            let mut guard = self.handles.write().await;
            std::mem::take(&mut *guard)
        };

        let drain_timeout = self.config.consumer.drain_timeout_duration();
        for (i, handle) in handles.into_iter().enumerate() {
            match tokio::time::timeout(drain_timeout, handle).await {
                Ok(Ok(())) => debug!(task = i + 1, "Task completed gracefully"),
                Ok(Err(e)) => warn!(task = i + 1, error = %e, "Task panicked during shutdown"),
                Err(_) => warn!(
                    task = i + 1,
                    timeout_ms = drain_timeout.as_millis(),
                    "Task timed out during shutdown, pending events will be redelivered"
                ),
            }
        }

        self.consumer_running.store(false, Ordering::Release);
        self.set_state(ServiceState::Stopped);
        info!("Stock service stopped");
    }
}
