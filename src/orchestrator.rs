//! Product write orchestrator.
//!
//! Creating a product touches two systems: the local product store and the
//! warehouse. Creation is all-or-nothing from the caller's point of view:
//!
//! ```text
//! begin ──► insert ──► provision ──ok──► commit ──► Ok(product)
//!             │            │
//!             └──err───────┴──err──► rollback ──► Err
//! ```
//!
//! The warehouse call happens while the local transaction is still open, so
//! a provisioning failure leaves no local row behind. The reverse gap remains:
//! if the commit itself fails after the warehouse accepted the record, the
//! warehouse holds a stock row for an id that never became visible. That case
//! is logged at `error` with both ids.

use crate::authority::AuthorityClient;
use crate::cache::AvailabilityCache;
use crate::error::{Result, StockError};
use crate::metrics;
use crate::product::{NewProduct, Product, ProductStore, ProductTransaction, ProductUpdate};
use crate::synchronizer::StockSynchronizer;
use crate::types::ProductId;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A product together with its current availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductView {
    #[serde(flatten)]
    pub product: Product,
    pub stock: u64,
}

/// Coordinates product writes with warehouse stock provisioning.
pub struct ProductOrchestrator<S, C, A>
where
    S: ProductStore,
    C: AvailabilityCache,
    A: AuthorityClient,
{
    store: Arc<S>,
    synchronizer: StockSynchronizer<C, A>,
}

impl<S, C, A> Clone for ProductOrchestrator<S, C, A>
where
    S: ProductStore,
    C: AvailabilityCache,
    A: AuthorityClient,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            synchronizer: self.synchronizer.clone(),
        }
    }
}

impl<S, C, A> ProductOrchestrator<S, C, A>
where
    S: ProductStore,
    C: AvailabilityCache,
    A: AuthorityClient,
{
    pub fn new(store: Arc<S>, synchronizer: StockSynchronizer<C, A>) -> Self {
        Self { store, synchronizer }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn synchronizer(&self) -> &StockSynchronizer<C, A> {
        &self.synchronizer
    }

    /// Insert a product and create its warehouse stock record.
    ///
    /// Returns the committed product only if both steps succeeded. Any
    /// failure rolls back the insert and is returned unchanged.
    pub async fn create_product(&self, new_product: NewProduct) -> Result<Product> {
        let mut tx = self.store.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin product transaction");
            e
        })?;

        let product = match tx.create(new_product).await {
            Ok(product) => product,
            Err(e) => {
                error!(error = %e, "Product insert failed");
                metrics::record_product_create("insert_failed");
                discard(tx, None).await;
                return Err(e);
            }
        };

        let provisioned = self
            .synchronizer
            .provision(product.shop_id, product.id)
            .await;

        self.finish_transaction(tx, &product, provisioned).await?;

        info!(product_id = %product.id, shop_id = %product.shop_id, "Product created");
        Ok(product)
    }

    /// Commit when provisioning succeeded, otherwise roll back.
    async fn finish_transaction(
        &self,
        tx: S::Tx,
        product: &Product,
        provisioned: Result<()>,
    ) -> Result<()> {
        if let Err(e) = provisioned {
            warn!(product_id = %product.id, error = %e, "Provisioning failed, rolling back product insert");
            metrics::record_product_create("rolled_back");
            discard(tx, Some(product.id)).await;
            return Err(e);
        }

        match tx.commit().await {
            Ok(()) => {
                metrics::record_product_create("created");
                Ok(())
            }
            Err(e) => {
                metrics::record_product_create("commit_failed");
                error!(
                    product_id = %product.id,
                    shop_id = %product.shop_id,
                    error = %e,
                    "Commit failed after warehouse provisioning; warehouse stock record is orphaned"
                );
                Err(e)
            }
        }
    }

    /// Load an active product with its availability.
    ///
    /// `NotFound` for missing or inactive products. Availability comes from
    /// [`read_through`](StockSynchronizer::read_through), so an unreachable
    /// warehouse on a cold cache fails the read.
    pub async fn get_product(&self, id: ProductId) -> Result<ProductView> {
        let product = self.active_product(id).await?;
        let stock = self.synchronizer.read_through(product.id).await?;
        Ok(ProductView { product, stock })
    }

    /// Replace an active product's editable fields.
    pub async fn update_product(&self, id: ProductId, update: ProductUpdate) -> Result<Product> {
        self.active_product(id).await?;
        let product = self.store.update(id, update).await.map_err(|e| {
            error!(product_id = %id, error = %e, "Product update failed");
            e
        })?;
        info!(product_id = %id, "Product updated");
        Ok(product)
    }

    /// Activate or deactivate a product. Cached availability is left to expire.
    pub async fn set_active_status(&self, id: ProductId, active: bool) -> Result<()> {
        self.store.set_active_status(id, active).await.map_err(|e| {
            error!(product_id = %id, active, error = %e, "Failed to set product status");
            e
        })?;
        info!(product_id = %id, active, "Product status changed");
        Ok(())
    }

    async fn active_product(&self, id: ProductId) -> Result<Product> {
        match self.store.get_by_id(id).await? {
            Some(product) if product.active => Ok(product),
            Some(_) => {
                debug!(product_id = %id, "Product is inactive");
                Err(StockError::NotFound(format!("product {}", id)))
            }
            None => Err(StockError::NotFound(format!("product {}", id))),
        }
    }
}

/// Roll back; a rollback failure is logged and otherwise ignored since the
/// caller already has the error that caused it.
async fn discard<T: ProductTransaction>(tx: T, product_id: Option<ProductId>) {
    if let Err(e) = tx.rollback().await {
        error!(product_id = ?product_id.map(|id| id.0), error = %e, "Rollback failed");
    }
}
