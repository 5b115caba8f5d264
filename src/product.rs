// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local product store boundary.
//!
//! Product metadata lives in a relational store owned by the product
//! service. The stock subsystem only needs a narrow slice of it:
//!
//! - Load one product by id
//! - Insert a product inside a transaction that can be rolled back
//! - Update metadata and toggle activation
//!
//! [`MemoryProductStore`] implements the boundary for standalone use and
//! tests. A SQL-backed store implements the same traits.

use crate::error::StockError;
use crate::types::{epoch_millis, BoxFuture, ProductId, ShopId};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A catalog product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    /// Price in minor currency units.
    pub price: i64,
    pub category: String,
    pub image_url: String,
    pub shop_id: ShopId,
    pub active: bool,
    /// Epoch milliseconds.
    pub created_at: u64,
    /// Epoch milliseconds.
    pub updated_at: u64,
}

/// Fields supplied when creating a product. New products start active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: i64,
    pub category: String,
    pub image_url: String,
    pub shop_id: ShopId,
}

/// Full replacement of a product's editable fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductUpdate {
    pub name: String,
    pub description: String,
    pub price: i64,
    pub category: String,
    pub image_url: String,
    pub shop_id: ShopId,
    pub active: bool,
}

/// An open write transaction.
///
/// Dropping a transaction without calling [`commit`](Self::commit) discards
/// its writes.
pub trait ProductTransaction: Send + 'static {
    /// Insert a product; the store assigns the id and timestamps.
    fn create(&mut self, product: NewProduct) -> BoxFuture<'_, Product>;

    fn commit(self) -> BoxFuture<'static, ()>;

    fn rollback(self) -> BoxFuture<'static, ()>;
}

/// Product persistence as seen by the write orchestrator.
pub trait ProductStore: Send + Sync + 'static {
    type Tx: ProductTransaction;

    fn begin(&self) -> BoxFuture<'_, Self::Tx>;

    /// Load a product whether or not it is active.
    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Option<Product>>;

    /// Replace editable fields. `NotFound` for an unknown id.
    fn update(&self, id: ProductId, update: ProductUpdate) -> BoxFuture<'_, Product>;

    /// Toggle activation. `NotFound` for an unknown id.
    fn set_active_status(&self, id: ProductId, active: bool) -> BoxFuture<'_, ()>;
}

// =============================================================================
// In-memory store
// =============================================================================

struct MemoryTables {
    rows: DashMap<ProductId, Product>,
    /// Consumed even by rolled-back inserts, like a database sequence.
    next_id: AtomicI64,
}

/// In-process product store with transactional inserts.
#[derive(Clone)]
pub struct MemoryProductStore {
    tables: Arc<MemoryTables>,
}

impl Default for MemoryProductStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProductStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(MemoryTables {
                rows: DashMap::new(),
                next_id: AtomicI64::new(1),
            }),
        }
    }

    /// Committed product count.
    pub fn len(&self) -> usize {
        self.tables.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.rows.is_empty()
    }
}

/// Transaction over [`MemoryProductStore`]. Inserts are staged until commit.
pub struct MemoryTransaction {
    tables: Arc<MemoryTables>,
    staged: Vec<Product>,
}

impl ProductTransaction for MemoryTransaction {
    fn create(&mut self, product: NewProduct) -> BoxFuture<'_, Product> {
        Box::pin(async move {
            let id = ProductId(self.tables.next_id.fetch_add(1, Ordering::SeqCst));
            let now = epoch_millis();
            let row = Product {
                id,
                name: product.name,
                description: product.description,
                price: product.price,
                category: product.category,
                image_url: product.image_url,
                shop_id: product.shop_id,
                active: true,
                created_at: now,
                updated_at: now,
            };
            self.staged.push(row.clone());
            Ok(row)
        })
    }

    fn commit(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let count = self.staged.len();
            for row in self.staged {
                self.tables.rows.insert(row.id, row);
            }
            debug!(rows = count, "Committed product transaction");
            Ok(())
        })
    }

    fn rollback(self) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            debug!(rows = self.staged.len(), "Rolled back product transaction");
            Ok(())
        })
    }
}

impl ProductStore for MemoryProductStore {
    type Tx = MemoryTransaction;

    fn begin(&self) -> BoxFuture<'_, MemoryTransaction> {
        let tables = Arc::clone(&self.tables);
        Box::pin(async move {
            Ok(MemoryTransaction {
                tables,
                staged: Vec::new(),
            })
        })
    }

    fn get_by_id(&self, id: ProductId) -> BoxFuture<'_, Option<Product>> {
        Box::pin(async move { Ok(self.tables.rows.get(&id).map(|row| row.value().clone())) })
    }

    fn update(&self, id: ProductId, update: ProductUpdate) -> BoxFuture<'_, Product> {
        Box::pin(async move {
            let mut row = self
                .tables
                .rows
                .get_mut(&id)
                .ok_or_else(|| StockError::NotFound(format!("product {}", id)))?;
            row.name = update.name;
            row.description = update.description;
            row.price = update.price;
            row.category = update.category;
            row.image_url = update.image_url;
            row.shop_id = update.shop_id;
            row.active = update.active;
            row.updated_at = epoch_millis();
            Ok(row.value().clone())
        })
    }

    fn set_active_status(&self, id: ProductId, active: bool) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut row = self
                .tables
                .rows
                .get_mut(&id)
                .ok_or_else(|| StockError::NotFound(format!("product {}", id)))?;
            row.active = active;
            row.updated_at = epoch_millis();
            Ok(())
        })
    }
}
