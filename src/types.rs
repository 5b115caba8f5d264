// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Core value types shared by the cache, the authority client and the
//! event consumer.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

/// Type alias for boxed async futures (keeps trait signatures readable).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Identifier of a product in both the local store and the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub i64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ProductId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Identifier of the shop that owns a product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShopId(pub i64);

impl fmt::Display for ShopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ShopId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A single observation of available stock for a product.
///
/// Only lives as a cache entry or as a transient value; never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvailabilityRecord {
    pub product_id: ProductId,
    pub quantity: u64,
    /// Wall-clock milliseconds since the Unix epoch.
    pub observed_at: u64,
}

impl AvailabilityRecord {
    /// Record an observation made now.
    pub fn observed_now(product_id: ProductId, quantity: u64) -> Self {
        Self {
            product_id,
            quantity,
            observed_at: epoch_millis(),
        }
    }
}

/// Body of the warehouse "create stock record" call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockInitRequest {
    pub shop_id: ShopId,
    pub product_id: ProductId,
}

impl StockInitRequest {
    pub fn new(shop_id: ShopId, product_id: ProductId) -> Self {
        Self { shop_id, product_id }
    }
}

/// Current time as epoch milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
