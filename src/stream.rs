// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Availability-change stream: event codec and consumer-group source.
//!
//! Events arrive on a Redis stream (default `stock.available`) as entries
//! with a single `payload` field holding `{"product_id": .., "available": ..}`.
//! The stream is read through a named consumer group so that deliveries
//! survive restarts:
//!
//! - `XREADGROUP ... >` hands out new entries and records them as pending
//! - `XREADGROUP ... <id>` replays this consumer's pending entries after `<id>`
//! - `XACK` removes an entry from the pending list
//!
//! An entry that is never acknowledged stays pending and is seen again by the
//! next pending replay. That is the redelivery mechanism for failed applies.

use crate::error::{Result, StockError};
use crate::types::{BoxFuture, ProductId};
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Stream entry field that carries the JSON event.
pub const PAYLOAD_FIELD: &str = "payload";

/// Pushed availability update for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityChangeEvent {
    pub product_id: ProductId,
    /// Negative values are rejected at decode time.
    pub available: u64,
}

/// Decode an event payload.
pub fn decode_event(payload: &[u8]) -> Result<AvailabilityChangeEvent> {
    serde_json::from_slice(payload)
        .map_err(|e| StockError::Decode(format!("invalid availability event: {}", e)))
}

/// One entry handed to this consumer by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub stream_id: String,
    /// Raw payload bytes; empty when the entry had no payload field.
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn new(stream_id: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            stream_id: stream_id.into(),
            payload: payload.into(),
        }
    }
}

/// At-least-once delivery channel the event consumer reads from.
pub trait DeliverySource: Send + Sync + 'static {
    /// Create the durable subscription if it does not exist yet.
    fn ensure_group(&self) -> BoxFuture<'_, ()>;

    /// This consumer's unacknowledged deliveries with ids greater than `after`.
    fn fetch_pending<'a>(&'a self, after: &'a str) -> BoxFuture<'a, Vec<Delivery>>;

    /// New deliveries; may block up to the configured timeout and return none.
    fn fetch_new(&self) -> BoxFuture<'_, Vec<Delivery>>;

    /// Acknowledge a delivery so it is never redelivered.
    fn ack<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, ()>;
}

impl<D: DeliverySource + ?Sized> DeliverySource for Arc<D> {
    fn ensure_group(&self) -> BoxFuture<'_, ()> {
        (**self).ensure_group()
    }

    fn fetch_pending<'a>(&'a self, after: &'a str) -> BoxFuture<'a, Vec<Delivery>> {
        (**self).fetch_pending(after)
    }

    fn fetch_new(&self) -> BoxFuture<'_, Vec<Delivery>> {
        (**self).fetch_new()
    }

    fn ack<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, ()> {
        (**self).ack(stream_id)
    }
}

// =============================================================================
// Redis Streams consumer group
// =============================================================================

/// Consumer-group reader over a Redis stream.
#[derive(Clone)]
pub struct RedisStreamSource {
    conn: ConnectionManager,
    stream_key: String,
    group: String,
    consumer: String,
    block_timeout: Duration,
    batch_size: usize,
}

impl RedisStreamSource {
    pub fn new(
        conn: ConnectionManager,
        stream_key: impl Into<String>,
        group: impl Into<String>,
        consumer: impl Into<String>,
        block_timeout: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
            group: group.into(),
            consumer: consumer.into(),
            block_timeout,
            batch_size: batch_size.max(1),
        }
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    async fn read_group(&self, id: &str, block: bool) -> Result<Vec<Delivery>> {
        let mut conn = self.conn.clone();
        let mut opts = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(self.batch_size);
        if block {
            opts = opts.block(self.block_timeout.as_millis() as usize);
        }

        // XREADGROUP GROUP g c [BLOCK ms] COUNT n STREAMS key id
        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[id], &opts)
            .await
            .map_err(|e| StockError::cache("XREADGROUP", e))?;

        let mut deliveries = Vec::new();
        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            for entry in stream.ids {
                let payload = payload_bytes(&entry.map);
                trace!(stream_id = %entry.id, bytes = payload.len(), "Received delivery");
                deliveries.push(Delivery::new(entry.id, payload));
            }
        }
        Ok(deliveries)
    }
}

impl DeliverySource for RedisStreamSource {
    fn ensure_group(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            // A new group starts at the head so events already retained are applied.
            let created: redis::RedisResult<()> = conn
                .xgroup_create_mkstream(&self.stream_key, &self.group, "0")
                .await;
            match created {
                Ok(()) => {
                    info!(stream = %self.stream_key, group = %self.group, "Created consumer group");
                    Ok(())
                }
                Err(e) if e.code() == Some("BUSYGROUP") => {
                    debug!(stream = %self.stream_key, group = %self.group, "Consumer group exists");
                    Ok(())
                }
                Err(e) => Err(StockError::cache("XGROUP CREATE", e)),
            }
        })
    }

    fn fetch_pending<'a>(&'a self, after: &'a str) -> BoxFuture<'a, Vec<Delivery>> {
        Box::pin(async move { self.read_group(after, false).await })
    }

    fn fetch_new(&self) -> BoxFuture<'_, Vec<Delivery>> {
        Box::pin(async move { self.read_group(">", true).await })
    }

    fn ack<'a>(&'a self, stream_id: &'a str) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let mut conn = self.conn.clone();
            let _: i64 = conn
                .xack(&self.stream_key, &self.group, &[stream_id])
                .await
                .map_err(|e| StockError::cache("XACK", e))?;
            Ok(())
        })
    }
}

/// Extract the payload field; anything else (missing, non-string) is empty.
fn payload_bytes(fields: &HashMap<String, redis::Value>) -> Vec<u8> {
    match fields.get(PAYLOAD_FIELD) {
        Some(redis::Value::BulkString(bytes)) => bytes.clone(),
        Some(redis::Value::SimpleString(s)) => s.as_bytes().to_vec(),
        _ => Vec::new(),
    }
}
