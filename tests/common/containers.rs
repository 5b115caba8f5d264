// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Testcontainers setup for Redis.
//!
//! Provides helpers to spin up Redis containers for integration tests.

use redis::AsyncCommands;
use stock_sync::stream::PAYLOAD_FIELD;
use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage};

/// Create a vanilla Redis container (streams-compatible).
///
/// Uses official redis:7 image. Waits for "Ready to accept connections".
pub fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let image = GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"));
    docker.run(image)
}

/// Get the Redis URL for a container.
pub fn redis_url(container: &Container<'_, GenericImage>) -> String {
    let port = container.get_host_port_ipv4(6379);
    format!("redis://127.0.0.1:{}", port)
}

/// A Redis container playing both cache and event broker.
pub struct TestRedis<'a> {
    #[allow(dead_code)] // Kept alive for container lifetime
    container: Container<'a, GenericImage>,
    pub url: String,
}

impl<'a> TestRedis<'a> {
    pub fn new(docker: &'a Cli) -> Self {
        let container = redis_container(docker);
        let url = redis_url(&container);
        Self { container, url }
    }

    async fn conn(&self) -> redis::RedisResult<redis::aio::MultiplexedConnection> {
        let client = redis::Client::open(self.url.as_str())?;
        client.get_multiplexed_async_connection().await
    }

    /// Publish a raw payload to `stream_key`, the way the warehouse would.
    pub async fn publish_raw(&self, stream_key: &str, payload: &[u8]) -> redis::RedisResult<String> {
        let mut conn = self.conn().await?;
        conn.xadd(stream_key, "*", &[(PAYLOAD_FIELD, payload)]).await
    }

    /// Publish an availability change event.
    pub async fn publish_event(
        &self,
        stream_key: &str,
        product_id: i64,
        available: u64,
    ) -> redis::RedisResult<String> {
        let payload = format!(r#"{{"product_id":{},"available":{}}}"#, product_id, available);
        self.publish_raw(stream_key, payload.as_bytes()).await
    }

    /// Number of entries pending (delivered, unacknowledged) for `group`.
    pub async fn pending_count(&self, stream_key: &str, group: &str) -> redis::RedisResult<usize> {
        let mut conn = self.conn().await?;
        let reply: redis::streams::StreamPendingReply = conn.xpending(stream_key, group).await?;
        Ok(reply.count())
    }

    /// Raw GET of a cache key.
    pub async fn get_raw(&self, key: &str) -> redis::RedisResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get(key).await
    }

    /// Raw SET of a cache key, bypassing the crate.
    pub async fn set_raw(&self, key: &str, value: &str) -> redis::RedisResult<()> {
        let mut conn = self.conn().await?;
        conn.set(key, value).await
    }

    /// Remaining TTL of a key in milliseconds (-2 when absent, -1 when persistent).
    pub async fn pttl(&self, key: &str) -> redis::RedisResult<i64> {
        let mut conn = self.conn().await?;
        conn.pttl(key).await
    }
}
