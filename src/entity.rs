// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Entities
//!
//! Shared contract for the two entity kinds (exchange, queue): idempotent
//! declare and bind, destructive delete, and publish with bounded
//! reconnect-and-retry when the broker severs the channel.

use crate::connection::ChannelProvider;
use crate::errors::AmqpError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Publish attempts before a channel-closed failure becomes fatal.
pub const MAX_RETRIES: u32 = 3;

/// A named broker object wired to one connection.
#[async_trait]
pub trait AmqpEntity: Send + Sync {
    /// Registry key, distinct from the broker-visible name.
    fn alias(&self) -> &str;

    /// Broker-visible name.
    fn name(&self) -> &str;

    /// The connection this entity issues its verbs on.
    fn connection(&self) -> Arc<dyn ChannelProvider>;

    /// Declares the entity with its effective attributes. Safe to call any
    /// number of times.
    async fn create(&self) -> Result<(), AmqpError>;

    /// Applies the configured bind specs in order. Must not touch the channel
    /// when no binds are configured.
    async fn bind(&self) -> Result<(), AmqpError>;

    /// Deletes the entity on the broker. Failures propagate.
    async fn delete(&self) -> Result<(), AmqpError>;

    /// Publishes a payload through this entity.
    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<(), AmqpError>;
}

/// Publishes with reconnect-and-retry on channel-closed failures.
///
/// The broker severing the channel (for example after an unacked protocol
/// violation) is recoverable: reconnect and publish the identical message
/// again, up to [`MAX_RETRIES`] attempts total. The last failure is re-raised
/// once the budget is exhausted. Any other failure propagates immediately.
pub(crate) async fn publish_with_retry(
    connection: &Arc<dyn ChannelProvider>,
    exchange: &str,
    routing_key: &str,
    payload: &[u8],
) -> Result<(), AmqpError> {
    let mut attempt = 1;
    loop {
        let channel = connection.channel().await?;
        match channel.basic_publish(exchange, routing_key, payload).await {
            Ok(()) => return Ok(()),
            Err(err) if err.is_channel_closed() && attempt < MAX_RETRIES => {
                warn!(
                    error = err.to_string(),
                    connection = connection.alias(),
                    attempt = attempt,
                    "channel closed during publish, reconnecting"
                );
                connection.reconnect().await?;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
