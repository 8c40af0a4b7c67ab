// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Publishers
//!
//! A publisher is a named handle over one entity. Publishing through an
//! exchange routes by the caller-supplied key; publishing through a queue
//! delivers directly, ignoring the key. Transactional publishing puts the
//! underlying channel in transaction mode so a batch can be committed or
//! rolled back as one unit.

use crate::entity::AmqpEntity;
use crate::errors::AmqpError;
use std::sync::Arc;
use tracing::debug;

/// A named publish handle over an exchange or queue entity.
pub struct Publisher {
    alias: String,
    entity: Arc<dyn AmqpEntity>,
}

impl Publisher {
    pub fn new(alias: &str, entity: Arc<dyn AmqpEntity>) -> Publisher {
        Publisher {
            alias: alias.to_owned(),
            entity,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Broker-visible name of the target entity.
    pub fn target(&self) -> &str {
        self.entity.name()
    }

    pub async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<(), AmqpError> {
        debug!(
            publisher = self.alias,
            target = self.entity.name(),
            routing_key = routing_key,
            "publishing message"
        );
        self.entity.publish(payload, routing_key).await
    }

    /// Puts the entity's channel in transaction mode. Publishes after this
    /// point are held by the broker until commit or rollback.
    pub async fn start_transaction(&self) -> Result<(), AmqpError> {
        let channel = self.entity.connection().channel().await?;
        channel.tx_select().await
    }

    /// Commits the pending transactional publishes.
    pub async fn commit(&self) -> Result<(), AmqpError> {
        let channel = self.entity.connection().channel().await?;
        channel.tx_commit().await
    }

    /// Discards the pending transactional publishes.
    pub async fn roll_back(&self) -> Result<(), AmqpError> {
        let channel = self.entity.connection().channel().await?;
        channel.tx_rollback().await
    }
}
