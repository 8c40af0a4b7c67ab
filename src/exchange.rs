// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Entities
//!
//! Exchanges are the broker's routing objects. This module maps an exchange
//! configuration entry onto a live entity: declare with the effective
//! attribute bag, bind the configured queues, delete, and publish addressed
//! by exchange name.

use crate::channel::DeclareOptions;
use crate::config::ExchangeAttributes;
use crate::connection::ChannelProvider;
use crate::entity::{publish_with_retry, AmqpEntity};
use crate::errors::AmqpError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Exchange routing behavior, parsed from the `exchange_type` attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    Direct,
    Fanout,
    #[default]
    Topic,
    Headers,
}

impl ExchangeKind {
    /// Parses the configuration value. Unknown types are a configuration
    /// error so typos surface at container build time.
    pub fn from_config(value: &str) -> Result<ExchangeKind, AmqpError> {
        match value {
            "direct" => Ok(ExchangeKind::Direct),
            "fanout" => Ok(ExchangeKind::Fanout),
            "topic" => Ok(ExchangeKind::Topic),
            "headers" => Ok(ExchangeKind::Headers),
            other => Err(AmqpError::Configuration(format!(
                "unknown exchange type `{other}`"
            ))),
        }
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
        }
    }
}

/// A configured exchange bound to one connection.
pub struct ExchangeEntity {
    alias: String,
    name: String,
    kind: ExchangeKind,
    attributes: ExchangeAttributes,
    connection: Arc<dyn ChannelProvider>,
}

impl ExchangeEntity {
    pub fn new(
        connection: Arc<dyn ChannelProvider>,
        alias: &str,
        name: &str,
        attributes: ExchangeAttributes,
    ) -> Result<ExchangeEntity, AmqpError> {
        let kind = ExchangeKind::from_config(&attributes.exchange_type)?;
        Ok(ExchangeEntity {
            alias: alias.to_owned(),
            name: name.to_owned(),
            kind,
            attributes,
            connection,
        })
    }

    pub fn attributes(&self) -> &ExchangeAttributes {
        &self.attributes
    }

    fn declare_options(&self) -> DeclareOptions {
        DeclareOptions {
            passive: self.attributes.passive,
            durable: self.attributes.durable,
            exclusive: false,
            auto_delete: self.attributes.auto_delete,
            internal: self.attributes.internal,
            nowait: self.attributes.nowait,
        }
    }
}

#[async_trait]
impl AmqpEntity for ExchangeEntity {
    fn alias(&self) -> &str {
        &self.alias
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn connection(&self) -> Arc<dyn ChannelProvider> {
        self.connection.clone()
    }

    async fn create(&self) -> Result<(), AmqpError> {
        let channel = self.connection.channel().await?;
        match channel
            .exchange_declare(&self.name, self.kind, self.declare_options())
            .await
        {
            Err(err)
                if err.is_precondition_failed()
                    && !self.attributes.throw_exception_on_redeclare =>
            {
                // The 406 leaves the channel unusable; a fresh one is
                // mandatory before any further call.
                warn!(
                    error = err.to_string(),
                    exchange = self.name,
                    "exchange exists with different attributes, reconnecting"
                );
                self.connection.reconnect().await
            }
            other => other,
        }
    }

    async fn bind(&self) -> Result<(), AmqpError> {
        if self.attributes.bind.is_empty() {
            return Ok(());
        }

        let channel = self.connection.channel().await?;
        for spec in &self.attributes.bind {
            match channel
                .queue_bind(&spec.queue, &self.name, &spec.routing_key)
                .await
            {
                Err(err)
                    if err.is_not_found() && !self.attributes.throw_exception_on_bind_fail =>
                {
                    warn!(
                        error = err.to_string(),
                        exchange = self.name,
                        queue = spec.queue,
                        "bind target missing, reconnecting"
                    );
                    return self.connection.reconnect().await;
                }
                Err(err) => return Err(err),
                Ok(()) => {}
            }
        }
        debug!(exchange = self.name, "exchange binds applied");
        Ok(())
    }

    async fn delete(&self) -> Result<(), AmqpError> {
        let channel = self.connection.channel().await?;
        channel.exchange_delete(&self.name).await
    }

    async fn publish(&self, payload: &[u8], routing_key: &str) -> Result<(), AmqpError> {
        if self.attributes.auto_create {
            self.create().await?;
            self.bind().await?;
        }
        publish_with_retry(&self.connection, &self.name, routing_key, payload).await
    }
}
