// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Entities
//!
//! Queues buffer messages for consumption. A queue entity declares itself,
//! binds to the configured exchanges, and publishes through the default
//! exchange using its own name as routing key (direct delivery).

use crate::channel::DeclareOptions;
use crate::config::QueueAttributes;
use crate::connection::ChannelProvider;
use crate::entity::{publish_with_retry, AmqpEntity};
use crate::errors::AmqpError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// A configured queue bound to one connection.
pub struct QueueEntity {
    alias: String,
    name: String,
    attributes: QueueAttributes,
    connection: Arc<dyn ChannelProvider>,
}

impl QueueEntity {
    pub fn new(
        connection: Arc<dyn ChannelProvider>,
        alias: &str,
        name: &str,
        attributes: QueueAttributes,
    ) -> QueueEntity {
        QueueEntity {
            alias: alias.to_owned(),
            name: name.to_owned(),
            attributes,
            connection,
        }
    }

    pub fn attributes(&self) -> &QueueAttributes {
        &self.attributes
    }

    fn declare_options(&self) -> DeclareOptions {
        DeclareOptions {
            passive: self.attributes.passive,
            durable: self.attributes.durable,
            exclusive: self.attributes.exclusive,
            auto_delete: self.attributes.auto_delete,
            internal: self.attributes.internal,
            nowait: self.attributes.nowait,
        }
    }
}

#[async_trait]
impl AmqpEntity for QueueEntity {
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
        match channel.queue_declare(&self.name, self.declare_options()).await {
            Err(err)
                if err.is_precondition_failed()
                    && !self.attributes.throw_exception_on_redeclare =>
            {
                // The 406 leaves the channel unusable; a fresh one is
                // mandatory before any further call.
                warn!(
                    error = err.to_string(),
                    queue = self.name,
                    "queue exists with different attributes, reconnecting"
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
                .queue_bind(&self.name, &spec.exchange, &spec.routing_key)
                .await
            {
                Err(err)
                    if err.is_not_found() && !self.attributes.throw_exception_on_bind_fail =>
                {
                    warn!(
                        error = err.to_string(),
                        queue = self.name,
                        exchange = spec.exchange,
                        "bind target missing, reconnecting"
                    );
                    return self.connection.reconnect().await;
                }
                Err(err) => return Err(err),
                Ok(()) => {}
            }
        }
        debug!(queue = self.name, "queue binds applied");
        Ok(())
    }

    async fn delete(&self) -> Result<(), AmqpError> {
        let channel = self.connection.channel().await?;
        channel.queue_delete(&self.name).await
    }

    /// Publishes through the default exchange, addressed directly to this
    /// queue. The caller-supplied routing key is ignored.
    async fn publish(&self, payload: &[u8], _routing_key: &str) -> Result<(), AmqpError> {
        if self.attributes.auto_create {
            self.create().await?;
            self.bind().await?;
        }
        publish_with_retry(&self.connection, "", &self.name, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AmqpChannel, MockAmqpChannel};
    use crate::config::QueueBind;
    use crate::connection::MockChannelProvider;

    fn provider_returning(channel: MockAmqpChannel) -> MockChannelProvider {
        let mut provider = MockChannelProvider::new();
        provider.expect_alias().return_const("default".to_owned());
        let channel = Arc::new(channel) as Arc<dyn AmqpChannel>;
        provider
            .expect_channel()
            .returning(move || Ok(channel.clone()));
        provider
    }

    fn entity(attributes: QueueAttributes, provider: MockChannelProvider) -> QueueEntity {
        QueueEntity::new(Arc::new(provider), "q1", "orders.create", attributes)
    }

    #[tokio::test]
    async fn create_declares_with_effective_attributes() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .withf(|name, options| {
                name == "orders.create"
                    && *options
                        == DeclareOptions {
                            durable: true,
                            exclusive: true,
                            ..DeclareOptions::default()
                        }
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let attributes = QueueAttributes {
            durable: true,
            exclusive: true,
            ..QueueAttributes::default()
        };
        entity(attributes, provider_returning(channel))
            .create()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn redeclare_conflict_is_swallowed_and_reconnects_when_configured() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .returning(|_, _| Err(AmqpError::PreconditionFailed("mismatch".to_owned())));

        let mut provider = provider_returning(channel);
        provider.expect_reconnect().times(1).returning(|| Ok(()));

        let attributes = QueueAttributes {
            throw_exception_on_redeclare: false,
            ..QueueAttributes::default()
        };
        entity(attributes, provider).create().await.unwrap();
    }

    #[tokio::test]
    async fn redeclare_conflict_propagates_by_default() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .returning(|_, _| Err(AmqpError::PreconditionFailed("mismatch".to_owned())));

        let err = entity(QueueAttributes::default(), provider_returning(channel))
            .create()
            .await
            .unwrap_err();
        assert!(err.is_precondition_failed());
    }

    #[tokio::test]
    async fn non_redeclare_failures_always_propagate() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .returning(|_, _| Err(AmqpError::Protocol("access refused".to_owned())));

        let mut provider = provider_returning(channel);
        provider.expect_reconnect().times(0);

        let attributes = QueueAttributes {
            throw_exception_on_redeclare: false,
            ..QueueAttributes::default()
        };
        let err = entity(attributes, provider).create().await.unwrap_err();
        assert!(matches!(err, AmqpError::Protocol(_)));
    }

    #[tokio::test]
    async fn empty_bind_list_never_touches_the_channel() {
        let mut provider = MockChannelProvider::new();
        provider.expect_alias().return_const("default".to_owned());
        provider.expect_channel().times(0);

        entity(QueueAttributes::default(), provider)
            .bind()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn bind_issues_one_call_per_entry_in_order() {
        let mut channel = MockAmqpChannel::new();
        let mut order = mockall::Sequence::new();
        channel
            .expect_queue_bind()
            .withf(|queue, exchange, key| {
                queue == "orders.create" && exchange == "first.exchange" && key == "a"
            })
            .times(1)
            .in_sequence(&mut order)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_queue_bind()
            .withf(|queue, exchange, key| {
                queue == "orders.create" && exchange == "second.exchange" && key == "b"
            })
            .times(1)
            .in_sequence(&mut order)
            .returning(|_, _, _| Ok(()));

        let attributes = QueueAttributes {
            bind: vec![
                QueueBind {
                    exchange: "first.exchange".to_owned(),
                    routing_key: "a".to_owned(),
                },
                QueueBind {
                    exchange: "second.exchange".to_owned(),
                    routing_key: "b".to_owned(),
                },
            ],
            ..QueueAttributes::default()
        };
        entity(attributes, provider_returning(channel))
            .bind()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_addresses_default_exchange_with_queue_name() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_basic_publish()
            .withf(|exchange, key, payload| {
                exchange.is_empty() && key == "orders.create" && payload == b"a"
            })
            .times(1)
            .returning(|_, _, _| Ok(()));

        entity(QueueAttributes::default(), provider_returning(channel))
            .publish(b"a", "ignored")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn publish_with_auto_create_declares_and_binds_first() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_declare()
            .times(1)
            .returning(|_, _| Ok(()));
        channel
            .expect_queue_bind()
            .times(1)
            .returning(|_, _, _| Ok(()));
        channel
            .expect_basic_publish()
            .times(1)
            .returning(|_, _, _| Ok(()));

        let attributes = QueueAttributes {
            auto_create: true,
            bind: vec![QueueBind {
                exchange: "orders".to_owned(),
                routing_key: "*".to_owned(),
            }],
            ..QueueAttributes::default()
        };
        entity(attributes, provider_returning(channel))
            .publish(b"a", "")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn delete_issues_queue_delete() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_queue_delete()
            .withf(|name| name == "orders.create")
            .times(1)
            .returning(|_| Ok(()));

        entity(QueueAttributes::default(), provider_returning(channel))
            .delete()
            .await
            .unwrap();
    }
}
