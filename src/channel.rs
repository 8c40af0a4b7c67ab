// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Channel Seam
//!
//! This module defines the verb set the orchestration layer issues against a
//! broker channel and the production implementation backed by `lapin`. The
//! wire protocol itself (framing, handshake, heartbeats) stays inside the
//! client library; this layer only maps operations and classifies failures.

use crate::errors::AmqpError;
use crate::exchange::ExchangeKind;
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions, ExchangeDeleteOptions,
        QueueBindOptions, QueueDeclareOptions, QueueDeleteOptions,
    },
    types::{FieldTable, ShortString},
    BasicProperties,
};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Content type stamped on published messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A delivered message as seen by the orchestration layer: an opaque payload
/// plus the metadata needed for ack/nack addressing.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub exchange: String,
    pub routing_key: String,
    pub redelivered: bool,
    pub data: Vec<u8>,
}

/// Declare flags shared by exchanges and queues.
///
/// `exclusive` only applies to queues and `internal` only to exchanges; the
/// implementation ignores the flag that does not apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeclareOptions {
    pub passive: bool,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub internal: bool,
    pub nowait: bool,
}

/// The broker verbs issued by entities, publishers and consumers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: DeclareOptions,
    ) -> Result<(), AmqpError>;

    async fn queue_declare(&self, name: &str, options: DeclareOptions) -> Result<(), AmqpError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    async fn exchange_delete(&self, name: &str) -> Result<(), AmqpError>;

    async fn queue_delete(&self, name: &str) -> Result<(), AmqpError>;

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError>;

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError>;

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Box<dyn DeliveryStream>, AmqpError>;

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    async fn tx_select(&self) -> Result<(), AmqpError>;

    async fn tx_commit(&self) -> Result<(), AmqpError>;

    async fn tx_rollback(&self) -> Result<(), AmqpError>;
}

/// A registered consumer's delivery source, polled with a bounded wait so the
/// loop can re-evaluate stop conditions even with no traffic.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryStream: Send {
    /// Waits up to `wait` for the next delivery.
    ///
    /// `Ok(None)` means the poll interval expired without traffic, a normal
    /// idle cycle. [`AmqpError::WaitTimeout`] is reserved for timeout-class
    /// failures reported by the transport itself.
    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, AmqpError>;
}

/// Production channel implementation wrapping a `lapin::Channel`.
pub struct LapinChannel {
    inner: lapin::Channel,
}

impl LapinChannel {
    pub fn new(inner: lapin::Channel) -> LapinChannel {
        LapinChannel { inner }
    }
}

#[async_trait]
impl AmqpChannel for LapinChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: DeclareOptions,
    ) -> Result<(), AmqpError> {
        debug!(exchange = name, "declaring exchange");
        self.inner
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    passive: options.passive,
                    durable: options.durable,
                    auto_delete: options.auto_delete,
                    internal: options.internal,
                    nowait: options.nowait,
                },
                FieldTable::default(),
            )
            .await
            .map_err(AmqpError::classify)
    }

    async fn queue_declare(&self, name: &str, options: DeclareOptions) -> Result<(), AmqpError> {
        debug!(queue = name, "declaring queue");
        self.inner
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: options.passive,
                    durable: options.durable,
                    exclusive: options.exclusive,
                    auto_delete: options.auto_delete,
                    nowait: options.nowait,
                },
                FieldTable::default(),
            )
            .await
            .map(|_| ())
            .map_err(AmqpError::classify)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            queue = queue,
            exchange = exchange,
            routing_key = routing_key,
            "binding queue to exchange"
        );
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(AmqpError::classify)
    }

    async fn exchange_delete(&self, name: &str) -> Result<(), AmqpError> {
        self.inner
            .exchange_delete(name, ExchangeDeleteOptions::default())
            .await
            .map_err(AmqpError::classify)
    }

    async fn queue_delete(&self, name: &str) -> Result<(), AmqpError> {
        self.inner
            .queue_delete(name, QueueDeleteOptions::default())
            .await
            .map(|_| ())
            .map_err(AmqpError::classify)
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError> {
        self.inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string())),
            )
            .await
            .map(|_| ())
            .map_err(AmqpError::classify)
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.inner
            .basic_qos(prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|err| AmqpError::QoSDeclarationError(err.to_string()))
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Box<dyn DeliveryStream>, AmqpError> {
        debug!(queue = queue, consumer_tag = consumer_tag, "registering consumer");
        let consumer = self
            .inner
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|_| AmqpError::ConsumerError(queue.to_owned()))?;

        Ok(Box::new(LapinDeliveryStream { consumer }))
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.inner
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
            .map_err(AmqpError::classify)
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.inner
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
            .map_err(AmqpError::classify)
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.inner
            .basic_cancel(consumer_tag, BasicCancelOptions::default())
            .await
            .map_err(AmqpError::classify)
    }

    async fn tx_select(&self) -> Result<(), AmqpError> {
        self.inner.tx_select().await.map_err(AmqpError::classify)
    }

    async fn tx_commit(&self) -> Result<(), AmqpError> {
        self.inner.tx_commit().await.map_err(AmqpError::classify)
    }

    async fn tx_rollback(&self) -> Result<(), AmqpError> {
        self.inner.tx_rollback().await.map_err(AmqpError::classify)
    }
}

/// Delivery stream backed by a `lapin::Consumer`.
pub struct LapinDeliveryStream {
    consumer: lapin::Consumer,
}

#[async_trait]
impl DeliveryStream for LapinDeliveryStream {
    async fn next_delivery(&mut self, wait: Duration) -> Result<Option<Delivery>, AmqpError> {
        match tokio::time::timeout(wait, self.consumer.next()).await {
            // Idle poll, no traffic within the bound.
            Err(_) => Ok(None),
            Ok(None) => Err(AmqpError::ChannelClosed("delivery stream ended".to_owned())),
            Ok(Some(Err(err))) => Err(AmqpError::classify(err)),
            Ok(Some(Ok(delivery))) => Ok(Some(Delivery {
                delivery_tag: delivery.delivery_tag,
                exchange: delivery.exchange.to_string(),
                routing_key: delivery.routing_key.to_string(),
                redelivered: delivery.redelivered,
                data: delivery.data,
            })),
        }
    }
}
