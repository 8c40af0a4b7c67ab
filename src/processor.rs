// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Processors
//!
//! A processor inspects a delivered message and decides accept or reject.
//! The runner around it owns the bookkeeping: a processed-message counter,
//! the ack on acceptance, the nack-with-redeliver on rejection or processor
//! failure, and the guard against double acknowledgement when a processor
//! settles the message itself. Acknowledgement I/O failures are logged and
//! never re-raised; the broker may redeliver regardless.

use crate::channel::{AmqpChannel, Delivery};
use crate::errors::AmqpError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Failure produced by a processor; always local, never terminates the loop.
pub type ProcessingError = Box<dyn std::error::Error + Send + Sync>;

/// User-supplied message handling.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    /// Returns `true` to acknowledge the message, `false` to reject it with
    /// redelivery. A processor may settle the message itself through the
    /// [`Acknowledger`]; the runner will not acknowledge it a second time.
    async fn process_message(
        &self,
        delivery: &Delivery,
        ack: &Acknowledger,
    ) -> Result<bool, ProcessingError>;
}

/// Idempotent ack/nack handle for one delivery.
///
/// The first settle wins; later calls are no-ops. Safe to share with the
/// processor so it can settle early.
pub struct Acknowledger {
    channel: Arc<dyn AmqpChannel>,
    delivery_tag: u64,
    resolved: AtomicBool,
}

impl Acknowledger {
    pub fn new(channel: Arc<dyn AmqpChannel>, delivery_tag: u64) -> Acknowledger {
        Acknowledger {
            channel,
            delivery_tag,
            resolved: AtomicBool::new(false),
        }
    }

    /// Acknowledges the delivery. Best-effort: failures are logged only.
    pub async fn ack(&self) {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.channel.basic_ack(self.delivery_tag).await {
            error!(
                error = err.to_string(),
                delivery_tag = self.delivery_tag,
                "error whiling ack msg"
            );
        }
    }

    /// Rejects the delivery. Best-effort: failures are logged only.
    pub async fn nack(&self, requeue: bool) {
        if self.resolved.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.channel.basic_nack(self.delivery_tag, requeue).await {
            error!(
                error = err.to_string(),
                delivery_tag = self.delivery_tag,
                "error whiling nack msg"
            );
        }
    }

    /// Whether the delivery has already been settled.
    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::SeqCst)
    }
}

/// Drives a processor over deliveries and keeps the processed count.
pub struct ProcessorRunner {
    processor: Arc<dyn MessageProcessor>,
    processed: AtomicU64,
}

impl ProcessorRunner {
    pub fn new(processor: Arc<dyn MessageProcessor>) -> ProcessorRunner {
        ProcessorRunner {
            processor,
            processed: AtomicU64::new(0),
        }
    }

    /// Routes one delivery through the processor and settles it.
    ///
    /// `true` acks, `false` or a processor failure nacks with redelivery.
    /// When the processor settled the message itself nothing more happens.
    pub async fn consume(&self, channel: Arc<dyn AmqpChannel>, delivery: Delivery) {
        self.processed.fetch_add(1, Ordering::SeqCst);

        let ack = Acknowledger::new(channel, delivery.delivery_tag);
        let accepted = match self.processor.process_message(&delivery, &ack).await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(
                    error = err.to_string(),
                    delivery_tag = delivery.delivery_tag,
                    "processor failure, rejecting message for redelivery"
                );
                false
            }
        };

        if ack.is_resolved() {
            return;
        }
        if accepted {
            ack.ack().await;
        } else {
            ack.nack(true).await;
        }
    }

    /// Monotonic count of consume invocations, regardless of outcome.
    pub fn processed_messages(&self) -> u64 {
        self.processed.load(Ordering::SeqCst)
    }
}

/// Factory producing a processor instance.
pub type ProcessorFactory = Box<dyn Fn() -> Arc<dyn MessageProcessor> + Send + Sync>;

/// Maps processor-identifier tokens from the configuration to factories.
///
/// Resolution happens once at consumer construction, not per message.
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> ProcessorRegistry {
        ProcessorRegistry::default()
    }

    /// Registers a factory under a token. Later registrations replace
    /// earlier ones for the same token.
    pub fn register<F>(mut self, token: &str, factory: F) -> ProcessorRegistry
    where
        F: Fn() -> Arc<dyn MessageProcessor> + Send + Sync + 'static,
    {
        self.factories.insert(token.to_owned(), Box::new(factory));
        self
    }

    /// Resolves a token into a fresh processor instance.
    pub fn resolve(&self, token: &str) -> Result<Arc<dyn MessageProcessor>, AmqpError> {
        match self.factories.get(token) {
            Some(factory) => Ok(factory()),
            None => Err(AmqpError::Configuration(format!(
                "no message processor registered for `{token}`"
            ))),
        }
    }
}

/// Processor that logs message bodies and accepts everything. Handy for
/// smoke-testing a consumer wiring.
#[derive(Default)]
pub struct CliOutputProcessor;

#[async_trait]
impl MessageProcessor for CliOutputProcessor {
    async fn process_message(
        &self,
        delivery: &Delivery,
        _ack: &Acknowledger,
    ) -> Result<bool, ProcessingError> {
        debug!(
            routing_key = delivery.routing_key,
            body = String::from_utf8_lossy(&delivery.data).to_string(),
            "received message"
        );
        Ok(true)
    }
}
