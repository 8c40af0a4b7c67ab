// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! End-to-end wiring: configuration -> container -> setup -> publish ->
//! consume, against a recording fake channel.

use async_trait::async_trait;
use rabbitmq_runtime::channel::{AmqpChannel, DeclareOptions, Delivery, DeliveryStream};
use rabbitmq_runtime::config::Config;
use rabbitmq_runtime::connection::ChannelProvider;
use rabbitmq_runtime::consumer::ConsumeLimits;
use rabbitmq_runtime::container::ContainerBuilder;
use rabbitmq_runtime::errors::AmqpError;
use rabbitmq_runtime::exchange::ExchangeKind;
use rabbitmq_runtime::processor::{CliOutputProcessor, ProcessorRegistry};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Recording {
    calls: Mutex<Vec<String>>,
    deliveries: Mutex<VecDeque<Delivery>>,
}

impl Recording {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[derive(Clone)]
struct FakeChannel(Arc<Recording>);

#[async_trait]
impl AmqpChannel for FakeChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: DeclareOptions,
    ) -> Result<(), AmqpError> {
        self.0.record(format!(
            "exchange_declare {name} {kind:?} durable={}",
            options.durable
        ));
        Ok(())
    }

    async fn queue_declare(&self, name: &str, options: DeclareOptions) -> Result<(), AmqpError> {
        self.0
            .record(format!("queue_declare {name} durable={}", options.durable));
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.0
            .record(format!("queue_bind {queue} {exchange} {routing_key}"));
        Ok(())
    }

    async fn exchange_delete(&self, name: &str) -> Result<(), AmqpError> {
        self.0.record(format!("exchange_delete {name}"));
        Ok(())
    }

    async fn queue_delete(&self, name: &str) -> Result<(), AmqpError> {
        self.0.record(format!("queue_delete {name}"));
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError> {
        self.0.record(format!(
            "basic_publish {exchange} {routing_key} {}",
            String::from_utf8_lossy(payload)
        ));
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        self.0.record(format!("basic_qos {prefetch_count}"));
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<Box<dyn DeliveryStream>, AmqpError> {
        self.0.record(format!("basic_consume {queue} {consumer_tag}"));
        Ok(Box::new(FakeStream(self.0.clone())))
    }

    async fn basic_ack(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        self.0.record(format!("basic_ack {delivery_tag}"));
        Ok(())
    }

    async fn basic_nack(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        self.0.record(format!("basic_nack {delivery_tag} {requeue}"));
        Ok(())
    }

    async fn basic_cancel(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        self.0.record(format!("basic_cancel {consumer_tag}"));
        Ok(())
    }

    async fn tx_select(&self) -> Result<(), AmqpError> {
        self.0.record("tx_select".to_owned());
        Ok(())
    }

    async fn tx_commit(&self) -> Result<(), AmqpError> {
        self.0.record("tx_commit".to_owned());
        Ok(())
    }

    async fn tx_rollback(&self) -> Result<(), AmqpError> {
        self.0.record("tx_rollback".to_owned());
        Ok(())
    }
}

struct FakeStream(Arc<Recording>);

#[async_trait]
impl DeliveryStream for FakeStream {
    async fn next_delivery(&mut self, _wait: Duration) -> Result<Option<Delivery>, AmqpError> {
        Ok(self.0.deliveries.lock().unwrap().pop_front())
    }
}

struct FakeProvider {
    alias: String,
    channel: Arc<dyn AmqpChannel>,
}

#[async_trait]
impl ChannelProvider for FakeProvider {
    fn alias(&self) -> &str {
        &self.alias
    }

    async fn channel(&self) -> Result<Arc<dyn AmqpChannel>, AmqpError> {
        Ok(self.channel.clone())
    }

    async fn reconnect(&self) -> Result<(), AmqpError> {
        Ok(())
    }
}

fn config() -> Config {
    Config::from_value(json!({
        "exchanges": {
            "ex1": {
                "connection": "default",
                "name": "orders",
                "attributes": {
                    "exchange_type": "direct",
                    "durable": true
                }
            }
        },
        "queues": {
            "q1": {
                "connection": "default",
                "name": "orders.create",
                "attributes": {
                    "durable": true,
                    "bind": [ { "exchange": "orders", "routing_key": "*" } ]
                }
            }
        },
        "publishers": { "p1": "ex1" },
        "consumers": {
            "c1": { "queue": "q1", "prefetch_count": 5, "message_processor": "cli_output" }
        }
    }))
    .unwrap()
}

#[tokio::test]
async fn setup_publish_and_consume_issue_the_expected_verbs() {
    let recording = Arc::new(Recording::default());
    recording.deliveries.lock().unwrap().push_back(Delivery {
        delivery_tag: 1,
        exchange: "orders".to_owned(),
        routing_key: "*".to_owned(),
        redelivered: false,
        data: b"{\"id\":1}".to_vec(),
    });

    let channel = Arc::new(FakeChannel(recording.clone())) as Arc<dyn AmqpChannel>;
    let provider = Arc::new(FakeProvider {
        alias: "default".to_owned(),
        channel,
    });

    let registry = ProcessorRegistry::new().register("cli_output", || Arc::new(CliOutputProcessor));
    let container = ContainerBuilder::new(registry)
        .with_connection("default", provider)
        .build(config())
        .await
        .unwrap();

    let reports = container.setup(false).await;
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|report| report.is_ok()));
    assert_eq!(
        recording.calls(),
        vec![
            "exchange_declare orders Direct durable=true".to_owned(),
            "queue_declare orders.create durable=true".to_owned(),
            "queue_bind orders.create orders *".to_owned(),
        ]
    );

    container.publish("p1", b"{\"id\":1}", "").await.unwrap();
    assert_eq!(
        recording.calls().last().unwrap(),
        "basic_publish orders  {\"id\":1}"
    );

    let limits = ConsumeLimits {
        message_count: 1,
        seconds_uptime: u64::MAX,
        memory_mib: u64::MAX,
    };
    assert_eq!(container.consume("c1", limits).await.unwrap(), 0);
    assert_eq!(container.consumer("c1").unwrap().processed_messages(), 1);

    let calls = recording.calls();
    assert!(calls.contains(&"basic_qos 5".to_owned()));
    let consume_call = calls
        .iter()
        .find(|call| call.starts_with("basic_consume "))
        .unwrap();
    assert!(consume_call.starts_with("basic_consume orders.create c1_"));
    assert!(consume_call.ends_with(&format!("_{}", std::process::id())));
    assert!(calls.contains(&"basic_ack 1".to_owned()));
    assert!(calls.iter().any(|call| call.starts_with("basic_cancel c1_")));
}

#[tokio::test]
async fn delete_all_removes_declared_entities() {
    let recording = Arc::new(Recording::default());
    let channel = Arc::new(FakeChannel(recording.clone())) as Arc<dyn AmqpChannel>;
    let provider = Arc::new(FakeProvider {
        alias: "default".to_owned(),
        channel,
    });

    let registry = ProcessorRegistry::new().register("cli_output", || Arc::new(CliOutputProcessor));
    let container = ContainerBuilder::new(registry)
        .with_connection("default", provider)
        .build(config())
        .await
        .unwrap();

    let reports = container.delete_all().await;
    assert!(reports.iter().all(|report| report.is_ok()));
    assert_eq!(
        recording.calls(),
        vec![
            "exchange_delete orders".to_owned(),
            "queue_delete orders.create".to_owned(),
        ]
    );
}
