// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Container
//!
//! The container turns a parsed configuration into live objects: connections
//! keyed by alias, exchange and queue entities wired to them, publishers
//! resolving their target entity (exchange first, then queue) and consumers
//! joining a queue with a registered message processor. All referential
//! errors surface at build time as configuration failures, never later at
//! publish or consume time.

use crate::config::Config;
use crate::connection::{AmqpConnection, ChannelProvider};
use crate::consumer::{ConsumeLimits, Consumer};
use crate::entity::AmqpEntity;
use crate::errors::AmqpError;
use crate::exchange::ExchangeEntity;
use crate::processor::ProcessorRegistry;
use crate::publisher::Publisher;
use crate::queue::QueueEntity;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Outcome of one entity operation in a `setup` or `delete_all` batch.
pub struct EntityReport {
    /// Entity alias as registered in the configuration.
    pub alias: String,
    /// `"exchange"` or `"queue"`.
    pub kind: &'static str,
    pub error: Option<AmqpError>,
}

impl EntityReport {
    fn ok(alias: &str, kind: &'static str) -> EntityReport {
        EntityReport {
            alias: alias.to_owned(),
            kind,
            error: None,
        }
    }

    fn failed(alias: &str, kind: &'static str, error: AmqpError) -> EntityReport {
        EntityReport {
            alias: alias.to_owned(),
            kind,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Builds a [`Container`] from configuration plus a processor registry.
///
/// Connections can be pre-registered with [`with_connection`], in which case
/// the builder uses them instead of opening new transports for those aliases.
///
/// [`with_connection`]: ContainerBuilder::with_connection
pub struct ContainerBuilder {
    registry: ProcessorRegistry,
    connections: BTreeMap<String, Arc<dyn ChannelProvider>>,
}

impl ContainerBuilder {
    pub fn new(registry: ProcessorRegistry) -> ContainerBuilder {
        ContainerBuilder {
            registry,
            connections: BTreeMap::new(),
        }
    }

    /// Registers an already-built connection under an alias.
    pub fn with_connection(
        mut self,
        alias: &str,
        connection: Arc<dyn ChannelProvider>,
    ) -> ContainerBuilder {
        self.connections.insert(alias.to_owned(), connection);
        self
    }

    /// Resolves the configuration into a container, opening the configured
    /// connections (eagerly when `lazy = false`) and failing fast on any
    /// dangling alias reference.
    pub async fn build(mut self, config: Config) -> Result<Container, AmqpError> {
        for (alias, connection_config) in &config.connections {
            if self.connections.contains_key(alias) {
                continue;
            }
            let connection = AmqpConnection::open(alias, connection_config.clone()).await?;
            self.connections.insert(alias.clone(), connection);
        }

        let mut exchanges: BTreeMap<String, Arc<ExchangeEntity>> = BTreeMap::new();
        for (alias, exchange_config) in config.exchanges {
            let connection = self.connection(&exchange_config.connection, &alias)?;
            let entity = ExchangeEntity::new(
                connection,
                &alias,
                &exchange_config.name,
                exchange_config.attributes,
            )?;
            exchanges.insert(alias, Arc::new(entity));
        }

        let mut queues: BTreeMap<String, Arc<QueueEntity>> = BTreeMap::new();
        for (alias, queue_config) in config.queues {
            if exchanges.contains_key(&alias) {
                return Err(AmqpError::Configuration(format!(
                    "alias `{alias}` is registered as both an exchange and a queue"
                )));
            }
            let connection = self.connection(&queue_config.connection, &alias)?;
            let entity = QueueEntity::new(
                connection,
                &alias,
                &queue_config.name,
                queue_config.attributes,
            );
            queues.insert(alias, Arc::new(entity));
        }

        let mut container = Container {
            exchanges,
            queues,
            publishers: BTreeMap::new(),
            consumers: BTreeMap::new(),
        };

        for (alias, entity_alias) in config.publishers {
            let entity: Arc<dyn AmqpEntity> =
                if let Some(exchange) = container.exchanges.get(&entity_alias) {
                    exchange.clone()
                } else if let Some(queue) = container.queues.get(&entity_alias) {
                    queue.clone()
                } else {
                    return Err(AmqpError::Configuration(format!(
                        "publisher `{alias}` references unknown entity `{entity_alias}`"
                    )));
                };
            container.register_publisher(Publisher::new(&alias, entity))?;
        }

        for (alias, consumer_config) in config.consumers {
            let queue = container
                .queues
                .get(&consumer_config.queue)
                .cloned()
                .ok_or_else(|| {
                    AmqpError::Configuration(format!(
                        "consumer `{alias}` references unknown queue `{}`",
                        consumer_config.queue
                    ))
                })?;
            let processor = self.registry.resolve(&consumer_config.message_processor)?;
            container.register_consumer(Consumer::new(
                &alias,
                queue,
                consumer_config.prefetch_count,
                processor,
            ))?;
        }

        debug!(
            exchanges = container.exchanges.len(),
            queues = container.queues.len(),
            publishers = container.publishers.len(),
            consumers = container.consumers.len(),
            "container built"
        );
        Ok(container)
    }

    fn connection(
        &self,
        alias: &str,
        entity_alias: &str,
    ) -> Result<Arc<dyn ChannelProvider>, AmqpError> {
        self.connections.get(alias).cloned().ok_or_else(|| {
            AmqpError::Configuration(format!(
                "entity `{entity_alias}` references unknown connection `{alias}`"
            ))
        })
    }
}

/// Registry of live entities, publishers and consumers, keyed by alias.
pub struct Container {
    exchanges: BTreeMap<String, Arc<ExchangeEntity>>,
    queues: BTreeMap<String, Arc<QueueEntity>>,
    publishers: BTreeMap<String, Publisher>,
    consumers: BTreeMap<String, Consumer>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("exchanges", &self.exchanges.keys())
            .field("queues", &self.queues.keys())
            .field("publishers", &self.publishers.keys())
            .field("consumers", &self.consumers.keys())
            .finish()
    }
}

impl Container {
    /// Registers a publisher. Aliases are unique; a duplicate is fatal.
    pub fn register_publisher(&mut self, publisher: Publisher) -> Result<(), AmqpError> {
        let alias = publisher.alias().to_owned();
        if self.publishers.insert(alias.clone(), publisher).is_some() {
            return Err(AmqpError::Configuration(format!(
                "publisher alias `{alias}` registered twice"
            )));
        }
        Ok(())
    }

    /// Registers a consumer. Aliases are unique; a duplicate is fatal.
    pub fn register_consumer(&mut self, consumer: Consumer) -> Result<(), AmqpError> {
        let alias = consumer.alias().to_owned();
        if self.consumers.insert(alias.clone(), consumer).is_some() {
            return Err(AmqpError::Configuration(format!(
                "consumer alias `{alias}` registered twice"
            )));
        }
        Ok(())
    }

    pub fn publisher(&self, alias: &str) -> Result<&Publisher, AmqpError> {
        self.publishers.get(alias).ok_or_else(|| {
            AmqpError::Configuration(format!("no publisher registered for `{alias}`"))
        })
    }

    pub fn consumer(&self, alias: &str) -> Result<&Consumer, AmqpError> {
        self.consumers.get(alias).ok_or_else(|| {
            AmqpError::Configuration(format!("no consumer registered for `{alias}`"))
        })
    }

    /// Registered publisher aliases, in alias order.
    pub fn publisher_aliases(&self) -> Vec<&str> {
        self.publishers.keys().map(String::as_str).collect()
    }

    /// Registered consumer aliases, in alias order.
    pub fn consumer_aliases(&self) -> Vec<&str> {
        self.consumers.keys().map(String::as_str).collect()
    }

    fn entities(&self) -> Vec<(&'static str, Arc<dyn AmqpEntity>)> {
        let mut entities: Vec<(&'static str, Arc<dyn AmqpEntity>)> = vec![];
        for exchange in self.exchanges.values() {
            entities.push(("exchange", exchange.clone()));
        }
        for queue in self.queues.values() {
            entities.push(("queue", queue.clone()));
        }
        entities
    }

    /// Declares every exchange and queue, then applies every bind. With
    /// `force` each entity is deleted (best-effort) before its declare.
    ///
    /// The batch never aborts: each failure is reported per entity and the
    /// affected connection is refreshed so later items get a usable channel.
    pub async fn setup(&self, force: bool) -> Vec<EntityReport> {
        let mut reports = vec![];

        for (kind, entity) in self.entities() {
            if force {
                if let Err(err) = entity.delete().await {
                    warn!(
                        error = err.to_string(),
                        entity = entity.alias(),
                        "delete before forced setup failed, continuing"
                    );
                    let _ = entity.connection().reconnect().await;
                }
            }
            match entity.create().await {
                Ok(()) => {
                    info!(entity = entity.alias(), kind = kind, "entity declared");
                    reports.push(EntityReport::ok(entity.alias(), kind));
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        entity = entity.alias(),
                        kind = kind,
                        "declare failed"
                    );
                    // The channel may be dead after the failure.
                    let _ = entity.connection().reconnect().await;
                    reports.push(EntityReport::failed(entity.alias(), kind, err));
                }
            }
        }

        for (kind, entity) in self.entities() {
            if let Err(err) = entity.bind().await {
                error!(
                    error = err.to_string(),
                    entity = entity.alias(),
                    kind = kind,
                    "bind failed"
                );
                let _ = entity.connection().reconnect().await;
                reports.push(EntityReport::failed(entity.alias(), kind, err));
            }
        }

        reports
    }

    /// Deletes every exchange and queue. Per-entity failures are reported,
    /// never aborting the batch.
    pub async fn delete_all(&self) -> Vec<EntityReport> {
        let mut reports = vec![];
        for (kind, entity) in self.entities() {
            match entity.delete().await {
                Ok(()) => {
                    info!(entity = entity.alias(), kind = kind, "entity deleted");
                    reports.push(EntityReport::ok(entity.alias(), kind));
                }
                Err(err) => {
                    error!(
                        error = err.to_string(),
                        entity = entity.alias(),
                        kind = kind,
                        "delete failed"
                    );
                    let _ = entity.connection().reconnect().await;
                    reports.push(EntityReport::failed(entity.alias(), kind, err));
                }
            }
        }
        reports
    }

    /// Publishes through the named publisher.
    pub async fn publish(
        &self,
        alias: &str,
        payload: &[u8],
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        self.publisher(alias)?.publish(payload, routing_key).await
    }

    /// Runs the named consumer until a stop condition triggers.
    ///
    /// Returns the process exit code: `0` for a clean stop (limit reached or
    /// cancellation), `1` when the loop failed. Resolving an unknown alias
    /// is a configuration error instead.
    pub async fn consume(&self, alias: &str, limits: ConsumeLimits) -> Result<i32, AmqpError> {
        let consumer = self.consumer(alias)?;
        match consumer.start_consuming(limits).await {
            Ok(()) => Ok(0),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    consumer = alias,
                    "consumer stopped with failure"
                );
                Ok(1)
            }
        }
    }
}
