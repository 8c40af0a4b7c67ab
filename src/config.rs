// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Runtime Configuration Schema
//!
//! This module defines the declarative configuration consumed by the container
//! builder: named connections, exchanges, queues, publisher bindings and
//! consumer bindings. Missing root keys default to empty maps, entity
//! attributes default to the broker-conservative values, and unknown
//! connection keys are rejected so typos fail at build time instead of
//! silently falling back to defaults.

use crate::errors::AmqpError;
use serde::Deserialize;
use std::collections::BTreeMap;

fn default_hostname() -> String {
    "127.0.0.1".to_owned()
}

fn default_port() -> u16 {
    5672
}

fn default_username() -> String {
    "guest".to_owned()
}

fn default_password() -> String {
    "guest".to_owned()
}

fn default_vhost() -> String {
    "/".to_owned()
}

fn default_lazy() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    3
}

fn default_exchange_type() -> String {
    "topic".to_owned()
}

fn default_true() -> bool {
    true
}

fn default_prefetch_count() -> u16 {
    1
}

/// Root configuration for the runtime.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub connections: BTreeMap<String, ConnectionConfig>,
    #[serde(default)]
    pub exchanges: BTreeMap<String, ExchangeConfig>,
    #[serde(default)]
    pub queues: BTreeMap<String, QueueConfig>,
    /// publisher alias -> entity alias (exchange or queue)
    #[serde(default)]
    pub publishers: BTreeMap<String, String>,
    #[serde(default)]
    pub consumers: BTreeMap<String, ConsumerConfig>,
}

impl Config {
    /// Parses a configuration from a JSON document.
    pub fn from_str(raw: &str) -> Result<Config, AmqpError> {
        serde_json::from_str(raw).map_err(|err| AmqpError::Configuration(err.to_string()))
    }

    /// Parses a configuration from an already-loaded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Config, AmqpError> {
        serde_json::from_value(value).map_err(|err| AmqpError::Configuration(err.to_string()))
    }
}

/// Transport parameters for one named broker connection.
///
/// Unknown keys are a configuration error, matching the fail-fast contract of
/// the connection manager.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConnectionConfig {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password")]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub vhost: String,
    /// Whether the transport is opened on first use instead of at build time.
    #[serde(default = "default_lazy")]
    pub lazy: bool,
    /// Bounds the initial handshake, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout: u64,
    /// Bounds each wait cycle on the channel, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub read_write_timeout: u64,
    #[serde(default)]
    pub heartbeat: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            hostname: default_hostname(),
            port: default_port(),
            username: default_username(),
            password: default_password(),
            vhost: default_vhost(),
            lazy: default_lazy(),
            connect_timeout: default_timeout_secs(),
            read_write_timeout: default_timeout_secs(),
            heartbeat: 0,
        }
    }
}

/// Configuration entry for an exchange entity.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub connection: String,
    /// Broker-visible name, distinct from the registry alias.
    pub name: String,
    #[serde(default)]
    pub attributes: ExchangeAttributes,
}

/// Configuration entry for a queue entity.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub connection: String,
    pub name: String,
    #[serde(default)]
    pub attributes: QueueAttributes,
}

/// Attribute bag for exchanges, merged over broker-conservative defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeAttributes {
    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub nowait: bool,
    /// Declare and bind lazily before the first publish.
    #[serde(default)]
    pub auto_create: bool,
    #[serde(default = "default_true")]
    pub throw_exception_on_redeclare: bool,
    #[serde(default = "default_true")]
    pub throw_exception_on_bind_fail: bool,
    #[serde(default)]
    pub bind: Vec<ExchangeBind>,
}

impl Default for ExchangeAttributes {
    fn default() -> Self {
        ExchangeAttributes {
            exchange_type: default_exchange_type(),
            passive: false,
            durable: false,
            auto_delete: false,
            internal: false,
            nowait: false,
            auto_create: false,
            throw_exception_on_redeclare: true,
            throw_exception_on_bind_fail: true,
            bind: vec![],
        }
    }
}

/// Bind spec hung off an exchange: route matching messages to a queue.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ExchangeBind {
    pub queue: String,
    pub routing_key: String,
}

/// Attribute bag for queues, merged over broker-conservative defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueAttributes {
    #[serde(default)]
    pub passive: bool,
    #[serde(default)]
    pub durable: bool,
    #[serde(default)]
    pub exclusive: bool,
    #[serde(default)]
    pub auto_delete: bool,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub nowait: bool,
    #[serde(default)]
    pub auto_create: bool,
    #[serde(default = "default_true")]
    pub throw_exception_on_redeclare: bool,
    #[serde(default = "default_true")]
    pub throw_exception_on_bind_fail: bool,
    #[serde(default)]
    pub bind: Vec<QueueBind>,
}

impl Default for QueueAttributes {
    fn default() -> Self {
        QueueAttributes {
            passive: false,
            durable: false,
            exclusive: false,
            auto_delete: false,
            internal: false,
            nowait: false,
            auto_create: false,
            throw_exception_on_redeclare: true,
            throw_exception_on_bind_fail: true,
            bind: vec![],
        }
    }
}

/// Bind spec hung off a queue: subscribe it to an exchange.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct QueueBind {
    pub exchange: String,
    pub routing_key: String,
}

/// Configuration entry wiring a queue to a message processor.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Queue entity alias.
    pub queue: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    /// Token resolved through the processor registry.
    pub message_processor: String,
}
