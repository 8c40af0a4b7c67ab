// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the AMQP Runtime
//!
//! This module provides the error taxonomy for the orchestration layer and the
//! classification of broker-client failures into the classes the runtime reacts
//! to: redeclare conflicts, missing bind targets, closed channels and wait
//! timeouts. Everything else is surfaced as a generic protocol failure.

use thiserror::Error;

/// AMQP reply code signaled by the broker on a declare with mismatched attributes.
const PRECONDITION_FAILED: u16 = 406;
/// AMQP reply code signaled by the broker when a referenced entity does not exist.
const NOT_FOUND: u16 = 404;

/// Represents errors that can occur during AMQP runtime operations.
#[derive(Error, Debug)]
pub enum AmqpError {
    /// Invalid or unresolvable configuration, fatal at container build time
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Error establishing a connection to the broker
    #[error("failure to connect `{0}`")]
    ConnectionError(String),

    /// Error creating a channel on an established connection
    #[error("failure to create a channel on `{0}`")]
    ChannelError(String),

    /// The broker rejected an operation because the entity exists with
    /// different attributes (reply code 406)
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// The broker does not know the referenced entity (reply code 404)
    #[error("entity not found: {0}")]
    NotFound(String),

    /// The channel was severed by the broker or the connection dropped
    #[error("channel closed: {0}")]
    ChannelClosed(String),

    /// A blocking wait on the channel timed out
    #[error("wait timed out")]
    WaitTimeout,

    /// Error publishing a message
    #[error("failure to publish to `{0}`")]
    PublishError(String),

    /// Error registering a consumer on a queue
    #[error("failure to register consumer on `{0}`")]
    ConsumerError(String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos: {0}")]
    QoSDeclarationError(String),

    /// Any other failure reported by the broker client
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl AmqpError {
    /// Maps a broker-client failure into the runtime taxonomy.
    ///
    /// Soft protocol errors carry the AMQP reply code, which distinguishes a
    /// redeclare conflict (406) from a missing entity (404). A channel or
    /// connection left in an invalid state is treated as channel-closed, and
    /// timeout-class I/O failures become [`AmqpError::WaitTimeout`].
    pub fn classify(err: lapin::Error) -> AmqpError {
        match &err {
            lapin::Error::ProtocolError(amqp) => match amqp.get_id() {
                PRECONDITION_FAILED => {
                    AmqpError::PreconditionFailed(amqp.get_message().to_string())
                }
                NOT_FOUND => AmqpError::NotFound(amqp.get_message().to_string()),
                _ => AmqpError::Protocol(err.to_string()),
            },
            lapin::Error::InvalidChannelState(_) | lapin::Error::InvalidConnectionState(_) => {
                AmqpError::ChannelClosed(err.to_string())
            }
            lapin::Error::IOError(io_err)
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) =>
            {
                AmqpError::WaitTimeout
            }
            _ => AmqpError::Protocol(err.to_string()),
        }
    }

    /// Whether the failure is a redeclare conflict on an existing entity.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, AmqpError::PreconditionFailed(_))
    }

    /// Whether the failure is a reference to a missing broker entity.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AmqpError::NotFound(_))
    }

    /// Whether the failure severed the channel.
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, AmqpError::ChannelClosed(_))
    }

    /// Whether the failure is a recoverable wait timeout.
    pub fn is_wait_timeout(&self) -> bool {
        matches!(self, AmqpError::WaitTimeout)
    }
}
