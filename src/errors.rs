// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Reliable RabbitMQ Layer
//!
//! This module provides one error enum per failure domain. `AmqpError` covers
//! every broker RPC failure, while `DecodeError`, `TopologyError`,
//! `PublishError`, `HandlerError` and `ConfigError` describe what went wrong
//! at the envelope, topology, publishing, handler and configuration levels.

use thiserror::Error;

/// A broker RPC that failed. The lapin error itself is logged where it
/// happens; the variant only carries the names needed to tell calls apart.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    #[error("failure to connect")]
    ConnectionError,

    #[error("failure to create a channel")]
    ChannelError,

    #[error("failure to enable publisher confirms")]
    ConfirmSelectError,

    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    #[error("failure to publish")]
    PublishingError,

    #[error("timed out waiting for publisher confirms")]
    ConfirmTimeout,

    #[error("publisher confirm failed `{0}`")]
    ConfirmError(String),

    #[error("failure to ack message")]
    AckMessageError,

    #[error("failure to nack message")]
    NackMessageError,

    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    #[error("failure to consume message `{0}`")]
    ConsumerError(String),
}

/// Errors produced while turning wire bytes back into an envelope.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The body is not a valid envelope for the expected payload type
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The envelope carries an empty message id
    #[error("envelope id is blank")]
    BlankId,
}

/// Errors raised while validating a contract and declaring its topology.
///
/// All of them are fatal at startup: a consumer must never run against a
/// partially declared topology.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("invalid handler contract: {0}")]
    InvalidContract(String),

    /// The exchange declares a payload type other than the contract's
    #[error("exchange expects payload `{expected}` but contract carries `{actual}`")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("address `{address}` is already registered by `{owner}`")]
    DuplicateAddress { address: String, owner: String },

    #[error(transparent)]
    Broker(#[from] AmqpError),
}

/// Errors surfaced synchronously to a publishing caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// The payload type is not the one the target exchange declares
    #[error("exchange expects payload `{expected}` but got `{actual}`")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Broadcasting is not possible on this kind of exchange
    #[error("exchange kind `{0}` does not support broadcast publishing")]
    UnsupportedExchangeKind(String),

    #[error("failure to serialize envelope: {0}")]
    Serialize(String),

    /// Confirm mode was requested and the broker did not confirm
    #[error("message was not confirmed by the broker: {0}")]
    NotConfirmed(String),

    #[error(transparent)]
    Broker(#[from] AmqpError),
}

/// Failures reported by user code behind a [`crate::contract::QueueHandler`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// A business failure; the message will be retried
    #[error("{0}")]
    Failed(String),

    /// The payload has the wrong shape; retrying cannot help
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl HandlerError {
    pub fn failed(reason: impl Into<String>) -> Self {
        HandlerError::Failed(reason.into())
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        HandlerError::Malformed(reason.into())
    }
}

/// Errors found while validating connection configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("configuration field `{0}` must not be blank")]
    Blank(&'static str),

    #[error("configuration field `port` must be greater than zero")]
    InvalidPort,
}
