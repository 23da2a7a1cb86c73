// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Publisher
//!
//! This module publishes payloads described by a handler contract, either to
//! the contract's own queue or as a broadcast to every queue bound to its
//! exchange. Each publish wraps the payload in a fresh envelope, gives the
//! contract's persistence hook a chance to store it, checks the payload type
//! against the exchange, and waits for the broker's confirmation whenever the
//! channel is in confirm mode.
//! OpenTelemetry context is propagated in the message headers.

use crate::{
    broker::{Broker, MessageHeaders},
    contract::HandlerContract,
    envelope::{type_tag, Envelope, Payload},
    errors::PublishError,
    exchange::ExchangeKind,
    otel, topology,
};
use opentelemetry::Context;
use std::{sync::Arc, time::Duration};
use tracing::{debug, error, warn};

/// How long a confirm-mode publish waits for the broker
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes enveloped payloads through a [`Broker`].
pub struct RabbitMQPublisher {
    broker: Arc<dyn Broker>,
    env: String,
}

impl RabbitMQPublisher {
    /// Creates a new RabbitMQ publisher.
    ///
    /// # Parameters
    /// * `broker` - The broker to publish through
    /// * `env` - The environment tag used to resolve queue names
    ///
    /// # Returns
    /// An Arc-wrapped RabbitMQPublisher instance for thread-safe sharing
    pub fn new(broker: Arc<dyn Broker>, env: &str) -> Arc<RabbitMQPublisher> {
        Arc::new(RabbitMQPublisher {
            broker,
            env: env.to_owned(),
        })
    }

    /// Publishes `payload` to the queue `contract` resolves to.
    ///
    /// The message goes through the contract's exchange with the queue name as
    /// routing key.
    ///
    /// # Returns
    /// The id of the published envelope
    ///
    /// # Errors
    /// `PublishError::TypeMismatch` when the exchange declares another payload
    /// type (nothing is sent), `PublishError::Broker` when the publish RPC
    /// fails and `PublishError::NotConfirmed` when confirm mode is on and the
    /// broker does not confirm within five seconds.
    pub async fn publish_to_queue<T: Payload>(
        &self,
        ctx: &Context,
        contract: &HandlerContract<T>,
        payload: T,
    ) -> Result<String, PublishError> {
        let queue = topology::queue_name_for(&self.env, contract);
        self.send(ctx, contract, &queue, payload).await
    }

    /// Broadcasts `payload` to every queue bound to the contract's exchange.
    ///
    /// # Returns
    /// The id of the published envelope
    ///
    /// # Errors
    /// `PublishError::UnsupportedExchangeKind` for direct and default exchanges,
    /// which cannot route without a key (no broker call is made), plus every
    /// error of [`RabbitMQPublisher::publish_to_queue`].
    pub async fn publish_to_exchange<T: Payload>(
        &self,
        ctx: &Context,
        contract: &HandlerContract<T>,
        payload: T,
    ) -> Result<String, PublishError> {
        let kind = contract.exchange.kind;
        if matches!(kind, ExchangeKind::Direct | ExchangeKind::Default) {
            error!(
                exchange = contract.exchange.name.as_str(),
                kind = kind.as_str(),
                "exchange kind cannot broadcast"
            );
            return Err(PublishError::UnsupportedExchangeKind(kind.to_string()));
        }

        self.send(ctx, contract, "", payload).await
    }

    async fn send<T: Payload>(
        &self,
        ctx: &Context,
        contract: &HandlerContract<T>,
        routing_key: &str,
        payload: T,
    ) -> Result<String, PublishError> {
        let exchange = &contract.exchange;
        let envelope = Envelope::new(payload);

        if let Err(err) = contract.handler.persist(&envelope).await {
            warn!(
                error = err.to_string(),
                message_id = envelope.id.as_str(),
                exchange = exchange.name.as_str(),
                routing_key,
                "failure to persist message before publishing"
            );
        }

        let actual = type_tag::<T>();
        if exchange.payload_type != actual {
            error!(
                exchange = exchange.name.as_str(),
                expected = exchange.payload_type,
                actual,
                "message type mismatch"
            );
            return Err(PublishError::TypeMismatch {
                expected: exchange.payload_type,
                actual,
            });
        }

        let body = envelope.to_bytes().map_err(|err| {
            error!(error = err.to_string(), "failure to serialize envelope");
            PublishError::Serialize(err.to_string())
        })?;

        let mut headers = MessageHeaders::new();
        otel::inject(ctx, &mut headers);

        self.broker
            .publish(&exchange.name, routing_key, &headers, &body)
            .await?;

        if self.broker.confirm_mode() {
            if let Err(err) = self.broker.wait_for_confirms(CONFIRM_TIMEOUT).await {
                error!(
                    error = err.to_string(),
                    message_id = envelope.id.as_str(),
                    routing_key,
                    "message was not confirmed"
                );
                return Err(PublishError::NotConfirmed(err.to_string()));
            }
        }

        debug!(
            message_id = envelope.id.as_str(),
            exchange = exchange.name.as_str(),
            routing_key,
            "message published"
        );

        Ok(envelope.id)
    }
}
