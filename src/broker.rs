// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Collaborator
//!
//! This module defines the `Broker` trait, the narrow set of RPCs the reliable
//! publisher and consumer need from the transport: declare exchange, declare
//! queue, bind, publish, wait for confirms, consume, ack and nack, plus a
//! query for the channel's confirm mode.
//!
//! `RabbitMQBroker` implements it on top of a shared lapin `Channel`. Tests
//! substitute an in-memory or mocked implementation.

use crate::{
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel,
};
use std::{collections::BTreeMap, sync::Arc, time::Duration};
use tracing::{debug, error};

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// AMQP delivery mode marking a message as persistent
pub const PERSISTENT_DELIVERY_MODE: u8 = 2;

/// String headers carried alongside a message.
pub type MessageHeaders = BTreeMap<String, String>;

/// Stream of deliveries pushed by the broker for one subscription.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// One delivery as seen by the consumer loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub headers: MessageHeaders,
}

/// Subscription options for [`Broker::consume`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumeOptions {
    pub consumer_tag: String,
    /// Unacknowledged deliveries held client side; 0 means unbounded
    pub max_buffer_size: u16,
    /// The broker acknowledges on delivery
    pub auto_ack: bool,
}

/// The transport operations the reliable layer is built on.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError>;

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError>;

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError>;

    /// Fire-and-forget publish at the transport level.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        headers: &MessageHeaders,
        body: &[u8],
    ) -> Result<(), AmqpError>;

    /// Whether the channel was switched into publisher confirm mode.
    fn confirm_mode(&self) -> bool;

    /// Blocks until every outstanding publish is confirmed or `timeout` elapses.
    async fn wait_for_confirms(&self, timeout: Duration) -> Result<(), AmqpError>;

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError>;

    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError>;

    async fn nack(&self, delivery_tag: u64, multiple: bool, requeue: bool)
        -> Result<(), AmqpError>;
}

/// RabbitMQ implementation of the Broker trait over a lapin channel.
pub struct RabbitMQBroker {
    channel: Arc<Channel>,
}

impl RabbitMQBroker {
    /// Creates a new RabbitMQ broker adapter.
    ///
    /// # Parameters
    /// * `channel` - A channel to the RabbitMQ server
    ///
    /// # Returns
    /// An Arc-wrapped RabbitMQBroker instance for thread-safe sharing
    pub fn new(channel: Arc<Channel>) -> Arc<RabbitMQBroker> {
        Arc::new(RabbitMQBroker { channel })
    }
}

#[async_trait]
impl Broker for RabbitMQBroker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        debug!("creating exchange: {}", def.name);

        let kind = lapin::ExchangeKind::try_from(def.kind)?;

        match self
            .channel
            .exchange_declare(
                &def.name,
                kind,
                ExchangeDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    auto_delete: def.delete,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name = def.name.as_str(),
                    "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(def.name.clone()))
            }
            _ => {
                debug!("exchange: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        debug!("creating queue: {}", def.name);

        match self
            .channel
            .queue_declare(
                &def.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: def.durable,
                    exclusive: def.exclusive,
                    auto_delete: def.delete,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name = def.name.as_str(), "error to declare the queue");
                Err(AmqpError::DeclareQueueError(def.name.clone()))
            }
            _ => {
                debug!("queue: {} was created", def.name);
                Ok(())
            }
        }
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            binding.queue_name, binding.exchange_name, binding.routing_key
        );

        match self
            .channel
            .queue_bind(
                &binding.queue_name,
                &binding.exchange_name,
                &binding.routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindingExchangeToQueueError(
                    binding.exchange_name.clone(),
                    binding.queue_name.clone(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        headers: &MessageHeaders,
        body: &[u8],
    ) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                body,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_delivery_mode(PERSISTENT_DELIVERY_MODE)
                    .with_headers(field_table(headers)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }

    fn confirm_mode(&self) -> bool {
        self.channel.status().confirm()
    }

    async fn wait_for_confirms(&self, timeout: Duration) -> Result<(), AmqpError> {
        match tokio::time::timeout(timeout, self.channel.wait_for_confirms()).await {
            Err(_) => {
                error!(timeout_ms = timeout.as_millis() as u64, "publisher confirm timed out");
                Err(AmqpError::ConfirmTimeout)
            }
            Ok(Err(err)) => {
                error!(error = err.to_string(), "error waiting for confirms");
                Err(AmqpError::ConfirmError(err.to_string()))
            }
            Ok(Ok(returned)) if !returned.is_empty() => {
                error!(count = returned.len(), "broker rejected published messages");
                Err(AmqpError::ConfirmError(format!(
                    "{} message(s) rejected by the broker",
                    returned.len()
                )))
            }
            Ok(Ok(_)) => Ok(()),
        }
    }

    async fn consume(
        &self,
        queue: &str,
        options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        if options.max_buffer_size > 0 {
            if let Err(err) = self
                .channel
                .basic_qos(options.max_buffer_size, BasicQosOptions { global: false })
                .await
            {
                error!(error = err.to_string(), "error to configure qos");
                return Err(AmqpError::QoSDeclarationError(err.to_string()));
            }
        }

        let consumer = match self
            .channel
            .basic_consume(
                queue,
                &options.consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: options.auto_ack,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::BindingConsumerError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        Ok(consumer
            .map(|result| match result {
                Ok(delivery) => Ok(Delivery {
                    delivery_tag: delivery.delivery_tag,
                    headers: message_headers(delivery.properties.headers()),
                    body: delivery.data,
                }),
                Err(err) => Err(AmqpError::ConsumerError(err.to_string())),
            })
            .boxed())
    }

    async fn ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), AmqpError> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
                AmqpError::AckMessageError
            })
    }

    async fn nack(
        &self,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        self.channel
            .basic_nack(delivery_tag, BasicNackOptions { multiple, requeue })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), delivery_tag, "error whiling nack msg");
                AmqpError::NackMessageError
            })
    }
}

/// Converts string headers into an AMQP field table.
fn field_table(headers: &MessageHeaders) -> FieldTable {
    let btree: BTreeMap<ShortString, AMQPValue> = headers
        .iter()
        .map(|(key, value)| {
            (
                ShortString::from(key.as_str()),
                AMQPValue::LongString(LongString::from(value.as_str())),
            )
        })
        .collect();

    FieldTable::from(btree)
}

/// Keeps the string-valued entries of an AMQP field table.
fn message_headers(table: &Option<FieldTable>) -> MessageHeaders {
    let Some(table) = table else {
        return MessageHeaders::default();
    };

    table
        .inner()
        .iter()
        .filter_map(|(key, value)| {
            let text = match value {
                AMQPValue::LongString(v) => String::from_utf8_lossy(v.as_bytes()).into_owned(),
                AMQPValue::ShortString(v) => v.as_str().to_owned(),
                _ => return None,
            };
            Some((key.as_str().to_owned(), text))
        })
        .collect()
}
