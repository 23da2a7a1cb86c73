// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Handler Contracts
//!
//! A `HandlerContract` describes one logical queue: which exchange feeds it,
//! how its broker-side name is derived, how it is declared, and how failures
//! are retried. The behaviour lives behind the `QueueHandler` trait, so the
//! contract itself stays plain data.

use crate::{
    envelope::{type_tag, Envelope, Payload},
    errors::HandlerError,
    exchange::ExchangeDefinition,
};
use async_trait::async_trait;
use std::{fmt, sync::Arc, time::Duration};

/// Default capacity of the client side delivery buffer
pub const DEFAULT_MAX_INTERNAL_QUEUE_SIZE: u16 = 100;
/// Default number of retries after the first failed attempt
pub const DEFAULT_MAX_RETRY: u32 = 3;
/// Default delay before a failed message is requeued
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(1000);

/// User code attached to a queue.
///
/// Only `handle` is mandatory. `persist` runs on the producer side right
/// before a message is published; `on_outcome` runs on the consumer side after
/// every resolution, successful or not.
#[async_trait]
pub trait QueueHandler<T: Payload>: Send + Sync {
    /// Processes one payload.
    ///
    /// # Errors
    /// `HandlerError::Failed` is retried according to the contract;
    /// `HandlerError::Malformed` drops the message at once.
    async fn handle(&self, payload: T) -> Result<(), HandlerError>;

    /// Best effort hook to store the envelope before it is sent.
    ///
    /// # Errors
    /// A failure is logged by the publisher and never blocks the publish.
    async fn persist(&self, _envelope: &Envelope<T>) -> Result<(), HandlerError> {
        Ok(())
    }

    /// Reports how a delivery was resolved. `failure` is `None` on success;
    /// `message_id` is empty when the body could not be decoded.
    async fn on_outcome(&self, _message_id: &str, _failure: Option<&str>) {}
}

/// Declarative description of a logical queue and its retry policy.
pub struct HandlerContract<T: Payload> {
    pub(crate) exchange: ExchangeDefinition,
    pub(crate) module: String,
    pub(crate) queue_name: String,
    pub(crate) business_date: String,
    pub(crate) durable: bool,
    pub(crate) exclusive: bool,
    pub(crate) max_internal_queue_size: u16,
    pub(crate) auto_ack: bool,
    pub(crate) max_retry: u32,
    pub(crate) retry_interval: Duration,
    pub(crate) handler: Arc<dyn QueueHandler<T>>,
}

impl<T: Payload> HandlerContract<T> {
    /// Creates a contract with the default policy: durable, non-exclusive,
    /// manual ack, a buffer of 100 deliveries and three retries one second
    /// apart.
    ///
    /// # Parameters
    /// * `exchange` - The exchange feeding the queue
    /// * `module` - Owning module, second segment of the queue name
    /// * `queue_name` - Logical queue name, named after the business operation
    /// * `business_date` - Start date of the business window, `YYYY-MM-DD`
    /// * `handler` - The user code processing payloads
    pub fn new(
        exchange: ExchangeDefinition,
        module: &str,
        queue_name: &str,
        business_date: &str,
        handler: Arc<dyn QueueHandler<T>>,
    ) -> Self {
        HandlerContract {
            exchange,
            module: module.to_owned(),
            queue_name: queue_name.to_owned(),
            business_date: business_date.to_owned(),
            durable: true,
            exclusive: false,
            max_internal_queue_size: DEFAULT_MAX_INTERNAL_QUEUE_SIZE,
            auto_ack: false,
            max_retry: DEFAULT_MAX_RETRY,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            handler,
        }
    }

    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Exclusive queues disappear with the connection that declared them.
    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    /// Caps unacknowledged deliveries held by the client; 0 means unbounded.
    pub fn max_internal_queue_size(mut self, size: u16) -> Self {
        self.max_internal_queue_size = size;
        self
    }

    pub fn auto_ack(mut self, auto_ack: bool) -> Self {
        self.auto_ack = auto_ack;
        self
    }

    pub fn max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn exchange(&self) -> &ExchangeDefinition {
        &self.exchange
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn business_date(&self) -> &str {
        &self.business_date
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    pub fn internal_queue_size(&self) -> u16 {
        self.max_internal_queue_size
    }

    pub fn is_auto_ack(&self) -> bool {
        self.auto_ack
    }

    pub fn retries(&self) -> u32 {
        self.max_retry
    }

    pub fn interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn handler(&self) -> &Arc<dyn QueueHandler<T>> {
        &self.handler
    }

    /// Type tag of the payload this contract carries.
    pub fn payload_type(&self) -> &'static str {
        type_tag::<T>()
    }
}

impl<T: Payload> fmt::Debug for HandlerContract<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerContract")
            .field("payload_type", &self.payload_type())
            .field("exchange", &self.exchange)
            .field("module", &self.module)
            .field("queue_name", &self.queue_name)
            .field("business_date", &self.business_date)
            .field("durable", &self.durable)
            .field("exclusive", &self.exclusive)
            .field("max_internal_queue_size", &self.max_internal_queue_size)
            .field("auto_ack", &self.auto_ack)
            .field("max_retry", &self.max_retry)
            .field("retry_interval", &self.retry_interval)
            .finish_non_exhaustive()
    }
}
