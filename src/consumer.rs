// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Consumer
//!
//! This module resolves a single delivery. It:
//! 1. Decodes the envelope; an undecodable body is a poison message and is
//!    acknowledged without retry
//! 2. Runs the contract's handler, turning a panic into a failure reason
//! 3. Acknowledges on success and clears the retry ledger
//! 4. On failure, either drops the message once its retry budget is spent or
//!    records the failure and negatively acknowledges it with requeue after
//!    the contract's retry interval
//!
//! The outcome callback runs exactly once per delivery, whatever happens.

use crate::{
    broker::Delivery,
    dispatcher::RabbitMQDispatcherDefinition,
    envelope::{Envelope, Payload},
    errors::{AmqpError, HandlerError},
};
use futures_util::FutureExt;
use opentelemetry::{
    global::{BoxedSpan, BoxedTracer},
    trace::{Span, Status},
};
use std::{any::Any, borrow::Cow, panic::AssertUnwindSafe};
use tracing::{debug, error, warn};

/// How one handling attempt of a delivery ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Handled successfully and acknowledged
    Acked,
    /// Handler failed; returned to the broker for another attempt
    Requeued,
    /// Handler kept failing past the retry budget; dropped
    Exhausted,
    /// Body or payload shape is invalid; dropped without retry
    Poisoned,
    /// Handler failed on an auto-ack queue; the broker already dropped it
    Lost,
}

/// Consumes and resolves one delivery.
///
/// # Parameters
/// * `tracer` - OpenTelemetry tracer for the delivery span
/// * `delivery` - The delivery pushed by the broker
/// * `def` - Contract, broker and retry ledger of the subscription
///
/// # Returns
/// How the attempt was resolved. Broker ack/nack failures are logged and
/// recorded on the span; there is nothing left to do about them here.
pub(crate) async fn consume<T: Payload>(
    tracer: &BoxedTracer,
    delivery: Delivery,
    def: &RabbitMQDispatcherDefinition<T>,
) -> Resolution {
    let mut span = crate::otel::new_span(&delivery.headers, tracer, &def.queue_name);

    debug!(
        queue = def.queue_name.as_str(),
        delivery_tag = delivery.delivery_tag,
        "received message"
    );

    let envelope = match Envelope::<T>::decode(&delivery.body) {
        Ok(envelope) => envelope,
        Err(err) => {
            error!(
                error = err.to_string(),
                queue = def.queue_name.as_str(),
                body = %String::from_utf8_lossy(&delivery.body),
                "removing poison message from queue"
            );
            record(&mut span, &err.to_string());
            def.contract
                .handler
                .on_outcome("", Some(&err.to_string()))
                .await;
            ack(def, delivery.delivery_tag, &mut span).await;
            return Resolution::Poisoned;
        }
    };

    let id = envelope.id;
    let result = AssertUnwindSafe(def.contract.handler.handle(envelope.msg))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::Failed(panic_reason(panic))));

    match result {
        Ok(()) => {
            debug!(message_id = id.as_str(), "message successfully processed");
            def.contract.handler.on_outcome(&id, None).await;
            def.ledger.remove(&id);
            ack(def, delivery.delivery_tag, &mut span).await;
            span.set_status(Status::Ok);
            Resolution::Acked
        }
        Err(HandlerError::Malformed(reason)) => {
            error!(
                error = reason.as_str(),
                message_id = id.as_str(),
                queue = def.queue_name.as_str(),
                body = %String::from_utf8_lossy(&delivery.body),
                "removing malformed message from queue"
            );
            record(&mut span, &reason);
            def.contract.handler.on_outcome(&id, Some(&reason)).await;
            def.ledger.remove(&id);
            ack(def, delivery.delivery_tag, &mut span).await;
            Resolution::Poisoned
        }
        Err(HandlerError::Failed(reason)) => {
            record(&mut span, &reason);
            def.contract.handler.on_outcome(&id, Some(&reason)).await;
            retry(def, delivery.delivery_tag, &id, &reason, &mut span).await
        }
    }
}

/// Decides between requeue and drop for a failed attempt.
async fn retry<T: Payload>(
    def: &RabbitMQDispatcherDefinition<T>,
    delivery_tag: u64,
    id: &str,
    reason: &str,
    span: &mut BoxedSpan,
) -> Resolution {
    if def.contract.auto_ack {
        warn!(
            error = reason,
            message_id = id,
            queue = def.queue_name.as_str(),
            "failure on auto-ack queue, message cannot be requeued"
        );
        return Resolution::Lost;
    }

    let attempts = def.ledger.get(id);
    if attempts >= def.contract.max_retry {
        error!(
            error = reason,
            message_id = id,
            queue = def.queue_name.as_str(),
            retries = attempts,
            "too many attempts, dropping message"
        );
        def.ledger.remove(id);
        ack(def, delivery_tag, span).await;
        return Resolution::Exhausted;
    }

    let attempts = def.ledger.increment(id);
    warn!(
        error = reason,
        message_id = id,
        queue = def.queue_name.as_str(),
        retry = attempts,
        delay_ms = def.contract.retry_interval.as_millis() as u64,
        "error whiling handling msg, requeuing for latter"
    );

    tokio::time::sleep(def.contract.retry_interval).await;

    if let Err(err) = def.broker.nack(delivery_tag, false, true).await {
        error!(error = err.to_string(), delivery_tag, "error whiling requeuing");
        record_rpc(span, &err, "error to requeuing msg");
    }

    Resolution::Requeued
}

async fn ack<T: Payload>(
    def: &RabbitMQDispatcherDefinition<T>,
    delivery_tag: u64,
    span: &mut BoxedSpan,
) {
    if def.contract.auto_ack {
        return;
    }

    if let Err(err) = def.broker.ack(delivery_tag, false).await {
        error!(error = err.to_string(), delivery_tag, "error whiling ack msg");
        record_rpc(span, &err, "error to ack msg");
    }
}

fn record(span: &mut BoxedSpan, reason: &str) {
    span.set_status(Status::Error {
        description: Cow::from(reason.to_owned()),
    });
}

fn record_rpc(span: &mut BoxedSpan, err: &AmqpError, description: &'static str) {
    span.record_error(err);
    span.set_status(Status::Error {
        description: Cow::from(description),
    });
}

fn panic_reason(panic: Box<dyn Any + Send>) -> String {
    if let Some(reason) = panic.downcast_ref::<&str>() {
        return format!("handler panicked: {reason}");
    }
    if let Some(reason) = panic.downcast_ref::<String>() {
        return format!("handler panicked: {reason}");
    }
    "handler panicked".to_owned()
}
