// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # OpenTelemetry Integration
//!
//! This module propagates trace context through message headers: the publisher
//! injects the caller's context, and the consumer extracts it to open one span
//! per delivery.

use crate::broker::MessageHeaders;
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::borrow::Cow;

/// An adapter for injecting and extracting OpenTelemetry context from message headers.
pub(crate) struct HeaderPropagator<'a> {
    headers: &'a mut MessageHeaders,
}

impl<'a> HeaderPropagator<'a> {
    pub(crate) fn new(headers: &'a mut MessageHeaders) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderPropagator<'_> {
    /// Sets a trace context key-value pair in the message headers.
    fn set(&mut self, key: &str, value: String) {
        self.headers.insert(key.to_lowercase(), value);
    }
}

impl Extractor for HeaderPropagator<'_> {
    /// Gets a trace context value from the message headers.
    fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    /// Gets all keys in the message headers.
    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(String::as_str).collect()
    }
}

/// Writes the trace context of `ctx` into `headers`.
pub(crate) fn inject(ctx: &Context, headers: &mut MessageHeaders) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(ctx, &mut HeaderPropagator::new(headers))
    });
}

/// Creates a new consumer span for one delivery.
///
/// The parent context is extracted from the delivery headers so the span
/// joins the trace started by the publisher.
pub(crate) fn new_span(headers: &MessageHeaders, tracer: &BoxedTracer, name: &str) -> BoxedSpan {
    let mut headers = headers.clone();
    let ctx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderPropagator::new(&mut headers))
    });

    tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_keys_are_lower_cased() {
        let mut headers = MessageHeaders::new();
        HeaderPropagator::new(&mut headers).set("TraceParent", "00-1-2-01".to_owned());

        let propagator = HeaderPropagator::new(&mut headers);
        assert_eq!(propagator.get("traceparent"), Some("00-1-2-01"));
        assert_eq!(propagator.keys(), vec!["traceparent"]);
    }
}
