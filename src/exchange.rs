// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchange Descriptors
//!
//! This module provides the types describing a broker exchange: its kind, its
//! name and the payload type every message routed through it must carry. The
//! descriptors are defined once in static configuration and never change.

use crate::{envelope::type_tag, errors::AmqpError};
use std::fmt;

/// Routing behavior of an exchange.
///
/// `Default` is the broker's pre-declared unnamed exchange, which routes a
/// message to the queue named by its routing key. Every other kind maps onto
/// the AMQP exchange type of the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    #[default]
    Default,
    Direct,
    Fanout,
    Topic,
    Headers,
}

impl ExchangeKind {
    /// Lower-case name used in queue names and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Default => "default",
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<ExchangeKind> for lapin::ExchangeKind {
    type Error = AmqpError;

    /// The unnamed default exchange always exists on the broker and cannot be
    /// declared, so it has no lapin counterpart.
    fn try_from(kind: ExchangeKind) -> Result<lapin::ExchangeKind, AmqpError> {
        match kind {
            ExchangeKind::Direct => Ok(lapin::ExchangeKind::Direct),
            ExchangeKind::Fanout => Ok(lapin::ExchangeKind::Fanout),
            ExchangeKind::Headers => Ok(lapin::ExchangeKind::Headers),
            ExchangeKind::Topic => Ok(lapin::ExchangeKind::Topic),
            ExchangeKind::Default => Err(AmqpError::DeclareExchangeError(
                "the default exchange cannot be declared".to_owned(),
            )),
        }
    }
}

/// Static descriptor of an exchange.
///
/// Besides the broker-side flags it carries the type tag of the payload the
/// exchange accepts, checked when topology is declared and again on every
/// publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) payload_type: &'static str,
    pub(crate) durable: bool,
    pub(crate) delete: bool,
}

impl ExchangeDefinition {
    /// A transient direct exchange carrying `String` payloads until the
    /// builders say otherwise.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            payload_type: type_tag::<String>(),
            durable: false,
            delete: false,
        }
    }

    /// The broker's unnamed default exchange.
    ///
    /// It is durable, never auto-deleted and its name is always empty.
    pub fn unnamed() -> ExchangeDefinition {
        ExchangeDefinition {
            name: String::new(),
            kind: ExchangeKind::Default,
            payload_type: type_tag::<String>(),
            durable: true,
            delete: false,
        }
    }

    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn direct(mut self) -> Self {
        self.kind = ExchangeKind::Direct;
        self
    }

    pub fn fanout(mut self) -> Self {
        self.kind = ExchangeKind::Fanout;
        self
    }

    pub fn topic(mut self) -> Self {
        self.kind = ExchangeKind::Topic;
        self
    }

    pub fn headers(mut self) -> Self {
        self.kind = ExchangeKind::Headers;
        self
    }

    /// Declares the payload type routed through this exchange.
    pub fn payload<T: ?Sized>(mut self) -> Self {
        self.payload_type = type_tag::<T>();
        self
    }

    /// Drops the exchange once its last binding goes away.
    pub fn delete(mut self) -> Self {
        self.delete = true;
        self
    }

    pub fn durable(mut self) -> Self {
        self.durable = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> ExchangeKind {
        self.kind
    }

    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }

    pub fn is_default(&self) -> bool {
        self.kind == ExchangeKind::Default
    }

    /// Checks the name/kind invariant: only the default exchange is unnamed.
    pub(crate) fn check(&self) -> Result<(), String> {
        match (self.kind, self.name.trim().is_empty()) {
            (ExchangeKind::Default, false) => Err(format!(
                "the default exchange must be unnamed, got `{}`",
                self.name
            )),
            (ExchangeKind::Default, true) => Ok(()),
            (kind, true) => Err(format!("a {kind} exchange requires a name")),
            _ => Ok(()),
        }
    }
}
