// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Topology Management
//!
//! This module derives the broker-side queue of a handler contract and declares
//! it. The queue name is a pure function of the contract and the environment
//! tag, so every process instance sharing a contract converges on the same
//! queue, and moving the business date forward opens a fresh one.
//!
//! Declaring runs in a fixed order:
//! 1. Validate the contract
//! 2. Declare the exchange (skipped for the broker's unnamed default exchange)
//! 3. Check the exchange's payload type against the contract's
//! 4. Declare the queue
//! 5. Bind the queue to the exchange with an empty routing key
//!
//! Every step is idempotent against the broker, and any failure aborts the
//! sequence.

use crate::{
    broker::Broker,
    contract::HandlerContract,
    envelope::Payload,
    errors::TopologyError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Separator between queue name segments
pub const QUEUE_NAME_DELIMITER: &str = ".";

/// Name segment used for the broker's unnamed default exchange
pub const DEFAULT_EXCHANGE_SEGMENT: &str = "default";

/// Required layout of a contract's business date
pub const BUSINESS_DATE_FORMAT: &str = "%Y-%m-%d";

/// Lower-cases a module or exchange name for use as a queue name segment.
///
/// Lower-casing runs before the underscore rule, so camel case collapses
/// (`UserService` becomes `userservice`) and separators already in the name
/// are kept as they are.
pub fn normalize_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    for ch in raw.to_lowercase().chars() {
        if ch.is_uppercase() {
            out.push('_');
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }

    if out.starts_with('_') {
        out.remove(0);
    }
    out
}

/// Builds `{env}.{module}.{queue}.{date}.{exchange}.{kind}`.
pub fn queue_name(
    env: &str,
    module: &str,
    queue: &str,
    business_date: &str,
    exchange: &ExchangeDefinition,
) -> String {
    let exchange_segment = if exchange.is_default() {
        DEFAULT_EXCHANGE_SEGMENT.to_owned()
    } else {
        normalize_segment(&exchange.name)
    };

    [
        env.to_owned(),
        normalize_segment(module),
        queue.to_owned(),
        business_date.trim().to_owned(),
        exchange_segment,
        exchange.kind.as_str().to_owned(),
    ]
    .join(QUEUE_NAME_DELIMITER)
}

/// The queue name `contract` resolves to in environment `env`.
pub fn queue_name_for<T: Payload>(env: &str, contract: &HandlerContract<T>) -> String {
    queue_name(
        env,
        &contract.module,
        &contract.queue_name,
        &contract.business_date,
        &contract.exchange,
    )
}

/// Checks the parts of a contract the broker cannot check for us.
///
/// # Errors
/// `TopologyError::InvalidContract` for blank names, a malformed business
/// date or an exchange violating the name/kind invariant.
pub fn validate<T: Payload>(contract: &HandlerContract<T>) -> Result<(), TopologyError> {
    if contract.module.trim().is_empty() {
        return Err(TopologyError::InvalidContract(
            "module name must not be blank".to_owned(),
        ));
    }

    if contract.queue_name.trim().is_empty() {
        return Err(TopologyError::InvalidContract(
            "queue name must not be blank".to_owned(),
        ));
    }

    let date = contract.business_date.trim();
    if date.len() != 10 || NaiveDate::parse_from_str(date, BUSINESS_DATE_FORMAT).is_err() {
        return Err(TopologyError::InvalidContract(format!(
            "business date `{date}` is not a YYYY-MM-DD date"
        )));
    }

    contract
        .exchange
        .check()
        .map_err(TopologyError::InvalidContract)?;

    if contract.exclusive && contract.durable {
        warn!(
            queue = contract.queue_name.as_str(),
            "exclusive queue declared durable, it is still deleted when its connection closes"
        );
    }

    Ok(())
}

/// Declares the broker-side topology of handler contracts.
pub struct AmqpTopology {
    broker: Arc<dyn Broker>,
    env: String,
}

impl AmqpTopology {
    /// Creates a new AmqpTopology instance.
    ///
    /// # Parameters
    /// * `broker` - The broker to declare against
    /// * `env` - The environment tag prefixed to every queue name
    pub fn new(broker: Arc<dyn Broker>, env: &str) -> AmqpTopology {
        AmqpTopology {
            broker,
            env: env.to_owned(),
        }
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    pub fn queue_name_for<T: Payload>(&self, contract: &HandlerContract<T>) -> String {
        queue_name_for(&self.env, contract)
    }

    /// Declares exchange, queue and binding for `contract`.
    ///
    /// # Returns
    /// The declared queue name
    ///
    /// # Errors
    /// Contract validation failures, a payload type mismatch between contract
    /// and exchange, or the first broker RPC failure.
    pub async fn declare<T: Payload>(
        &self,
        contract: &HandlerContract<T>,
    ) -> Result<String, TopologyError> {
        validate(contract)?;

        let exchange = &contract.exchange;
        self.install_exchange(exchange).await?;

        if exchange.payload_type != contract.payload_type() {
            error!(
                exchange = exchange.name.as_str(),
                expected = exchange.payload_type,
                actual = contract.payload_type(),
                "exchange message type mismatch"
            );
            return Err(TopologyError::TypeMismatch {
                expected: exchange.payload_type,
                actual: contract.payload_type(),
            });
        }

        let name = self.queue_name_for(contract);
        self.install_queue(&name, contract).await?;
        self.binding_queue(&name, exchange).await?;

        info!(
            queue = name.as_str(),
            exchange = exchange.name.as_str(),
            kind = exchange.kind.as_str(),
            durable = contract.durable,
            exclusive = contract.exclusive,
            "queue declared"
        );

        Ok(name)
    }

    async fn install_exchange(&self, exchange: &ExchangeDefinition) -> Result<(), TopologyError> {
        if exchange.is_default() {
            return Ok(());
        }

        self.broker.declare_exchange(exchange).await?;

        debug!(
            "exchange: {} declared, kind: {}, durable: {}, auto delete: {}",
            exchange.name, exchange.kind, exchange.durable, exchange.delete
        );
        Ok(())
    }

    async fn install_queue<T: Payload>(
        &self,
        name: &str,
        contract: &HandlerContract<T>,
    ) -> Result<(), TopologyError> {
        let def = QueueDefinition::new(name)
            .durable(contract.durable)
            .exclusive(contract.exclusive)
            .auto_delete(false);

        self.broker.declare_queue(&def).await?;
        Ok(())
    }

    /// Queues are bound to the default exchange implicitly, by name.
    async fn binding_queue(
        &self,
        name: &str,
        exchange: &ExchangeDefinition,
    ) -> Result<(), TopologyError> {
        if exchange.is_default() {
            return Ok(());
        }

        let binding = QueueBinding::new(name, &exchange.name);
        self.broker.bind_queue(&binding).await?;

        debug!("queue: {} bound to exchange: {}", name, exchange.name);
        Ok(())
    }
}
