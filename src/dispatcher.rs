// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # RabbitMQ Message Dispatcher
//!
//! This module registers handler contracts as broker consumers. Registering a
//! contract claims its queue address, declares its topology, subscribes to the
//! queue and spawns a loop that hands every delivery to its own task, so a
//! slow handler never holds up the deliveries behind it.
//!
//! Each dispatcher owns the retry ledger shared by its consumers; independent
//! dispatchers never see each other's retry counts.

use crate::{
    broker::{Broker, ConsumeOptions, DeliveryStream},
    consumer::consume,
    contract::HandlerContract,
    envelope::Payload,
    errors::TopologyError,
    ledger::RetryLedger,
    registry::AddressRegistry,
    topology::AmqpTopology,
};
use futures_util::StreamExt;
use opentelemetry::global;
use std::sync::Arc;
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, info};

/// Everything a per-delivery task needs to resolve a message.
pub struct RabbitMQDispatcherDefinition<T: Payload> {
    pub(crate) queue_name: String,
    pub(crate) contract: Arc<HandlerContract<T>>,
    pub(crate) broker: Arc<dyn Broker>,
    pub(crate) ledger: Arc<RetryLedger>,
}

/// Registers contracts and drives their consumers.
pub struct RabbitMQDispatcher {
    broker: Arc<dyn Broker>,
    topology: AmqpTopology,
    ledger: Arc<RetryLedger>,
    registry: Mutex<AddressRegistry>,
}

impl RabbitMQDispatcher {
    /// Creates a new RabbitMQ dispatcher with its own retry ledger.
    ///
    /// # Parameters
    /// * `broker` - The broker to consume from
    /// * `env` - The environment tag used to resolve queue names
    pub fn new(broker: Arc<dyn Broker>, env: &str) -> Self {
        RabbitMQDispatcher {
            topology: AmqpTopology::new(broker.clone(), env),
            broker,
            ledger: Arc::new(RetryLedger::new()),
            registry: Mutex::new(AddressRegistry::new()),
        }
    }

    /// Replaces the retry ledger, e.g. to share one between dispatchers.
    pub fn with_ledger(mut self, ledger: Arc<RetryLedger>) -> Self {
        self.ledger = ledger;
        self
    }

    pub fn ledger(&self) -> Arc<RetryLedger> {
        self.ledger.clone()
    }

    pub fn topology(&self) -> &AmqpTopology {
        &self.topology
    }

    /// Declares the contract's topology and starts consuming its queue.
    ///
    /// # Returns
    /// The handle of the receive loop; it ends when the broker closes the
    /// subscription.
    ///
    /// # Errors
    /// `TopologyError::DuplicateAddress` when another contract on this
    /// dispatcher already resolves to the same queue, any declaration error,
    /// and `TopologyError::Broker` when the subscription cannot be created.
    pub async fn register<T: Payload>(
        &self,
        contract: HandlerContract<T>,
    ) -> Result<JoinHandle<()>, TopologyError> {
        let queue_name = self.topology.queue_name_for(&contract);

        // the claim is dropped again if the subscription cannot be started
        let mut registry = self.registry.lock().await;
        registry.register(&queue_name, contract.payload_type())?;

        let mut deliveries = match self.subscribe(&queue_name, &contract).await {
            Ok(deliveries) => deliveries,
            Err(err) => {
                registry.release(&queue_name);
                return Err(err);
            }
        };
        drop(registry);

        let def = Arc::new(RabbitMQDispatcherDefinition {
            queue_name: queue_name.clone(),
            contract: Arc::new(contract),
            broker: self.broker.clone(),
            ledger: self.ledger.clone(),
        });

        info!(queue = queue_name.as_str(), "consumer registered");

        Ok(tokio::spawn(async move {
            let tracer = Arc::new(global::tracer("amqp consumer"));

            while let Some(result) = deliveries.next().await {
                match result {
                    Ok(delivery) => {
                        let def = def.clone();
                        let tracer = tracer.clone();
                        tokio::spawn(async move {
                            let tag = delivery.delivery_tag;
                            let resolution = consume(&tracer, delivery, &def).await;
                            debug!(
                                queue = def.queue_name.as_str(),
                                delivery_tag = tag,
                                resolution = ?resolution,
                                "delivery resolved"
                            );
                        });
                    }

                    Err(err) => error!(error = err.to_string(), "errors consume msg"),
                }
            }

            info!(queue = def.queue_name.as_str(), "consumer stopped");
        }))
    }

    async fn subscribe<T: Payload>(
        &self,
        queue_name: &str,
        contract: &HandlerContract<T>,
    ) -> Result<DeliveryStream, TopologyError> {
        self.topology.declare(contract).await?;

        let options = ConsumeOptions {
            consumer_tag: queue_name.to_owned(),
            max_buffer_size: contract.max_internal_queue_size,
            auto_ack: contract.auto_ack,
        };

        Ok(self.broker.consume(queue_name, &options).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broker::MockBroker,
        contract::QueueHandler,
        errors::{AmqpError, HandlerError},
        exchange::ExchangeDefinition,
    };
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl QueueHandler<String> for Noop {
        async fn handle(&self, _payload: String) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn contract(date: &str) -> HandlerContract<String> {
        HandlerContract::new(
            ExchangeDefinition::unnamed(),
            "user",
            "register",
            date,
            Arc::new(Noop),
        )
        .max_internal_queue_size(10)
    }

    #[tokio::test]
    async fn register_subscribes_with_contract_options() {
        let mut broker = MockBroker::new();
        broker.expect_declare_queue().returning(|_| Ok(()));
        broker
            .expect_consume()
            .withf(|queue, options| {
                queue == "dev.user.register.2023-08-03.default.default"
                    && options.max_buffer_size == 10
                    && !options.auto_ack
            })
            .times(1)
            .returning(|_, _| Ok(futures_util::stream::empty().boxed()));

        let dispatcher = RabbitMQDispatcher::new(Arc::new(broker), "dev");
        let handle = dispatcher.register(contract("2023-08-03")).await.unwrap();

        handle.await.unwrap();
    }

    #[tokio::test]
    async fn second_contract_on_same_queue_is_rejected() {
        let mut broker = MockBroker::new();
        broker.expect_declare_queue().times(1).returning(|_| Ok(()));
        broker
            .expect_consume()
            .times(1)
            .returning(|_, _| Ok(futures_util::stream::empty().boxed()));

        let dispatcher = RabbitMQDispatcher::new(Arc::new(broker), "dev");
        dispatcher.register(contract("2023-08-03")).await.unwrap();

        assert!(matches!(
            dispatcher.register(contract("2023-08-03")).await,
            Err(TopologyError::DuplicateAddress { .. })
        ));
    }

    #[tokio::test]
    async fn failed_registration_releases_its_address() {
        let mut broker = MockBroker::new();
        let mut seq = mockall::Sequence::new();
        broker
            .expect_declare_queue()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|def| Err(AmqpError::DeclareQueueError(def.name().to_owned())));
        broker
            .expect_declare_queue()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        broker
            .expect_consume()
            .times(1)
            .returning(|_, _| Ok(futures_util::stream::empty().boxed()));

        let dispatcher = RabbitMQDispatcher::new(Arc::new(broker), "dev");

        assert!(matches!(
            dispatcher.register(contract("2023-08-03")).await,
            Err(TopologyError::Broker(AmqpError::DeclareQueueError(_)))
        ));
        assert!(dispatcher.register(contract("2023-08-03")).await.is_ok());
    }

    #[tokio::test]
    async fn declaration_failure_prevents_consuming() {
        let mut broker = MockBroker::new();
        broker.expect_consume().times(0);

        let dispatcher = RabbitMQDispatcher::new(Arc::new(broker), "dev");
        assert!(matches!(
            dispatcher.register(contract("03/08/2023")).await,
            Err(TopologyError::InvalidContract(_))
        ));
    }
}
