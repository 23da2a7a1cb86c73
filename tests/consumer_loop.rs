// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod common;

use async_trait::async_trait;
use common::{eventually, FakeBroker};
use opentelemetry::Context;
use rabbitmq_reliable::{
    contract::{HandlerContract, QueueHandler},
    dispatcher::RabbitMQDispatcher,
    errors::HandlerError,
    exchange::ExchangeDefinition,
    publisher::RabbitMQPublisher,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Order {
    number: u32,
}

/// Fails the first `failures` attempts of every message id.
#[derive(Default)]
struct Flaky {
    failures: u32,
    attempts: Mutex<HashMap<u32, u32>>,
    outcomes: Mutex<Vec<(String, Option<String>)>>,
}

impl Flaky {
    fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Flaky {
            failures,
            ..Flaky::default()
        })
    }

    fn attempts(&self, number: u32) -> u32 {
        self.attempts
            .lock()
            .unwrap()
            .get(&number)
            .copied()
            .unwrap_or_default()
    }

    fn outcomes(&self) -> Vec<(String, Option<String>)> {
        self.outcomes.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueueHandler<Order> for Flaky {
    async fn handle(&self, payload: Order) -> Result<(), HandlerError> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(payload.number).or_default();
            *count += 1;
            *count
        };

        if attempt <= self.failures {
            return Err(HandlerError::failed(format!(
                "order {} attempt {attempt} failed",
                payload.number
            )));
        }
        Ok(())
    }

    async fn on_outcome(&self, message_id: &str, failure: Option<&str>) {
        self.outcomes
            .lock()
            .unwrap()
            .push((message_id.to_owned(), failure.map(str::to_owned)));
    }
}

fn contract(handler: Arc<Flaky>, max_retry: u32) -> HandlerContract<Order> {
    HandlerContract::new(
        ExchangeDefinition::new("orders")
            .fanout()
            .payload::<Order>()
            .durable(),
        "OrderService",
        "create.order",
        "2024-01-15",
        handler,
    )
    .max_retry(max_retry)
    .retry_interval(Duration::from_millis(5))
}

struct Harness {
    broker: Arc<FakeBroker>,
    dispatcher: RabbitMQDispatcher,
    publisher: Arc<RabbitMQPublisher>,
}

impl Harness {
    fn new() -> Self {
        let broker = Arc::new(FakeBroker::new());
        Harness {
            dispatcher: RabbitMQDispatcher::new(broker.clone(), "test"),
            publisher: RabbitMQPublisher::new(broker.clone(), "test"),
            broker,
        }
    }
}

#[tokio::test]
async fn always_failing_handler_runs_one_plus_max_retry_times() {
    let harness = Harness::new();
    let handler = Flaky::failing(u32::MAX);

    harness
        .dispatcher
        .register(contract(handler.clone(), 2))
        .await
        .unwrap();
    let id = harness
        .publisher
        .publish_to_queue(&Context::new(), &contract(handler.clone(), 2), Order { number: 1 })
        .await
        .unwrap();

    assert!(eventually(|| harness.broker.acks() == 1).await);

    assert_eq!(handler.attempts(1), 3);
    assert_eq!(harness.broker.nacks(), 2);
    assert_eq!(harness.broker.in_flight(), 0);
    assert_eq!(harness.dispatcher.ledger().get(&id), 0);
    assert!(harness.dispatcher.ledger().is_empty());

    let outcomes = handler.outcomes();
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|(message_id, failure)| message_id == &id && failure.is_some()));
}

#[tokio::test]
async fn success_after_a_failure_leaves_no_ledger_entry() {
    let harness = Harness::new();
    let handler = Flaky::failing(1);

    harness
        .dispatcher
        .register(contract(handler.clone(), 3))
        .await
        .unwrap();
    let id = harness
        .publisher
        .publish_to_queue(&Context::new(), &contract(handler.clone(), 3), Order { number: 9 })
        .await
        .unwrap();

    assert!(eventually(|| harness.broker.acks() == 1).await);

    assert_eq!(handler.attempts(9), 2);
    assert_eq!(harness.broker.nacks(), 1);
    assert!(harness.dispatcher.ledger().is_empty());
    assert_eq!(handler.outcomes().last(), Some(&(id, None)));
}

#[tokio::test]
async fn poison_message_is_acked_once_and_never_retried() {
    let harness = Harness::new();
    let handler = Flaky::failing(0);

    harness
        .dispatcher
        .register(contract(handler.clone(), 3))
        .await
        .unwrap();
    harness
        .broker
        .inject(br#"{ "msg": { "number": 4 } }"#);

    assert!(eventually(|| harness.broker.acks() == 1).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(harness.broker.acks(), 1);
    assert_eq!(harness.broker.nacks(), 0);
    assert_eq!(handler.attempts(4), 0);

    let outcomes = handler.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, "");
    assert!(outcomes[0].1.is_some());
}

#[tokio::test]
async fn concurrent_failures_keep_independent_counts() {
    const MESSAGES: u32 = 20;

    let harness = Harness::new();
    let handler = Flaky::failing(u32::MAX);

    harness
        .dispatcher
        .register(contract(handler.clone(), 1))
        .await
        .unwrap();

    let publishing = contract(handler.clone(), 1);
    for number in 0..MESSAGES {
        harness
            .publisher
            .publish_to_queue(&Context::new(), &publishing, Order { number })
            .await
            .unwrap();
    }

    assert!(eventually(|| harness.broker.acks() == MESSAGES as usize).await);

    for number in 0..MESSAGES {
        assert_eq!(handler.attempts(number), 2, "order {number}");
    }
    assert_eq!(harness.broker.nacks(), MESSAGES as usize);
    assert!(harness.dispatcher.ledger().is_empty());
}

#[tokio::test]
async fn broadcast_reaches_the_bound_consumer() {
    let harness = Harness::new();
    let handler = Flaky::failing(0);

    harness
        .dispatcher
        .register(contract(handler.clone(), 3))
        .await
        .unwrap();
    harness
        .publisher
        .publish_to_exchange(&Context::new(), &contract(handler.clone(), 3), Order { number: 5 })
        .await
        .unwrap();

    assert!(eventually(|| harness.broker.acks() == 1).await);
    assert_eq!(handler.attempts(5), 1);
    assert_eq!(harness.broker.published(), 1);
}

#[tokio::test]
async fn confirm_channel_confirms_every_publish() {
    let broker = Arc::new(FakeBroker::confirming());
    let publisher = RabbitMQPublisher::new(broker.clone(), "test");
    let publishing = contract(Flaky::failing(0), 3);

    publisher
        .publish_to_queue(&Context::new(), &publishing, Order { number: 1 })
        .await
        .unwrap();
    publisher
        .publish_to_exchange(&Context::new(), &publishing, Order { number: 2 })
        .await
        .unwrap();

    assert_eq!(broker.published(), 2);
    assert_eq!(broker.confirm_waits(), 2);
}
