// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::StreamExt;
use rabbitmq_reliable::{
    broker::{Broker, ConsumeOptions, Delivery, DeliveryStream, MessageHeaders},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{QueueBinding, QueueDefinition},
};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Mutex,
    time::Duration,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Broker-side state the tests assert on.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchanges: BTreeSet<String>,
    pub queues: BTreeMap<String, (bool, bool, bool)>,
    pub bindings: BTreeSet<(String, String, String)>,
}

#[derive(Default)]
struct State {
    topology: Topology,
    consumer: Option<UnboundedSender<Delivery>>,
    in_flight: HashMap<u64, (Vec<u8>, MessageHeaders)>,
    next_tag: u64,
    published: Vec<(String, String, Vec<u8>)>,
    acks: Vec<u64>,
    nacks: Vec<(u64, bool)>,
    confirm_waits: usize,
}

/// Single-queue in-memory broker. Published messages and raw injected bodies
/// go to the one subscriber; nacks with requeue redeliver under a new tag.
#[derive(Default)]
pub struct FakeBroker {
    confirm_mode: bool,
    state: Mutex<State>,
}

impl FakeBroker {
    pub fn new() -> Self {
        FakeBroker::default()
    }

    /// A broker whose channel runs in publisher confirm mode.
    pub fn confirming() -> Self {
        FakeBroker {
            confirm_mode: true,
            ..FakeBroker::default()
        }
    }

    /// Pushes raw bytes to the subscriber as if a producer had sent them.
    pub fn inject(&self, body: &[u8]) {
        let mut state = self.state.lock().unwrap();
        deliver(&mut state, body.to_vec(), MessageHeaders::new());
    }

    pub fn topology(&self) -> Topology {
        self.state.lock().unwrap().topology.clone()
    }

    pub fn published(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }

    pub fn acks(&self) -> usize {
        self.state.lock().unwrap().acks.len()
    }

    pub fn nacks(&self) -> usize {
        self.state.lock().unwrap().nacks.len()
    }

    pub fn confirm_waits(&self) -> usize {
        self.state.lock().unwrap().confirm_waits
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }
}

fn deliver(state: &mut State, body: Vec<u8>, headers: MessageHeaders) {
    state.next_tag += 1;
    let tag = state.next_tag;
    state.in_flight.insert(tag, (body.clone(), headers.clone()));

    if let Some(consumer) = &state.consumer {
        let _ = consumer.send(Delivery {
            delivery_tag: tag,
            body,
            headers,
        });
    }
}

#[async_trait]
impl Broker for FakeBroker {
    async fn declare_exchange(&self, def: &ExchangeDefinition) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.topology.exchanges.insert(def.name().to_owned());
        Ok(())
    }

    async fn declare_queue(&self, def: &QueueDefinition) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.topology.queues.insert(
            def.name().to_owned(),
            (def.is_durable(), def.is_exclusive(), def.is_auto_delete()),
        );
        Ok(())
    }

    async fn bind_queue(&self, binding: &QueueBinding) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.topology.bindings.insert((
            binding.queue_name().to_owned(),
            binding.exchange_name().to_owned(),
            binding.key().to_owned(),
        ));
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        headers: &MessageHeaders,
        body: &[u8],
    ) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state
            .published
            .push((exchange.to_owned(), routing_key.to_owned(), body.to_vec()));
        deliver(&mut state, body.to_vec(), headers.clone());
        Ok(())
    }

    fn confirm_mode(&self) -> bool {
        self.confirm_mode
    }

    async fn wait_for_confirms(&self, _timeout: Duration) -> Result<(), AmqpError> {
        self.state.lock().unwrap().confirm_waits += 1;
        Ok(())
    }

    async fn consume(
        &self,
        _queue: &str,
        _options: &ConsumeOptions,
    ) -> Result<DeliveryStream, AmqpError> {
        let (tx, rx) = unbounded_channel();
        self.state.lock().unwrap().consumer = Some(tx);

        Ok(receiver_stream(rx))
    }

    async fn ack(&self, delivery_tag: u64, _multiple: bool) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.in_flight.remove(&delivery_tag);
        state.acks.push(delivery_tag);
        Ok(())
    }

    async fn nack(
        &self,
        delivery_tag: u64,
        _multiple: bool,
        requeue: bool,
    ) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.nacks.push((delivery_tag, requeue));

        let Some((body, headers)) = state.in_flight.remove(&delivery_tag) else {
            return Err(AmqpError::NackMessageError);
        };
        if requeue {
            deliver(&mut state, body, headers);
        }
        Ok(())
    }
}

fn receiver_stream(rx: UnboundedReceiver<Delivery>) -> DeliveryStream {
    futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|delivery| (Ok(delivery), rx))
    })
    .boxed()
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
