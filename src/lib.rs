// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod consumer;
mod otel;

pub mod broker;
pub mod channel;
pub mod configs;
pub mod contract;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod exchange;
pub mod ledger;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod topology;

pub use consumer::Resolution;
