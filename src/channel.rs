// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Bootstrap
//!
//! Opens the single connection and channel the reliable layer runs on. The
//! channel is switched into publisher confirm mode and given a channel wide
//! prefetch when the configuration asks for them.

use crate::{configs::Configs, errors::AmqpError};
use lapin::{
    options::{BasicQosOptions, ConfirmSelectOptions},
    types::LongString,
    Channel, Connection, ConnectionProperties,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, error};

/// Validates `cfg`, connects within its connection timeout and opens a
/// channel ready to be wrapped by `RabbitMQBroker`.
///
/// Every failure is logged and mapped onto the matching `AmqpError`; an
/// invalid configuration surfaces as `ConnectionError` without any network
/// traffic.
///
/// ```ignore
/// let (_conn, channel) = new_amqp_channel(&cfg).await?;
/// let broker = RabbitMQBroker::new(channel);
/// ```
pub async fn new_amqp_channel(
    cfg: &Configs,
) -> Result<(Arc<Connection>, Arc<Channel>), AmqpError> {
    if let Err(err) = cfg.validate() {
        error!(error = err.to_string(), "invalid rabbitmq configuration");
        return Err(AmqpError::ConnectionError);
    }

    debug!(host = cfg.rabbitmq.host.as_str(), port = cfg.rabbitmq.port, "connecting to rabbitmq");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.app.name.clone()));

    let timeout = Duration::from_millis(cfg.rabbitmq.connection_timeout);
    let conn = match tokio::time::timeout(
        timeout,
        Connection::connect(&cfg.rabbitmq.uri(), options),
    )
    .await
    {
        Ok(Ok(c)) => Ok(c),
        Ok(Err(err)) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError)
        }
        Err(_) => {
            error!(timeout_ms = cfg.rabbitmq.connection_timeout, "connection timed out");
            Err(AmqpError::ConnectionError)
        }
    }?;
    debug!("connected, opening channel");
    let channel = match conn.create_channel().await {
        Ok(c) => Ok(c),
        Err(err) => {
            error!(error = err.to_string(), "failure to open the channel");
            Err(AmqpError::ChannelError)
        }
    }?;

    if cfg.rabbitmq.confirm {
        if let Err(err) = channel
            .confirm_select(ConfirmSelectOptions { nowait: false })
            .await
        {
            error!(error = err.to_string(), "error to enable publisher confirms");
            return Err(AmqpError::ConfirmSelectError);
        }
        debug!("publisher confirms enabled");
    }

    if cfg.rabbitmq.max_qos > 0 {
        if let Err(err) = channel
            .basic_qos(cfg.rabbitmq.max_qos, BasicQosOptions { global: true })
            .await
        {
            error!(error = err.to_string(), "error to configure qos");
            return Err(AmqpError::QoSDeclarationError(err.to_string()));
        }
    }

    Ok((Arc::new(conn), Arc::new(channel)))
}
