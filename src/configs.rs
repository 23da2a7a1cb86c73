// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Configuration
//!
//! Plain serde-deserializable settings used to open the AMQP connection and to
//! tag queue names with the running environment. Where the values come from
//! (files, environment, remote store) is up to the caller.

use crate::errors::ConfigError;
use serde::Deserialize;

/// Top level configuration consumed by [`crate::channel::new_amqp_channel`].
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Configs {
    pub app: AppConfigs,
    pub rabbitmq: RabbitMQConfigs,
}

/// Application identity.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfigs {
    /// Name reported to the broker as the connection name
    pub name: String,
    /// Environment tag, first segment of every generated queue name
    pub env: String,
}

impl Default for AppConfigs {
    fn default() -> Self {
        AppConfigs {
            name: "rabbitmq-reliable".to_owned(),
            env: "dev".to_owned(),
        }
    }
}

/// RabbitMQ connection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
    /// Channel wide prefetch; 0 leaves the broker default in place
    pub max_qos: u16,
    /// Put the channel in publisher confirm mode
    pub confirm: bool,
    /// Milliseconds allowed for the connection handshake
    pub connection_timeout: u64,
}

impl Default for RabbitMQConfigs {
    fn default() -> Self {
        RabbitMQConfigs {
            host: "127.0.0.1".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: "/".to_owned(),
            max_qos: 0,
            confirm: true,
            connection_timeout: 10_000,
        }
    }
}

impl Configs {
    /// Rejects configurations that cannot possibly connect.
    ///
    /// # Errors
    /// `ConfigError::Blank` for an empty host, user, password or environment
    /// tag and `ConfigError::InvalidPort` for port 0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app.env.trim().is_empty() {
            return Err(ConfigError::Blank("app.env"));
        }
        if self.rabbitmq.host.trim().is_empty() {
            return Err(ConfigError::Blank("rabbitmq.host"));
        }
        if self.rabbitmq.user.trim().is_empty() {
            return Err(ConfigError::Blank("rabbitmq.user"));
        }
        if self.rabbitmq.password.trim().is_empty() {
            return Err(ConfigError::Blank("rabbitmq.password"));
        }
        if self.rabbitmq.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        Ok(())
    }
}

impl RabbitMQConfigs {
    /// Builds the AMQP URI. The default `/` vhost is percent-encoded.
    pub fn uri(&self) -> String {
        let vhost = match self.vhost.as_str() {
            "/" | "" => "%2f",
            other => other.trim_start_matches('/'),
        };

        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, vhost
        )
    }
}
