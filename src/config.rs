// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Configuration
//!
//! Application and broker settings, loaded from the environment through the
//! `config` crate. Nested keys use a double underscore separator, e.g.
//! `RABBITMQ__HOST` or `APP__NAME`.

use crate::errors::AmqpError;
use config::{Config, Environment};
use serde::Deserialize;
use tracing::error;

/// Identity of the hosting application.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfigs {
    pub name: String,
}

/// Connection parameters for the RabbitMQ server.
#[derive(Debug, Clone, Deserialize)]
pub struct RabbitMQConfigs {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub vhost: String,
}

impl RabbitMQConfigs {
    /// AMQP connection uri built from the parameters.
    pub fn uri(&self) -> String {
        let vhost = match self.vhost.as_str() {
            "/" => "%2f",
            other => other,
        };

        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, vhost
        )
    }
}

/// Root configuration object.
#[derive(Debug, Clone, Deserialize)]
pub struct Configs {
    pub app: AppConfigs,
    pub rabbitmq: RabbitMQConfigs,
    /// Global default for declaring topology at startup.
    #[serde(default)]
    pub auto_provision: bool,
}

impl Configs {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Configs, AmqpError> {
        Self::load(Environment::default().separator("__"))
    }

    pub(crate) fn load(env: Environment) -> Result<Configs, AmqpError> {
        let built = Config::builder()
            .set_default("app.name", default_app_name())
            .and_then(|b| b.set_default("rabbitmq.host", "localhost"))
            .and_then(|b| b.set_default("rabbitmq.port", 5672))
            .and_then(|b| b.set_default("rabbitmq.user", "guest"))
            .and_then(|b| b.set_default("rabbitmq.password", "guest"))
            .and_then(|b| b.set_default("rabbitmq.vhost", "/"))
            .and_then(|b| b.set_default("auto_provision", false))
            .map(|b| b.add_source(env))
            .and_then(|b| b.build());

        let cfg = match built {
            Ok(c) => c,
            Err(err) => {
                error!(error = err.to_string(), "failure to load configs");
                return Err(AmqpError::configuration("configs", err.to_string()));
            }
        };

        cfg.try_deserialize::<Configs>().map_err(|err| {
            error!(error = err.to_string(), "failure to deserialize configs");
            AmqpError::configuration("configs", err.to_string())
        })
    }
}

/// Name of the running executable, used when no application name is configured.
pub(crate) fn default_app_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default()
}
