// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Settings
//!
//! Per-message send and receive settings, the global fallback tier and the
//! [`OptionsResolver`] that layers convention output, configure callbacks and
//! final overrides into the values seen by senders and listeners.

use crate::{
    config::Configs,
    convention::RoutingPlan,
    errors::AmqpError,
    exchange::{ExchangeDefinition, ExchangeKind},
    queue::{QueueBinding, QueueDefinition},
};
use lapin::types::{AMQPValue, ShortString};
use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, OnceLock},
};

/// How a message kind is published.
#[derive(Debug, Clone, PartialEq)]
pub struct SendSettings {
    /// Target exchange. Empty publishes through the default exchange.
    pub exchange: String,
    pub kind: ExchangeKind,
    pub routing_key: String,
    /// Report messages that reach no queue as unroutable.
    pub mandatory: bool,
    pub durable: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub arguments: BTreeMap<ShortString, AMQPValue>,
}

impl Default for SendSettings {
    fn default() -> Self {
        SendSettings {
            exchange: String::new(),
            kind: ExchangeKind::Direct,
            routing_key: String::new(),
            mandatory: false,
            durable: true,
            auto_delete: false,
            passive: false,
            arguments: BTreeMap::new(),
        }
    }
}

impl SendSettings {
    /// Seeds the settings from a routing plan.
    pub fn apply_plan(&mut self, plan: &RoutingPlan) {
        self.exchange = plan.exchange.clone();
        self.kind = plan.exchange_kind.clone();
        self.routing_key = plan.routing_key.clone();
    }

    /// A delayed exchange without an explicit `x-delayed-type` routes directly.
    pub(crate) fn exchange_definition(&self) -> ExchangeDefinition {
        let def = ExchangeDefinition::new(&self.exchange)
            .durable(self.durable)
            .delete(self.auto_delete)
            .passive(self.passive);

        let def = match &self.kind {
            ExchangeKind::XMessageDelayed => def.delayed(ExchangeKind::Direct),
            kind => def.kind(kind.clone()),
        };

        def.arguments_from(&self.arguments)
    }
}

/// How a message kind is consumed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiveSettings {
    /// Exchange the queue is bound to. Empty skips the binding.
    pub exchange: String,
    pub queue_name: String,
    /// Binding key, the queue name when unset.
    pub routing_key: Option<String>,
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
    pub passive: bool,
    pub dead_letter: bool,
    pub dead_letter_exchange: String,
    /// Direct when unset.
    pub dead_letter_exchange_kind: Option<ExchangeKind>,
    pub dead_letter_queue: String,
    /// Dead-letter binding key, the dead-letter queue name when unset.
    pub dead_letter_routing_key: Option<String>,
    pub arguments: BTreeMap<ShortString, AMQPValue>,
}

impl Default for ReceiveSettings {
    fn default() -> Self {
        ReceiveSettings {
            exchange: String::new(),
            queue_name: String::new(),
            routing_key: None,
            durable: true,
            exclusive: false,
            auto_delete: false,
            passive: false,
            dead_letter: false,
            dead_letter_exchange: String::new(),
            dead_letter_exchange_kind: None,
            dead_letter_queue: String::new(),
            dead_letter_routing_key: None,
            arguments: BTreeMap::new(),
        }
    }
}

impl ReceiveSettings {
    /// Seeds the settings from a routing plan. Dead-lettering stays disabled.
    pub fn apply_plan(&mut self, plan: &RoutingPlan) {
        self.exchange = plan.exchange.clone();
        self.queue_name = plan.queue_name.clone();
        self.routing_key = Some(plan.routing_key.clone());
        self.dead_letter_exchange = plan.dead_letter_exchange.clone();
        self.dead_letter_exchange_kind = Some(plan.dead_letter_exchange_kind.clone());
        self.dead_letter_queue = plan.dead_letter_queue_name.clone();
        self.dead_letter_routing_key = Some(plan.dead_letter_routing_key.clone());
    }

    /// Checks the settings describe a declarable topology.
    pub fn validate(&self) -> Result<(), AmqpError> {
        if self.queue_name.is_empty() {
            return Err(AmqpError::configuration(
                "queue_name",
                "a queue name is required to receive messages",
            ));
        }

        if self.dead_letter_exchange.is_empty() != self.dead_letter_queue.is_empty() {
            return Err(AmqpError::configuration(
                "dead_letter",
                "dead-letter exchange and dead-letter queue must be set together",
            ));
        }

        if self.dead_letter && self.dead_letter_exchange.is_empty() {
            return Err(AmqpError::configuration(
                "dead_letter",
                "dead-lettering is enabled without a dead-letter exchange and queue",
            ));
        }

        Ok(())
    }

    pub fn binding_key(&self) -> &str {
        self.routing_key.as_deref().unwrap_or(&self.queue_name)
    }

    pub fn dead_letter_binding_key(&self) -> &str {
        self.dead_letter_routing_key
            .as_deref()
            .unwrap_or(&self.dead_letter_queue)
    }

    pub(crate) fn queue_definition(&self) -> QueueDefinition {
        let def = QueueDefinition::new(&self.queue_name)
            .durable(self.durable)
            .exclusive(self.exclusive)
            .delete(self.auto_delete)
            .passive(self.passive)
            .params(self.arguments.clone());

        if self.dead_letter {
            def.dead_letter(&self.dead_letter_exchange, self.dead_letter_binding_key())
        } else {
            def
        }
    }

    pub(crate) fn binding(&self) -> QueueBinding {
        QueueBinding::new(&self.queue_name)
            .exchange(&self.exchange)
            .routing_key(self.binding_key())
    }

    pub(crate) fn dead_letter_exchange_definition(&self) -> ExchangeDefinition {
        ExchangeDefinition::new(&self.dead_letter_exchange)
            .kind(self.dead_letter_exchange_kind.clone().unwrap_or_default())
            .durable(self.durable)
            .delete(self.auto_delete)
    }

    pub(crate) fn dead_letter_queue_definition(&self) -> QueueDefinition {
        QueueDefinition::new(&self.dead_letter_queue)
            .durable(self.durable)
            .delete(self.auto_delete)
    }

    pub(crate) fn dead_letter_binding(&self) -> QueueBinding {
        QueueBinding::new(&self.dead_letter_queue)
            .exchange(&self.dead_letter_exchange)
            .routing_key(self.dead_letter_binding_key())
    }
}

/// Per-message runtime options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageOptions {
    /// Number of parallel listeners.
    pub concurrency: usize,
    /// Overrides the global auto-provision default when set.
    pub auto_provision: Option<bool>,
}

impl Default for MessageOptions {
    fn default() -> Self {
        MessageOptions {
            concurrency: 1,
            auto_provision: None,
        }
    }
}

impl MessageOptions {
    pub fn resolve_auto_provision(&self, global: bool) -> bool {
        self.auto_provision.unwrap_or(global)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonOptions {
    pub pretty: bool,
}

/// Fallback tier shared by every registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalSettings {
    pub application_name: String,
    pub auto_provision: bool,
    pub json: JsonOptions,
}

impl GlobalSettings {
    pub fn new(application_name: &str) -> GlobalSettings {
        GlobalSettings {
            application_name: application_name.to_owned(),
            auto_provision: false,
            json: JsonOptions::default(),
        }
    }
}

impl From<&Configs> for GlobalSettings {
    fn from(cfg: &Configs) -> Self {
        GlobalSettings {
            application_name: cfg.app.name.clone(),
            auto_provision: cfg.auto_provision,
            json: JsonOptions::default(),
        }
    }
}

type Configure<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// Layers configuration sources into a final, cached value.
///
/// Stages always apply in the same order: the defaults seed (usually derived
/// from the routing convention), then every override callback, then every
/// final override. Without a defaults seed the value starts from
/// `T::default()`. The result is computed on the first [`resolve`] and
/// reused afterwards.
///
/// [`resolve`]: OptionsResolver::resolve
pub struct OptionsResolver<T> {
    defaults: Option<Configure<T>>,
    overrides: Vec<Configure<T>>,
    final_overrides: Vec<Configure<T>>,
    resolved: OnceLock<Arc<T>>,
}

impl<T> Default for OptionsResolver<T> {
    fn default() -> Self {
        OptionsResolver {
            defaults: None,
            overrides: Vec::new(),
            final_overrides: Vec::new(),
            resolved: OnceLock::new(),
        }
    }
}

impl<T> fmt::Debug for OptionsResolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionsResolver")
            .field("defaults", &self.defaults.is_some())
            .field("overrides", &self.overrides.len())
            .field("final_overrides", &self.final_overrides.len())
            .field("resolved", &self.resolved.get().is_some())
            .finish()
    }
}

impl<T: Default> OptionsResolver<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the defaults seed.
    pub fn with_defaults(mut self, f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.defaults = Some(Box::new(f));
        self.resolved = OnceLock::new();
        self
    }

    pub fn with_overrides(mut self, f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.overrides.push(Box::new(f));
        self.resolved = OnceLock::new();
        self
    }

    pub fn with_final_overrides(mut self, f: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.final_overrides.push(Box::new(f));
        self.resolved = OnceLock::new();
        self
    }

    pub fn resolve(&self) -> Arc<T> {
        self.resolved
            .get_or_init(|| {
                let mut value = T::default();
                if let Some(defaults) = &self.defaults {
                    defaults(&mut value);
                }
                for configure in self.overrides.iter().chain(self.final_overrides.iter()) {
                    configure(&mut value);
                }
                Arc::new(value)
            })
            .clone()
    }
}
