// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Routing Conventions
//!
//! A routing convention derives topology names from a message identity, so
//! applications only declare "I produce / consume `T`". The
//! [`DefaultRoutingConvention`] kebab-cases the message name for queues and
//! routing keys and the application name for the exchange.

use crate::{exchange::ExchangeKind, message::MessageIdentity};

const DEAD_LETTER_QUEUE_SUFFIX: &str = ".dlq";
const DEAD_LETTER_EXCHANGE_SUFFIX: &str = ".dlx";

/// Derives topology names for a message identity.
///
/// Implementations must be pure: the same identity always yields the same
/// names.
pub trait RoutingConvention: Send + Sync {
    fn queue_name(&self, identity: &MessageIdentity) -> String;

    fn routing_key(&self, identity: &MessageIdentity) -> String {
        self.queue_name(identity)
    }

    fn exchange(&self, identity: &MessageIdentity) -> String;

    fn exchange_kind(&self, _identity: &MessageIdentity) -> ExchangeKind {
        ExchangeKind::Direct
    }

    fn dead_letter_queue_name(&self, identity: &MessageIdentity) -> String {
        format!("{}{}", self.queue_name(identity), DEAD_LETTER_QUEUE_SUFFIX)
    }

    fn dead_letter_routing_key(&self, identity: &MessageIdentity) -> String {
        self.dead_letter_queue_name(identity)
    }

    fn dead_letter_exchange(&self, identity: &MessageIdentity) -> String {
        format!("{}{}", self.exchange(identity), DEAD_LETTER_EXCHANGE_SUFFIX)
    }

    fn dead_letter_exchange_kind(&self, _identity: &MessageIdentity) -> ExchangeKind {
        ExchangeKind::Direct
    }

    /// Computes every name at once.
    fn plan(&self, identity: &MessageIdentity) -> RoutingPlan {
        RoutingPlan {
            queue_name: self.queue_name(identity),
            routing_key: self.routing_key(identity),
            exchange: self.exchange(identity),
            exchange_kind: self.exchange_kind(identity),
            dead_letter_queue_name: self.dead_letter_queue_name(identity),
            dead_letter_routing_key: self.dead_letter_routing_key(identity),
            dead_letter_exchange: self.dead_letter_exchange(identity),
            dead_letter_exchange_kind: self.dead_letter_exchange_kind(identity),
        }
    }
}

/// Topology names derived for one message identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPlan {
    pub queue_name: String,
    pub routing_key: String,
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub dead_letter_queue_name: String,
    pub dead_letter_routing_key: String,
    pub dead_letter_exchange: String,
    pub dead_letter_exchange_kind: ExchangeKind,
}

/// Kebab-case convention seeded with the hosting application's name.
#[derive(Debug, Clone)]
pub struct DefaultRoutingConvention {
    exchange: String,
}

impl DefaultRoutingConvention {
    pub fn new(app_name: &str) -> DefaultRoutingConvention {
        DefaultRoutingConvention {
            exchange: to_kebab_case(app_name),
        }
    }
}

impl RoutingConvention for DefaultRoutingConvention {
    fn queue_name(&self, identity: &MessageIdentity) -> String {
        to_kebab_case(identity.name())
    }

    fn exchange(&self, _identity: &MessageIdentity) -> String {
        self.exchange.clone()
    }
}

/// Converts a PascalCase name to kebab-case.
///
/// Every uppercase letter after the first character starts a new word, so
/// acronyms are split letter by letter (`HTTPRequest` becomes
/// `h-t-t-p-request`). Dots are dropped and digits are kept as they are.
pub fn to_kebab_case(name: &str) -> String {
    let mut kebab = String::with_capacity(name.len() + 4);

    for (i, c) in name.chars().enumerate() {
        if c == '.' {
            continue;
        }

        if c.is_uppercase() {
            if i > 0 {
                kebab.push('-');
            }
            kebab.extend(c.to_lowercase());
        } else {
            kebab.push(c);
        }
    }

    kebab
}
