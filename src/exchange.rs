// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Exchanges
//!
//! Exchange kinds and the declaration descriptor handed to the broker seam.

use lapin::types::{AMQPValue, LongString, ShortString};
use std::{collections::BTreeMap, convert::Infallible, fmt, str::FromStr};

/// Argument naming the routing type of a delayed exchange.
pub const AMQP_HEADERS_DELAYED_EXCHANGE_TYPE: &str = "x-delayed-type";

const DELAYED_MESSAGE_EXCHANGE: &str = "x-delayed-message";

/// Broker exchange types.
///
/// `XMessageDelayed` needs the delayed-message plugin on the broker; any other
/// plugin type is carried as `Custom`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
    Topic,
    Headers,
    XMessageDelayed,
    Custom(String),
}

impl ExchangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ExchangeKind::Direct => "direct",
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Topic => "topic",
            ExchangeKind::Headers => "headers",
            ExchangeKind::XMessageDelayed => DELAYED_MESSAGE_EXCHANGE,
            ExchangeKind::Custom(kind) => kind,
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ExchangeKind::from(s))
    }
}

impl From<&str> for ExchangeKind {
    /// Parses the broker name of an exchange type, case-insensitively.
    fn from(kind: &str) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "" | "direct" => ExchangeKind::Direct,
            "fanout" => ExchangeKind::Fanout,
            "topic" => ExchangeKind::Topic,
            "headers" => ExchangeKind::Headers,
            DELAYED_MESSAGE_EXCHANGE => ExchangeKind::XMessageDelayed,
            _ => ExchangeKind::Custom(kind.to_owned()),
        }
    }
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
            ExchangeKind::Headers => lapin::ExchangeKind::Headers,
            ExchangeKind::Topic => lapin::ExchangeKind::Topic,
            ExchangeKind::XMessageDelayed => {
                lapin::ExchangeKind::Custom(DELAYED_MESSAGE_EXCHANGE.to_owned())
            }
            ExchangeKind::Custom(kind) => lapin::ExchangeKind::Custom(kind),
        }
    }
}

/// Exchange declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeDefinition {
    pub(crate) name: String,
    pub(crate) kind: ExchangeKind,
    pub(crate) delete: bool,
    pub(crate) durable: bool,
    pub(crate) passive: bool,
    pub(crate) params: BTreeMap<ShortString, AMQPValue>,
}

impl ExchangeDefinition {
    /// Creates a new, non-durable direct exchange definition.
    pub fn new(name: &str) -> ExchangeDefinition {
        ExchangeDefinition {
            name: name.to_owned(),
            kind: ExchangeKind::Direct,
            delete: false,
            durable: false,
            passive: false,
            params: BTreeMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exchange_kind(&self) -> &ExchangeKind {
        &self.kind
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    pub fn is_auto_delete(&self) -> bool {
        self.delete
    }

    pub fn is_passive(&self) -> bool {
        self.passive
    }

    pub fn arguments(&self) -> &BTreeMap<ShortString, AMQPValue> {
        &self.params
    }

    /// Sets the exchange type. Delayed exchanges go through [`Self::delayed`].
    pub fn kind(mut self, kind: ExchangeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Declares an `x-delayed-message` exchange that routes like `kind` once
    /// the delay has elapsed.
    pub fn delayed(mut self, kind: ExchangeKind) -> Self {
        self.kind = ExchangeKind::XMessageDelayed;
        self.params.insert(
            ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE),
            AMQPValue::LongString(LongString::from(kind.as_str())),
        );
        self
    }

    /// Adds extra declaration arguments.
    pub fn arguments_from(mut self, arguments: &BTreeMap<ShortString, AMQPValue>) -> Self {
        self.params.extend(arguments.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Deletes the exchange once no queue is bound to it anymore.
    pub fn delete(mut self, delete: bool) -> Self {
        self.delete = delete;
        self
    }

    /// Persists the exchange across broker restarts.
    pub fn durable(mut self, durable: bool) -> Self {
        self.durable = durable;
        self
    }

    /// Only checks the exchange exists, without creating it.
    pub fn passive(mut self, passive: bool) -> Self {
        self.passive = passive;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_exchange_kinds() {
        assert_eq!(ExchangeKind::from("direct"), ExchangeKind::Direct);
        assert_eq!(ExchangeKind::from("Topic"), ExchangeKind::Topic);
        assert_eq!(ExchangeKind::from(""), ExchangeKind::Direct);
        assert_eq!(
            ExchangeKind::from("x-delayed-message"),
            ExchangeKind::XMessageDelayed
        );
        assert_eq!(
            "x-consistent-hash".parse::<ExchangeKind>().unwrap(),
            ExchangeKind::Custom("x-consistent-hash".to_owned())
        );
        assert_eq!(ExchangeKind::Fanout.to_string(), "fanout");
    }

    #[test]
    fn should_declare_delayed_exchange_with_underlying_type() {
        let def = ExchangeDefinition::new("orders").delayed(ExchangeKind::Fanout);

        assert_eq!(def.kind, ExchangeKind::XMessageDelayed);
        assert_eq!(
            def.params.get(&ShortString::from(AMQP_HEADERS_DELAYED_EXCHANGE_TYPE)),
            Some(&AMQPValue::LongString(LongString::from("fanout")))
        );
    }
}
