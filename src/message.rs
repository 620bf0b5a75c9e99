// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Messages
//!
//! Types describing what travels through the pipeline: the [`Message`] trait
//! implemented by application payloads, the [`MessageIdentity`] used as the
//! registration key, the [`Envelope`] wrapping a payload on the wire and the
//! [`DeliveryContext`] handed to handlers.

use crate::{channel::Delivery, errors::AmqpError};
use chrono::{DateTime, Utc};
use lapin::BasicProperties;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    any::{type_name, TypeId},
    fmt,
    time::Duration,
};
use uuid::Uuid;

/// A payload that can be sent and received.
///
/// The default [`Message::name`] is the simple type name (no module path, no
/// generic parameters), which the routing convention turns into topology
/// names.
pub trait Message: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn name() -> &'static str {
        simple_type_name(type_name::<Self>())
    }
}

/// Process-wide key of a registered message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageIdentity {
    name: &'static str,
    full_name: &'static str,
    type_id: TypeId,
}

impl MessageIdentity {
    pub fn of<M: Message>() -> MessageIdentity {
        MessageIdentity {
            name: M::name(),
            full_name: type_name::<M>(),
            type_id: TypeId::of::<M>(),
        }
    }

    /// Identity of any type, named after its simple type name.
    pub fn from_type<T: ?Sized + 'static>() -> MessageIdentity {
        let full_name = type_name::<T>();
        MessageIdentity {
            name: simple_type_name(full_name),
            full_name,
            type_id: TypeId::of::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Fully qualified type name, sent as the AMQP `type` property.
    pub fn full_name(&self) -> &'static str {
        self.full_name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }
}

impl fmt::Display for MessageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Strips the module path and generic parameters from a type name.
pub(crate) fn simple_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Per-send options passed down to the broker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Ask the broker to write the message to disk.
    pub persistent: bool,
    /// Per-message TTL after which the broker discards the message.
    pub expiration: Option<Duration>,
}

impl SendOptions {
    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn expiration(mut self, ttl: Duration) -> Self {
        self.expiration = Some(ttl);
        self
    }
}

/// Wire-level wrapper around a serialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    pub correlation_id: Option<String>,
    pub message_type: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Wraps `payload` with a fresh message id, stamped now.
    pub fn new(payload: Vec<u8>) -> Envelope {
        Envelope {
            message_id: Uuid::new_v4().to_string(),
            correlation_id: None,
            message_type: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_message_type(mut self, message_type: &str) -> Self {
        self.message_type = Some(message_type.to_owned());
        self
    }

    /// Rebuilds the envelope from the AMQP properties of a received message.
    ///
    /// Missing message ids stay empty and a missing timestamp falls back to
    /// the time of reception.
    pub fn from_delivery(properties: &BasicProperties, payload: &[u8]) -> Envelope {
        let timestamp = (*properties.timestamp())
            .and_then(|ts| i64::try_from(ts).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .unwrap_or_else(Utc::now);

        Envelope {
            message_id: properties
                .message_id()
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            correlation_id: properties.correlation_id().as_ref().map(|id| id.to_string()),
            message_type: properties.kind().as_ref().map(|kind| kind.to_string()),
            timestamp,
            payload: payload.to_vec(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(self).map_err(|err| AmqpError::SerializePayloadError(err.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Envelope, AmqpError> {
        serde_json::from_slice(data).map_err(|err| AmqpError::ParsePayloadError(err.to_string()))
    }
}

mod base64_payload {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Broker metadata of the delivery being handled.
///
/// Lives only for the duration of one dispatch.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub payload: Vec<u8>,
}

impl DeliveryContext {
    pub fn envelope(&self) -> Envelope {
        Envelope::from_delivery(&self.properties, &self.payload)
    }
}

impl From<Delivery> for DeliveryContext {
    fn from(delivery: Delivery) -> Self {
        DeliveryContext {
            delivery_tag: delivery.delivery_tag,
            redelivered: delivery.redelivered,
            exchange: delivery.exchange,
            routing_key: delivery.routing_key,
            properties: delivery.properties,
            payload: delivery.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lapin::types::ShortString;

    #[derive(Serialize, Deserialize)]
    struct OrderCreatedEvent {
        id: u32,
    }

    impl Message for OrderCreatedEvent {}

    #[derive(Serialize, Deserialize)]
    struct Wrapper<T> {
        inner: T,
    }

    #[test]
    fn should_derive_simple_names() {
        assert_eq!(OrderCreatedEvent::name(), "OrderCreatedEvent");
        assert_eq!(
            MessageIdentity::from_type::<Wrapper<OrderCreatedEvent>>().name(),
            "Wrapper"
        );
        assert!(MessageIdentity::of::<OrderCreatedEvent>()
            .full_name()
            .ends_with("::OrderCreatedEvent"));
        assert_eq!(
            MessageIdentity::of::<OrderCreatedEvent>(),
            MessageIdentity::of::<OrderCreatedEvent>()
        );
    }

    #[test]
    fn should_serialize_envelope_payload_as_base64() {
        let envelope = Envelope {
            message_id: "3e629fcb-54b5-41ac-bcba-1feb9b76bdce".to_owned(),
            correlation_id: Some("f51813d8-3ae0-4f66-b9b1-ec75508cefbb".to_owned()),
            message_type: None,
            timestamp: DateTime::from_timestamp(1_768_286_817, 42_693_000).unwrap(),
            payload: b"{}".to_vec(),
        };

        let json = String::from_utf8(envelope.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            "{\"message_id\":\"3e629fcb-54b5-41ac-bcba-1feb9b76bdce\",\
             \"correlation_id\":\"f51813d8-3ae0-4f66-b9b1-ec75508cefbb\",\
             \"message_type\":null,\
             \"timestamp\":\"2026-01-13T06:46:57.042693Z\",\
             \"payload\":\"e30=\"}"
        );
        assert_eq!(Envelope::from_json(json.as_bytes()).unwrap(), envelope);
    }

    #[test]
    fn should_reject_malformed_envelope() {
        let err = Envelope::from_json(b"{\"message_id\":1}").unwrap_err();
        assert!(matches!(err, AmqpError::ParsePayloadError(_)));
    }

    #[test]
    fn should_rebuild_envelope_from_properties() {
        let props = BasicProperties::default()
            .with_message_id(ShortString::from("abc"))
            .with_correlation_id(ShortString::from("corr"))
            .with_type(ShortString::from("orders::OrderCreatedEvent"))
            .with_timestamp(1_768_286_817);

        let envelope = Envelope::from_delivery(&props, b"{\"id\":1}");

        assert_eq!(envelope.message_id, "abc");
        assert_eq!(envelope.correlation_id.as_deref(), Some("corr"));
        assert_eq!(
            envelope.message_type.as_deref(),
            Some("orders::OrderCreatedEvent")
        );
        assert_eq!(envelope.timestamp.timestamp(), 1_768_286_817);
        assert_eq!(envelope.payload, b"{\"id\":1}");
    }
}
