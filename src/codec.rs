// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Payload Codecs

use crate::{errors::AmqpError, settings::JsonOptions};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use tracing::error;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Turns messages into bytes and back.
///
/// Failures are always reported as format errors, never as empty results.
pub trait Codec<M>: Send + Sync {
    fn content_type(&self) -> &str;

    fn serialize(&self, message: &M) -> Result<Vec<u8>, AmqpError>;

    fn deserialize(&self, data: &[u8]) -> Result<M, AmqpError>;
}

/// `serde_json` codec.
#[derive(Debug, Clone, Copy)]
pub struct JsonCodec<M> {
    options: JsonOptions,
    _message: PhantomData<fn() -> M>,
}

impl<M> JsonCodec<M> {
    pub fn new(options: JsonOptions) -> Self {
        JsonCodec {
            options,
            _message: PhantomData,
        }
    }
}

impl<M> Default for JsonCodec<M> {
    fn default() -> Self {
        JsonCodec::new(JsonOptions::default())
    }
}

impl<M> Codec<M> for JsonCodec<M>
where
    M: Serialize + DeserializeOwned,
{
    fn content_type(&self) -> &str {
        JSON_CONTENT_TYPE
    }

    fn serialize(&self, message: &M) -> Result<Vec<u8>, AmqpError> {
        let result = if self.options.pretty {
            serde_json::to_vec_pretty(message)
        } else {
            serde_json::to_vec(message)
        };

        result.map_err(|err| {
            error!(error = err.to_string(), "error serializing payload");
            AmqpError::SerializePayloadError(err.to_string())
        })
    }

    fn deserialize(&self, data: &[u8]) -> Result<M, AmqpError> {
        serde_json::from_slice(data).map_err(|err| {
            error!(error = err.to_string(), "error parsing payload");
            AmqpError::ParsePayloadError(err.to_string())
        })
    }
}
