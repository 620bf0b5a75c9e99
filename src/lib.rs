// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Warren
//!
//! Typed message delivery over RabbitMQ. Applications register the message
//! kinds they send and handle; the crate derives the topology names, declares
//! exchanges and queues, publishes with the resolved settings and runs
//! supervised listeners with a requeue-once, then dead-letter policy.

mod consumer;
mod otel;

pub mod channel;
pub mod codec;
pub mod config;
pub mod convention;
pub mod errors;
pub mod exchange;
pub mod handler;
pub mod listener;
pub mod message;
pub mod publisher;
pub mod queue;
pub mod registry;
pub mod settings;
pub mod supervisor;
pub mod topology;

pub use consumer::DeliveryOutcome;
pub use errors::{AmqpError, ErrorKind, HandlerError};
pub use handler::MessageHandler;
pub use message::{DeliveryContext, Envelope, Message, MessageIdentity, SendOptions};
pub use otel::correlation_id;
pub use registry::{MessageBuilder, Warren, WarrenBuilder};
