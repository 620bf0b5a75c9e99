// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Listener
//!
//! A [`Listener`] owns one channel and one consumer on the queue of a message
//! kind. Deliveries on that consumer are processed strictly one at a time;
//! parallelism comes from running several listeners side by side (see
//! [`crate::supervisor::ListenerSupervisor`]).

use crate::{
    channel::{AmqpChannel, AmqpConnection},
    codec::Codec,
    consumer,
    errors::AmqpError,
    handler::MessageHandler,
    message::{Message, MessageIdentity},
    otel,
    settings::ReceiveSettings,
};
use async_trait::async_trait;
use futures_util::StreamExt;
#[cfg(test)]
use mockall::automock;
use opentelemetry::global::BoxedTracer;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Upper bound the broker accepts for a consumer tag (AMQP short string).
const MAX_CONSUMER_TAG_LEN: usize = 255;

/// Builds `<queue>-<index>-<uuid>`, shortening the queue part on a char
/// boundary when the whole tag would exceed [`MAX_CONSUMER_TAG_LEN`].
fn consumer_tag(queue: &str, index: usize) -> String {
    let suffix = format!("-{}-{}", index, Uuid::new_v4());
    let mut end = queue.len().min(MAX_CONSUMER_TAG_LEN - suffix.len());
    while !queue.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &queue[..end], suffix)
}

/// A long-running consumer loop.
///
/// A correct implementation only returns once `cancel` fires; returning
/// earlier, with or without an error, is treated as a fault by the caller.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Listen: Send + Sync {
    async fn listen(&self, cancel: CancellationToken) -> Result<(), AmqpError>;
}

/// Consumes the queue of message kind `M`.
pub struct Listener<M> {
    connection: Arc<dyn AmqpConnection>,
    identity: MessageIdentity,
    settings: Arc<ReceiveSettings>,
    codec: Arc<dyn Codec<M>>,
    handlers: Arc<Vec<Arc<dyn MessageHandler<M>>>>,
    index: usize,
    tracer: BoxedTracer,
}

impl<M: Message> Listener<M> {
    pub fn new(
        connection: Arc<dyn AmqpConnection>,
        settings: Arc<ReceiveSettings>,
        codec: Arc<dyn Codec<M>>,
        handlers: Arc<Vec<Arc<dyn MessageHandler<M>>>>,
        index: usize,
    ) -> Listener<M> {
        Listener {
            connection,
            identity: MessageIdentity::of::<M>(),
            settings,
            codec,
            handlers,
            index,
            tracer: otel::tracer(),
        }
    }

    async fn consume(
        &self,
        channel: &dyn AmqpChannel,
        cancel: &CancellationToken,
    ) -> Result<(), AmqpError> {
        let queue = self.settings.queue_name.as_str();

        channel.declare_queue_passive(queue).await?;

        let consumer_tag = consumer_tag(queue, self.index);
        let mut deliveries = channel.consume(queue, &consumer_tag).await?;

        debug!(
            queue,
            consumer_tag = consumer_tag.as_str(),
            "listener started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(queue, "listener cancelled");
                    return Ok(());
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        consumer::consume(
                            &self.tracer,
                            &self.identity,
                            self.codec.as_ref(),
                            &self.handlers,
                            channel,
                            delivery,
                            cancel,
                        )
                        .await?;
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        warn!(queue, "consumer stream closed by the broker");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<M: Message> Listen for Listener<M> {
    async fn listen(&self, cancel: CancellationToken) -> Result<(), AmqpError> {
        self.settings.validate()?;

        let channel = self.connection.open_channel().await?;
        let result = self.consume(channel.as_ref(), &cancel).await;

        if let Err(err) = channel.close().await {
            warn!(error = err.to_string(), "error closing the listener channel");
        }

        result
    }
}
