// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Sender
//!
//! [`MessageSender`] publishes one message kind with its resolved
//! [`SendSettings`]. It owns a single publish channel, opened on the first
//! send and reused afterwards; sends through the same sender are serialized
//! on that channel. A transport failure drops the channel so the next send
//! opens a fresh one.

use crate::{
    channel::{AmqpChannel, AmqpConnection},
    codec::Codec,
    errors::{AmqpError, ErrorKind},
    message::{Envelope, Message, MessageIdentity, SendOptions},
    otel,
    settings::SendSettings,
};
use lapin::{
    types::{FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::{
    global::BoxedTracer,
    trace::TraceContextExt,
    Context,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const DELIVERY_MODE_TRANSIENT: u8 = 1;
const DELIVERY_MODE_PERSISTENT: u8 = 2;

/// Publishes messages of type `M`.
pub struct MessageSender<M> {
    connection: Arc<dyn AmqpConnection>,
    identity: MessageIdentity,
    settings: Arc<SendSettings>,
    codec: Arc<dyn Codec<M>>,
    app_id: String,
    tracer: BoxedTracer,
    channel: Mutex<Option<Arc<dyn AmqpChannel>>>,
}

impl<M: Message> MessageSender<M> {
    pub fn new(
        connection: Arc<dyn AmqpConnection>,
        settings: Arc<SendSettings>,
        codec: Arc<dyn Codec<M>>,
        app_id: &str,
    ) -> MessageSender<M> {
        MessageSender {
            connection,
            identity: MessageIdentity::of::<M>(),
            settings,
            codec,
            app_id: app_id.to_owned(),
            tracer: otel::tracer(),
            channel: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SendSettings {
        &self.settings
    }

    /// Publishes `message`, returning the generated message id.
    ///
    /// # Parameters
    /// * `ctx` - Parent trace context; its span becomes the correlation id
    /// * `message` - Payload, serialized with the configured codec
    /// * `options` - Persistence and per-message TTL
    /// * `cancel` - Aborts the send while it waits on the broker
    ///
    /// # Returns
    /// The message id of the [`Envelope`] that was published. Serialization
    /// failures surface as format errors, a mandatory publish that reaches no
    /// queue as [`AmqpError::UnroutableMessageError`] and a cancelled send as
    /// [`AmqpError::CancelledError`].
    pub async fn send(
        &self,
        ctx: &Context,
        message: &M,
        options: SendOptions,
        cancel: &CancellationToken,
    ) -> Result<String, AmqpError> {
        let span = otel::producer_span(&self.tracer, ctx, self.identity.name());
        let cx = ctx.with_span(span);

        let result = self.publish(ctx, &cx, message, options, cancel).await;

        let span = cx.span();
        if let Err(err) = &result {
            otel::record_failure(&span, err, "failure to send message");
        }
        span.end();

        result
    }

    async fn publish(
        &self,
        parent: &Context,
        cx: &Context,
        message: &M,
        options: SendOptions,
        cancel: &CancellationToken,
    ) -> Result<String, AmqpError> {
        let envelope = Envelope::new(self.codec.serialize(message)?)
            .with_correlation_id(otel::correlation_id(parent))
            .with_message_type(self.identity.full_name());
        let properties = self.properties(cx, &envelope, options);

        let mut guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AmqpError::CancelledError),
            guard = self.channel.lock() => guard,
        };

        let channel = match guard.as_ref() {
            Some(channel) => channel.clone(),
            None => {
                debug!(message = self.identity.name(), "opening publish channel");
                let channel = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(AmqpError::CancelledError),
                    channel = self.connection.open_channel() => channel?,
                };
                *guard = Some(channel.clone());
                channel
            }
        };

        let published = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = channel.publish(
                &self.settings.exchange,
                &self.settings.routing_key,
                self.settings.mandatory,
                properties,
                &envelope.payload,
            ) => Some(result),
        };

        let Some(result) = published else {
            // the broker may still confirm the abandoned publish on this channel
            warn!(message = self.identity.name(), "send cancelled, dropping the publish channel");
            guard.take();
            if let Err(err) = channel.close().await {
                warn!(error = err.to_string(), "error closing the publish channel");
            }
            return Err(AmqpError::CancelledError);
        };

        match result {
            Ok(_) => {
                debug!(
                    message = self.identity.name(),
                    message_id = envelope.message_id.as_str(),
                    "message published"
                );
                Ok(envelope.message_id)
            }
            Err(err) => {
                error!(
                    error = err.to_string(),
                    exchange = self.settings.exchange.as_str(),
                    routing_key = self.settings.routing_key.as_str(),
                    "failure to send message"
                );

                if err.kind() == ErrorKind::Transport {
                    guard.take();
                    if let Err(close_err) = channel.close().await {
                        warn!(error = close_err.to_string(), "error closing the publish channel");
                    }
                }

                Err(err)
            }
        }
    }

    /// Maps the envelope metadata and the send options onto AMQP properties.
    fn properties(&self, cx: &Context, envelope: &Envelope, options: SendOptions) -> BasicProperties {
        let timestamp = u64::try_from(envelope.timestamp.timestamp()).unwrap_or_default();
        let delivery_mode = if options.persistent {
            DELIVERY_MODE_PERSISTENT
        } else {
            DELIVERY_MODE_TRANSIENT
        };

        let mut properties = BasicProperties::default()
            .with_content_type(ShortString::from(self.codec.content_type()))
            .with_message_id(ShortString::from(envelope.message_id.as_str()))
            .with_app_id(ShortString::from(self.app_id.as_str()))
            .with_timestamp(timestamp)
            .with_delivery_mode(delivery_mode)
            .with_headers(FieldTable::from(otel::inject_headers(cx)));

        if let Some(message_type) = &envelope.message_type {
            properties = properties.with_type(ShortString::from(message_type.as_str()));
        }

        if let Some(correlation_id) = &envelope.correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.as_str()));
        }

        if let Some(ttl) = options.expiration {
            properties =
                properties.with_expiration(ShortString::from(ttl.as_millis().to_string()));
        }

        properties
    }

    /// Closes the publish channel, if one was opened.
    pub async fn close(&self) -> Result<(), AmqpError> {
        match self.channel.lock().await.take() {
            Some(channel) => channel.close().await,
            None => Ok(()),
        }
    }
}
