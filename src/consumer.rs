// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Processing
//!
//! Handles one delivery from reception to acknowledgment: deserialize the
//! payload, run every handler in registration order, then ack on success or
//! nack on any failure. A failed delivery is requeued once; when the broker
//! flags it as redelivered it is rejected without requeue, which routes it to
//! the dead-letter queue configured at provisioning time.

use crate::{
    channel::{AmqpChannel, Delivery},
    codec::Codec,
    errors::AmqpError,
    handler::MessageHandler,
    message::{DeliveryContext, Message, MessageIdentity},
    otel,
};
use lapin::options::{BasicAckOptions, BasicNackOptions};
use opentelemetry::{
    global::BoxedTracer,
    trace::{Status, TraceContextExt},
    Context,
};
use std::{borrow::Cow, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// What happened to a delivery once processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Acknowledged,
    /// Negatively acknowledged and returned to the queue.
    Requeued,
    /// Negatively acknowledged without requeue, dead-lettered when configured.
    Rejected,
}

/// Consumes one delivery.
///
/// Only a failure to ack or nack is returned as an error: it means the
/// channel is broken and the listener cannot continue.
pub(crate) async fn consume<M: Message>(
    tracer: &BoxedTracer,
    identity: &MessageIdentity,
    codec: &dyn Codec<M>,
    handlers: &[Arc<dyn MessageHandler<M>>],
    channel: &dyn AmqpChannel,
    delivery: Delivery,
    cancel: &CancellationToken,
) -> Result<DeliveryOutcome, AmqpError> {
    let delivery = DeliveryContext::from(delivery);

    let (ctx, span) = otel::new_span(&delivery.properties, tracer, identity.name());
    let cx = ctx.with_span(span);

    debug!(
        "received: {} - exchange: {}",
        identity.name(),
        delivery.exchange
    );

    let outcome = match dispatch(tracer, &cx, identity, codec, handlers, &delivery, cancel).await {
        Ok(()) => {
            debug!("message successfully processed");
            match channel
                .ack(delivery.delivery_tag, BasicAckOptions { multiple: false })
                .await
            {
                Ok(_) => {
                    cx.span().set_status(Status::Ok);
                    Ok(DeliveryOutcome::Acknowledged)
                }
                Err(err) => {
                    error!("error whiling ack msg");
                    Err(err)
                }
            }
        }
        Err(err) => {
            let requeue = !delivery.redelivered;
            warn!(
                error = err.to_string(),
                message = identity.name(),
                requeue,
                "error whiling handling msg"
            );
            cx.span().record_error(&err);

            match channel
                .nack(
                    delivery.delivery_tag,
                    BasicNackOptions {
                        multiple: false,
                        requeue,
                    },
                )
                .await
            {
                Ok(_) if requeue => Ok(DeliveryOutcome::Requeued),
                Ok(_) => Ok(DeliveryOutcome::Rejected),
                Err(err) => {
                    error!("error whiling nack msg");
                    Err(err)
                }
            }
        }
    };

    let span = cx.span();
    match &outcome {
        Ok(DeliveryOutcome::Acknowledged) => {}
        Ok(_) => span.set_status(Status::Error {
            description: Cow::from("message was not processed"),
        }),
        Err(err) => otel::record_failure(&span, err, "error to settle msg"),
    }
    span.end();

    outcome
}

/// Deserializes the payload and runs the handlers one after the other.
///
/// The first failing handler stops the fan-out.
async fn dispatch<M: Message>(
    tracer: &BoxedTracer,
    cx: &Context,
    identity: &MessageIdentity,
    codec: &dyn Codec<M>,
    handlers: &[Arc<dyn MessageHandler<M>>],
    delivery: &DeliveryContext,
    cancel: &CancellationToken,
) -> Result<(), AmqpError> {
    let message = codec.deserialize(&delivery.payload)?;

    if handlers.is_empty() {
        return Err(AmqpError::HandlerError(format!(
            "no handler registered for `{identity}`"
        )));
    }

    for (index, handler) in handlers.iter().enumerate() {
        let span = otel::handler_span(tracer, cx, identity.name());
        let hcx = cx.with_span(span);

        let result = handler.handle(&hcx, &message, delivery, cancel).await;

        let span = hcx.span();
        if let Err(err) = &result {
            otel::record_failure(&span, err, "handler failure");
        }
        span.end();

        if let Err(err) = result {
            debug!(handler = index, error = err.to_string(), "handler failed");
            return Err(err.into());
        }
    }

    Ok(())
}
