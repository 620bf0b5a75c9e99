// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

use crate::{errors::HandlerError, message::DeliveryContext};
use async_trait::async_trait;
use opentelemetry::Context;
use tokio_util::sync::CancellationToken;

/// Application code processing one message kind.
///
/// Returning an error negatively acknowledges the delivery; it is redelivered
/// once and then dead-lettered.
#[async_trait]
pub trait MessageHandler<M>: Send + Sync {
    async fn handle(
        &self,
        ctx: &Context,
        message: &M,
        delivery: &DeliveryContext,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;
}
