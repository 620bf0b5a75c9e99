// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! `AmqpError` names the operation that failed; `ErrorKind` groups those
//! operations into the categories the delivery pipeline reacts to. Only
//! handler failures are recovered in place (nack / dead-letter), every other
//! kind surfaces to the caller or escalates to the listener supervisor.

use std::error::Error as StdError;
use thiserror::Error;

/// Represents errors that can occur while provisioning, sending or receiving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    #[error("internal error")]
    InternalError,

    #[error("failure to connect")]
    ConnectionError,

    #[error("failure to create a channel")]
    ChannelError,

    /// A required setting is missing or two settings contradict each other
    #[error("invalid configuration for `{0}`: {1}")]
    ConfigurationError(String, String),

    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// The passive queue check found no queue with the given name
    #[error("queue `{0}` does not exist, has the topology been provisioned?")]
    QueueNotFoundError(String),

    #[error("failure to binding exchange `{0}` to queue `{1}`")]
    BindingExchangeToQueueError(String, String),

    #[error("failure to declare consumer `{0}`")]
    BindingConsumerError(String),

    #[error("failure to publish to exchange `{0}`")]
    PublishingError(String),

    /// A mandatory publish was returned by the broker because no queue was bound
    #[error("message to exchange `{exchange}` with key `{routing_key}` was unroutable")]
    UnroutableMessageError {
        exchange: String,
        routing_key: String,
    },

    #[error("failure to serialize payload: {0}")]
    SerializePayloadError(String),

    #[error("failure to parse payload: {0}")]
    ParsePayloadError(String),

    #[error("failure to ack message")]
    AckMessageError,

    #[error("failure to nack message")]
    NackMessageError,

    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// An application handler failed while processing a delivery
    #[error("handler failure: {0}")]
    HandlerError(String),

    /// A listener stopped without being asked to
    #[error("listener for `{0}` faulted: {1}")]
    ListenerFaultError(String, String),

    /// The message type was never registered
    #[error("message type `{0}` is not registered")]
    UnregisteredMessageError(String),

    /// The operation was interrupted by the cancellation signal
    #[error("operation cancelled")]
    CancelledError,
}

/// Failure categories driving the propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Format,
    Transport,
    NotFound,
    Unroutable,
    Handler,
    Cancelled,
}

impl AmqpError {
    /// Classifies the error so callers can pick a recovery strategy
    /// without matching on every variant.
    ///
    /// # Returns
    /// * [`ErrorKind::Transport`] for broker and connection failures, which
    ///   drop the channel that produced them
    /// * [`ErrorKind::Unroutable`] for mandatory publishes that reached no queue
    /// * [`ErrorKind::Cancelled`] when a cancellation token fired first
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::ConfigurationError(..) | AmqpError::UnregisteredMessageError(_) => {
                ErrorKind::Configuration
            }
            AmqpError::SerializePayloadError(_) | AmqpError::ParsePayloadError(_) => {
                ErrorKind::Format
            }
            AmqpError::QueueNotFoundError(_) => ErrorKind::NotFound,
            AmqpError::UnroutableMessageError { .. } => ErrorKind::Unroutable,
            AmqpError::HandlerError(_) => ErrorKind::Handler,
            AmqpError::CancelledError => ErrorKind::Cancelled,
            _ => ErrorKind::Transport,
        }
    }

    pub(crate) fn configuration(name: &str, reason: impl Into<String>) -> Self {
        AmqpError::ConfigurationError(name.to_owned(), reason.into())
    }
}

/// Error returned by application handlers.
///
/// Any handler failure leads to a negative acknowledgment of the delivery; it
/// is never propagated to the listener supervisor.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        HandlerError {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an arbitrary error, keeping it as the source.
    pub fn from_source<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        HandlerError {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<AmqpError> for HandlerError {
    fn from(err: AmqpError) -> Self {
        HandlerError::from_source(err)
    }
}

impl From<HandlerError> for AmqpError {
    fn from(err: HandlerError) -> Self {
        AmqpError::HandlerError(err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_classify_errors() {
        assert_eq!(
            AmqpError::configuration("orders", "empty queue").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            AmqpError::ParsePayloadError("eof".into()).kind(),
            ErrorKind::Format
        );
        assert_eq!(
            AmqpError::QueueNotFoundError("orders".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            AmqpError::DeclareQueueError("orders".into()).kind(),
            ErrorKind::Transport
        );
        assert_eq!(AmqpError::AckMessageError.kind(), ErrorKind::Transport);
        assert_eq!(
            AmqpError::HandlerError("boom".into()).kind(),
            ErrorKind::Handler
        );
        assert_eq!(
            AmqpError::UnroutableMessageError {
                exchange: "orders".into(),
                routing_key: "order-created".into(),
            }
            .kind(),
            ErrorKind::Unroutable
        );
        assert_eq!(AmqpError::CancelledError.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn should_word_missing_queue_distinctly() {
        let err = AmqpError::QueueNotFoundError("order-created".into());
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn should_keep_handler_error_source() {
        let err = HandlerError::from_source(AmqpError::ParsePayloadError("eof".into()));
        assert!(err.source().is_some());
        assert_eq!(err.message(), "failure to parse payload: eof");

        let amqp: AmqpError = err.into();
        assert_eq!(amqp.kind(), ErrorKind::Handler);
    }
}
