// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Listener Supervision
//!
//! Runs the N listeners of one message kind and turns any premature stop into
//! a fatal fault. Faulted listeners are never restarted: a listener that ends
//! without being cancelled means the channel or the topology is broken, so
//! the fault is reported and handed back to the host.

use crate::{errors::AmqpError, listener::Listen, message::MessageIdentity};
use opentelemetry::trace::get_active_span;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type ListenerFactory = Arc<dyn Fn(usize) -> Box<dyn Listen> + Send + Sync>;

/// Supervises the listeners of one message kind.
pub struct ListenerSupervisor {
    identity: MessageIdentity,
    concurrency: usize,
    factory: ListenerFactory,
}

impl ListenerSupervisor {
    /// `factory` builds the listener for a given index; it is called once per
    /// listener, `concurrency` times in total.
    pub fn new(
        identity: MessageIdentity,
        concurrency: usize,
        factory: impl Fn(usize) -> Box<dyn Listen> + Send + Sync + 'static,
    ) -> ListenerSupervisor {
        ListenerSupervisor {
            identity,
            concurrency: concurrency.max(1),
            factory: Arc::new(factory),
        }
    }

    pub fn identity(&self) -> MessageIdentity {
        self.identity
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Runs every listener until `cancel` fires.
    ///
    /// The first listener to stop without cancellation faults the whole
    /// supervisor: its siblings are cancelled and awaited, then the fault is
    /// returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AmqpError> {
        let listeners = cancel.child_token();
        let mut tasks = JoinSet::new();

        for index in 0..self.concurrency {
            let listener = (self.factory)(index);
            let token = listeners.clone();
            tasks.spawn(async move { (index, listener.listen(token).await) });
        }

        debug!(
            message = self.identity.name(),
            concurrency = self.concurrency,
            "listeners started"
        );

        let mut fault: Option<AmqpError> = None;

        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(finished) => finished,
                Err(err) => (usize::MAX, Err(AmqpError::ConsumerError(err.to_string()))),
            };

            if fault.is_some() {
                continue;
            }

            let reason = match result {
                Ok(()) if cancel.is_cancelled() => {
                    debug!(message = self.identity.name(), index, "listener stopped");
                    continue;
                }
                Err(err) if cancel.is_cancelled() => {
                    warn!(
                        error = err.to_string(),
                        message = self.identity.name(),
                        index,
                        "listener stopped with an error during shutdown"
                    );
                    continue;
                }
                Ok(()) => "listener stopped without cancellation".to_owned(),
                Err(err) => err.to_string(),
            };

            let err = AmqpError::ListenerFaultError(self.identity.name().to_owned(), reason);
            error!(
                severity = "critical",
                error = err.to_string(),
                message = self.identity.name(),
                index,
                "listener faulted"
            );
            get_active_span(|span| span.record_error(&err));

            listeners.cancel();
            fault = Some(err);
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
