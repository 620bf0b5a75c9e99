// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Topology Provisioning
//!
//! The [`Provisioner`] declares the broker objects of one message kind: the
//! send exchange, the dead-letter exchange and queue, the primary queue and
//! the bindings between them. It runs once per registration during an
//! explicit startup phase and relies on the broker's declare semantics being
//! idempotent, so re-running it against existing topology is harmless.

use crate::{
    channel::{AmqpChannel, AmqpConnection},
    errors::AmqpError,
    message::MessageIdentity,
    settings::{MessageOptions, ReceiveSettings, SendSettings},
};
use opentelemetry::trace::get_active_span;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Declares the topology of registered message kinds.
pub struct Provisioner {
    connection: Arc<dyn AmqpConnection>,
    auto_provision: bool,
}

impl Provisioner {
    /// `auto_provision` is the global default, used when a message kind does
    /// not set its own flag.
    pub fn new(connection: Arc<dyn AmqpConnection>, auto_provision: bool) -> Provisioner {
        Provisioner {
            connection,
            auto_provision,
        }
    }

    /// Provisions the topology of one message kind on a dedicated channel.
    ///
    /// Does nothing when auto-provisioning resolves to false. The first
    /// failing declaration aborts the pass and is returned.
    pub async fn provision(
        &self,
        identity: &MessageIdentity,
        options: &MessageOptions,
        send: Option<&SendSettings>,
        receive: Option<&ReceiveSettings>,
        cancel: &CancellationToken,
    ) -> Result<(), AmqpError> {
        if !options.resolve_auto_provision(self.auto_provision) {
            debug!(message = identity.name(), "auto provisioning disabled, skipping");
            return Ok(());
        }

        if let Some(receive) = receive {
            receive.validate()?;
        }

        debug!(message = identity.name(), "provisioning topology...");

        let channel = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AmqpError::CancelledError),
            channel = self.connection.open_channel() => channel?,
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(AmqpError::CancelledError),
            result = install(channel.as_ref(), send, receive) => result,
        };

        if let Err(err) = channel.close().await {
            warn!(error = err.to_string(), "error closing the provisioning channel");
        }

        match &result {
            Ok(_) => debug!(message = identity.name(), "topology provisioned"),
            Err(err) => {
                error!(
                    error = err.to_string(),
                    message = identity.name(),
                    "failure to provision topology"
                );
                get_active_span(|span| span.record_error(err));
            }
        }

        result
    }
}

async fn install(
    channel: &dyn AmqpChannel,
    send: Option<&SendSettings>,
    receive: Option<&ReceiveSettings>,
) -> Result<(), AmqpError> {
    if let Some(send) = send.filter(|s| !s.exchange.is_empty()) {
        debug!(
            "creating exchange: {} ({})",
            send.exchange,
            send.kind.as_str()
        );
        channel.declare_exchange(&send.exchange_definition()).await?;
    }

    let Some(receive) = receive else {
        return Ok(());
    };

    if receive.dead_letter {
        debug!(
            "creating dead-letter exchange: {} and queue: {}",
            receive.dead_letter_exchange, receive.dead_letter_queue
        );
        channel
            .declare_exchange(&receive.dead_letter_exchange_definition())
            .await?;
        channel
            .declare_queue(&receive.dead_letter_queue_definition())
            .await?;
        channel.bind_queue(&receive.dead_letter_binding()).await?;
    }

    debug!("creating queue: {}", receive.queue_name);
    let declared = channel.declare_queue(&receive.queue_definition()).await?;
    debug!("queue: {} was created", declared);

    if !receive.exchange.is_empty() {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            receive.queue_name,
            receive.exchange,
            receive.binding_key()
        );
        channel.bind_queue(&receive.binding()).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{MockAmqpChannel, MockAmqpConnection},
        exchange::ExchangeKind,
        queue::{AMQP_HEADERS_DEAD_LETTER_EXCHANGE, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY},
    };
    use lapin::types::{AMQPValue, LongString, ShortString};
    use std::sync::Mutex;

    struct OrderCreated;

    fn identity() -> MessageIdentity {
        MessageIdentity::from_type::<OrderCreated>()
    }

    fn enabled() -> MessageOptions {
        MessageOptions {
            auto_provision: Some(true),
            ..MessageOptions::default()
        }
    }

    fn send_settings() -> SendSettings {
        SendSettings {
            exchange: "orders".to_owned(),
            kind: ExchangeKind::Topic,
            routing_key: "order-created".to_owned(),
            ..SendSettings::default()
        }
    }

    fn receive_settings() -> ReceiveSettings {
        ReceiveSettings {
            exchange: "orders".to_owned(),
            queue_name: "order-created".to_owned(),
            dead_letter: true,
            dead_letter_exchange: "orders.dlx".to_owned(),
            dead_letter_queue: "order-created.dlq".to_owned(),
            ..ReceiveSettings::default()
        }
    }

    fn recording_channel(log: Arc<Mutex<Vec<String>>>) -> MockAmqpChannel {
        let mut channel = MockAmqpChannel::new();

        let exchanges = log.clone();
        channel.expect_declare_exchange().returning(move |def| {
            exchanges
                .lock()
                .unwrap()
                .push(format!("exchange:{}:{}", def.name(), def.exchange_kind()));
            Ok(())
        });

        let queues = log.clone();
        channel.expect_declare_queue().returning(move |def| {
            queues
                .lock()
                .unwrap()
                .push(format!("queue:{}:{}", def.name(), def.arguments().len()));
            Ok(def.name().to_owned())
        });

        let bindings = log.clone();
        channel.expect_bind_queue().returning(move |binding| {
            bindings.lock().unwrap().push(format!(
                "bind:{}:{}:{}",
                binding.queue_name(),
                binding.exchange_name(),
                binding.key()
            ));
            Ok(())
        });

        channel.expect_close().times(1).returning(|| Ok(()));
        channel
    }

    fn connection_with(channel: MockAmqpChannel) -> Arc<dyn AmqpConnection> {
        let channel: Arc<dyn AmqpChannel> = Arc::new(channel);
        let mut conn = MockAmqpConnection::new();
        conn.expect_open_channel()
            .times(1)
            .return_once(move || Ok(channel));
        Arc::new(conn)
    }

    #[tokio::test]
    async fn should_not_touch_the_broker_when_disabled() {
        let provisioner = Provisioner::new(Arc::new(MockAmqpConnection::new()), false);

        let result = provisioner
            .provision(
                &identity(),
                &MessageOptions::default(),
                Some(&send_settings()),
                Some(&receive_settings()),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn should_let_message_flag_override_global_default() {
        let provisioner = Provisioner::new(Arc::new(MockAmqpConnection::new()), true);
        let options = MessageOptions {
            auto_provision: Some(false),
            ..MessageOptions::default()
        };

        let result = provisioner
            .provision(
                &identity(),
                &options,
                Some(&send_settings()),
                None,
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn should_declare_topology_in_order() {
        let log = Arc::new(Mutex::new(vec![]));
        let provisioner = Provisioner::new(connection_with(recording_channel(log.clone())), false);

        provisioner
            .provision(
                &identity(),
                &enabled(),
                Some(&send_settings()),
                Some(&receive_settings()),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "exchange:orders:topic",
                "exchange:orders.dlx:direct",
                "queue:order-created.dlq:0",
                "bind:order-created.dlq:orders.dlx:order-created.dlq",
                "queue:order-created:2",
                "bind:order-created:orders:order-created",
            ]
        );
    }

    #[tokio::test]
    async fn should_inject_dead_letter_arguments_into_primary_queue() {
        let mut channel = MockAmqpChannel::new();
        channel.expect_declare_exchange().returning(|_| Ok(()));
        channel.expect_bind_queue().returning(|_| Ok(()));
        channel
            .expect_declare_queue()
            .withf(|def| def.name() == "order-created.dlq")
            .times(1)
            .returning(|def| Ok(def.name().to_owned()));
        channel
            .expect_declare_queue()
            .withf(|def| {
                def.name() == "order-created"
                    && def.arguments().get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE))
                        == Some(&AMQPValue::LongString(LongString::from("orders.dlx")))
                    && def
                        .arguments()
                        .get(&ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY))
                        == Some(&AMQPValue::LongString(LongString::from(
                            "order-created.dlq",
                        )))
            })
            .times(1)
            .returning(|def| Ok(def.name().to_owned()));
        channel.expect_close().times(1).returning(|| Ok(()));

        let provisioner = Provisioner::new(connection_with(channel), true);
        let result = provisioner
            .provision(
                &identity(),
                &MessageOptions::default(),
                None,
                Some(&receive_settings()),
                &CancellationToken::new(),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn should_skip_binding_without_receive_exchange() {
        let log = Arc::new(Mutex::new(vec![]));
        let provisioner = Provisioner::new(connection_with(recording_channel(log.clone())), true);
        let receive = ReceiveSettings {
            queue_name: "order-created".to_owned(),
            ..ReceiveSettings::default()
        };

        provisioner
            .provision(
                &identity(),
                &MessageOptions::default(),
                Some(&SendSettings::default()),
                Some(&receive),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["queue:order-created:0"]);
    }

    #[tokio::test]
    async fn should_abort_on_first_declaration_failure_and_close_channel() {
        let mut channel = MockAmqpChannel::new();
        channel
            .expect_declare_exchange()
            .times(1)
            .returning(|def| Err(AmqpError::DeclareExchangeError(def.name().to_owned())));
        channel.expect_declare_queue().never();
        channel.expect_bind_queue().never();
        channel.expect_close().times(1).returning(|| Ok(()));

        let provisioner = Provisioner::new(connection_with(channel), true);
        let err = provisioner
            .provision(
                &identity(),
                &MessageOptions::default(),
                Some(&send_settings()),
                Some(&receive_settings()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert_eq!(err, AmqpError::DeclareExchangeError("orders".to_owned()));
    }

    #[tokio::test]
    async fn should_fail_fast_on_empty_queue_name() {
        let provisioner = Provisioner::new(Arc::new(MockAmqpConnection::new()), true);

        let err = provisioner
            .provision(
                &identity(),
                &MessageOptions::default(),
                None,
                Some(&ReceiveSettings::default()),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AmqpError::ConfigurationError(..)));
    }

    #[tokio::test]
    async fn should_stop_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let provisioner = Provisioner::new(Arc::new(MockAmqpConnection::new()), true);

        let err = provisioner
            .provision(
                &identity(),
                &MessageOptions::default(),
                Some(&send_settings()),
                None,
                &cancel,
            )
            .await
            .unwrap_err();

        assert_eq!(err, AmqpError::CancelledError);
    }

    #[tokio::test]
    async fn should_be_repeatable() {
        let mut conn = MockAmqpConnection::new();
        conn.expect_open_channel().times(2).returning(|| {
            let mut channel = MockAmqpChannel::new();
            channel.expect_declare_exchange().times(1).returning(|_| Ok(()));
            channel.expect_close().times(1).returning(|| Ok(()));
            let channel: Arc<dyn AmqpChannel> = Arc::new(channel);
            Ok(channel)
        });
        let provisioner = Provisioner::new(Arc::new(conn), true);
        let cancel = CancellationToken::new();

        for _ in 0..2 {
            provisioner
                .provision(
                    &identity(),
                    &MessageOptions::default(),
                    Some(&send_settings()),
                    None,
                    &cancel,
                )
                .await
                .unwrap();
        }
    }
}
