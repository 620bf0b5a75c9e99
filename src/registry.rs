// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Registration
//!
//! Applications declare the message kinds they send and receive on a
//! [`WarrenBuilder`], optionally overriding the conventional topology per
//! kind with a [`MessageBuilder`]. Building yields a [`Warren`], the runtime
//! used to provision topology, obtain senders and run the listeners.
//!
//! ```ignore
//! let warren = WarrenBuilder::new(GlobalSettings::from(&cfg))
//!     .with_conventional_routing()
//!     .add_message::<InvoiceIssued>(|m| m)
//!     .add_handler::<OrderCreated>(OrderCreatedHandler, |m| {
//!         m.with_dead_letter(true).with_concurrency(4)
//!     })
//!     .build(new_amqp_connection(&cfg).await?);
//!
//! warren.provision(&cancel).await?;
//! warren.run(cancel).await?;
//! ```

use crate::{
    channel::AmqpConnection,
    codec::{Codec, JsonCodec},
    convention::{DefaultRoutingConvention, RoutingConvention},
    errors::AmqpError,
    exchange::ExchangeKind,
    handler::MessageHandler,
    listener::{Listen, Listener},
    message::{Message, MessageIdentity},
    publisher::MessageSender,
    settings::{
        GlobalSettings, JsonOptions, MessageOptions, OptionsResolver, ReceiveSettings,
        SendSettings,
    },
    supervisor::ListenerSupervisor,
    topology::Provisioner,
};
use async_trait::async_trait;
use std::{
    any::{Any, TypeId},
    collections::HashMap,
    sync::{Arc, OnceLock},
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Per-message configuration.
///
/// The `with_*` methods are final overrides: they win over both the routing
/// convention and the `configure_*` callbacks, whatever the order of the
/// calls.
pub struct MessageBuilder<M: Message> {
    handlers: Vec<Arc<dyn MessageHandler<M>>>,
    codec: Option<Arc<dyn Codec<M>>>,
    send: OptionsResolver<SendSettings>,
    receive: OptionsResolver<ReceiveSettings>,
    options: OptionsResolver<MessageOptions>,
}

impl<M: Message> MessageBuilder<M> {
    fn new() -> Self {
        MessageBuilder {
            handlers: Vec::new(),
            codec: None,
            send: OptionsResolver::new(),
            receive: OptionsResolver::new(),
            options: OptionsResolver::new(),
        }
    }

    fn override_send(mut self, f: impl Fn(&mut SendSettings) + Send + Sync + 'static) -> Self {
        self.send = std::mem::take(&mut self.send).with_final_overrides(f);
        self
    }

    fn override_receive(
        mut self,
        f: impl Fn(&mut ReceiveSettings) + Send + Sync + 'static,
    ) -> Self {
        self.receive = std::mem::take(&mut self.receive).with_final_overrides(f);
        self
    }

    fn override_options(
        mut self,
        f: impl Fn(&mut MessageOptions) + Send + Sync + 'static,
    ) -> Self {
        self.options = std::mem::take(&mut self.options).with_final_overrides(f);
        self
    }

    /// Consumes from `queue`. When sending through the default exchange, the
    /// send routing key follows the queue.
    pub fn with_queue(self, queue: &str) -> Self {
        let (send_queue, receive_queue) = (queue.to_owned(), queue.to_owned());
        self.override_send(move |s| {
            if s.exchange.is_empty() {
                s.routing_key = send_queue.clone();
            }
        })
        .override_receive(move |r| r.queue_name = receive_queue.clone())
    }

    /// Publishes to, and binds the queue on, `exchange` of the given kind.
    ///
    /// # Parameters
    /// * `exchange` - Exchange name shared by both sides
    /// * `kind` - Exchange type declared when provisioning the send side
    pub fn with_exchange(self, exchange: &str, kind: ExchangeKind) -> Self {
        let (send_exchange, receive_exchange) = (exchange.to_owned(), exchange.to_owned());
        self.override_send(move |s| {
            s.exchange = send_exchange.clone();
            s.kind = kind.clone();
        })
        .override_receive(move |r| r.exchange = receive_exchange.clone())
    }

    /// Routing key used to publish and to bind the queue.
    pub fn with_routing_key(self, routing_key: &str) -> Self {
        let (send_key, receive_key) = (routing_key.to_owned(), routing_key.to_owned());
        self.override_send(move |s| s.routing_key = send_key.clone())
            .override_receive(move |r| r.routing_key = Some(receive_key.clone()))
    }

    /// Makes the broker return messages that reach no queue, failing the
    /// send as unroutable.
    pub fn with_mandatory(self, mandatory: bool) -> Self {
        self.override_send(move |s| s.mandatory = mandatory)
    }

    /// Toggles dead-lettering with the conventional exchange and key.
    pub fn with_dead_letter(self, enabled: bool) -> Self {
        self.override_receive(move |r| r.dead_letter = enabled)
    }

    /// Enables dead-lettering through `exchange`.
    pub fn with_dead_letter_exchange(self, exchange: &str, kind: ExchangeKind) -> Self {
        let exchange = exchange.to_owned();
        self.override_receive(move |r| {
            r.dead_letter = true;
            r.dead_letter_exchange = exchange.clone();
            r.dead_letter_exchange_kind = Some(kind.clone());
        })
    }

    /// Enables dead-lettering with `routing_key`.
    pub fn with_dead_letter_routing_key(self, routing_key: &str) -> Self {
        let routing_key = routing_key.to_owned();
        self.override_receive(move |r| {
            r.dead_letter = true;
            r.dead_letter_routing_key = Some(routing_key.clone());
        })
    }

    /// Number of listeners consuming the queue side by side.
    pub fn with_concurrency(self, concurrency: usize) -> Self {
        self.override_options(move |o| o.concurrency = concurrency)
    }

    /// Overrides the global auto-provision default; `None` falls back to it.
    pub fn with_auto_provisioning(self, auto_provision: Option<bool>) -> Self {
        self.override_options(move |o| o.auto_provision = auto_provision)
    }

    /// Replaces the JSON codec built from the global options.
    pub fn with_codec(mut self, codec: impl Codec<M> + 'static) -> Self {
        self.codec = Some(Arc::new(codec));
        self
    }

    /// Queues a raw override of the send settings. Overrides apply in the
    /// order they were added, after the routing convention.
    pub fn configure_send(mut self, f: impl Fn(&mut SendSettings) + Send + Sync + 'static) -> Self {
        self.send = std::mem::take(&mut self.send).with_overrides(f);
        self
    }

    pub fn configure_receive(
        mut self,
        f: impl Fn(&mut ReceiveSettings) + Send + Sync + 'static,
    ) -> Self {
        self.receive = std::mem::take(&mut self.receive).with_overrides(f);
        self
    }

    pub fn configure_options(
        mut self,
        f: impl Fn(&mut MessageOptions) + Send + Sync + 'static,
    ) -> Self {
        self.options = std::mem::take(&mut self.options).with_overrides(f);
        self
    }
}

/// A message kind waiting for [`WarrenBuilder::build`].
trait PendingMessage: Send {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn finish(
        self: Box<Self>,
        convention: Option<&Arc<dyn RoutingConvention>>,
        global: &GlobalSettings,
    ) -> Box<dyn Registration>;
}

impl<M: Message> PendingMessage for MessageBuilder<M> {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn finish(
        self: Box<Self>,
        convention: Option<&Arc<dyn RoutingConvention>>,
        global: &GlobalSettings,
    ) -> Box<dyn Registration> {
        let identity = MessageIdentity::of::<M>();
        let MessageBuilder {
            handlers,
            codec,
            mut send,
            mut receive,
            options,
        } = *self;

        if let Some(convention) = convention {
            let plan = Arc::new(convention.plan(&identity));
            let receive_plan = plan.clone();
            send = send.with_defaults(move |s| s.apply_plan(&plan));
            receive = receive.with_defaults(move |r| r.apply_plan(&receive_plan));
        }

        let codec: Arc<dyn Codec<M>> = match codec {
            Some(codec) => codec,
            None => Arc::new(JsonCodec::<M>::new(global.json)),
        };

        Box::new(MessageRegistration {
            identity,
            receives: !handlers.is_empty(),
            handlers: Arc::new(handlers),
            codec,
            send,
            receive,
            options,
            app_id: global.application_name.clone(),
            sender: OnceLock::new(),
        })
    }
}

/// A registered message kind, erased over its type.
#[async_trait]
trait Registration: Send + Sync {
    fn identity(&self) -> MessageIdentity;

    fn send_settings(&self) -> Arc<SendSettings>;

    fn receive_settings(&self) -> Option<Arc<ReceiveSettings>>;

    fn options(&self) -> Arc<MessageOptions>;

    async fn provision(
        &self,
        provisioner: &Provisioner,
        cancel: &CancellationToken,
    ) -> Result<(), AmqpError>;

    fn supervisor(&self, connection: Arc<dyn AmqpConnection>) -> Option<ListenerSupervisor>;

    fn as_any(&self) -> &dyn Any;
}

struct MessageRegistration<M: Message> {
    identity: MessageIdentity,
    receives: bool,
    handlers: Arc<Vec<Arc<dyn MessageHandler<M>>>>,
    codec: Arc<dyn Codec<M>>,
    send: OptionsResolver<SendSettings>,
    receive: OptionsResolver<ReceiveSettings>,
    options: OptionsResolver<MessageOptions>,
    app_id: String,
    sender: OnceLock<Arc<MessageSender<M>>>,
}

impl<M: Message> MessageRegistration<M> {
    fn sender(&self, connection: &Arc<dyn AmqpConnection>) -> Arc<MessageSender<M>> {
        self.sender
            .get_or_init(|| {
                Arc::new(MessageSender::new(
                    connection.clone(),
                    self.send.resolve(),
                    self.codec.clone(),
                    &self.app_id,
                ))
            })
            .clone()
    }
}

#[async_trait]
impl<M: Message> Registration for MessageRegistration<M> {
    fn identity(&self) -> MessageIdentity {
        self.identity
    }

    fn send_settings(&self) -> Arc<SendSettings> {
        self.send.resolve()
    }

    fn receive_settings(&self) -> Option<Arc<ReceiveSettings>> {
        self.receives.then(|| self.receive.resolve())
    }

    fn options(&self) -> Arc<MessageOptions> {
        self.options.resolve()
    }

    async fn provision(
        &self,
        provisioner: &Provisioner,
        cancel: &CancellationToken,
    ) -> Result<(), AmqpError> {
        let send = self.send_settings();
        let receive = self.receive_settings();

        provisioner
            .provision(
                &self.identity,
                &self.options(),
                Some(&send),
                receive.as_deref(),
                cancel,
            )
            .await
    }

    fn supervisor(&self, connection: Arc<dyn AmqpConnection>) -> Option<ListenerSupervisor> {
        let settings = self.receive_settings()?;
        let codec = self.codec.clone();
        let handlers = self.handlers.clone();

        Some(ListenerSupervisor::new(
            self.identity,
            self.options().concurrency,
            move |index| -> Box<dyn Listen> {
                Box::new(Listener::new(
                    connection.clone(),
                    settings.clone(),
                    codec.clone(),
                    handlers.clone(),
                    index,
                ))
            },
        ))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Collects message registrations.
pub struct WarrenBuilder {
    global: GlobalSettings,
    convention: Option<Arc<dyn RoutingConvention>>,
    messages: Vec<(TypeId, Box<dyn PendingMessage>)>,
}

impl WarrenBuilder {
    pub fn new(global: GlobalSettings) -> WarrenBuilder {
        WarrenBuilder {
            global,
            convention: None,
            messages: Vec::new(),
        }
    }

    /// Derives topology names with the [`DefaultRoutingConvention`], seeded
    /// with the application name.
    pub fn with_conventional_routing(self) -> Self {
        let convention = DefaultRoutingConvention::new(&self.global.application_name);
        self.with_routing_convention(convention)
    }

    pub fn with_routing_convention(mut self, convention: impl RoutingConvention + 'static) -> Self {
        self.convention = Some(Arc::new(convention));
        self
    }

    pub fn with_auto_provisioning(mut self, enabled: bool) -> Self {
        self.global.auto_provision = enabled;
        self
    }

    pub fn with_json_options(mut self, options: JsonOptions) -> Self {
        self.global.json = options;
        self
    }

    /// Registers `M` for sending. Registering the same kind again extends its
    /// configuration.
    pub fn add_message<M: Message>(
        self,
        configure: impl FnOnce(MessageBuilder<M>) -> MessageBuilder<M>,
    ) -> Self {
        self.configure_message(configure)
    }

    /// Registers `M` for sending and receiving with `handler`. Handlers of the
    /// same kind run in registration order.
    pub fn add_handler<M: Message>(
        self,
        handler: impl MessageHandler<M> + 'static,
        configure: impl FnOnce(MessageBuilder<M>) -> MessageBuilder<M>,
    ) -> Self {
        let handler: Arc<dyn MessageHandler<M>> = Arc::new(handler);
        self.configure_message(move |mut builder: MessageBuilder<M>| {
            builder.handlers.push(handler);
            configure(builder)
        })
    }

    fn configure_message<M: Message>(
        mut self,
        configure: impl FnOnce(MessageBuilder<M>) -> MessageBuilder<M>,
    ) -> Self {
        let type_id = TypeId::of::<M>();

        match self.messages.iter().position(|(id, _)| *id == type_id) {
            Some(i) => {
                if let Some(builder) = self.messages[i]
                    .1
                    .as_any_mut()
                    .downcast_mut::<MessageBuilder<M>>()
                {
                    let current = std::mem::replace(builder, MessageBuilder::new());
                    *builder = configure(current);
                }
            }
            None => self
                .messages
                .push((type_id, Box::new(configure(MessageBuilder::new())))),
        }

        self
    }

    /// Resolves every registration against `connection`.
    pub fn build(self, connection: Arc<dyn AmqpConnection>) -> Warren {
        let convention = self.convention.as_ref();
        let mut index = HashMap::new();
        let mut registrations = Vec::with_capacity(self.messages.len());

        for (type_id, pending) in self.messages {
            index.insert(type_id, registrations.len());
            registrations.push(pending.finish(convention, &self.global));
        }

        Warren {
            connection,
            global: self.global,
            registrations,
            index,
        }
    }
}

/// Runtime over the registered message kinds.
pub struct Warren {
    connection: Arc<dyn AmqpConnection>,
    global: GlobalSettings,
    registrations: Vec<Box<dyn Registration>>,
    index: HashMap<TypeId, usize>,
}

impl Warren {
    pub fn global(&self) -> &GlobalSettings {
        &self.global
    }

    /// Registered message kinds, in registration order.
    pub fn identities(&self) -> Vec<MessageIdentity> {
        self.registrations.iter().map(|r| r.identity()).collect()
    }

    fn registration<M: Message>(&self) -> Result<&dyn Registration, AmqpError> {
        self.index
            .get(&TypeId::of::<M>())
            .and_then(|i| self.registrations.get(*i))
            .map(|r| r.as_ref())
            .ok_or_else(|| AmqpError::UnregisteredMessageError(M::name().to_owned()))
    }

    /// Resolved send settings of `M`.
    ///
    /// # Returns
    /// [`AmqpError::UnregisteredMessageError`] when `M` was never added.
    pub fn send_settings<M: Message>(&self) -> Result<Arc<SendSettings>, AmqpError> {
        Ok(self.registration::<M>()?.send_settings())
    }

    /// Receive settings of `M`, `None` when it has no handler.
    pub fn receive_settings<M: Message>(&self) -> Result<Option<Arc<ReceiveSettings>>, AmqpError> {
        Ok(self.registration::<M>()?.receive_settings())
    }

    /// Concurrency and provisioning options of `M`.
    pub fn options<M: Message>(&self) -> Result<Arc<MessageOptions>, AmqpError> {
        Ok(self.registration::<M>()?.options())
    }

    /// The sender of `M`, created on first use.
    pub fn sender<M: Message>(&self) -> Result<Arc<MessageSender<M>>, AmqpError> {
        let registration = self
            .registration::<M>()?
            .as_any()
            .downcast_ref::<MessageRegistration<M>>()
            .ok_or(AmqpError::InternalError)?;

        Ok(registration.sender(&self.connection))
    }

    fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.connection.clone(), self.global.auto_provision)
    }

    /// Provisions every registration, stopping at the first failure.
    pub async fn provision(&self, cancel: &CancellationToken) -> Result<(), AmqpError> {
        let provisioner = self.provisioner();

        for registration in &self.registrations {
            registration.provision(&provisioner, cancel).await?;
        }

        Ok(())
    }

    /// Provisions every registration independently and reports each result.
    pub async fn provision_each(
        &self,
        cancel: &CancellationToken,
    ) -> Vec<(MessageIdentity, Result<(), AmqpError>)> {
        let provisioner = self.provisioner();
        let mut results = Vec::with_capacity(self.registrations.len());

        for registration in &self.registrations {
            let result = registration.provision(&provisioner, cancel).await;
            results.push((registration.identity(), result));
        }

        results
    }

    /// Runs the listeners of every receiving registration until `cancel`
    /// fires. The first supervisor fault stops the others and is returned.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), AmqpError> {
        let supervisors = self
            .registrations
            .iter()
            .filter_map(|r| r.supervisor(self.connection.clone()))
            .collect::<Vec<_>>();

        if supervisors.is_empty() {
            debug!("no handler registered, waiting for cancellation");
            cancel.cancelled().await;
            return Ok(());
        }

        let running = cancel.child_token();
        let mut tasks = JoinSet::new();

        for supervisor in supervisors {
            let token = running.clone();
            tasks.spawn(async move { supervisor.run(token).await });
        }

        let mut fault: Option<AmqpError> = None;

        while let Some(joined) = tasks.join_next().await {
            let result = joined.unwrap_or_else(|err| Err(AmqpError::ConsumerError(err.to_string())));

            if let Err(err) = result {
                if fault.is_none() {
                    error!(error = err.to_string(), "stopping every listener");
                    running.cancel();
                    fault = Some(err);
                }
            }
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{AmqpChannel, MockAmqpChannel, MockAmqpConnection},
        errors::HandlerError,
        message::DeliveryContext,
    };
    use opentelemetry::Context;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct OrderCreated {
        id: u64,
    }

    impl Message for OrderCreated {}

    #[derive(Debug, Serialize, Deserialize)]
    struct InvoiceIssued {
        number: String,
    }

    impl Message for InvoiceIssued {}

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler<OrderCreated> for NoopHandler {
        async fn handle(
            &self,
            _ctx: &Context,
            _message: &OrderCreated,
            _delivery: &DeliveryContext,
            _cancel: &CancellationToken,
        ) -> Result<(), HandlerError> {
            Ok(())
        }
    }

    fn global() -> GlobalSettings {
        GlobalSettings::new("BillingService")
    }

    fn idle_connection() -> Arc<dyn AmqpConnection> {
        Arc::new(MockAmqpConnection::new())
    }

    #[test]
    fn should_derive_settings_from_the_convention() {
        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .add_handler::<OrderCreated>(NoopHandler, |m| m)
            .build(idle_connection());

        let send = warren.send_settings::<OrderCreated>().unwrap();
        let receive = warren.receive_settings::<OrderCreated>().unwrap().unwrap();

        assert_eq!(send.exchange, "billing-service");
        assert_eq!(send.routing_key, "order-created");
        assert_eq!(receive.queue_name, "order-created");
        assert_eq!(receive.binding_key(), "order-created");
        assert!(!receive.dead_letter);
    }

    #[test]
    fn should_let_final_overrides_win_over_configure_callbacks() {
        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .add_handler::<OrderCreated>(NoopHandler, |m| {
                m.with_queue("from-final")
                    .configure_receive(|r| r.queue_name = "from-configure".to_owned())
            })
            .build(idle_connection());

        let receive = warren.receive_settings::<OrderCreated>().unwrap().unwrap();
        assert_eq!(receive.queue_name, "from-final");
    }

    #[test]
    fn should_route_to_queue_through_default_exchange() {
        let warren = WarrenBuilder::new(global())
            .add_message::<OrderCreated>(|m| m.with_queue("orders"))
            .build(idle_connection());

        let send = warren.send_settings::<OrderCreated>().unwrap();
        assert!(send.exchange.is_empty());
        assert_eq!(send.routing_key, "orders");
        assert!(warren.receive_settings::<OrderCreated>().unwrap().is_none());
    }

    #[test]
    fn should_enable_dead_letter_from_overrides() {
        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .add_handler::<OrderCreated>(NoopHandler, |m| {
                m.with_dead_letter_exchange("billing.errors", ExchangeKind::Fanout)
            })
            .build(idle_connection());

        let receive = warren.receive_settings::<OrderCreated>().unwrap().unwrap();
        assert!(receive.dead_letter);
        assert_eq!(receive.dead_letter_exchange, "billing.errors");
        assert_eq!(receive.dead_letter_exchange_kind, Some(ExchangeKind::Fanout));
        assert_eq!(receive.dead_letter_queue, "order-created.dlq");
        assert!(receive.validate().is_ok());
    }

    #[test]
    fn should_merge_repeated_registrations() {
        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .add_message::<OrderCreated>(|m| m.with_concurrency(4))
            .add_handler::<OrderCreated>(NoopHandler, |m| m)
            .add_handler::<OrderCreated>(NoopHandler, |m| m.with_auto_provisioning(Some(true)))
            .add_message::<InvoiceIssued>(|m| m)
            .build(idle_connection());

        assert_eq!(warren.identities().len(), 2);

        let options = warren.options::<OrderCreated>().unwrap();
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.auto_provision, Some(true));

        let registration = warren
            .registration::<OrderCreated>()
            .unwrap()
            .as_any()
            .downcast_ref::<MessageRegistration<OrderCreated>>()
            .unwrap();
        assert_eq!(registration.handlers.len(), 2);
    }

    #[test]
    fn should_cache_senders_per_type() {
        let warren = WarrenBuilder::new(global())
            .add_message::<OrderCreated>(|m| m)
            .build(idle_connection());

        let first = warren.sender::<OrderCreated>().unwrap();
        let second = warren.sender::<OrderCreated>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn should_reject_unregistered_types() {
        let warren = WarrenBuilder::new(global()).build(idle_connection());

        let err = warren.sender::<InvoiceIssued>().err().unwrap();
        assert_eq!(
            err,
            AmqpError::UnregisteredMessageError("InvoiceIssued".to_owned())
        );
    }

    #[tokio::test]
    async fn should_skip_provisioning_when_disabled() {
        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .add_handler::<OrderCreated>(NoopHandler, |m| m)
            .add_message::<InvoiceIssued>(|m| m)
            .build(idle_connection());

        assert!(warren.provision(&CancellationToken::new()).await.is_ok());
    }

    fn flaky_connection(opens: usize) -> Arc<dyn AmqpConnection> {
        let mut conn = MockAmqpConnection::new();
        let mut calls = 0;
        conn.expect_open_channel().times(opens).returning(move || {
            calls += 1;
            if calls == 1 {
                return Err(AmqpError::ChannelError);
            }

            let mut channel = MockAmqpChannel::new();
            channel.expect_declare_exchange().returning(|_| Ok(()));
            channel.expect_close().returning(|| Ok(()));
            let channel: Arc<dyn AmqpChannel> = Arc::new(channel);
            Ok(channel)
        });
        Arc::new(conn)
    }

    #[tokio::test]
    async fn should_abort_provisioning_on_first_failure() {
        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .with_auto_provisioning(true)
            .add_message::<OrderCreated>(|m| m)
            .add_message::<InvoiceIssued>(|m| m)
            .build(flaky_connection(1));

        let err = warren.provision(&CancellationToken::new()).await.unwrap_err();
        assert_eq!(err, AmqpError::ChannelError);
    }

    #[tokio::test]
    async fn should_report_provisioning_result_per_identity() {
        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .with_auto_provisioning(true)
            .add_message::<OrderCreated>(|m| m)
            .add_message::<InvoiceIssued>(|m| m)
            .build(flaky_connection(2));

        let results = warren.provision_each(&CancellationToken::new()).await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.name(), "OrderCreated");
        assert!(results[0].1.is_err());
        assert_eq!(results[1].0.name(), "InvoiceIssued");
        assert!(results[1].1.is_ok());
    }

    #[tokio::test]
    async fn should_wait_for_cancellation_without_handlers() {
        let warren = WarrenBuilder::new(global())
            .add_message::<OrderCreated>(|m| m)
            .build(idle_connection());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(warren.run(cancel).await.is_ok());
    }

    #[tokio::test]
    async fn should_fault_when_queue_was_never_provisioned() {
        let mut conn = MockAmqpConnection::new();
        conn.expect_open_channel().times(2).returning(|| {
            let mut channel = MockAmqpChannel::new();
            channel
                .expect_declare_queue_passive()
                .returning(|name| Err(AmqpError::QueueNotFoundError(name.to_owned())));
            channel.expect_close().returning(|| Ok(()));
            let channel: Arc<dyn AmqpChannel> = Arc::new(channel);
            Ok(channel)
        });

        let warren = WarrenBuilder::new(global())
            .with_conventional_routing()
            .add_handler::<OrderCreated>(NoopHandler, |m| m.with_concurrency(2))
            .build(Arc::new(conn));

        let err = warren.run(CancellationToken::new()).await.unwrap_err();

        match err {
            AmqpError::ListenerFaultError(name, reason) => {
                assert_eq!(name, "OrderCreated");
                assert!(reason.contains("order-created"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
