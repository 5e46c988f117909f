/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */
use std::fmt::Debug;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use courier_core::pipeline::{
    DispatchContext, DispatchOutcome, MessagePipeline, Publish, UnsubscribeAction,
};
use courier_core::saga::{Saga, SagaRepository};
use courier_core::traits::{CorrelatedBy, Message, ObjectBuilder};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::common::{BusError, CourierConfig, Outbound};
use crate::fault::{PoisonReason, PoisonTracker, PoisonVerdict};
use crate::message::{register_control_messages, Envelope};
use crate::registry::MessageTypeRegistry;
use crate::subscriptions::{LocalSubscriptionCache, SubscriptionClient};
use crate::transport::{Endpoint, EndpointAddress, EndpointResolver, LoopbackNetwork, TransportError};

type StopHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Configures and launches a [`Bus`].
///
/// ```rust,ignore
/// let network = LoopbackNetwork::new();
/// let bus = Bus::builder()
///     .with_address(EndpointAddress::loopback("node-a", "orders"))
///     .with_subscription_service(EndpointAddress::loopback("infra", "subscriptions"))
///     .with_resolver(Arc::new(network))
///     .register::<OrderPlaced>("OrderPlaced")
///     .launch()
///     .await?;
/// ```
pub struct BusBuilder {
    config: CourierConfig,
    resolver: Option<Arc<dyn EndpointResolver>>,
    object_builder: Option<Arc<dyn ObjectBuilder>>,
    registry: Arc<MessageTypeRegistry>,
}

impl Debug for BusBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl BusBuilder {
    fn new(config: CourierConfig) -> Self {
        Self {
            config,
            resolver: None,
            object_builder: None,
            registry: Arc::new(MessageTypeRegistry::new()),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    /// The endpoint this instance receives on.
    #[must_use]
    pub fn with_address(mut self, address: EndpointAddress) -> Self {
        self.config.bus.address = address;
        self
    }

    /// Keeps subscriptions in sync through the service at `address`.
    #[must_use]
    pub fn with_subscription_service(mut self, address: EndpointAddress) -> Self {
        self.config.subscriptions.service_address = Some(address);
        self
    }

    /// Resolves every endpoint address. Defaults to a private [`LoopbackNetwork`].
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Builds component consumers.
    #[must_use]
    pub fn with_object_builder(mut self, object_builder: Arc<dyn ObjectBuilder>) -> Self {
        self.object_builder = Some(object_builder);
        self
    }

    /// Lets `M` travel between bus instances under `name`.
    #[must_use]
    pub fn register<M>(self, name: &str) -> Self
    where
        M: Message + Clone + Serialize + DeserializeOwned,
    {
        self.registry.register::<M>(name);
        self
    }

    /// Like [`register`](Self::register), for a correlated `M`.
    #[must_use]
    pub fn register_correlated<M>(self, name: &str) -> Self
    where
        M: Message + Clone + Serialize + DeserializeOwned + CorrelatedBy,
    {
        self.registry.register_correlated::<M>(name);
        self
    }

    /// Starts the receive loop and, when a service is configured, the sync client.
    ///
    /// # Errors
    /// [`BusError::Transport`] if the own address cannot be resolved.
    #[instrument(skip(self), fields(address = %self.config.bus.address))]
    pub async fn launch(self) -> Result<Bus, BusError> {
        let Self {
            config,
            resolver,
            object_builder,
            registry,
        } = self;
        register_control_messages(&registry);
        let resolver = resolver.unwrap_or_else(|| Arc::new(LoopbackNetwork::new()));
        let address = config.bus.address.clone();
        let endpoint = resolver.resolve(&address)?;
        let pipeline = object_builder.map_or_else(MessagePipeline::new, |object_builder| {
            MessagePipeline::with_object_builder(object_builder)
        });

        let bus = Bus {
            inner: Arc::new(BusInner {
                outbound: Outbound::new(address, resolver, registry),
                endpoint,
                pipeline,
                cache: Arc::new(LocalSubscriptionCache::new()),
                poison: PoisonTracker::new(config.poison.clone()),
                runtime: Handle::current(),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                stop_hooks: Mutex::new(Vec::new()),
                client: tokio::sync::Mutex::new(None),
                stopped: AtomicBool::new(false),
                config,
            }),
        };

        let receiver = bus.clone();
        bus.inner.tracker.spawn(async move { receiver.receive_loop().await });

        if let Some(service) = bus.inner.config.subscriptions.service_address.clone() {
            let subscriptions = &bus.inner.config.subscriptions;
            let started = SubscriptionClient::start(
                bus.inner.outbound.clone(),
                bus.inner.pipeline.clone(),
                Arc::clone(&bus.inner.cache),
                service,
                subscriptions.request_timeout(),
                subscriptions.heartbeat_interval(),
            )
            .await;
            match started {
                Ok(client) => *bus.inner.client.lock().await = Some(client),
                Err(e) => {
                    bus.inner.cancel.cancel();
                    return Err(e);
                }
            }
        }
        info!("Bus launched");
        Ok(bus)
    }
}

struct BusInner {
    config: CourierConfig,
    outbound: Outbound,
    endpoint: Arc<dyn Endpoint>,
    pipeline: MessagePipeline,
    cache: Arc<LocalSubscriptionCache>,
    poison: PoisonTracker,
    runtime: Handle,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stop_hooks: Mutex<Vec<StopHook>>,
    client: tokio::sync::Mutex<Option<SubscriptionClient>>,
    stopped: AtomicBool,
}

/// A running bus instance.
///
/// Local subscriptions live in the [`MessagePipeline`]; publishing reaches
/// them and every remote instance whose subscriptions are in the local cache.
/// Cloning is cheap and yields a handle to the same instance.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

impl Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("address", self.address())
            .field("pipeline", &self.inner.pipeline)
            .field("cache", &self.inner.cache)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl Bus {
    /// A builder starting from the default configuration.
    #[must_use]
    pub fn builder() -> BusBuilder {
        BusBuilder::new(CourierConfig::default())
    }

    /// A builder starting from the configuration file, if there is one.
    #[must_use]
    pub fn from_config_file() -> BusBuilder {
        BusBuilder::new(CourierConfig::load())
    }

    #[must_use]
    pub fn address(&self) -> &EndpointAddress {
        self.inner.outbound.address()
    }

    #[must_use]
    pub fn config(&self) -> &CourierConfig {
        &self.inner.config
    }

    /// Local subscriptions and dispatch.
    #[must_use]
    pub fn pipeline(&self) -> &MessagePipeline {
        &self.inner.pipeline
    }

    /// Remote subscriptions known to this instance.
    #[must_use]
    pub fn cache(&self) -> &Arc<LocalSubscriptionCache> {
        &self.inner.cache
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<MessageTypeRegistry> {
        self.inner.outbound.registry()
    }

    #[must_use]
    pub fn poison(&self) -> &PoisonTracker {
        &self.inner.poison
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub(crate) fn outbound(&self) -> &Outbound {
        &self.inner.outbound
    }

    /// Subscribes saga `S` with the configured saga options.
    ///
    /// # Errors
    /// [`BusError::Subscribe`] if `S` declares no messages or the bus is stopped.
    pub fn subscribe_saga<S: Saga>(
        &self,
        repository: Arc<dyn SagaRepository<S>>,
    ) -> Result<UnsubscribeAction, BusError> {
        Ok(self
            .inner
            .pipeline
            .subscribe_saga(repository, self.inner.config.sagas)?)
    }

    /// Publishes to local consumers and to every remote subscriber.
    ///
    /// Remote delivery honours correlation-scoped subscriptions and never
    /// targets this instance. Failed remote sends are logged.
    ///
    /// # Errors
    /// [`BusError::ShutDown`] after [`shutdown`](Self::shutdown).
    pub async fn publish<M: Message>(&self, message: M) -> Result<DispatchOutcome, BusError> {
        self.ensure_running()?;
        let outcome = self
            .inner
            .pipeline
            .dispatch_with(&message, &self.context());
        if let Some((envelope, targets)) = self.remote_targets(&message) {
            self.inner.outbound.fan_out(&envelope, &targets).await;
        }
        Ok(outcome)
    }

    /// Sends `message` to the single endpoint `to`, bypassing local consumers.
    ///
    /// # Errors
    /// [`BusError::Registry`] if `M` is not registered and
    /// [`BusError::Transport`] if the endpoint cannot be reached.
    pub async fn send<M: Message>(&self, to: &EndpointAddress, message: &M) -> Result<(), BusError> {
        self.ensure_running()?;
        self.inner.outbound.send(to, message).await
    }

    /// Runs `hook` first when the bus shuts down.
    pub fn on_stop<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner
            .stop_hooks
            .lock()
            .push(Box::new(move || hook().boxed()));
    }

    /// Stops the bus.
    ///
    /// Stop hooks run first, then the receive loop stops, then the pipeline is
    /// disposed and finally the sync client flushes its pending changes and
    /// cancels its updates. Shutting down twice is a no-op.
    #[instrument(skip(self), fields(address = %self.address()))]
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let hooks: Vec<_> = std::mem::take(&mut *self.inner.stop_hooks.lock());
        for hook in hooks {
            hook().await;
        }

        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        self.inner.pipeline.dispose();

        let client = self.inner.client.lock().await.take();
        if let Some(client) = client {
            client.dispose().await;
        }
        info!("Bus stopped");
    }

    fn ensure_running(&self) -> Result<(), BusError> {
        if self.is_stopped() {
            Err(BusError::ShutDown(self.address().to_string()))
        } else {
            Ok(())
        }
    }

    fn context(&self) -> DispatchContext {
        DispatchContext::new(Arc::new(BusPublisher { bus: self.clone() }))
    }

    /// The envelope and the remote endpoints of a publish, if any.
    fn remote_targets(&self, message: &dyn Message) -> Option<(Envelope, Vec<EndpointAddress>)> {
        let registry = self.registry();
        let message_type = message.message_type();
        if registry.wire_name(message_type.id()).is_none() {
            trace!(%message_type, "Local-only message type, not published remotely");
            return None;
        }
        let envelope = match registry.encode(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(%message_type, error = %e, "Message not published remotely");
                return None;
            }
        };
        let targets: Vec<_> = self
            .inner
            .cache
            .endpoints_for(&envelope.message_type, envelope.correlation_id.as_deref())
            .into_iter()
            .filter(|endpoint| endpoint != self.address())
            .collect();
        (!targets.is_empty()).then_some((envelope, targets))
    }

    /// Publishes without waiting for remote delivery.
    fn publish_detached(&self, message: &dyn Message, context: &DispatchContext) {
        self.inner.pipeline.dispatch_with(message, context);
        if let Some((envelope, targets)) = self.remote_targets(message) {
            let outbound = self.inner.outbound.clone();
            self.inner.runtime.spawn(async move {
                outbound.fan_out(&envelope, &targets).await;
            });
        }
    }

    async fn receive_loop(self) {
        let poll = self.inner.config.bus.receive_poll_interval();
        debug!(address = %self.address(), "Receive loop started");
        loop {
            tokio::select! {
                () = self.inner.cancel.cancelled() => break,
                received = self.inner.endpoint.receive(poll) => match received {
                    Ok(Some(envelope)) => self.handle_envelope(envelope).await,
                    Ok(None) => {}
                    Err(TransportError::Closed(address)) => {
                        error!(%address, "Endpoint closed, receive loop ends");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "Receive failed");
                        tokio::time::sleep(poll).await;
                    }
                },
            }
        }
        debug!(address = %self.address(), "Receive loop stopped");
    }

    async fn handle_envelope(&self, envelope: Envelope) {
        trace!(message_id = %envelope.message_id, message_type = %envelope.message_type, "Envelope received");
        if let Some(reason) = self.inner.poison.check_redelivery(envelope.redelivery_count) {
            self.forward_poison(envelope, reason).await;
            return;
        }
        let message = match self.registry().decode(&envelope) {
            Ok(message) => message,
            Err(e) => {
                self.forward_poison(envelope, PoisonReason::Undecodable(e.to_string()))
                    .await;
                return;
            }
        };

        let context = self.context().with_headers(envelope.message_headers());
        let outcome = self.inner.pipeline.dispatch_with(message.as_ref(), &context);
        if outcome.accepted() {
            self.inner.poison.clear(&envelope.message_id);
            return;
        }
        match self.inner.poison.record_unaccepted(envelope.message_id) {
            PoisonVerdict::Retry { attempt } => {
                debug!(message_id = %envelope.message_id, attempt, "No consumer accepted the envelope, requeueing");
                let message_id = envelope.message_id;
                if let Err(e) = self.inner.endpoint.send(envelope.redelivered()).await {
                    // the envelope is gone, so its attempts must not linger
                    self.inner.poison.clear(&message_id);
                    warn!(%message_id, error = %e, "Unaccepted envelope could not be requeued");
                }
            }
            PoisonVerdict::Poison(reason) => self.forward_poison(envelope, reason).await,
        }
    }

    /// Moves `envelope`, unmodified, to the poison endpoint.
    async fn forward_poison(&self, envelope: Envelope, reason: PoisonReason) {
        self.inner.poison.record_poisoned();
        let Some(poison) = self.inner.config.poison.endpoint.as_ref() else {
            error!(message_id = %envelope.message_id, message_type = %envelope.message_type, %reason, "Poison envelope dropped, no poison endpoint configured");
            return;
        };
        error!(message_id = %envelope.message_id, message_type = %envelope.message_type, %reason, %poison, "Forwarding poison envelope");
        let sent = match self.inner.outbound.resolver().resolve(poison) {
            Ok(endpoint) => endpoint.send(envelope).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            error!(%poison, error = %e, "Poison envelope lost");
        }
    }
}

/// Publishes from inside handlers, locally and to remote subscribers.
struct BusPublisher {
    bus: Bus,
}

impl Debug for BusPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusPublisher")
            .field("address", self.bus.address())
            .finish()
    }
}

impl Publish for BusPublisher {
    fn publish(&self, message: Box<dyn Message>) {
        if self.bus.is_stopped() {
            warn!(?message, "Bus stopped, follow-up message dropped");
            return;
        }
        self.bus
            .publish_detached(message.as_ref(), &self.bus.context());
    }

    fn publish_fault(&self, fault: Box<dyn Message>) {
        let context = self.bus.context().for_fault();
        self.bus.publish_detached(fault.as_ref(), &context);
    }
}
