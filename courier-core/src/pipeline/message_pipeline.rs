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
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use tracing::{debug, error, instrument, trace, warn};

use crate::pipeline::capabilities::{CapabilityKind, ConsumerSource};
use crate::pipeline::sink::{AcceptFn, ConsumeFn, DeliveryReport, Sink, SinkEntry, SinkSet};
use crate::pipeline::{
    Capabilities, ConventionViolation, DispatchContext, Publish, SubscribeError, TypeRouter,
    TypeRouterSpec, UnsubscribeAction,
};
use crate::saga::{
    Saga, SagaCapabilities, SagaMessageSink, SagaOptions, SagaRepository, SagaRouter,
};
use crate::subscription::{SubscriptionEventBroadcaster, SubscriptionKey};
use crate::traits::{
    correlation_key_of, ConsumeResult, Consumer, CorrelatedBy, CorrelationKey, Message,
    MessageKeyFn, MessageType, ObjectBuilder,
};

/// Tally of a single dispatch.
///
/// Only typed sinks are counted; observers of every message are not.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Sinks that consumed the message successfully.
    pub delivered: usize,
    /// Selective sinks that declined the message.
    pub skipped: usize,
    /// Sinks that failed; each produced a fault.
    pub faulted: usize,
}

impl DispatchOutcome {
    /// `true` if at least one consumer took the message, whether or not it
    /// succeeded.
    #[must_use]
    pub const fn accepted(&self) -> bool {
        self.delivered + self.faulted > 0
    }
}

/// Where a new sink is attached inside its type router.
enum Route {
    Type,
    Keyed {
        key: CorrelationKey,
        message_key: MessageKeyFn,
    },
    General {
        message_key: MessageKeyFn,
    },
}

/// The composition root of local message delivery.
///
/// Owns one [`TypeRouter`] per subscribed message type, the sinks that
/// observe every message, and the [`SubscriptionEventBroadcaster`] that turns
/// local subscriptions into subscription events. Cloning is cheap and yields a
/// handle to the same pipeline.
///
/// ```rust,ignore
/// let pipeline = MessagePipeline::new();
/// let unsubscribe = pipeline.subscribe_fn(|ping: &Ping, _| {
///     info!(?ping, "pinged");
///     Ok(())
/// })?;
/// assert!(pipeline.dispatch(&Ping).accepted());
/// unsubscribe.unsubscribe();
/// ```
#[derive(Clone, Default)]
pub struct MessagePipeline {
    inner: Arc<PipelineInner>,
}

#[derive(Default)]
struct PipelineInner {
    routers: RwLock<HashMap<TypeId, Arc<TypeRouter>>>,
    any: SinkSet,
    broadcaster: Arc<SubscriptionEventBroadcaster>,
    object_builder: Option<Arc<dyn ObjectBuilder>>,
    disposed: AtomicBool,
}

impl Debug for MessagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagePipeline")
            .field("routers", &self.inner.routers.read().len())
            .field("any", &self.inner.any.len())
            .field("object_builder", &self.inner.object_builder)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl MessagePipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipeline that can host component consumers built by `object_builder`.
    #[must_use]
    pub fn with_object_builder(object_builder: Arc<dyn ObjectBuilder>) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                object_builder: Some(object_builder),
                ..PipelineInner::default()
            }),
        }
    }

    /// Subscribes a long-lived consumer instance for every capability it declares.
    ///
    /// Correlated capabilities are registered under the instance's correlation
    /// id; everything else receives every message of its type.
    pub fn subscribe<C: Consumer>(
        &self,
        consumer: Arc<C>,
    ) -> Result<UnsubscribeAction, SubscribeError> {
        self.connect(ConsumerSource::Instance(consumer), true)
    }

    /// Like [`subscribe`](Self::subscribe), but without subscription events.
    ///
    /// Used for control consumers whose interest must not be advertised to
    /// other bus instances.
    pub fn subscribe_unannounced<C: Consumer>(
        &self,
        consumer: Arc<C>,
    ) -> Result<UnsubscribeAction, SubscribeError> {
        self.connect(ConsumerSource::Instance(consumer), false)
    }

    /// Subscribes component `C`; an instance is built per message by the
    /// pipeline's object builder and released afterwards.
    pub fn subscribe_component<C: Consumer>(&self) -> Result<UnsubscribeAction, SubscribeError> {
        let component = type_name::<C>();
        let builder = self
            .inner
            .object_builder
            .clone()
            .ok_or(ConventionViolation::MissingObjectBuilder { component })?;
        if !builder.can_build(TypeId::of::<C>()) {
            return Err(ConventionViolation::UnbuildableComponent { component }.into());
        }
        self.connect(ConsumerSource::<C>::Component(builder), true)
    }

    /// Subscribes a closure to every `M`.
    pub fn subscribe_fn<M, F>(&self, handler: F) -> Result<UnsubscribeAction, SubscribeError>
    where
        M: Message + Clone,
        F: Fn(&M, &DispatchContext) -> ConsumeResult + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let sink = Sink::Instance(typed_consume::<M, _>(handler));
        Ok(self.attach(TypeRouterSpec::of::<M>(), Route::Type, sink, true))
    }

    /// Subscribes a closure to the `M`s that `accept` lets through.
    pub fn subscribe_selective_fn<M, A, F>(
        &self,
        accept: A,
        handler: F,
    ) -> Result<UnsubscribeAction, SubscribeError>
    where
        M: Message + Clone,
        A: Fn(&M) -> bool + Send + Sync + 'static,
        F: Fn(&M, &DispatchContext) -> ConsumeResult + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let accept: AcceptFn = Arc::new(move |message: &dyn Message| {
            message.as_any().downcast_ref::<M>().is_some_and(&accept)
        });
        let sink = Sink::Selective {
            accept,
            inner: Box::new(Sink::Instance(typed_consume::<M, _>(handler))),
        };
        Ok(self.attach(TypeRouterSpec::of::<M>(), Route::Type, sink, true))
    }

    /// Subscribes a closure to one conversation of a correlated message type.
    ///
    /// A later registration for the same id replaces this one.
    pub fn subscribe_correlated_fn<M, F>(
        &self,
        correlation_id: M::Key,
        handler: F,
    ) -> Result<UnsubscribeAction, SubscribeError>
    where
        M: Message + Clone + CorrelatedBy,
        F: Fn(&M, &DispatchContext) -> ConsumeResult + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let route = Route::Keyed {
            key: CorrelationKey::from_value(&correlation_id),
            message_key: correlation_key_of::<M>,
        };
        let sink = Sink::Instance(typed_consume::<M, _>(handler));
        Ok(self.attach(TypeRouterSpec::of::<M>(), route, sink, true))
    }

    /// Subscribes a closure to every conversation of a correlated message type.
    pub fn subscribe_all_correlated_fn<M, F>(
        &self,
        handler: F,
    ) -> Result<UnsubscribeAction, SubscribeError>
    where
        M: Message + Clone + CorrelatedBy,
        F: Fn(&M, &DispatchContext) -> ConsumeResult + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let route = Route::General {
            message_key: correlation_key_of::<M>,
        };
        let sink = Sink::Instance(typed_consume::<M, _>(handler));
        Ok(self.attach(TypeRouterSpec::of::<M>(), route, sink, true))
    }

    /// Observes every dispatched message, whatever its type.
    ///
    /// Observers are not announced, are not counted in the
    /// [`DispatchOutcome`], and their failures are logged without raising a
    /// fault.
    pub fn subscribe_any<F>(&self, handler: F) -> Result<UnsubscribeAction, SubscribeError>
    where
        F: Fn(&dyn Message, &DispatchContext) -> ConsumeResult + Send + Sync + 'static,
    {
        self.ensure_live()?;
        let consume: ConsumeFn = Arc::new(handler);
        let id = self
            .inner
            .any
            .insert(Arc::new(SinkEntry::new(Sink::Instance(consume))));
        let inner = Arc::clone(&self.inner);
        Ok(UnsubscribeAction::new(move || inner.any.remove(id)))
    }

    /// Subscribes saga `S`, persisting its instances in `repository`.
    pub fn subscribe_saga<S: Saga>(
        &self,
        repository: Arc<dyn SagaRepository<S>>,
        options: SagaOptions,
    ) -> Result<UnsubscribeAction, SubscribeError> {
        self.ensure_live()?;
        let capabilities = SagaCapabilities::<S>::declared()?;
        let router = Arc::new(SagaRouter::new(repository, options));
        let mut action = UnsubscribeAction::empty();
        for capability in capabilities {
            let spec = capability.spec();
            let sink = SagaMessageSink::new(Arc::clone(&router), capability);
            action += self.attach(spec, Route::Type, Sink::Saga(Arc::new(sink)), true);
        }
        debug!(saga = type_name::<S>(), ?options, "Saga subscribed");
        Ok(action)
    }

    /// Delivers `message` to every interested sink.
    ///
    /// Handlers that publish follow-up messages publish back into this
    /// pipeline. Pass the concrete message (`&ping`, or `boxed.as_ref()`),
    /// never a `&Box<dyn Message>`.
    pub fn dispatch(&self, message: &dyn Message) -> DispatchOutcome {
        self.dispatch_with(message, &DispatchContext::detached())
    }

    /// Delivers `message` under an explicit context.
    ///
    /// A context without a publisher gets this pipeline as its publisher.
    pub fn dispatch_with(
        &self,
        message: &dyn Message,
        context: &DispatchContext,
    ) -> DispatchOutcome {
        let message_type = message.message_type();
        if self.is_disposed() {
            trace!(%message_type, "Pipeline disposed, message dropped");
            return DispatchOutcome::default();
        }
        let context = if context.has_publisher() {
            context.clone()
        } else {
            context.clone().with_publisher(Arc::new(self.clone()))
        };

        // clone the router out so the table lock is not held while consuming
        let router = self.inner.routers.read().get(&message_type.id()).cloned();
        let mut report = DeliveryReport::default();
        if let Some(router) = &router {
            router.route(message, &context, &mut report);
        }
        let mut observed = DeliveryReport::default();
        self.inner.any.deliver_all(message, &context, &mut observed);
        for failure in &observed.failures {
            warn!(%message_type, error = %format!("{failure:#}"), "Observer failed");
        }

        let outcome = DispatchOutcome {
            delivered: report.delivered,
            skipped: report.skipped,
            faulted: report.failures.len(),
        };
        for failure in &report.failures {
            self.raise_fault(router.as_deref(), message, failure, &context);
        }
        trace!(%message_type, ?outcome, "Message dispatched");
        outcome
    }

    fn raise_fault(
        &self,
        router: Option<&TypeRouter>,
        message: &dyn Message,
        failure: &anyhow::Error,
        context: &DispatchContext,
    ) {
        let message_type = message.message_type();
        let reason = format!("{failure:#}");
        warn!(%message_type, error = %reason, "Consumer failed");
        if context.is_fault() {
            error!(%message_type, "Consumer of a fault failed, no further fault raised");
            return;
        }
        let Some(fault) = router.and_then(|router| router.build_fault(message, failure)) else {
            debug!(%message_type, "No typed router for the failed message, fault not raised");
            return;
        };
        if let Some(publisher) = context.publisher() {
            publisher.publish_fault(fault);
        }
    }

    /// The router of a message type, if anything ever subscribed to it.
    #[must_use]
    pub fn router(&self, message_type: TypeId) -> Option<Arc<TypeRouter>> {
        self.inner.routers.read().get(&message_type).cloned()
    }

    /// Every message type that has a router.
    #[must_use]
    pub fn registered_types(&self) -> Vec<MessageType> {
        self.inner
            .routers
            .read()
            .values()
            .map(|router| router.message_type())
            .collect()
    }

    /// The broadcaster counting this pipeline's announced subscriptions.
    #[must_use]
    pub fn broadcaster(&self) -> &Arc<SubscriptionEventBroadcaster> {
        &self.inner.broadcaster
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Clears every router and reports every announced subscription as removed.
    ///
    /// Later subscribe calls fail with [`SubscribeError::Disposed`] and later
    /// dispatches deliver nothing. Disposing twice is a no-op.
    #[instrument(skip(self))]
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let routers: Vec<_> = self
            .inner
            .routers
            .write()
            .drain()
            .map(|(_, router)| router)
            .collect();
        for router in &routers {
            router.clear();
        }
        let observers = self.inner.any.clear();
        let removed = self.inner.broadcaster.reset();
        debug!(routers = routers.len(), observers, removed, "Message pipeline disposed");
    }

    fn ensure_live(&self) -> Result<(), SubscribeError> {
        if self.is_disposed() {
            Err(SubscribeError::Disposed)
        } else {
            Ok(())
        }
    }

    fn connect<C: Consumer>(
        &self,
        source: ConsumerSource<C>,
        announce: bool,
    ) -> Result<UnsubscribeAction, SubscribeError> {
        self.ensure_live()?;
        let capabilities = Capabilities::<C>::declared()?;
        if matches!(source, ConsumerSource::Component(_)) {
            let correlated = capabilities
                .iter()
                .find(|capability| matches!(capability.kind(), CapabilityKind::Correlated { .. }));
            if let Some(capability) = correlated {
                return Err(ConventionViolation::CorrelatedComponent {
                    component: type_name::<C>(),
                    message_type: capability.spec().message_type(),
                }
                .into());
            }
        }

        let mut action = UnsubscribeAction::empty();
        for capability in &capabilities {
            let route = match (capability.kind(), &source) {
                (
                    CapabilityKind::Correlated {
                        consumer_key,
                        message_key,
                    },
                    ConsumerSource::Instance(consumer),
                ) => Route::Keyed {
                    key: (*consumer_key)(consumer.as_ref()),
                    message_key: *message_key,
                },
                _ => Route::Type,
            };
            let sink = capability.sink_for(&source);
            action += self.attach(capability.spec(), route, sink, announce);
        }
        debug!(
            consumer = type_name::<C>(),
            message_types = capabilities.len(),
            announce,
            "Consumer subscribed"
        );
        Ok(action)
    }

    /// Returns the router for `spec`, creating it on first use.
    fn router_for(&self, spec: TypeRouterSpec) -> Arc<TypeRouter> {
        let id = spec.message_type().id();
        let routers = self.inner.routers.upgradable_read();
        if let Some(router) = routers.get(&id) {
            return Arc::clone(router);
        }
        let mut routers = RwLockUpgradableReadGuard::upgrade(routers);
        Arc::clone(
            routers
                .entry(id)
                .or_insert_with(|| Arc::new(TypeRouter::new(spec))),
        )
    }

    fn attach(
        &self,
        spec: TypeRouterSpec,
        route: Route,
        sink: Sink,
        announce: bool,
    ) -> UnsubscribeAction {
        let router = self.router_for(spec);
        let entry = Arc::new(SinkEntry::new(sink));
        let (key, detach): (SubscriptionKey, Box<dyn Fn() -> bool + Send + Sync>) = match route {
            Route::Type => {
                let id = router.connect(entry);
                (
                    SubscriptionKey::new(spec.message_type()),
                    Box::new(move || router.disconnect(id)),
                )
            }
            Route::Keyed { key, message_key } => {
                let correlated = router.correlated(message_key);
                let id = correlated.connect_keyed(key.clone(), entry);
                let subscription = SubscriptionKey::correlated(spec.message_type(), key.clone());
                (
                    subscription,
                    Box::new(move || correlated.disconnect_keyed(&key, id)),
                )
            }
            Route::General { message_key } => {
                let correlated = router.correlated(message_key);
                let id = correlated.connect_general(entry);
                (
                    SubscriptionKey::new(spec.message_type()),
                    Box::new(move || correlated.disconnect_general(id)),
                )
            }
        };

        let broadcaster = announce.then(|| {
            self.inner.broadcaster.increment(&key);
            Arc::clone(&self.inner.broadcaster)
        });
        UnsubscribeAction::new(move || {
            // the count covers a replaced keyed registration too
            let removed = detach();
            if let Some(broadcaster) = &broadcaster {
                broadcaster.decrement(&key);
            }
            trace!(%key, removed, "Subscription removed");
            removed
        })
    }
}

impl Publish for MessagePipeline {
    fn publish(&self, message: Box<dyn Message>) {
        self.dispatch(message.as_ref());
    }

    fn publish_fault(&self, fault: Box<dyn Message>) {
        let context = DispatchContext::new(Arc::new(self.clone())).for_fault();
        self.dispatch_with(fault.as_ref(), &context);
    }
}

/// Wraps a typed closure into a type-erased consume call.
fn typed_consume<M, F>(handler: F) -> ConsumeFn
where
    M: Message,
    F: Fn(&M, &DispatchContext) -> ConsumeResult + Send + Sync + 'static,
{
    Arc::new(move |message: &dyn Message, context: &DispatchContext| {
        match message.as_any().downcast_ref::<M>() {
            Some(message) => handler(message, context),
            None => Err(anyhow!(
                "`{}` was routed to a handler of `{}`",
                message.message_type(),
                type_name::<M>()
            )),
        }
    })
}
