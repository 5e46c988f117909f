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
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::warn;

use crate::pipeline::sink::{AcceptFn, ConsumeFn, Sink};
use crate::pipeline::{ConventionViolation, DispatchContext, TypeRouterSpec};
use crate::traits::{
    correlation_key_of, ConsumeResult, Consumer, Consumes, ConsumesFor, CorrelatedBy,
    CorrelationKey, Message, MessageKeyFn, MessageType, ObjectBuilder, SelectiveConsumes,
};

type ConsumeAs<C> = fn(&C, &dyn Message, &DispatchContext) -> ConsumeResult;
type AcceptAs<C> = fn(&C, &dyn Message) -> bool;
type KeyOf<C> = fn(&C) -> CorrelationKey;

/// How one declared capability reaches its consumer.
pub(crate) enum CapabilityKind<C> {
    Plain,
    Selective(AcceptAs<C>),
    Correlated {
        consumer_key: KeyOf<C>,
        message_key: MessageKeyFn,
    },
}

/// One message type a consumer declared interest in.
pub(crate) struct Capability<C> {
    spec: TypeRouterSpec,
    kind: CapabilityKind<C>,
    consume: ConsumeAs<C>,
}

impl<C> Capability<C>
where
    C: Send + Sync + 'static,
{
    pub(crate) const fn spec(&self) -> TypeRouterSpec {
        self.spec
    }

    pub(crate) const fn kind(&self) -> &CapabilityKind<C> {
        &self.kind
    }

    /// Builds the sink delivering this capability's message type to `source`.
    pub(crate) fn sink_for(&self, source: &ConsumerSource<C>) -> Sink {
        let consume_fn = self.consume;
        match source {
            ConsumerSource::Instance(consumer) => {
                let target = Arc::clone(consumer);
                let consume: ConsumeFn =
                    Arc::new(move |message: &dyn Message, context: &DispatchContext| {
                        consume_fn(&target, message, context)
                    });
                match self.kind {
                    CapabilityKind::Selective(accept_fn) => {
                        let target = Arc::clone(consumer);
                        let accept: AcceptFn =
                            Arc::new(move |message: &dyn Message| accept_fn(&target, message));
                        Sink::Selective {
                            accept,
                            inner: Box::new(Sink::Instance(consume)),
                        }
                    }
                    CapabilityKind::Plain | CapabilityKind::Correlated { .. } => {
                        Sink::Instance(consume)
                    }
                }
            }
            ConsumerSource::Component(builder) => {
                let target = Arc::clone(builder);
                let consume: ConsumeFn =
                    Arc::new(move |message: &dyn Message, context: &DispatchContext| {
                        with_component::<C, _>(target.as_ref(), |component| {
                            consume_fn(component, message, context)
                        })?
                    });
                match self.kind {
                    CapabilityKind::Selective(accept_fn) => {
                        let target = Arc::clone(builder);
                        let accept: AcceptFn = Arc::new(move |message: &dyn Message| {
                            with_component::<C, _>(target.as_ref(), |component| {
                                accept_fn(component, message)
                            })
                            .unwrap_or_else(|error| {
                                warn!(%error, "Selective component could not be built, message declined");
                                false
                            })
                        });
                        Sink::Selective {
                            accept,
                            inner: Box::new(Sink::Component(consume)),
                        }
                    }
                    CapabilityKind::Plain | CapabilityKind::Correlated { .. } => {
                        Sink::Component(consume)
                    }
                }
            }
        }
    }
}

/// Where a subscribed consumer's instances come from.
pub(crate) enum ConsumerSource<C> {
    /// One shared, long-lived instance.
    Instance(Arc<C>),
    /// A fresh instance per message from the object builder.
    Component(Arc<dyn ObjectBuilder>),
}

/// Builds a `C`, hands it to `f` and releases it afterwards.
fn with_component<C, R>(builder: &dyn ObjectBuilder, f: impl FnOnce(&C) -> R) -> anyhow::Result<R>
where
    C: 'static,
{
    let component = builder
        .build(TypeId::of::<C>())
        .ok_or_else(|| anyhow!("object builder could not build `{}`", type_name::<C>()))?;
    let Some(instance) = component.downcast_ref::<C>() else {
        builder.release(component);
        return Err(anyhow!(
            "object builder returned the wrong component type for `{}`",
            type_name::<C>()
        ));
    };
    let result = f(instance);
    builder.release(component);
    Ok(result)
}

fn consume_as<C, M>(consumer: &C, message: &dyn Message, context: &DispatchContext) -> ConsumeResult
where
    C: Consumes<M>,
    M: Message,
{
    match message.as_any().downcast_ref::<M>() {
        Some(message) => consumer.consume(message, context),
        None => Err(anyhow!(
            "`{}` was routed to a consumer of `{}`",
            message.message_type(),
            type_name::<M>()
        )),
    }
}

fn accept_as<C, M>(consumer: &C, message: &dyn Message) -> bool
where
    C: SelectiveConsumes<M>,
    M: Message,
{
    message
        .as_any()
        .downcast_ref::<M>()
        .is_some_and(|message| consumer.accept(message))
}

fn consumer_key_of<C, M>(consumer: &C) -> CorrelationKey
where
    C: ConsumesFor<M>,
    M: CorrelatedBy,
{
    CorrelationKey::from_value(&<C as ConsumesFor<M>>::correlation_id(consumer))
}

/// The capability list a [`Consumer`] declares.
///
/// Filled in by [`Consumer::capabilities`]; each call registers one message
/// type and returns `&mut Self` for chaining.
pub struct Capabilities<C> {
    entries: Vec<Capability<C>>,
    duplicates: Vec<MessageType>,
}

impl<C> Debug for Capabilities<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("consumer", &type_name::<C>())
            .field(
                "message_types",
                &self
                    .entries
                    .iter()
                    .map(|entry| entry.spec.message_type())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl<C> Capabilities<C>
where
    C: Send + Sync + 'static,
{
    fn empty() -> Self {
        Self {
            entries: Vec::new(),
            duplicates: Vec::new(),
        }
    }

    /// Every message of type `M` is delivered to the consumer.
    pub fn consumes<M>(&mut self) -> &mut Self
    where
        C: Consumes<M>,
        M: Message + Clone,
    {
        self.push(Capability {
            spec: TypeRouterSpec::of::<M>(),
            kind: CapabilityKind::Plain,
            consume: consume_as::<C, M>,
        })
    }

    /// Messages of type `M` are delivered when the consumer accepts them.
    pub fn selects<M>(&mut self) -> &mut Self
    where
        C: SelectiveConsumes<M>,
        M: Message + Clone,
    {
        self.push(Capability {
            spec: TypeRouterSpec::of::<M>(),
            kind: CapabilityKind::Selective(accept_as::<C, M>),
            consume: consume_as::<C, M>,
        })
    }

    /// Messages of type `M` are delivered when their correlation id equals the
    /// consumer's.
    pub fn correlates<M>(&mut self) -> &mut Self
    where
        C: ConsumesFor<M>,
        M: Message + Clone + CorrelatedBy,
    {
        self.push(Capability {
            spec: TypeRouterSpec::of::<M>(),
            kind: CapabilityKind::Correlated {
                consumer_key: consumer_key_of::<C, M>,
                message_key: correlation_key_of::<M>,
            },
            consume: consume_as::<C, M>,
        })
    }

    fn push(&mut self, capability: Capability<C>) -> &mut Self {
        let message_type = capability.spec.message_type();
        if self
            .entries
            .iter()
            .any(|entry| entry.spec.message_type() == message_type)
        {
            self.duplicates.push(message_type);
        } else {
            self.entries.push(capability);
        }
        self
    }

    /// Number of distinct message types declared.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Consumer> Capabilities<C> {
    /// Collects and validates the capabilities declared by `C`.
    pub(crate) fn declared() -> Result<Vec<Capability<C>>, ConventionViolation> {
        let mut capabilities = Self::empty();
        C::capabilities(&mut capabilities);
        if let Some(message_type) = capabilities.duplicates.first() {
            return Err(ConventionViolation::DuplicateCapability {
                consumer: type_name::<C>(),
                message_type: *message_type,
            });
        }
        if capabilities.entries.is_empty() {
            return Err(ConventionViolation::NoCapabilities {
                consumer: type_name::<C>(),
            });
        }
        Ok(capabilities.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Ping;

    #[derive(Clone, Debug)]
    struct Pong;

    struct Twice;

    impl Consumes<Ping> for Twice {
        fn consume(&self, _: &Ping, _: &DispatchContext) -> ConsumeResult {
            Ok(())
        }
    }

    impl Consumer for Twice {
        fn capabilities(capabilities: &mut Capabilities<Self>) {
            capabilities.consumes::<Ping>().consumes::<Ping>();
        }
    }

    struct Silent;

    impl Consumer for Silent {
        fn capabilities(_: &mut Capabilities<Self>) {}
    }

    struct Both;

    impl Consumes<Ping> for Both {
        fn consume(&self, _: &Ping, _: &DispatchContext) -> ConsumeResult {
            Ok(())
        }
    }

    impl Consumes<Pong> for Both {
        fn consume(&self, _: &Pong, _: &DispatchContext) -> ConsumeResult {
            Ok(())
        }
    }

    impl Consumer for Both {
        fn capabilities(capabilities: &mut Capabilities<Self>) {
            capabilities.consumes::<Ping>().consumes::<Pong>();
        }
    }

    #[test]
    fn duplicate_capabilities_are_rejected() {
        let error = Capabilities::<Twice>::declared().err();
        assert!(matches!(
            error,
            Some(ConventionViolation::DuplicateCapability { message_type, .. })
                if message_type == MessageType::of::<Ping>()
        ));
    }

    #[test]
    fn consumers_must_declare_something() {
        assert!(matches!(
            Capabilities::<Silent>::declared().err(),
            Some(ConventionViolation::NoCapabilities { .. })
        ));
    }

    #[test]
    fn each_message_type_yields_one_capability() {
        let declared = Capabilities::<Both>::declared().expect("valid consumer");
        assert_eq!(declared.len(), 2);
        assert_eq!(declared[1].spec().message_type(), MessageType::of::<Pong>());
    }
}
