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

//! Long-running, correlation-keyed workflows.
//!
//! A saga is a consumer whose state outlives a single message. Each message it
//! declares is routed to the instance identified by the message's correlation
//! id, loaded from a [`SagaRepository`], mutated inside a [`SagaTransaction`]
//! and saved again when the handler succeeds.

use std::any::type_name;
use std::fmt::Debug;

pub use error::SagaError;
pub use policy::{
    InitiatingPolicy, MissingCorrelation, OrchestratingPolicy, SagaOptions, SagaPolicy,
};
pub use repository::{InMemorySagaRepository, SagaRepository};
pub use router::SagaRouter;
pub use transaction::SagaTransaction;

pub(crate) use router::SagaMessageSink;

use anyhow::anyhow;
use uuid::Uuid;

use crate::pipeline::{ConventionViolation, DispatchContext, TypeRouterSpec};
use crate::traits::{ConsumeResult, CorrelatedBy, Message, MessageType};

mod error;
mod locks;
mod policy;
mod repository;
mod router;
mod transaction;

/// Identity of a saga instance.
pub type SagaId = Uuid;

/// A long-running workflow keyed by [`SagaId`].
///
/// ```rust,ignore
/// #[derive(Clone, Debug)]
/// struct Registration { id: SagaId, confirmed: bool }
///
/// impl Saga for Registration {
///     fn with_id(id: SagaId) -> Self { Self { id, confirmed: false } }
///     fn saga_id(&self) -> SagaId { self.id }
///     fn capabilities(capabilities: &mut SagaCapabilities<Self>) {
///         capabilities
///             .initiated_by_correlated::<RegisterUser>()
///             .orchestrates::<ConfirmEmail>();
///     }
/// }
/// ```
pub trait Saga: Clone + Send + Sync + Debug + 'static {
    /// A fresh instance in its initial state.
    fn with_id(id: SagaId) -> Self;

    fn saga_id(&self) -> SagaId;

    /// Registers the messages that start or drive this saga.
    fn capabilities(capabilities: &mut SagaCapabilities<Self>);
}

/// `M` starts a new saga instance.
pub trait InitiatedBy<M>: Saga {
    fn initiate(&mut self, message: &M, context: &DispatchContext) -> ConsumeResult;
}

/// `M` drives an existing saga instance.
pub trait Orchestrates<M>: Saga {
    fn orchestrate(&mut self, message: &M, context: &DispatchContext) -> ConsumeResult;
}

type HandleAs<S> = fn(&mut S, &dyn Message, &DispatchContext) -> ConsumeResult;
type SagaIdOf = fn(&dyn Message) -> Option<SagaId>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum SagaRole {
    Initiating,
    Orchestrating,
}

/// One message type a saga declared.
pub(crate) struct SagaCapability<S> {
    spec: TypeRouterSpec,
    role: SagaRole,
    correlation: Option<SagaIdOf>,
    handle: HandleAs<S>,
}

impl<S> Debug for SagaCapability<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCapability")
            .field("message_type", &self.spec.message_type())
            .field("role", &self.role)
            .field("correlated", &self.correlation.is_some())
            .finish()
    }
}

impl<S> SagaCapability<S> {
    pub(crate) const fn spec(&self) -> TypeRouterSpec {
        self.spec
    }

    pub(crate) const fn role(&self) -> SagaRole {
        self.role
    }

    pub(crate) fn correlation_id(&self, message: &dyn Message) -> Option<SagaId> {
        self.correlation.and_then(|saga_id_of| saga_id_of(message))
    }

    pub(crate) fn handle(
        &self,
        saga: &mut S,
        message: &dyn Message,
        context: &DispatchContext,
    ) -> ConsumeResult {
        (self.handle)(saga, message, context)
    }
}

fn saga_id_of<M>(message: &dyn Message) -> Option<SagaId>
where
    M: CorrelatedBy<Key = SagaId> + 'static,
{
    message
        .as_any()
        .downcast_ref::<M>()
        .map(<M as CorrelatedBy>::correlation_id)
}

fn initiate_as<S, M>(
    saga: &mut S,
    message: &dyn Message,
    context: &DispatchContext,
) -> ConsumeResult
where
    S: InitiatedBy<M>,
    M: Message,
{
    let message = message
        .as_any()
        .downcast_ref::<M>()
        .ok_or_else(|| {
            anyhow!(
                "`{}` routed to saga `{}`",
                message.message_type(),
                type_name::<S>()
            )
        })?;
    saga.initiate(message, context)
}

fn orchestrate_as<S, M>(
    saga: &mut S,
    message: &dyn Message,
    context: &DispatchContext,
) -> ConsumeResult
where
    S: Orchestrates<M>,
    M: Message,
{
    let message = message
        .as_any()
        .downcast_ref::<M>()
        .ok_or_else(|| {
            anyhow!(
                "`{}` routed to saga `{}`",
                message.message_type(),
                type_name::<S>()
            )
        })?;
    saga.orchestrate(message, context)
}

/// The message list a [`Saga`] declares.
pub struct SagaCapabilities<S> {
    entries: Vec<SagaCapability<S>>,
    duplicates: Vec<MessageType>,
}

impl<S> Debug for SagaCapabilities<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaCapabilities")
            .field("saga", &type_name::<S>())
            .field("entries", &self.entries)
            .finish()
    }
}

impl<S: Saga> SagaCapabilities<S> {
    /// `M` starts an instance under a newly generated id.
    pub fn initiated_by<M>(&mut self) -> &mut Self
    where
        S: InitiatedBy<M>,
        M: Message + Clone,
    {
        self.push(
            SagaRole::Initiating,
            None,
            initiate_as::<S, M>,
            TypeRouterSpec::of::<M>(),
        )
    }

    /// `M` starts the instance named by its correlation id.
    pub fn initiated_by_correlated<M>(&mut self) -> &mut Self
    where
        S: InitiatedBy<M>,
        M: Message + Clone + CorrelatedBy<Key = SagaId>,
    {
        self.push(
            SagaRole::Initiating,
            Some(saga_id_of::<M>),
            initiate_as::<S, M>,
            TypeRouterSpec::of::<M>(),
        )
    }

    /// `M` drives the existing instance named by its correlation id.
    pub fn orchestrates<M>(&mut self) -> &mut Self
    where
        S: Orchestrates<M>,
        M: Message + Clone + CorrelatedBy<Key = SagaId>,
    {
        self.push(
            SagaRole::Orchestrating,
            Some(saga_id_of::<M>),
            orchestrate_as::<S, M>,
            TypeRouterSpec::of::<M>(),
        )
    }

    /// `M` drives a saga but carries no correlation id.
    ///
    /// What happens is decided by [`SagaOptions::missing_correlation`].
    pub fn orchestrates_uncorrelated<M>(&mut self) -> &mut Self
    where
        S: Orchestrates<M>,
        M: Message + Clone,
    {
        self.push(
            SagaRole::Orchestrating,
            None,
            orchestrate_as::<S, M>,
            TypeRouterSpec::of::<M>(),
        )
    }

    fn push(
        &mut self,
        role: SagaRole,
        correlation: Option<SagaIdOf>,
        handle: HandleAs<S>,
        spec: TypeRouterSpec,
    ) -> &mut Self {
        let message_type = spec.message_type();
        if self
            .entries
            .iter()
            .any(|entry| entry.spec.message_type() == message_type)
        {
            self.duplicates.push(message_type);
        } else {
            self.entries.push(SagaCapability {
                spec,
                role,
                correlation,
                handle,
            });
        }
        self
    }

    /// Collects and validates the messages declared by `S`.
    pub(crate) fn declared() -> Result<Vec<SagaCapability<S>>, ConventionViolation> {
        let mut capabilities = Self {
            entries: Vec::new(),
            duplicates: Vec::new(),
        };
        S::capabilities(&mut capabilities);
        if let Some(message_type) = capabilities.duplicates.first() {
            return Err(ConventionViolation::DuplicateCapability {
                consumer: type_name::<S>(),
                message_type: *message_type,
            });
        }
        if capabilities.entries.is_empty() {
            return Err(ConventionViolation::NoCapabilities {
                consumer: type_name::<S>(),
            });
        }
        Ok(capabilities.entries)
    }
}
