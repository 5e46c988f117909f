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

#![forbid(unsafe_code)]

//! # Courier Core
//!
//! The dispatch-and-subscription engine behind the Courier message bus. It
//! knows nothing about networks: it routes in-process messages to the
//! consumers interested in them and reports which subscriptions exist.
//!
//! ## Key Concepts
//!
//! - **Messages (`Message`)**: any `Clone + Debug + Send + Sync + 'static` type.
//!   Messages that belong to a conversation implement `CorrelatedBy`.
//! - **Pipeline (`MessagePipeline`)**: owns one `TypeRouter` per message type
//!   and exposes `subscribe` / `dispatch`. Callers only keep the returned
//!   `UnsubscribeAction`s.
//! - **Consumers**: declare their capabilities (plain, selective, correlated)
//!   through `Consumer::capabilities`.
//! - **Sagas (`Saga`)**: correlation-keyed workflows loaded from and saved to a
//!   `SagaRepository` around every message.
//! - **Subscription events**: the `SubscriptionEventBroadcaster` reports the
//!   first and last local subscription of every key.
//! - **Faults (`Fault<M>`)**: published whenever a consumer of `M` fails.

/// Fault capture for failing consumers.
pub mod fault;

/// Message routing, subscription and dispatch.
pub mod pipeline;

/// Saga routing, policies and persistence.
pub mod saga;

/// Reference-counted subscription events.
pub mod subscription;

/// Message, correlation, consumer and component traits.
pub mod traits;

/// The most commonly used items.
pub mod prelude {
    pub use crate::fault::Fault;
    pub use crate::pipeline::{
        Capabilities, ConventionViolation, DispatchContext, DispatchOutcome, MessageHeaders,
        MessagePipeline, Publish, SubscribeError, UnsubscribeAction,
    };
    pub use crate::saga::{
        InMemorySagaRepository, InitiatedBy, MissingCorrelation, Orchestrates, Saga,
        SagaCapabilities, SagaError, SagaId, SagaOptions, SagaRepository,
    };
    pub use crate::subscription::{
        ChangeType, SubscriptionEvent, SubscriptionEventBroadcaster, SubscriptionKey,
    };
    pub use crate::traits::{
        ConsumeResult, Consumer, Consumes, ConsumesFor, CorrelatedBy, CorrelationKey,
        FactoryObjectBuilder, Message, MessageType, ObjectBuilder, SelectiveConsumes,
    };
}
