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
use crate::pipeline::{Capabilities, DispatchContext};
use crate::traits::CorrelatedBy;

/// Result returned by every consume handler.
///
/// Any error is treated as a consumer fault: it is logged, the remaining sinks
/// still receive the message, and a [`Fault`](crate::fault::Fault) is published.
pub type ConsumeResult = anyhow::Result<()>;

/// A consumer of every message of type `M`.
///
/// Consumers are shared between dispatch threads, so `consume` takes `&self`;
/// keep mutable state behind a lock or atomics.
pub trait Consumes<M>: Send + Sync + 'static {
    /// Handles one message.
    fn consume(&self, message: &M, context: &DispatchContext) -> ConsumeResult;
}

/// A consumer that first decides whether it wants a given `M`.
///
/// `consume` is only called when [`accept`](SelectiveConsumes::accept) returns `true`.
pub trait SelectiveConsumes<M>: Consumes<M> {
    /// Predicate evaluated before delivery.
    fn accept(&self, message: &M) -> bool;
}

/// A consumer bound to one conversation of a correlated message type.
///
/// Only messages whose correlation id equals this consumer's id are delivered.
pub trait ConsumesFor<M: CorrelatedBy>: Consumes<M> {
    /// The conversation this consumer listens to.
    fn correlation_id(&self) -> M::Key;
}

/// Declares which capabilities a consumer type offers.
///
/// This replaces interface scanning: the pipeline asks the consumer type for its
/// capability list at subscribe time and builds one sink per entry. Declaring
/// nothing, or the same message type twice, is a convention violation reported
/// by [`MessagePipeline::subscribe`](crate::pipeline::MessagePipeline::subscribe).
///
/// ```rust,ignore
/// struct Auditor;
///
/// impl Consumer for Auditor {
///     fn capabilities(capabilities: &mut Capabilities<Self>) {
///         capabilities.consumes::<OrderPlaced>().selects::<Refund>();
///     }
/// }
/// ```
pub trait Consumer: Send + Sync + Sized + 'static {
    /// Registers the consume capabilities of `Self`.
    fn capabilities(capabilities: &mut Capabilities<Self>);
}
