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

pub use capabilities::Capabilities;
pub use correlated_router::CorrelatedRouter;
pub use dispatch_context::{DispatchContext, MessageHeaders, Publish};
pub use error::{ConventionViolation, SubscribeError};
pub use message_pipeline::{DispatchOutcome, MessagePipeline};
pub use sink::SinkId;
pub use type_router::{FaultFactory, TypeRouter, TypeRouterSpec};
pub use unsubscribe::UnsubscribeAction;

mod capabilities;
mod correlated_router;
mod dispatch_context;
mod error;
mod message_pipeline;
pub(crate) mod sink;
mod type_router;
mod unsubscribe;
