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

//! # Courier
//!
//! A process-embedded publish/subscribe message bus. Components subscribe to
//! message types (optionally to one correlation id) on a local pipeline; the
//! bus delivers locally published and network-received messages to exactly
//! those consumers, and keeps a cache of which remote bus instances want
//! which message types so publishes can cross process boundaries.
//!
//! ## Key Concepts
//!
//! - **Bus (`Bus`)**: one running instance with its own endpoint, receive
//!   loop, subscription cache and optional subscription sync client.
//! - **Pipeline (`MessagePipeline`)**: local subscription and dispatch, from
//!   `courier-core`.
//! - **Subscription sync**: a `SubscriptionClient` per bus announces local
//!   subscriptions to a `SubscriptionService`, which re-broadcasts them to
//!   every other client's `LocalSubscriptionCache`.
//! - **Transports**: addresses resolve to `Endpoint`s; the in-memory
//!   `LoopbackNetwork` connects instances of one process.
//! - **Faults and poison**: failing consumers publish `Fault<M>`; envelopes no
//!   consumer ever accepts are forwarded to the poison endpoint.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::prelude::*;
//!
//! #[courier_message(wire)]
//! struct OrderPlaced {
//!     order_id: u64,
//! }
//!
//! let bus = Bus::builder().register::<OrderPlaced>("OrderPlaced").launch().await?;
//! bus.pipeline().subscribe_fn(|order: &OrderPlaced, _| {
//!     tracing::info!(order.order_id, "order placed");
//!     Ok(())
//! })?;
//! bus.publish(OrderPlaced { order_id: 7 }).await?;
//! bus.shutdown().await;
//! ```

extern crate self as courier;

/// Bus runtime, configuration and errors.
pub mod common;

/// Fault publication and poison envelope detection.
pub mod fault;

/// Envelopes and the subscription sync wire messages.
pub mod message;

/// Wire names of message types.
pub mod registry;

/// Subscription cache, sync client and subscription service.
pub mod subscriptions;

/// Endpoint addressing and transports.
pub mod transport;

/// A prelude module for conveniently importing the most commonly used items.
pub mod prelude {
    pub use async_trait::async_trait;
    pub use courier_core::prelude::*;
    pub use courier_macro::courier_message;

    pub use crate::common::{Bus, BusBuilder, BusError, CourierConfig};
    pub use crate::fault::{PoisonConfig, PoisonReason, PoisonTracker};
    pub use crate::message::{Envelope, SubscriptionChange};
    pub use crate::registry::{MessageTypeRegistry, RegistryError};
    pub use crate::subscriptions::{
        InMemorySubscriptionRepository, LocalSubscriptionCache, Subscription,
        SubscriptionRepository, SubscriptionService,
    };
    pub use crate::transport::{
        Endpoint, EndpointAddress, EndpointResolver, LoopbackNetwork, TransportError,
    };
}
