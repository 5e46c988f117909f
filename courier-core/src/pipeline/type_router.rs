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
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::fault::Fault;
use crate::pipeline::sink::{DeliveryReport, Sink, SinkEntry, SinkSet};
use crate::pipeline::{CorrelatedRouter, DispatchContext, SinkId};
use crate::traits::{Message, MessageKeyFn, MessageType};

/// Builds the [`Fault`] for a message of the router's type.
pub type FaultFactory = fn(&dyn Message, &anyhow::Error) -> Option<Box<dyn Message>>;

/// Everything needed to build the router of one concrete message type.
///
/// Produced by generic code at subscribe time, so the type-erased router can
/// still construct a typed `Fault<M>` later.
#[derive(Clone, Copy, Debug)]
pub struct TypeRouterSpec {
    message_type: MessageType,
    fault: FaultFactory,
}

impl TypeRouterSpec {
    /// Spec for message type `M`.
    #[must_use]
    pub fn of<M: Message + Clone>() -> Self {
        Self {
            message_type: MessageType::of::<M>(),
            fault: Fault::<M>::capture,
        }
    }

    /// The routed message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }
}

/// The ordered sink set of one concrete message type.
pub struct TypeRouter {
    spec: TypeRouterSpec,
    sinks: SinkSet,
    correlated: Mutex<Option<Arc<CorrelatedRouter>>>,
}

impl Debug for TypeRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeRouter")
            .field("message_type", &self.spec.message_type)
            .field("sinks", &self.sinks.len())
            .finish()
    }
}

impl TypeRouter {
    pub(crate) fn new(spec: TypeRouterSpec) -> Self {
        trace!(message_type = %spec.message_type, "Creating type router");
        Self {
            spec,
            sinks: SinkSet::default(),
            correlated: Mutex::new(None),
        }
    }

    /// The routed message type.
    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.spec.message_type
    }

    /// Number of sinks directly attached to this router.
    ///
    /// A correlated router counts as a single sink.
    #[must_use]
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// The correlated router of this type, if a correlated consumer ever subscribed.
    #[must_use]
    pub fn correlated_router(&self) -> Option<Arc<CorrelatedRouter>> {
        self.correlated.lock().clone()
    }

    pub(crate) fn connect(&self, entry: Arc<SinkEntry>) -> SinkId {
        self.sinks.insert(entry)
    }

    pub(crate) fn disconnect(&self, id: SinkId) -> bool {
        self.sinks.remove(id)
    }

    /// Returns the correlated router, installing it as a sink on first use.
    pub(crate) fn correlated(&self, message_key: MessageKeyFn) -> Arc<CorrelatedRouter> {
        let mut slot = self.correlated.lock();
        if let Some(router) = slot.as_ref() {
            return Arc::clone(router);
        }
        let router = Arc::new(CorrelatedRouter::new(message_key));
        self.sinks
            .insert(Arc::new(SinkEntry::new(Sink::Correlated(Arc::clone(&router)))));
        *slot = Some(Arc::clone(&router));
        router
    }

    pub(crate) fn route(
        &self,
        message: &dyn Message,
        context: &DispatchContext,
        report: &mut DeliveryReport,
    ) {
        self.sinks.deliver_all(message, context, report);
    }

    pub(crate) fn build_fault(
        &self,
        message: &dyn Message,
        error: &anyhow::Error,
    ) -> Option<Box<dyn Message>> {
        (self.spec.fault)(message, error)
    }

    pub(crate) fn clear(&self) {
        if let Some(router) = self.correlated.lock().take() {
            router.clear();
        }
        self.sinks.clear();
    }
}
