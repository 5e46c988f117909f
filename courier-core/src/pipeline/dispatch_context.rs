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

use static_assertions::assert_impl_all;
use tracing::warn;
use uuid::Uuid;

use crate::traits::Message;

/// Something that can put messages back onto the bus from inside a handler.
///
/// The pipeline implements this for purely local delivery; the bus runtime
/// implements it to also reach remote subscribers.
pub trait Publish: Send + Sync + Debug {
    /// Publishes a message to every interested consumer.
    fn publish(&self, message: Box<dyn Message>);

    /// Publishes a [`Fault`](crate::fault::Fault) produced by a failing sink.
    ///
    /// Implementations must not turn failures while consuming a fault into
    /// further faults.
    fn publish_fault(&self, fault: Box<dyn Message>) {
        self.publish(fault);
    }
}

/// Transport-level facts about the message being dispatched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageHeaders {
    /// Identifier of the envelope the message arrived in.
    pub message_id: Option<Uuid>,
    /// Address of the endpoint that sent the message.
    pub source_address: Option<String>,
    /// Correlation id carried on the envelope.
    pub correlation_id: Option<String>,
    /// How many times the transport has redelivered this envelope.
    pub redelivery_count: u32,
}

/// Per-dispatch context handed to every consumer.
///
/// It is created for each dispatch and threaded through the call chain; there
/// is no ambient "current message" state.
#[derive(Clone, Default)]
pub struct DispatchContext {
    headers: MessageHeaders,
    publisher: Option<Arc<dyn Publish>>,
    fault: bool,
}

impl Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("headers", &self.headers)
            .field("has_publisher", &self.publisher.is_some())
            .field("fault", &self.fault)
            .finish()
    }
}

impl DispatchContext {
    /// Context whose handlers publish through `publisher`.
    #[must_use]
    pub fn new(publisher: Arc<dyn Publish>) -> Self {
        Self {
            headers: MessageHeaders::default(),
            publisher: Some(publisher),
            fault: false,
        }
    }

    /// Context without a publisher; `publish` calls are dropped with a warning.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Replaces the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: MessageHeaders) -> Self {
        self.headers = headers;
        self
    }

    /// Transport headers of the message being consumed.
    #[must_use]
    pub const fn headers(&self) -> &MessageHeaders {
        &self.headers
    }

    /// `true` while a fault message is being dispatched.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        self.fault
    }

    /// Publishes a follow-up message.
    pub fn publish<M: Message>(&self, message: M) {
        self.publish_boxed(Box::new(message));
    }

    /// Publishes an already boxed message.
    pub fn publish_boxed(&self, message: Box<dyn Message>) {
        match &self.publisher {
            Some(publisher) => publisher.publish(message),
            None => warn!(message = ?message, "No publisher in dispatch context, message dropped"),
        }
    }

    pub(crate) fn publisher(&self) -> Option<&Arc<dyn Publish>> {
        self.publisher.as_ref()
    }

    pub(crate) fn has_publisher(&self) -> bool {
        self.publisher.is_some()
    }

    pub(crate) fn with_publisher(mut self, publisher: Arc<dyn Publish>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Context used while dispatching a fault produced under `self`.
    #[must_use]
    pub fn for_fault(&self) -> Self {
        Self {
            headers: self.headers.clone(),
            publisher: self.publisher.clone(),
            fault: true,
        }
    }
}

assert_impl_all!(DispatchContext: Send, Sync);
