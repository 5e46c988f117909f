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
use std::fmt::{self, Display};

use derive_new::new;
use serde::{Deserialize, Serialize};

use crate::traits::{CorrelationKey, MessageType};

/// Direction of a subscription change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    /// The first local subscription for a key appeared.
    Added,
    /// The last local subscription for a key went away.
    Removed,
}

/// What a subscription is counted against: a message type, optionally
/// narrowed to one correlation id.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    message_type: MessageType,
    correlation_id: Option<CorrelationKey>,
}

impl SubscriptionKey {
    /// Key for every message of `message_type`.
    #[must_use]
    pub const fn new(message_type: MessageType) -> Self {
        Self {
            message_type,
            correlation_id: None,
        }
    }

    /// Key for one conversation of `message_type`.
    #[must_use]
    pub const fn correlated(message_type: MessageType, correlation_id: CorrelationKey) -> Self {
        Self {
            message_type,
            correlation_id: Some(correlation_id),
        }
    }

    #[must_use]
    pub const fn message_type(&self) -> MessageType {
        self.message_type
    }

    #[must_use]
    pub const fn correlation_id(&self) -> Option<&CorrelationKey> {
        self.correlation_id.as_ref()
    }
}

impl Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.correlation_id {
            Some(correlation_id) => write!(f, "{}[{correlation_id}]", self.message_type),
            None => write!(f, "{}", self.message_type),
        }
    }
}

/// A 0→1 or 1→0 transition of a [`SubscriptionKey`]'s reference count.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub key: SubscriptionKey,
    pub change: ChangeType,
}

impl SubscriptionEvent {
    #[must_use]
    pub fn added(key: SubscriptionKey) -> Self {
        Self::new(key, ChangeType::Added)
    }

    #[must_use]
    pub fn removed(key: SubscriptionKey) -> Self {
        Self::new(key, ChangeType::Removed)
    }
}

/// Receives subscription transitions from a
/// [`SubscriptionEventBroadcaster`](super::SubscriptionEventBroadcaster).
///
/// Observers are called while the broadcaster's count table is locked so that
/// events arrive in transition order. They must return quickly and must not
/// subscribe or unsubscribe on the same pipeline; hand the event to a channel
/// instead.
pub trait SubscriptionObserver: Send + Sync {
    fn on_change(&self, event: &SubscriptionEvent);
}

impl<F> SubscriptionObserver for F
where
    F: Fn(&SubscriptionEvent) + Send + Sync,
{
    fn on_change(&self, event: &SubscriptionEvent) {
        self(event);
    }
}
