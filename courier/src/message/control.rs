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
use courier_core::subscription::ChangeType;
use courier_macro::courier_message;

use crate::registry::MessageTypeRegistry;
use crate::subscriptions::Subscription;
use crate::transport::EndpointAddress;

/// Asks the subscription service for a snapshot of every known subscription.
///
/// Sent by a sync client on start; registers the requester for broadcasts.
#[courier_message(wire)]
#[derive(PartialEq, Eq)]
pub struct CacheUpdateRequest {
    pub requesting_uri: EndpointAddress,
}

/// The service's answer to a [`CacheUpdateRequest`].
#[courier_message(wire)]
#[derive(PartialEq, Eq)]
pub struct CacheUpdateResponse {
    pub subscriptions: Vec<Subscription>,
}

/// One added or removed subscription of `endpoint_uri`.
///
/// Clients send these point-to-point to the service; the service
/// re-broadcasts accepted ones to every known client.
#[courier_message(wire)]
#[derive(PartialEq, Eq)]
pub struct SubscriptionChange {
    pub message_type: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
    pub endpoint_uri: EndpointAddress,
    pub change_type: ChangeType,
}

impl SubscriptionChange {
    /// The subscription this change is about.
    #[must_use]
    pub fn subscription(&self) -> Subscription {
        Subscription::new(
            self.message_type.clone(),
            self.correlation_id.clone(),
            self.endpoint_uri.clone(),
        )
    }

    #[must_use]
    pub fn of(subscription: Subscription, change_type: ChangeType) -> Self {
        Self {
            message_type: subscription.message_type,
            correlation_id: subscription.correlation_id,
            endpoint_uri: subscription.endpoint,
            change_type,
        }
    }
}

/// Tells the service to stop broadcasting to `requesting_uri`.
#[courier_message(wire)]
#[derive(PartialEq, Eq)]
pub struct CancelSubscriptionUpdates {
    pub requesting_uri: EndpointAddress,
}

/// Registers the subscription sync messages under their reserved wire names.
pub(crate) fn register_control_messages(registry: &MessageTypeRegistry) {
    registry
        .register::<CacheUpdateRequest>("courier.CacheUpdateRequest")
        .register::<CacheUpdateResponse>("courier.CacheUpdateResponse")
        .register::<SubscriptionChange>("courier.SubscriptionChange")
        .register::<CancelSubscriptionUpdates>("courier.CancelSubscriptionUpdates");
}
