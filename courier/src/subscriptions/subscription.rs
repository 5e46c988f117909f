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

use serde::{Deserialize, Serialize};

use crate::transport::EndpointAddress;

/// Interest of one endpoint in one message type.
///
/// With a correlation id only the messages of that conversation are wanted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    /// Wire name of the message type.
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// The subscribing bus instance.
    pub endpoint: EndpointAddress,
}

impl Subscription {
    #[must_use]
    pub fn new(
        message_type: impl Into<String>,
        correlation_id: Option<String>,
        endpoint: EndpointAddress,
    ) -> Self {
        Self {
            message_type: message_type.into(),
            correlation_id,
            endpoint,
        }
    }

    /// Whether a message with `correlation_id` is wanted by this subscription.
    #[must_use]
    pub fn wants(&self, correlation_id: Option<&str>) -> bool {
        match &self.correlation_id {
            None => true,
            Some(wanted) => correlation_id == Some(wanted.as_str()),
        }
    }
}

impl Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.correlation_id {
            Some(correlation_id) => {
                write!(f, "{}[{correlation_id}] @ {}", self.message_type, self.endpoint)
            }
            None => write!(f, "{} @ {}", self.message_type, self.endpoint),
        }
    }
}
