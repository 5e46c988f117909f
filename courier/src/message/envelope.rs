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
use std::collections::HashMap;

use courier_core::pipeline::MessageHeaders;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transport::EndpointAddress;

/// A message as it travels between bus instances.
///
/// The payload is the JSON form of the message; `message_type` is the wire
/// name it was registered under in the
/// [`MessageTypeRegistry`](crate::registry::MessageTypeRegistry).
///
/// ```rust,ignore
/// let envelope = Envelope::new("PriceUpdate", json!({ "symbol": "AAPL", "price": 150.25 }))
///     .with_correlation_id("AAPL")
///     .with_source(bus.address().clone());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique id of this envelope, kept across redeliveries.
    pub message_id: Uuid,

    /// Registered wire name of the payload's type.
    pub message_type: String,

    /// Correlation id of correlated messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,

    /// Endpoint of the sending bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<EndpointAddress>,

    /// Endpoint the envelope was sent to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_address: Option<EndpointAddress>,

    /// How many times the transport delivered this envelope before.
    #[serde(default)]
    pub redelivery_count: u32,

    /// Free-form transport headers.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Serialized message.
    pub payload: serde_json::Value,
}

impl Envelope {
    /// Creates an envelope with a fresh time-ordered message id.
    #[must_use]
    pub fn new(message_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            message_type: message_type.into(),
            correlation_id: None,
            source_address: None,
            destination_address: None,
            redelivery_count: 0,
            headers: HashMap::new(),
            payload,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, address: EndpointAddress) -> Self {
        self.source_address = Some(address);
        self
    }

    #[must_use]
    pub fn with_destination(mut self, address: EndpointAddress) -> Self {
        self.destination_address = Some(address);
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// The same envelope, counted as delivered once more.
    #[must_use]
    pub fn redelivered(mut self) -> Self {
        self.redelivery_count = self.redelivery_count.saturating_add(1);
        self
    }

    /// Headers handed to consumers while this envelope's message is dispatched.
    #[must_use]
    pub fn message_headers(&self) -> MessageHeaders {
        MessageHeaders {
            message_id: Some(self.message_id),
            source_address: self.source_address.as_ref().map(ToString::to_string),
            correlation_id: self.correlation_id.clone(),
            redelivery_count: self.redelivery_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn optional_fields_are_omitted_on_the_wire() {
        let envelope = Envelope::new("Ping", json!({}));
        let value = serde_json::to_value(&envelope).expect("serialize");

        assert!(value.get("correlation_id").is_none());
        assert!(value.get("headers").is_none());
        assert_eq!(value["redelivery_count"], 0);
    }

    #[test]
    fn minimal_json_is_accepted() {
        let envelope: Envelope = serde_json::from_value(json!({
            "message_id": "0190b7a4-7c4a-7cc0-8d6e-1c0b9e4f2a11",
            "message_type": "Ping",
            "payload": null
        }))
        .expect("deserialize");

        assert_eq!(envelope.redelivery_count, 0);
        assert!(envelope.headers.is_empty());
        assert!(envelope.source_address.is_none());
    }

    #[test]
    fn headers_carry_transport_facts_to_consumers() {
        let source = EndpointAddress::parse("loopback://node-a/bus").expect("address");
        let envelope = Envelope::new("OrderShipped", json!({ "order_id": 7 }))
            .with_correlation_id("7")
            .with_source(source)
            .redelivered();

        let headers = envelope.message_headers();
        assert_eq!(headers.message_id, Some(envelope.message_id));
        assert_eq!(headers.source_address.as_deref(), Some("loopback://node-a/bus"));
        assert_eq!(headers.correlation_id.as_deref(), Some("7"));
        assert_eq!(headers.redelivery_count, 1);
    }
}
