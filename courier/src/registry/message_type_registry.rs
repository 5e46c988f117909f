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
use std::any::{type_name, TypeId};
use std::fmt::Debug;
use std::sync::Arc;

use courier_core::fault::Fault;
use courier_core::traits::{correlation_key_of, CorrelatedBy, Message, MessageKeyFn};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::message::Envelope;
use crate::registry::RegistryError;

type DeserializerFn =
    Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn Message>, serde_json::Error> + Send + Sync>;

type SerializerFn =
    Arc<dyn Fn(&dyn Message) -> Option<Result<serde_json::Value, serde_json::Error>> + Send + Sync>;

/// Maps wire names to message types and back.
///
/// Only registered types can leave or enter a bus instance. Every type is
/// registered under a stable name, which must be the same on every instance
/// that exchanges it.
///
/// ```rust,ignore
/// let registry = MessageTypeRegistry::new();
/// registry.register::<PriceUpdate>("PriceUpdate");
/// registry.register_correlated::<OrderShipped>("OrderShipped");
/// registry.register_fault::<OrderShipped>()?;
/// ```
#[derive(Default)]
pub struct MessageTypeRegistry {
    deserializers: DashMap<String, DeserializerFn>,
    names: DashMap<TypeId, String>,
    serializers: DashMap<TypeId, SerializerFn>,
    correlation: DashMap<TypeId, MessageKeyFn>,
}

impl Debug for MessageTypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageTypeRegistry")
            .field("registered_types", &self.deserializers.len())
            .field("correlated_types", &self.correlation.len())
            .finish()
    }
}

impl MessageTypeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `M` under `name`.
    ///
    /// Registering the same name again replaces the earlier type.
    pub fn register<M>(&self, name: &str) -> &Self
    where
        M: Message + Clone + Serialize + DeserializeOwned,
    {
        let deserializer: DeserializerFn = Arc::new(|value: &serde_json::Value| {
            let message: M = serde_json::from_value(value.clone())?;
            Ok(Box::new(message) as Box<dyn Message>)
        });
        self.deserializers.insert(name.to_string(), deserializer);

        let serializer: SerializerFn = Arc::new(|message: &dyn Message| {
            message
                .as_any()
                .downcast_ref::<M>()
                .map(serde_json::to_value)
        });
        let type_id = TypeId::of::<M>();
        self.serializers.insert(type_id, serializer);
        self.names.insert(type_id, name.to_string());
        trace!(name, rust_type = type_name::<M>(), "Message type registered");
        self
    }

    /// Registers `M` under its Rust type name.
    ///
    /// Type paths change when code moves; prefer [`register`](Self::register)
    /// for types shared between separately built programs.
    pub fn register_with_type_name<M>(&self) -> &Self
    where
        M: Message + Clone + Serialize + DeserializeOwned,
    {
        self.register::<M>(type_name::<M>())
    }

    /// Registers a correlated `M`; its envelopes carry the correlation id.
    pub fn register_correlated<M>(&self, name: &str) -> &Self
    where
        M: Message + Clone + Serialize + DeserializeOwned + CorrelatedBy,
    {
        self.register::<M>(name);
        self.correlation
            .insert(TypeId::of::<M>(), correlation_key_of::<M>);
        self
    }

    /// Registers `Fault<M>` as `Fault<name>`, where `name` is `M`'s wire name.
    ///
    /// # Errors
    /// [`RegistryError::Unregistered`] if `M` itself is not registered yet.
    pub fn register_fault<M>(&self) -> Result<&Self, RegistryError>
    where
        M: Message + Clone + Serialize + DeserializeOwned,
    {
        let name = self
            .wire_name(TypeId::of::<M>())
            .ok_or(RegistryError::Unregistered(type_name::<M>()))?;
        Ok(self.register::<Fault<M>>(&format!("Fault<{name}>")))
    }

    /// The wire name of a Rust type.
    #[must_use]
    pub fn wire_name(&self, type_id: TypeId) -> Option<String> {
        self.names.get(&type_id).map(|name| name.clone())
    }

    /// Whether a wire name is known.
    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.deserializers.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.deserializers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deserializers.is_empty()
    }

    /// Every registered wire name.
    pub fn type_names(&self) -> impl Iterator<Item = String> + '_ {
        self.deserializers.iter().map(|entry| entry.key().clone())
    }

    /// Wraps `message` in an envelope.
    ///
    /// # Errors
    /// [`RegistryError::Unregistered`] for unregistered types and
    /// [`RegistryError::Serialization`] if serde rejects the message.
    pub fn encode(&self, message: &dyn Message) -> Result<Envelope, RegistryError> {
        let message_type = message.message_type();
        let name = self
            .wire_name(message_type.id())
            .ok_or(RegistryError::Unregistered(message_type.name()))?;
        let serializer = self
            .serializers
            .get(&message_type.id())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RegistryError::Unregistered(message_type.name()))?;
        let payload = serializer(message)
            .ok_or(RegistryError::Unregistered(message_type.name()))?
            .map_err(|source| RegistryError::Serialization {
                message_type: name.clone(),
                source,
            })?;

        let mut envelope = Envelope::new(name, payload);
        let key = self
            .correlation
            .get(&message_type.id())
            .and_then(|extract| (*extract.value())(message));
        if let Some(key) = key {
            envelope = envelope.with_correlation_id(key.into_string());
        }
        Ok(envelope)
    }

    /// Rebuilds the message carried by `envelope`.
    ///
    /// # Errors
    /// [`RegistryError::UnknownMessageType`] for unknown wire names and
    /// [`RegistryError::Serialization`] for payloads that do not fit the type.
    pub fn decode(&self, envelope: &Envelope) -> Result<Box<dyn Message>, RegistryError> {
        let deserializer = self
            .deserializers
            .get(&envelope.message_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::UnknownMessageType(envelope.message_type.clone()))?;
        deserializer(&envelope.payload).map_err(|source| RegistryError::Serialization {
            message_type: envelope.message_type.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use courier_macro::courier_message;
    use serde_json::json;

    use super::*;

    #[courier_message(wire)]
    #[derive(PartialEq)]
    struct PriceUpdate {
        symbol: String,
        price: f64,
    }

    #[courier_message(wire, correlated_by = order_id)]
    #[derive(PartialEq)]
    struct OrderShipped {
        order_id: u64,
    }

    #[test]
    fn registered_messages_survive_the_wire() {
        let registry = MessageTypeRegistry::new();
        registry.register::<PriceUpdate>("PriceUpdate");
        let update = PriceUpdate {
            symbol: "AAPL".into(),
            price: 150.25,
        };

        let envelope = registry.encode(&update).expect("encode");
        assert_eq!(envelope.message_type, "PriceUpdate");
        assert_eq!(envelope.payload, json!({ "symbol": "AAPL", "price": 150.25 }));
        assert!(envelope.correlation_id.is_none());

        let decoded = registry.decode(&envelope).expect("decode");
        assert_eq!(
            decoded.as_ref().as_any().downcast_ref::<PriceUpdate>(),
            Some(&update)
        );
    }

    #[test]
    fn correlated_types_stamp_the_envelope() {
        let registry = MessageTypeRegistry::new();
        registry.register_correlated::<OrderShipped>("OrderShipped");

        let envelope = registry.encode(&OrderShipped { order_id: 7 }).expect("encode");
        assert_eq!(envelope.correlation_id.as_deref(), Some("7"));
    }

    #[test]
    fn unknown_and_unregistered_types_are_rejected() {
        let registry = MessageTypeRegistry::new();
        let update = PriceUpdate {
            symbol: "AAPL".into(),
            price: 1.0,
        };

        assert!(matches!(
            registry.encode(&update),
            Err(RegistryError::Unregistered(_))
        ));
        assert!(matches!(
            registry.decode(&Envelope::new("PriceUpdate", json!({}))),
            Err(RegistryError::UnknownMessageType(_))
        ));
    }

    #[test]
    fn malformed_payloads_fail_to_decode() {
        let registry = MessageTypeRegistry::new();
        registry.register::<PriceUpdate>("PriceUpdate");

        let result = registry.decode(&Envelope::new("PriceUpdate", json!({ "symbol": 3 })));
        assert!(matches!(result, Err(RegistryError::Serialization { .. })));
    }

    #[test]
    fn faults_are_registered_after_their_message() {
        let registry = MessageTypeRegistry::new();
        assert!(registry.register_fault::<PriceUpdate>().is_err());

        registry.register::<PriceUpdate>("PriceUpdate");
        registry.register_fault::<PriceUpdate>().expect("register fault");
        assert!(registry.is_registered("Fault<PriceUpdate>"));
        assert_eq!(registry.len(), 2);
    }
}
