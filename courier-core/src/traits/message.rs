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
use std::any::{Any, TypeId};
use std::fmt::{self, Debug, Display};
use std::hash::{Hash, Hasher};

use dyn_clone::DynClone;
use serde::{Deserialize, Serialize};

/// A marker trait for types that can travel through a Courier pipeline.
///
/// Messages must be safe to share between dispatch threads, cloneable as trait
/// objects (faults and remote publishes keep their own copies), debuggable and
/// downcastable back to their concrete type.
///
/// A blanket implementation is provided, so any `Clone + Debug + Send + Sync + 'static`
/// type is a message. There is no message hierarchy: routing is keyed on the
/// concrete runtime type only.
///
/// Beware of calling [`Message::message_type`] on a `Box<dyn Message>` directly;
/// the box itself satisfies the blanket impl. Deref first (`boxed.as_ref()`).
pub trait Message: DynClone + Any + Send + Sync + Debug {
    /// Returns the message as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns the runtime type descriptor used to resolve the message's router.
    fn message_type(&self) -> MessageType;
}

dyn_clone::clone_trait_object!(Message);

impl<T> Message for T
where
    T: Any + Send + Sync + Debug + DynClone + 'static,
{
    #[inline]
    fn as_any(&self) -> &dyn Any {
        self
    }

    #[inline]
    fn message_type(&self) -> MessageType {
        MessageType::of::<T>()
    }
}

/// Runtime descriptor of a concrete message type.
///
/// Equality and hashing only consider the [`TypeId`]; the name is carried for
/// logging and for deriving wire names.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// Descriptor for `M`.
    #[must_use]
    pub fn of<M: 'static>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    /// The [`TypeId`] routers are keyed on.
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// The fully qualified Rust type name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// String-serialized correlation key.
///
/// Correlated routers and subscription records compare keys in this form so
/// that keys survive a trip through the subscription service unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationKey(String);

impl CorrelationKey {
    /// Builds a key from any displayable correlation value.
    pub fn from_value(value: &impl Display) -> Self {
        Self(value.to_string())
    }

    /// The serialized key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the serialized form.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<String> for CorrelationKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CorrelationKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability of a message that belongs to a logical conversation.
///
/// Messages implementing this trait can be routed to consumers registered
/// for one specific key, and can address saga instances.
///
/// ```rust,ignore
/// #[derive(Clone, Debug)]
/// struct OrderShipped { order_id: Uuid }
///
/// impl CorrelatedBy for OrderShipped {
///     type Key = Uuid;
///     fn correlation_id(&self) -> Uuid { self.order_id }
/// }
/// ```
pub trait CorrelatedBy {
    /// The application-level key type.
    type Key: Clone + Eq + Hash + Display + Send + Sync + 'static;

    /// The key of the conversation this message belongs to.
    fn correlation_id(&self) -> Self::Key;

    /// The key in the string form used for routing.
    fn correlation_key(&self) -> CorrelationKey {
        CorrelationKey::from_value(&self.correlation_id())
    }
}

/// Extracts the correlation key of a type-erased message, if it is an `M`.
pub type MessageKeyFn = fn(&dyn Message) -> Option<CorrelationKey>;

/// [`MessageKeyFn`] for a correlated message type.
#[must_use]
pub fn correlation_key_of<M>(message: &dyn Message) -> Option<CorrelationKey>
where
    M: CorrelatedBy + 'static,
{
    message
        .as_any()
        .downcast_ref::<M>()
        .map(CorrelatedBy::correlation_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug)]
    struct Ping;

    #[derive(Clone, Debug)]
    struct Keyed(u32);

    impl CorrelatedBy for Keyed {
        type Key = u32;

        fn correlation_id(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn message_type_is_keyed_on_the_concrete_type() {
        let boxed: Box<dyn Message> = Box::new(Ping);
        assert_eq!(boxed.as_ref().message_type(), MessageType::of::<Ping>());
        assert_ne!(boxed.as_ref().message_type(), MessageType::of::<Keyed>());
        assert!(boxed.as_ref().message_type().name().ends_with("Ping"));
    }

    #[test]
    fn correlation_key_is_extracted_only_for_the_matching_type() {
        let keyed = Keyed(7);
        assert_eq!(
            correlation_key_of::<Keyed>(&keyed),
            Some(CorrelationKey::from("7"))
        );
        assert_eq!(correlation_key_of::<Keyed>(&Ping), None);
    }
}
