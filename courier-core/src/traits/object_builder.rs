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
use std::fmt::Debug;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

/// A type-erased component produced by an [`ObjectBuilder`].
pub type Component = Box<dyn Any + Send + Sync>;

type Factory = Arc<dyn Fn() -> Component + Send + Sync>;

/// Creates short-lived consumer instances for component sinks.
///
/// A component sink asks the builder for a fresh instance per message and
/// hands it back through [`release`](ObjectBuilder::release) once the message
/// has been consumed.
pub trait ObjectBuilder: Send + Sync + Debug {
    /// Builds a new instance of the component identified by `component`.
    fn build(&self, component: TypeId) -> Option<Component>;

    /// Reports whether `build` can succeed for `component`.
    ///
    /// Checked at subscribe time so that unbuildable components fail early.
    fn can_build(&self, component: TypeId) -> bool;

    /// Returns an instance obtained from [`build`](ObjectBuilder::build).
    fn release(&self, component: Component) {
        drop(component);
    }
}

/// An [`ObjectBuilder`] backed by registered factory closures.
#[derive(Default)]
pub struct FactoryObjectBuilder {
    factories: DashMap<TypeId, Factory>,
}

impl Debug for FactoryObjectBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryObjectBuilder")
            .field("registered_components", &self.factories.len())
            .finish()
    }
}

impl FactoryObjectBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the factory used to build `C`.
    pub fn register<C, F>(&self, factory: F) -> &Self
    where
        C: Send + Sync + 'static,
        F: Fn() -> C + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move || Box::new(factory()) as Component);
        self.factories.insert(TypeId::of::<C>(), factory);
        self
    }

    /// Registers `C::default` as the factory for `C`.
    pub fn register_default<C>(&self) -> &Self
    where
        C: Default + Send + Sync + 'static,
    {
        self.register::<C, _>(C::default)
    }
}

impl ObjectBuilder for FactoryObjectBuilder {
    fn build(&self, component: TypeId) -> Option<Component> {
        // clone the factory out so the shard lock is not held while it runs
        let factory = self.factories.get(&component).map(|f| Arc::clone(f.value()))?;
        trace!(?component, "Building component");
        Some(factory())
    }

    fn can_build(&self, component: TypeId) -> bool {
        self.factories.contains_key(&component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct Handler {
        calls: usize,
    }

    #[test]
    fn builds_registered_components_only() {
        let builder = FactoryObjectBuilder::new();
        builder.register_default::<Handler>();

        assert!(builder.can_build(TypeId::of::<Handler>()));
        assert!(!builder.can_build(TypeId::of::<String>()));

        let built = builder.build(TypeId::of::<Handler>()).expect("registered");
        assert_eq!(built.downcast_ref::<Handler>(), Some(&Handler::default()));
        assert!(builder.build(TypeId::of::<String>()).is_none());
    }
}
