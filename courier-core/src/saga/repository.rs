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
use std::fmt::Debug;

use parking_lot::RwLock;
use tracing::trace;

use crate::saga::{Saga, SagaError, SagaId};

/// Storage for saga instances.
///
/// `create` only builds a new, unsaved instance; nothing is persisted until
/// `save` is called at the end of a successful transaction.
pub trait SagaRepository<S: Saga>: Send + Sync + Debug {
    /// A new instance with the given id.
    fn create(&self, id: SagaId) -> Result<S, SagaError> {
        Ok(S::with_id(id))
    }

    /// Persists `saga`, replacing any stored state with the same id.
    fn save(&self, saga: &S) -> Result<(), SagaError>;

    /// Every stored instance matching `predicate`.
    fn find(&self, predicate: &dyn Fn(&S) -> bool) -> Result<Vec<S>, SagaError>;

    /// The stored instance with `id`.
    fn find_by_id(&self, id: SagaId) -> Result<Option<S>, SagaError> {
        Ok(self
            .find(&|saga: &S| saga.saga_id() == id)?
            .into_iter()
            .next())
    }
}

/// A process-local [`SagaRepository`].
#[derive(Debug)]
pub struct InMemorySagaRepository<S> {
    sagas: RwLock<HashMap<SagaId, S>>,
}

impl<S> Default for InMemorySagaRepository<S> {
    fn default() -> Self {
        Self {
            sagas: RwLock::new(HashMap::new()),
        }
    }
}

impl<S: Saga> InMemorySagaRepository<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sagas.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sagas.read().is_empty()
    }
}

impl<S: Saga> SagaRepository<S> for InMemorySagaRepository<S> {
    fn save(&self, saga: &S) -> Result<(), SagaError> {
        trace!(saga_id = %saga.saga_id(), "Saving saga");
        self.sagas.write().insert(saga.saga_id(), saga.clone());
        Ok(())
    }

    fn find(&self, predicate: &dyn Fn(&S) -> bool) -> Result<Vec<S>, SagaError> {
        Ok(self
            .sagas
            .read()
            .values()
            .filter(|saga| predicate(saga))
            .cloned()
            .collect())
    }

    fn find_by_id(&self, id: SagaId) -> Result<Option<S>, SagaError> {
        Ok(self.sagas.read().get(&id).cloned())
    }
}
