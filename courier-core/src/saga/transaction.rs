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
use tracing::trace;

use crate::saga::{Saga, SagaError, SagaRepository};

/// Unit of work around one saga message.
///
/// The handler mutates a working copy. [`commit`](SagaTransaction::commit)
/// persists it; [`rollback`](SagaTransaction::rollback), or simply dropping
/// the transaction, discards it and leaves the stored instance as it was.
#[derive(Debug)]
pub struct SagaTransaction<S: Saga> {
    working: S,
}

impl<S: Saga> SagaTransaction<S> {
    #[must_use]
    pub fn begin(instance: S) -> Self {
        trace!(saga_id = %instance.saga_id(), "Saga transaction started");
        Self { working: instance }
    }

    /// The working copy.
    pub fn state_mut(&mut self) -> &mut S {
        &mut self.working
    }

    /// Saves the working copy and returns it.
    pub fn commit(self, repository: &dyn SagaRepository<S>) -> Result<S, SagaError> {
        repository.save(&self.working)?;
        trace!(saga_id = %self.working.saga_id(), "Saga transaction committed");
        Ok(self.working)
    }

    /// Discards the working copy.
    pub fn rollback(self) {
        trace!(saga_id = %self.working.saga_id(), "Saga transaction rolled back");
    }
}
