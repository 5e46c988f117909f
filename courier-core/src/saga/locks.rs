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
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::lock_api::ArcMutexGuard;
use parking_lot::{Mutex, RawMutex};

use crate::saga::SagaId;

/// Per-saga-id mutual exclusion.
///
/// Messages for the same id run one after another; different ids proceed in
/// parallel. Lock entries are removed once nobody holds or waits for them.
#[derive(Debug, Default)]
pub(crate) struct SagaLocks {
    locks: DashMap<SagaId, Arc<Mutex<()>>>,
}

impl SagaLocks {
    pub(crate) fn acquire(&self, id: SagaId) -> SagaLockGuard<'_> {
        let lock = Arc::clone(self.locks.entry(id).or_default().value());
        SagaLockGuard {
            guard: Some(lock.lock_arc()),
            locks: self,
            id,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

pub(crate) struct SagaLockGuard<'a> {
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
    locks: &'a SagaLocks,
    id: SagaId,
}

impl Drop for SagaLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .locks
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
