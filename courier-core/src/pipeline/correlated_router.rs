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
use std::fmt::Debug;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::trace;

use crate::pipeline::sink::{DeliveryReport, SinkEntry, SinkSet};
use crate::pipeline::{DispatchContext, SinkId};
use crate::traits::{CorrelationKey, Message, MessageKeyFn};

/// Routes a correlated message type by key.
///
/// Holds at most one sink per correlation key plus a general bucket for
/// consumers that want every conversation. A message reaches the sink of its
/// own key and the whole general bucket, never a sink keyed differently.
pub struct CorrelatedRouter {
    message_key: MessageKeyFn,
    keyed: DashMap<CorrelationKey, Arc<SinkEntry>>,
    general: SinkSet,
}

impl Debug for CorrelatedRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelatedRouter")
            .field("keyed", &self.keyed.len())
            .field("general", &self.general.len())
            .finish()
    }
}

impl CorrelatedRouter {
    pub(crate) fn new(message_key: MessageKeyFn) -> Self {
        Self {
            message_key,
            keyed: DashMap::new(),
            general: SinkSet::default(),
        }
    }

    /// Registers `entry` for `key`, replacing any previous sink for that key.
    pub(crate) fn connect_keyed(&self, key: CorrelationKey, entry: Arc<SinkEntry>) -> SinkId {
        let id = entry.id();
        if let Some(previous) = self.keyed.insert(key.clone(), entry) {
            trace!(correlation_id = %key, replaced = ?previous.id(), "Replaced correlated sink");
            previous.deactivate();
        }
        id
    }

    /// Removes the sink for `key` only if it is still the registration `id`.
    pub(crate) fn disconnect_keyed(&self, key: &CorrelationKey, id: SinkId) -> bool {
        match self.keyed.remove_if(key, |_, entry| entry.id() == id) {
            Some((_, entry)) => {
                entry.deactivate();
                true
            }
            None => false,
        }
    }

    pub(crate) fn connect_general(&self, entry: Arc<SinkEntry>) -> SinkId {
        self.general.insert(entry)
    }

    pub(crate) fn disconnect_general(&self, id: SinkId) -> bool {
        self.general.remove(id)
    }

    /// Number of keyed registrations.
    #[must_use]
    pub fn keyed_len(&self) -> usize {
        self.keyed.len()
    }

    /// Number of general registrations.
    #[must_use]
    pub fn general_len(&self) -> usize {
        self.general.len()
    }

    pub(crate) fn route(
        &self,
        message: &dyn Message,
        context: &DispatchContext,
        report: &mut DeliveryReport,
    ) {
        if let Some(key) = (self.message_key)(message) {
            // clone out of the map so the shard lock is released before consuming
            let keyed = self.keyed.get(&key).map(|entry| Arc::clone(entry.value()));
            match keyed {
                Some(entry) => entry.deliver(message, context, report),
                None => trace!(correlation_id = %key, "No sink registered for correlation id"),
            }
        }
        self.general.deliver_all(message, context, report);
    }

    pub(crate) fn clear(&self) {
        for entry in &self.keyed {
            entry.value().deactivate();
        }
        self.keyed.clear();
        self.general.clear();
    }
}
