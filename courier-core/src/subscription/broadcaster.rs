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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::subscription::{SubscriptionEvent, SubscriptionKey, SubscriptionObserver};

/// Handle of a registered observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Reference-counts local subscriptions per [`SubscriptionKey`].
///
/// Many local consumers of the same key collapse into one `Added` event when
/// the first subscribes and one `Removed` event when the last unsubscribes.
/// Counts for a key are updated under a single lock, so two racing first
/// subscriptions still produce exactly one `Added`.
#[derive(Default)]
pub struct SubscriptionEventBroadcaster {
    counts: Mutex<HashMap<SubscriptionKey, usize>>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn SubscriptionObserver>)>>,
    next_observer: AtomicU64,
}

impl Debug for SubscriptionEventBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEventBroadcaster")
            .field("keys", &self.counts.lock().len())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl SubscriptionEventBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one more subscription for `key`.
    ///
    /// Returns `true` if this was the first one, in which case observers have
    /// been told about the `Added` transition.
    pub fn increment(&self, key: &SubscriptionKey) -> bool {
        let mut counts = self.counts.lock();
        let count = counts.entry(key.clone()).or_insert(0);
        *count += 1;
        trace!(%key, count = *count, "Subscription count incremented");
        if *count == 1 {
            self.notify(&SubscriptionEvent::added(key.clone()));
            true
        } else {
            false
        }
    }

    /// Counts one subscription less for `key`.
    ///
    /// Returns `true` if this was the last one, in which case observers have
    /// been told about the `Removed` transition. Decrementing a key that is not
    /// counted is a no-op.
    pub fn decrement(&self, key: &SubscriptionKey) -> bool {
        let mut counts = self.counts.lock();
        let Some(count) = counts.get_mut(key) else {
            trace!(%key, "Decrement of an uncounted subscription ignored");
            return false;
        };
        *count -= 1;
        trace!(%key, count = *count, "Subscription count decremented");
        if *count == 0 {
            counts.remove(key);
            self.notify(&SubscriptionEvent::removed(key.clone()));
            true
        } else {
            false
        }
    }

    /// Current count for `key`.
    #[must_use]
    pub fn count(&self, key: &SubscriptionKey) -> usize {
        self.counts.lock().get(key).copied().unwrap_or(0)
    }

    /// Every key with at least one subscription.
    #[must_use]
    pub fn active_keys(&self) -> Vec<SubscriptionKey> {
        self.counts.lock().keys().cloned().collect()
    }

    /// Drops every count, emitting `Removed` for each key that was active.
    ///
    /// Returns how many keys were removed.
    pub fn reset(&self) -> usize {
        let mut counts = self.counts.lock();
        let removed: Vec<_> = counts.drain().map(|(key, _)| key).collect();
        for key in &removed {
            self.notify(&SubscriptionEvent::removed(key.clone()));
        }
        debug!(removed = removed.len(), "Subscription counts reset");
        removed.len()
    }

    /// Registers an observer.
    ///
    /// The observer first receives an `Added` event for every key that is
    /// already active, then every later transition. Both happen under the
    /// count lock, so no transition is missed or seen twice.
    pub fn add_observer(&self, observer: impl SubscriptionObserver + 'static) -> ObserverId {
        let counts = self.counts.lock();
        let observer: Arc<dyn SubscriptionObserver> = Arc::new(observer);
        for key in counts.keys() {
            observer.on_change(&SubscriptionEvent::added(key.clone()));
        }
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        debug!(?id, replayed = counts.len(), "Subscription observer added");
        id
    }

    /// Unregisters an observer. Returns `false` if it was not registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        before != observers.len()
    }

    fn notify(&self, event: &SubscriptionEvent) {
        for (_, observer) in self.observers.read().iter() {
            observer.on_change(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::subscription::ChangeType;
    use crate::traits::{CorrelationKey, MessageType};

    #[derive(Clone, Debug)]
    struct Ping;

    fn recording(broadcaster: &SubscriptionEventBroadcaster) -> Arc<Mutex<Vec<SubscriptionEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        broadcaster.add_observer(move |event: &SubscriptionEvent| sink.lock().push(event.clone()));
        events
    }

    #[test]
    fn only_boundary_transitions_are_reported() {
        let broadcaster = SubscriptionEventBroadcaster::new();
        let events = recording(&broadcaster);
        let key = SubscriptionKey::new(MessageType::of::<Ping>());

        assert!(broadcaster.increment(&key));
        assert!(!broadcaster.increment(&key));
        assert!(!broadcaster.increment(&key));
        assert!(!broadcaster.decrement(&key));
        assert!(!broadcaster.decrement(&key));
        assert_eq!(events.lock().len(), 1);

        assert!(broadcaster.decrement(&key));
        assert!(!broadcaster.decrement(&key));

        let changes: Vec<_> = events.lock().iter().map(|e| e.change).collect();
        assert_eq!(changes, vec![ChangeType::Added, ChangeType::Removed]);
    }

    #[test]
    fn correlated_keys_are_counted_separately() {
        let broadcaster = SubscriptionEventBroadcaster::new();
        let plain = SubscriptionKey::new(MessageType::of::<Ping>());
        let keyed = SubscriptionKey::correlated(MessageType::of::<Ping>(), CorrelationKey::from("7"));

        assert!(broadcaster.increment(&plain));
        assert!(broadcaster.increment(&keyed));
        assert_eq!(broadcaster.count(&plain), 1);
        assert_eq!(broadcaster.active_keys().len(), 2);
    }

    #[test]
    fn racing_first_subscriptions_emit_one_added() {
        let broadcaster = Arc::new(SubscriptionEventBroadcaster::new());
        let events = recording(&broadcaster);
        let key = SubscriptionKey::new(MessageType::of::<Ping>());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let broadcaster = Arc::clone(&broadcaster);
                let barrier = Arc::clone(&barrier);
                let key = key.clone();
                thread::spawn(move || {
                    barrier.wait();
                    broadcaster.increment(&key)
                })
            })
            .collect();
        let firsts = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread"))
            .filter(|first| *first)
            .count();

        assert_eq!(firsts, 1);
        assert_eq!(broadcaster.count(&key), 8);
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn late_observers_see_active_keys_and_reset_removes_them() {
        let broadcaster = SubscriptionEventBroadcaster::new();
        let key = SubscriptionKey::new(MessageType::of::<Ping>());
        broadcaster.increment(&key);

        let events = recording(&broadcaster);
        assert_eq!(events.lock()[0], SubscriptionEvent::added(key.clone()));

        assert_eq!(broadcaster.reset(), 1);
        assert_eq!(events.lock()[1], SubscriptionEvent::removed(key.clone()));
        assert_eq!(broadcaster.count(&key), 0);
        assert!(!broadcaster.decrement(&key));
    }
}
