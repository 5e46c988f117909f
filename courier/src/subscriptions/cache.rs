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
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicUsize, Ordering};

use courier_core::subscription::ChangeType;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::subscriptions::Subscription;
use crate::transport::EndpointAddress;

const EVENT_CAPACITY: usize = 256;

/// Statistics for the subscription cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Subscriptions that were new when added.
    pub subscriptions_added: AtomicUsize,
    /// Subscriptions that were present when removed.
    pub subscriptions_removed: AtomicUsize,
    /// Add or remove calls that changed nothing.
    pub duplicates_ignored: AtomicUsize,
}

impl CacheStats {
    #[must_use]
    pub fn subscriptions_added(&self) -> usize {
        self.subscriptions_added.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn subscriptions_removed(&self) -> usize {
        self.subscriptions_removed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn duplicates_ignored(&self) -> usize {
        self.duplicates_ignored.load(Ordering::Relaxed)
    }
}

/// A change applied to a [`LocalSubscriptionCache`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheEvent {
    pub subscription: Subscription,
    pub change: ChangeType,
}

/// Which endpoints want which message types.
///
/// Indexed by wire name. Adding a subscription that is already present and
/// removing one that is absent are no-ops that emit no event. Watchers get
/// every effective change through a broadcast channel; a watcher that lags
/// loses the oldest events.
pub struct LocalSubscriptionCache {
    by_type: DashMap<String, BTreeSet<Subscription>>,
    events: broadcast::Sender<CacheEvent>,
    stats: CacheStats,
}

impl Default for LocalSubscriptionCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for LocalSubscriptionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSubscriptionCache")
            .field("message_types", &self.by_type.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl LocalSubscriptionCache {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            by_type: DashMap::new(),
            events,
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub const fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Adds `subscription`. Returns `false` if it was already cached.
    pub fn add(&self, subscription: Subscription) -> bool {
        let added = self
            .by_type
            .entry(subscription.message_type.clone())
            .or_default()
            .insert(subscription.clone());
        if added {
            self.stats.subscriptions_added.fetch_add(1, Ordering::Relaxed);
            trace!(%subscription, "Subscription cached");
            self.emit(subscription, ChangeType::Added);
        } else {
            self.stats.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
        }
        added
    }

    /// Removes `subscription`. Returns `false` if it was not cached.
    pub fn remove(&self, subscription: &Subscription) -> bool {
        let removed = self
            .by_type
            .get_mut(&subscription.message_type)
            .is_some_and(|mut entry| entry.remove(subscription));
        if removed {
            self.by_type
                .remove_if(&subscription.message_type, |_, entries| entries.is_empty());
            self.stats.subscriptions_removed.fetch_add(1, Ordering::Relaxed);
            trace!(%subscription, "Subscription evicted");
            self.emit(subscription.clone(), ChangeType::Removed);
        } else {
            self.stats.duplicates_ignored.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    /// Every subscription for the wire name `message_type`.
    #[must_use]
    pub fn list(&self, message_type: &str) -> Vec<Subscription> {
        self.by_type
            .get(message_type)
            .map(|entries| entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every cached subscription, ordered.
    #[must_use]
    pub fn list_all(&self) -> Vec<Subscription> {
        let all: BTreeSet<_> = self
            .by_type
            .iter()
            .flat_map(|entry| entry.value().iter().cloned().collect::<Vec<_>>())
            .collect();
        all.into_iter().collect()
    }

    /// Endpoints that want a message of `message_type` carrying `correlation_id`.
    #[must_use]
    pub fn endpoints_for(
        &self,
        message_type: &str,
        correlation_id: Option<&str>,
    ) -> Vec<EndpointAddress> {
        let endpoints: BTreeSet<_> = self
            .list(message_type)
            .into_iter()
            .filter(|subscription| subscription.wants(correlation_id))
            .map(|subscription| subscription.endpoint)
            .collect();
        endpoints.into_iter().collect()
    }

    /// Drops every subscription of `endpoint`, returning how many were removed.
    pub fn remove_endpoint(&self, endpoint: &EndpointAddress) -> usize {
        let owned: Vec<_> = self
            .list_all()
            .into_iter()
            .filter(|subscription| &subscription.endpoint == endpoint)
            .collect();
        let removed = owned
            .iter()
            .filter(|subscription| self.remove(subscription))
            .count();
        debug!(%endpoint, removed, "Endpoint removed from subscription cache");
        removed
    }

    /// Receives every later effective change.
    #[must_use]
    pub fn watch(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Number of cached subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.iter().map(|entry| entry.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn emit(&self, subscription: Subscription, change: ChangeType) {
        // no watchers is not an error
        let _ = self.events.send(CacheEvent {
            subscription,
            change,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(name: &str) -> EndpointAddress {
        EndpointAddress::parse(format!("loopback://{name}/bus")).expect("address")
    }

    fn ping(at: &str) -> Subscription {
        Subscription::new("Ping", None, endpoint(at))
    }

    #[test]
    fn add_and_remove_are_idempotent() {
        let cache = LocalSubscriptionCache::new();

        assert!(cache.add(ping("a")));
        assert!(!cache.add(ping("a")));
        assert_eq!(cache.list("Ping"), vec![ping("a")]);

        assert!(cache.remove(&ping("a")));
        assert!(!cache.remove(&ping("a")));
        assert!(!cache.remove(&ping("never-added")));
        assert!(cache.is_empty());

        assert_eq!(cache.stats().subscriptions_added(), 1);
        assert_eq!(cache.stats().subscriptions_removed(), 1);
        assert_eq!(cache.stats().duplicates_ignored(), 3);
    }

    #[test]
    fn only_effective_changes_are_watched() {
        let cache = LocalSubscriptionCache::new();
        let mut events = cache.watch();

        cache.add(ping("a"));
        cache.add(ping("a"));
        cache.remove(&ping("a"));

        assert_eq!(events.try_recv().map(|e| e.change).ok(), Some(ChangeType::Added));
        assert_eq!(events.try_recv().map(|e| e.change).ok(), Some(ChangeType::Removed));
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn correlated_subscriptions_only_match_their_conversation() {
        let cache = LocalSubscriptionCache::new();
        cache.add(Subscription::new("OrderShipped", Some("7".into()), endpoint("a")));
        cache.add(Subscription::new("OrderShipped", Some("8".into()), endpoint("b")));
        cache.add(Subscription::new("OrderShipped", None, endpoint("c")));

        assert_eq!(
            cache.endpoints_for("OrderShipped", Some("7")),
            vec![endpoint("a"), endpoint("c")]
        );
        assert_eq!(cache.endpoints_for("OrderShipped", None), vec![endpoint("c")]);
        assert!(cache.endpoints_for("Unknown", None).is_empty());
    }

    #[test]
    fn removing_an_endpoint_drops_all_of_its_entries() {
        let cache = LocalSubscriptionCache::new();
        cache.add(ping("a"));
        cache.add(Subscription::new("Pong", None, endpoint("a")));
        cache.add(ping("b"));

        assert_eq!(cache.remove_endpoint(&endpoint("a")), 2);
        assert_eq!(cache.list_all(), vec![ping("b")]);
        assert_eq!(cache.remove_endpoint(&endpoint("a")), 0);
    }
}
