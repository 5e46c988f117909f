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

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::subscriptions::Subscription;

/// Durable store of the subscription service's authoritative set.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync + Debug {
    /// Every stored subscription.
    async fn list(&self) -> anyhow::Result<Vec<Subscription>>;

    /// Stores `subscription`. Returns `false` if it was already stored.
    async fn add(&self, subscription: &Subscription) -> anyhow::Result<bool>;

    /// Deletes `subscription`. Returns `false` if it was not stored.
    async fn remove(&self, subscription: &Subscription) -> anyhow::Result<bool>;
}

/// A [`SubscriptionRepository`] that lives and dies with the process.
#[derive(Debug, Default)]
pub struct InMemorySubscriptionRepository {
    subscriptions: RwLock<BTreeSet<Subscription>>,
}

impl InMemorySubscriptionRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriptionRepository for InMemorySubscriptionRepository {
    async fn list(&self) -> anyhow::Result<Vec<Subscription>> {
        Ok(self.subscriptions.read().iter().cloned().collect())
    }

    async fn add(&self, subscription: &Subscription) -> anyhow::Result<bool> {
        Ok(self.subscriptions.write().insert(subscription.clone()))
    }

    async fn remove(&self, subscription: &Subscription) -> anyhow::Result<bool> {
        Ok(self.subscriptions.write().remove(subscription))
    }
}
