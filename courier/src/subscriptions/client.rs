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
use std::collections::VecDeque;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use courier_core::pipeline::{Capabilities, DispatchContext, MessagePipeline, UnsubscribeAction};
use courier_core::subscription::{ChangeType, ObserverId, SubscriptionEvent};
use courier_core::traits::{ConsumeResult, Consumer, Consumes};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::common::{BusError, Outbound};
use crate::message::{
    CacheUpdateRequest, CacheUpdateResponse, CancelSubscriptionUpdates, SubscriptionChange,
};
use crate::registry::MessageTypeRegistry;
use crate::subscriptions::{LocalSubscriptionCache, Subscription};
use crate::transport::EndpointAddress;

/// Applies what the subscription service tells this instance.
struct ClientInbox {
    cache: Arc<LocalSubscriptionCache>,
    snapshot: Mutex<Option<oneshot::Sender<usize>>>,
}

impl Consumer for ClientInbox {
    fn capabilities(capabilities: &mut Capabilities<Self>) {
        capabilities
            .consumes::<SubscriptionChange>()
            .consumes::<CacheUpdateResponse>();
    }
}

impl Consumes<SubscriptionChange> for ClientInbox {
    fn consume(&self, change: &SubscriptionChange, _: &DispatchContext) -> ConsumeResult {
        apply_change(&self.cache, change);
        Ok(())
    }
}

impl Consumes<CacheUpdateResponse> for ClientInbox {
    fn consume(&self, response: &CacheUpdateResponse, _: &DispatchContext) -> ConsumeResult {
        let applied = response
            .subscriptions
            .iter()
            .filter(|subscription| self.cache.add((*subscription).clone()))
            .count();
        debug!(
            received = response.subscriptions.len(),
            applied, "Subscription cache snapshot applied"
        );
        if let Some(done) = self.snapshot.lock().take() {
            // start-up may already have given up waiting
            let _ = done.send(response.subscriptions.len());
        }
        Ok(())
    }
}

fn apply_change(cache: &LocalSubscriptionCache, change: &SubscriptionChange) {
    let subscription = change.subscription();
    let changed = match change.change_type {
        ChangeType::Added => cache.add(subscription),
        ChangeType::Removed => cache.remove(&subscription),
    };
    trace!(?change, changed, "Subscription change applied");
}

/// Turns a local subscription event into the change announced to the service.
///
/// Message types that are not registered for the wire stay local.
fn to_change(
    event: &SubscriptionEvent,
    registry: &MessageTypeRegistry,
    address: &EndpointAddress,
) -> Option<SubscriptionChange> {
    let Some(message_type) = registry.wire_name(event.key.message_type().id()) else {
        trace!(key = %event.key, "Subscription of a local-only message type not announced");
        return None;
    };
    let subscription = Subscription::new(
        message_type,
        event
            .key
            .correlation_id()
            .map(|key| key.as_str().to_string()),
        address.clone(),
    );
    Some(SubscriptionChange::of(subscription, event.change))
}

/// Keeps this bus instance's subscriptions and the subscription service in sync.
///
/// Local subscription events are queued by a broadcaster observer and sent by
/// a background task, so subscribing never waits on the network. Changes the
/// service could not be reached for stay queued and are retried on every
/// heartbeat.
pub struct SubscriptionClient {
    service: EndpointAddress,
    pipeline: MessagePipeline,
    observer: ObserverId,
    inbox: UnsubscribeAction,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for SubscriptionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionClient")
            .field("service", &self.service)
            .field("observer", &self.observer)
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

impl SubscriptionClient {
    /// Connects `pipeline` to the subscription service at `service`.
    ///
    /// Requests the service's snapshot and waits for it at most
    /// `request_timeout`. A missing answer is logged and start-up continues;
    /// the cache then fills from later broadcasts.
    ///
    /// # Errors
    /// [`BusError::Subscribe`] if the pipeline is already disposed.
    #[instrument(skip_all, fields(address = %outbound.address(), %service))]
    pub(crate) async fn start(
        outbound: Outbound,
        pipeline: MessagePipeline,
        cache: Arc<LocalSubscriptionCache>,
        service: EndpointAddress,
        request_timeout: Duration,
        heartbeat: Duration,
    ) -> Result<Self, BusError> {
        let (snapshot_tx, snapshot_rx) = oneshot::channel();
        let inbox = pipeline.subscribe_unannounced(Arc::new(ClientInbox {
            cache,
            snapshot: Mutex::new(Some(snapshot_tx)),
        }))?;

        let (changes_tx, changes_rx) = mpsc::unbounded_channel();
        let registry = Arc::clone(outbound.registry());
        let address = outbound.address().clone();
        let observer = pipeline
            .broadcaster()
            .add_observer(move |event: &SubscriptionEvent| {
                if let Some(change) = to_change(event, &registry, &address) {
                    if changes_tx.send(change).is_err() {
                        trace!(key = %event.key, "Sync client stopped, change dropped");
                    }
                }
            });

        let cancel = CancellationToken::new();
        let task = tokio::spawn(sync_changes(
            outbound.clone(),
            service.clone(),
            changes_rx,
            cancel.clone(),
            heartbeat,
        ));

        let request = CacheUpdateRequest {
            requesting_uri: outbound.address().clone(),
        };
        match outbound.send(&service, &request).await {
            Ok(()) => match tokio::time::timeout(request_timeout, snapshot_rx).await {
                Ok(Ok(received)) => debug!(received, "Subscription snapshot received"),
                Ok(Err(_)) => warn!("Subscription snapshot handler dropped before answering"),
                Err(_) => warn!(
                    timeout_ms = request_timeout.as_millis(),
                    "Subscription service did not answer in time, starting without a snapshot"
                ),
            },
            Err(e) => warn!(error = %e, "Could not request a subscription snapshot"),
        }

        Ok(Self {
            service,
            pipeline,
            observer,
            inbox,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// The subscription service this client talks to.
    #[must_use]
    pub const fn service(&self) -> &EndpointAddress {
        &self.service
    }

    /// Stops syncing.
    ///
    /// Changes still queued, including the `Removed` events of a disposed
    /// pipeline, are sent once more before the service is told to stop
    /// broadcasting to this instance. Disposing twice is a no-op.
    #[instrument(skip(self), fields(service = %self.service))]
    pub async fn dispose(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        self.pipeline.broadcaster().remove_observer(self.observer);
        self.inbox.unsubscribe();
        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "Subscription sync task ended abnormally");
        }
        debug!("Subscription client disposed");
    }
}

/// Forwards queued changes to the service until cancelled.
async fn sync_changes(
    outbound: Outbound,
    service: EndpointAddress,
    mut changes: mpsc::UnboundedReceiver<SubscriptionChange>,
    cancel: CancellationToken,
    heartbeat: Duration,
) {
    let mut pending = VecDeque::new();
    let mut ticker = interval(heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(change) = changes.recv() => {
                pending.push_back(change);
                flush(&outbound, &service, &mut pending).await;
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    trace!(pending = pending.len(), "Retrying subscription changes");
                    flush(&outbound, &service, &mut pending).await;
                }
            }
        }
    }

    while let Ok(change) = changes.try_recv() {
        pending.push_back(change);
    }
    flush(&outbound, &service, &mut pending).await;
    if !pending.is_empty() {
        warn!(lost = pending.len(), "Subscription changes not delivered before shutdown");
    }
    let cancel_updates = CancelSubscriptionUpdates {
        requesting_uri: outbound.address().clone(),
    };
    if let Err(e) = outbound.send(&service, &cancel_updates).await {
        warn!(error = %e, "Could not cancel subscription updates");
    }
}

/// Sends pending changes in order, stopping at the first failure.
async fn flush(
    outbound: &Outbound,
    service: &EndpointAddress,
    pending: &mut VecDeque<SubscriptionChange>,
) {
    while let Some(change) = pending.front() {
        match outbound.send(service, change).await {
            Ok(()) => {
                trace!(?change, "Subscription change sent");
                pending.pop_front();
            }
            Err(e) => {
                warn!(error = %e, pending = pending.len(), "Subscription change not sent, retrying on next heartbeat");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::subscription::SubscriptionKey;
    use courier_core::traits::{CorrelationKey, MessageType};
    use courier_macro::courier_message;

    use super::*;

    #[courier_message(wire)]
    struct Ping;

    #[courier_message]
    struct LocalOnly;

    fn address() -> EndpointAddress {
        EndpointAddress::loopback("node-a", "bus")
    }

    #[test]
    fn events_become_changes_under_the_wire_name() {
        let registry = MessageTypeRegistry::new();
        registry.register::<Ping>("Ping");
        let key = SubscriptionKey::correlated(MessageType::of::<Ping>(), CorrelationKey::from("7"));

        let change = to_change(&SubscriptionEvent::added(key), &registry, &address())
            .expect("registered type is announced");
        assert_eq!(change.message_type, "Ping");
        assert_eq!(change.correlation_id.as_deref(), Some("7"));
        assert_eq!(change.endpoint_uri, address());
        assert_eq!(change.change_type, ChangeType::Added);
    }

    #[test]
    fn local_only_types_are_not_announced() {
        let registry = MessageTypeRegistry::new();
        let key = SubscriptionKey::new(MessageType::of::<LocalOnly>());
        assert!(to_change(&SubscriptionEvent::added(key), &registry, &address()).is_none());
    }

    #[test]
    fn broadcast_changes_are_applied_idempotently() {
        let cache = LocalSubscriptionCache::new();
        let added = SubscriptionChange::of(
            Subscription::new("Ping", None, address()),
            ChangeType::Added,
        );
        apply_change(&cache, &added);
        apply_change(&cache, &added);
        assert_eq!(cache.len(), 1);

        let removed = SubscriptionChange {
            change_type: ChangeType::Removed,
            ..added
        };
        apply_change(&cache, &removed);
        apply_change(&cache, &removed);
        assert!(cache.is_empty());
    }
}
