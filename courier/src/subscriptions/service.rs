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
use std::sync::Arc;

use courier_core::pipeline::{Capabilities, DispatchContext, UnsubscribeAction};
use courier_core::subscription::ChangeType;
use courier_core::traits::{ConsumeResult, Consumer, Consumes};
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::common::{Bus, BusError, Outbound};
use crate::message::{
    CacheUpdateRequest, CacheUpdateResponse, CancelSubscriptionUpdates, SubscriptionChange,
};
use crate::subscriptions::{Subscription, SubscriptionRepository};
use crate::transport::EndpointAddress;

#[derive(Debug)]
enum ServiceCommand {
    Change(SubscriptionChange),
    Request(CacheUpdateRequest),
    Cancel(CancelSubscriptionUpdates),
}

/// Queues control messages for the service task.
struct ServiceInbox {
    commands: mpsc::UnboundedSender<ServiceCommand>,
}

impl ServiceInbox {
    fn enqueue(&self, command: ServiceCommand) -> ConsumeResult {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("subscription service is stopped"))
    }
}

impl Consumer for ServiceInbox {
    fn capabilities(capabilities: &mut Capabilities<Self>) {
        capabilities
            .consumes::<SubscriptionChange>()
            .consumes::<CacheUpdateRequest>()
            .consumes::<CancelSubscriptionUpdates>();
    }
}

impl Consumes<SubscriptionChange> for ServiceInbox {
    fn consume(&self, change: &SubscriptionChange, _: &DispatchContext) -> ConsumeResult {
        self.enqueue(ServiceCommand::Change(change.clone()))
    }
}

impl Consumes<CacheUpdateRequest> for ServiceInbox {
    fn consume(&self, request: &CacheUpdateRequest, _: &DispatchContext) -> ConsumeResult {
        self.enqueue(ServiceCommand::Request(request.clone()))
    }
}

impl Consumes<CancelSubscriptionUpdates> for ServiceInbox {
    fn consume(&self, cancel: &CancelSubscriptionUpdates, _: &DispatchContext) -> ConsumeResult {
        self.enqueue(ServiceCommand::Cancel(cancel.clone()))
    }
}

/// The authoritative subscription set, hosted on its own bus instance.
///
/// Clients register by requesting a snapshot. Every accepted change is
/// persisted and re-broadcast to every registered client except the one it
/// came from. Duplicate adds and removals of unknown subscriptions are
/// accepted silently and not re-broadcast.
pub struct SubscriptionService {
    clients: Arc<RwLock<BTreeSet<EndpointAddress>>>,
    repository: Arc<dyn SubscriptionRepository>,
    inbox: UnsubscribeAction,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Debug for SubscriptionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionService")
            .field("clients", &self.clients.read().len())
            .field("repository", &self.repository)
            .finish()
    }
}

impl SubscriptionService {
    /// Serves subscription sync on `bus`'s endpoint.
    ///
    /// # Errors
    /// [`BusError::Subscribe`] if `bus` is already shut down.
    #[instrument(skip_all, fields(address = %bus.address()))]
    pub fn start(
        bus: &Bus,
        repository: Arc<dyn SubscriptionRepository>,
    ) -> Result<Self, BusError> {
        let (commands, receiver) = mpsc::unbounded_channel();
        let inbox = bus
            .pipeline()
            .subscribe_unannounced(Arc::new(ServiceInbox { commands }))?;
        let clients = Arc::new(RwLock::new(BTreeSet::new()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(
            bus.outbound().clone(),
            Arc::clone(&repository),
            Arc::clone(&clients),
            receiver,
            cancel.clone(),
        ));
        info!("Subscription service started");
        Ok(Self {
            clients,
            repository,
            inbox,
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    /// Clients currently receiving broadcasts.
    #[must_use]
    pub fn clients(&self) -> Vec<EndpointAddress> {
        self.clients.read().iter().cloned().collect()
    }

    /// The authoritative subscription set.
    ///
    /// # Errors
    /// The repository's error.
    pub async fn subscriptions(&self) -> anyhow::Result<Vec<Subscription>> {
        self.repository.list().await
    }

    /// Stops serving. Commands already queued are processed first.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        self.inbox.unsubscribe();
        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(error = %e, "Subscription service task ended abnormally");
        }
        info!("Subscription service stopped");
    }
}

async fn serve(
    outbound: Outbound,
    repository: Arc<dyn SubscriptionRepository>,
    clients: Arc<RwLock<BTreeSet<EndpointAddress>>>,
    mut commands: mpsc::UnboundedReceiver<ServiceCommand>,
    cancel: CancellationToken,
) {
    let service = Service {
        outbound,
        repository,
        clients,
    };
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            command = commands.recv() => match command {
                Some(command) => service.handle(command).await,
                None => break,
            },
        }
    }
    while let Ok(command) = commands.try_recv() {
        service.handle(command).await;
    }
}

struct Service {
    outbound: Outbound,
    repository: Arc<dyn SubscriptionRepository>,
    clients: Arc<RwLock<BTreeSet<EndpointAddress>>>,
}

impl Service {
    async fn handle(&self, command: ServiceCommand) {
        trace!(?command, "Subscription service command");
        match command {
            ServiceCommand::Change(change) => self.change(change).await,
            ServiceCommand::Request(request) => self.snapshot(request.requesting_uri).await,
            ServiceCommand::Cancel(cancel) => {
                let removed = self.clients.write().remove(&cancel.requesting_uri);
                debug!(client = %cancel.requesting_uri, removed, "Client cancelled subscription updates");
            }
        }
    }

    async fn change(&self, change: SubscriptionChange) {
        let subscription = match validate(&change) {
            Ok(subscription) => subscription,
            Err(reason) => {
                warn!(?change, reason, "Invalid subscription change rejected");
                return;
            }
        };
        let stored = match change.change_type {
            ChangeType::Added => self.repository.add(&subscription).await,
            ChangeType::Removed => self.repository.remove(&subscription).await,
        };
        match stored {
            Ok(true) => {}
            Ok(false) => {
                trace!(%subscription, change = ?change.change_type, "Subscription change already applied");
                return;
            }
            Err(e) => {
                warn!(%subscription, error = %e, "Subscription change not persisted");
                return;
            }
        }
        debug!(%subscription, change = ?change.change_type, "Subscription change accepted");

        let targets: Vec<_> = self
            .clients
            .read()
            .iter()
            .filter(|client| **client != change.endpoint_uri)
            .cloned()
            .collect();
        if targets.is_empty() {
            return;
        }
        match self.outbound.registry().encode(&change) {
            Ok(envelope) => {
                let sent = self.outbound.fan_out(&envelope, &targets).await;
                trace!(sent, clients = targets.len(), "Subscription change broadcast");
            }
            Err(e) => warn!(error = %e, "Subscription change could not be encoded"),
        }
    }

    async fn snapshot(&self, client: EndpointAddress) {
        self.clients.write().insert(client.clone());
        let subscriptions = match self.repository.list().await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                warn!(%client, error = %e, "Subscription snapshot unavailable");
                return;
            }
        };
        debug!(%client, subscriptions = subscriptions.len(), "Sending subscription snapshot");
        let response = CacheUpdateResponse { subscriptions };
        if let Err(e) = self.outbound.send(&client, &response).await {
            warn!(%client, error = %e, "Subscription snapshot not delivered");
        }
    }
}

fn validate(change: &SubscriptionChange) -> Result<Subscription, &'static str> {
    if change.message_type.trim().is_empty() {
        return Err("message type is empty");
    }
    if change
        .correlation_id
        .as_ref()
        .is_some_and(|correlation_id| correlation_id.is_empty())
    {
        return Err("correlation id is empty");
    }
    Ok(change.subscription())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(message_type: &str, correlation_id: Option<&str>) -> SubscriptionChange {
        SubscriptionChange {
            message_type: message_type.to_string(),
            correlation_id: correlation_id.map(ToString::to_string),
            endpoint_uri: EndpointAddress::loopback("node-a", "bus"),
            change_type: ChangeType::Added,
        }
    }

    #[test]
    fn blank_fields_are_invalid() {
        assert!(validate(&change("Ping", None)).is_ok());
        assert!(validate(&change("Ping", Some("7"))).is_ok());
        assert!(validate(&change("  ", None)).is_err());
        assert!(validate(&change("Ping", Some(""))).is_err());
    }
}
