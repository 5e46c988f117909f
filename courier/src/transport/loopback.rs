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
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Mutex};
use tracing::trace;

use crate::message::Envelope;
use crate::transport::{Endpoint, EndpointAddress, EndpointResolver, TransportError};

#[derive(Debug)]
struct LoopbackQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    receiver: Mutex<mpsc::UnboundedReceiver<Envelope>>,
    offline: AtomicBool,
    queued: AtomicUsize,
}

impl LoopbackQueue {
    fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
            offline: AtomicBool::new(false),
            queued: AtomicUsize::new(0),
        }
    }
}

/// In-memory queues shared by every bus instance of a process.
///
/// Queues are created on first use, like a broker that auto-declares them.
/// Cloning yields a handle to the same network.
#[derive(Clone, Debug, Default)]
pub struct LoopbackNetwork {
    queues: Arc<DashMap<EndpointAddress, Arc<LoopbackQueue>>>,
}

impl LoopbackNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The endpoint for `address`, creating its queue if needed.
    #[must_use]
    pub fn endpoint(&self, address: &EndpointAddress) -> LoopbackEndpoint {
        let queue = Arc::clone(
            self.queues
                .entry(address.clone())
                .or_insert_with(|| Arc::new(LoopbackQueue::new()))
                .value(),
        );
        LoopbackEndpoint {
            address: address.clone(),
            queue,
        }
    }

    /// Makes sends to `address` fail until it is brought back online.
    pub fn set_offline(&self, address: &EndpointAddress, offline: bool) {
        self.endpoint(address)
            .queue
            .offline
            .store(offline, Ordering::SeqCst);
        trace!(%address, offline, "Loopback endpoint availability changed");
    }

    /// Number of envelopes waiting at `address`.
    #[must_use]
    pub fn queued(&self, address: &EndpointAddress) -> usize {
        self.queues
            .get(address)
            .map_or(0, |queue| queue.queued.load(Ordering::SeqCst))
    }
}

impl EndpointResolver for LoopbackNetwork {
    fn resolve(&self, address: &EndpointAddress) -> Result<Arc<dyn Endpoint>, TransportError> {
        if address.scheme() != "loopback" {
            return Err(TransportError::UnknownEndpoint(address.clone()));
        }
        Ok(Arc::new(self.endpoint(address)))
    }
}

/// One queue of a [`LoopbackNetwork`].
#[derive(Clone, Debug)]
pub struct LoopbackEndpoint {
    address: EndpointAddress,
    queue: Arc<LoopbackQueue>,
}

#[async_trait]
impl Endpoint for LoopbackEndpoint {
    fn address(&self) -> &EndpointAddress {
        &self.address
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.queue.offline.load(Ordering::SeqCst) {
            return Err(TransportError::Offline(self.address.clone()));
        }
        trace!(address = %self.address, message_type = %envelope.message_type, "Loopback send");
        self.queue
            .sender
            .send(envelope)
            .map_err(|_| TransportError::Closed(self.address.clone()))?;
        self.queue.queued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<Envelope>, TransportError> {
        let mut receiver = self.queue.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(envelope)) => {
                self.queue.queued.fetch_sub(1, Ordering::SeqCst);
                Ok(Some(envelope))
            }
            Ok(None) => Err(TransportError::Closed(self.address.clone())),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn address(queue: &str) -> EndpointAddress {
        EndpointAddress::parse(format!("loopback://localhost/{queue}")).expect("address")
    }

    #[tokio::test]
    async fn envelopes_travel_between_handles_of_the_same_queue() {
        let network = LoopbackNetwork::new();
        let sender = network.resolve(&address("orders")).expect("resolve");
        let receiver = network.endpoint(&address("orders"));

        sender
            .send(Envelope::new("Ping", json!({})))
            .await
            .expect("send");
        assert_eq!(network.queued(&address("orders")), 1);

        let received = receiver
            .receive(Duration::from_millis(50))
            .await
            .expect("receive");
        assert_eq!(received.map(|envelope| envelope.message_type), Some("Ping".to_string()));
        assert_eq!(network.queued(&address("orders")), 0);
    }

    #[tokio::test]
    async fn receive_times_out_quietly() {
        let network = LoopbackNetwork::new();
        let endpoint = network.endpoint(&address("empty"));
        let received = endpoint
            .receive(Duration::from_millis(10))
            .await
            .expect("receive");
        assert!(received.is_none());
    }

    #[tokio::test]
    async fn offline_endpoints_reject_sends() {
        let network = LoopbackNetwork::new();
        network.set_offline(&address("down"), true);
        let endpoint = network.endpoint(&address("down"));

        let result = endpoint.send(Envelope::new("Ping", json!({}))).await;
        assert!(matches!(result, Err(TransportError::Offline(_))));

        network.set_offline(&address("down"), false);
        assert!(endpoint.send(Envelope::new("Ping", json!({}))).await.is_ok());
    }

    #[test]
    fn only_loopback_addresses_resolve() {
        let network = LoopbackNetwork::new();
        let remote = EndpointAddress::parse("amqp://broker/orders").expect("address");
        assert!(matches!(
            network.resolve(&remote),
            Err(TransportError::UnknownEndpoint(_))
        ));
    }
}
