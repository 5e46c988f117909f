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

use courier_core::traits::Message;
use futures::future::join_all;
use tracing::{trace, warn};

use crate::common::BusError;
use crate::message::Envelope;
use crate::registry::MessageTypeRegistry;
use crate::transport::{EndpointAddress, EndpointResolver};

/// Sends envelopes on behalf of one bus instance.
///
/// Shared by the bus and its sync client and service, none of which keep the
/// bus itself alive.
#[derive(Clone)]
pub(crate) struct Outbound {
    address: EndpointAddress,
    resolver: Arc<dyn EndpointResolver>,
    registry: Arc<MessageTypeRegistry>,
}

impl Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbound")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Outbound {
    pub(crate) fn new(
        address: EndpointAddress,
        resolver: Arc<dyn EndpointResolver>,
        registry: Arc<MessageTypeRegistry>,
    ) -> Self {
        Self {
            address,
            resolver,
            registry,
        }
    }

    pub(crate) const fn address(&self) -> &EndpointAddress {
        &self.address
    }

    pub(crate) fn registry(&self) -> &Arc<MessageTypeRegistry> {
        &self.registry
    }

    pub(crate) fn resolver(&self) -> &Arc<dyn EndpointResolver> {
        &self.resolver
    }

    /// Encodes `message` and sends it to `to`.
    pub(crate) async fn send(
        &self,
        to: &EndpointAddress,
        message: &dyn Message,
    ) -> Result<(), BusError> {
        let envelope = self.registry.encode(message)?;
        self.send_envelope(to, envelope).await
    }

    /// Stamps `envelope` with this instance as source and sends it to `to`.
    pub(crate) async fn send_envelope(
        &self,
        to: &EndpointAddress,
        envelope: Envelope,
    ) -> Result<(), BusError> {
        let endpoint = self.resolver.resolve(to)?;
        let envelope = envelope
            .with_source(self.address.clone())
            .with_destination(to.clone());
        trace!(from = %self.address, %to, message_type = %envelope.message_type, "Sending envelope");
        endpoint.send(envelope).await?;
        Ok(())
    }

    /// Sends a copy of `envelope` to every address, returning how many succeeded.
    pub(crate) async fn fan_out(&self, envelope: &Envelope, targets: &[EndpointAddress]) -> usize {
        let sends = targets.iter().map(|to| async move {
            let result = self.send_envelope(to, envelope.clone()).await;
            if let Err(e) = &result {
                warn!(%to, message_type = %envelope.message_type, error = %e, "Remote delivery failed");
            }
            result.is_ok()
        });
        join_all(sends).await.into_iter().filter(|sent| *sent).count()
    }
}
