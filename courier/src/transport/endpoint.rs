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
use std::fmt::{self, Debug, Display};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::Envelope;
use crate::transport::TransportError;

/// Address of an endpoint, in `scheme://location` form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointAddress(String);

impl EndpointAddress {
    /// Parses and validates an address.
    ///
    /// # Errors
    /// [`TransportError::InvalidAddress`] unless the address has a non-empty
    /// scheme and location separated by `://`.
    pub fn parse(address: impl Into<String>) -> Result<Self, TransportError> {
        let address = address.into();
        let invalid = |reason: &'static str| TransportError::InvalidAddress {
            address: address.clone(),
            reason,
        };
        let Some((scheme, location)) = address.split_once("://") else {
            return Err(invalid("missing `://`"));
        };
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(invalid("scheme must be non-empty and alphanumeric"));
        }
        if location.is_empty() {
            return Err(invalid("location is empty"));
        }
        Ok(Self(address))
    }

    /// The address of queue `queue` on loopback host `host`.
    #[must_use]
    pub fn loopback(host: &str, queue: &str) -> Self {
        Self(format!("loopback://{host}/{queue}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before `://`.
    #[must_use]
    pub fn scheme(&self) -> &str {
        self.0.split_once("://").map_or("", |(scheme, _)| scheme)
    }
}

impl Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EndpointAddress {
    type Err = TransportError;

    fn from_str(address: &str) -> Result<Self, Self::Err> {
        Self::parse(address)
    }
}

impl TryFrom<String> for EndpointAddress {
    type Error = TransportError;

    fn try_from(address: String) -> Result<Self, Self::Error> {
        Self::parse(address)
    }
}

impl From<EndpointAddress> for String {
    fn from(address: EndpointAddress) -> Self {
        address.0
    }
}

/// A queue envelopes can be sent to and received from.
#[async_trait]
pub trait Endpoint: Send + Sync + Debug {
    fn address(&self) -> &EndpointAddress;

    /// Puts `envelope` on this endpoint's queue.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Takes the next envelope, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    async fn receive(&self, timeout: Duration) -> Result<Option<Envelope>, TransportError>;
}

/// Maps addresses to endpoints.
pub trait EndpointResolver: Send + Sync + Debug {
    /// The endpoint at `address`.
    ///
    /// # Errors
    /// [`TransportError::UnknownEndpoint`] when the address cannot be served.
    fn resolve(&self, address: &EndpointAddress) -> Result<Arc<dyn Endpoint>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_need_a_scheme_and_a_location() {
        let address = EndpointAddress::parse("loopback://localhost/orders").expect("valid");
        assert_eq!(address.scheme(), "loopback");
        assert_eq!(address.to_string(), "loopback://localhost/orders");

        assert!(EndpointAddress::parse("localhost/orders").is_err());
        assert!(EndpointAddress::parse("://orders").is_err());
        assert!(EndpointAddress::parse("loopback://").is_err());
    }

    #[test]
    fn addresses_are_validated_when_deserialized() {
        let parsed: EndpointAddress =
            serde_json::from_str("\"loopback://localhost/a\"").expect("valid address");
        assert_eq!(parsed.as_str(), "loopback://localhost/a");
        assert!(serde_json::from_str::<EndpointAddress>("\"nope\"").is_err());
    }
}
