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
use std::path::Path;
use std::time::Duration;

use courier_core::saga::SagaOptions;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::fault::PoisonConfig;
use crate::transport::EndpointAddress;

/// Configuration of a Courier bus instance.
///
/// Loaded from TOML; every section and field falls back to its default.
///
/// ```toml
/// [bus]
/// address = "loopback://node-a/orders"
/// receive_poll_interval_ms = 50
///
/// [subscriptions]
/// service_address = "loopback://infra/subscriptions"
///
/// [poison]
/// endpoint = "loopback://infra/poison"
/// max_dispatch_attempts = 3
///
/// [sagas]
/// missing_correlation = "fabricate"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub bus: BusConfig,
    pub subscriptions: SubscriptionConfig,
    pub poison: PoisonConfig,
    /// Options of every saga subscribed through the bus.
    pub sagas: SagaOptions,
}

/// Endpoint and receive loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// The endpoint this instance receives on.
    pub address: EndpointAddress,
    /// Longest wait for an envelope before the receive loop checks for shutdown.
    pub receive_poll_interval_ms: u64,
}

/// Subscription sync client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// The subscription service. Without one, subscriptions stay local.
    pub service_address: Option<EndpointAddress>,
    /// How long start-up waits for the service's cache snapshot.
    pub request_timeout_ms: u64,
    /// Interval between retries of changes the service did not receive.
    pub heartbeat_interval_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            address: EndpointAddress::loopback("localhost", "courier"),
            receive_poll_interval_ms: 100,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            service_address: None,
            request_timeout_ms: 5_000,
            heartbeat_interval_ms: 1_000,
        }
    }
}

impl BusConfig {
    pub const fn receive_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receive_poll_interval_ms)
    }
}

impl SubscriptionConfig {
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl CourierConfig {
    /// Load configuration from XDG-compliant locations
    ///
    /// Looks for `courier/config.toml` under the XDG config directories
    /// (`$XDG_CONFIG_HOME`, then `~/.config`). A missing file yields the
    /// defaults; a malformed one is logged and also yields the defaults.
    pub fn load() -> Self {
        let xdg_dirs = match xdg::BaseDirectories::with_prefix("courier") {
            Ok(dirs) => dirs,
            Err(e) => {
                error!("Failed to initialize XDG directories: {}", e);
                return Self::default();
            }
        };

        match xdg_dirs.find_config_file("config.toml") {
            Some(path) => Self::load_from(&path),
            None => {
                info!("No configuration file found, using defaults");
                Self::default()
            }
        }
    }

    /// Load configuration from an explicit file, falling back to the defaults.
    pub fn load_from(path: &Path) -> Self {
        info!("Loading configuration from: {}", path.display());
        match std::fs::read_to_string(path) {
            Ok(config_str) => match Self::from_toml(&config_str) {
                Ok(config) => {
                    info!("Successfully loaded configuration");
                    config
                }
                Err(e) => {
                    error!("Failed to parse configuration file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                error!("Failed to read configuration file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Parses a TOML document.
    ///
    /// # Errors
    /// The parser's error when the document is not valid configuration.
    pub fn from_toml(config_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(config_str)
    }
}
