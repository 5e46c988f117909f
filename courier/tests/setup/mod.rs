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
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use courier::prelude::*;

pub use courier_test::{courier_test, initialize_tracing};

pub mod messages;

use messages::*;

/// Address of the subscription service in every test network.
pub fn service_address() -> EndpointAddress {
    EndpointAddress::loopback("infra", "subscriptions")
}

/// A bus on `network` that syncs with the test subscription service.
pub async fn synced_bus(network: &LoopbackNetwork, node: &str) -> anyhow::Result<Bus> {
    let mut config = CourierConfig::default();
    config.bus.address = EndpointAddress::loopback(node, "bus");
    config.bus.receive_poll_interval_ms = 20;
    config.subscriptions.service_address = Some(service_address());
    config.subscriptions.request_timeout_ms = 500;
    config.subscriptions.heartbeat_interval_ms = 50;
    Ok(with_test_messages(
        Bus::builder()
            .with_config(config)
            .with_resolver(Arc::new(network.clone())),
    )
    .launch()
    .await?)
}

/// A bus on `network` without subscription sync.
pub async fn unsynced_bus(network: &LoopbackNetwork, node: &str) -> anyhow::Result<Bus> {
    let mut config = CourierConfig::default();
    config.bus.address = EndpointAddress::loopback(node, "bus");
    config.bus.receive_poll_interval_ms = 20;
    Ok(with_test_messages(
        Bus::builder()
            .with_config(config)
            .with_resolver(Arc::new(network.clone())),
    )
    .launch()
    .await?)
}

/// The bus hosting the subscription service.
pub async fn service_bus(
    network: &LoopbackNetwork,
) -> anyhow::Result<(Bus, SubscriptionService)> {
    let mut config = CourierConfig::default();
    config.bus.address = service_address();
    config.bus.receive_poll_interval_ms = 20;
    let bus = Bus::builder()
        .with_config(config)
        .with_resolver(Arc::new(network.clone()))
        .launch()
        .await?;
    let service = SubscriptionService::start(&bus, Arc::new(InMemorySubscriptionRepository::new()))?;
    Ok((bus, service))
}

/// Registers every message of the test suite for the wire.
pub fn with_test_messages(builder: BusBuilder) -> BusBuilder {
    builder
        .register::<Ping>("Ping")
        .register::<Pong>("Pong")
        .register::<PriceChanged>("PriceChanged")
        .register_correlated::<OrderShipped>("OrderShipped")
        .register_correlated::<RegisterUser>("RegisterUser")
        .register_correlated::<ConfirmEmail>("ConfirmEmail")
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
