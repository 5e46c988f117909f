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
use std::fs;
use std::time::Duration;

use courier::prelude::*;
use tempfile::TempDir;

use crate::setup::*;

mod setup;

/// An explicit file overrides only the values it names
#[courier_test]
async fn test_load_from_file() -> anyhow::Result<()> {
    initialize_tracing("config_loading_tests.log");
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("courier.toml");
    fs::write(
        &path,
        r#"
        [bus]
        address = "loopback://node-a/orders"

        [poison]
        endpoint = "loopback://infra/poison"
        max_dispatch_attempts = 3
        "#,
    )?;

    let config = CourierConfig::load_from(&path);
    assert_eq!(config.bus.address.as_str(), "loopback://node-a/orders");
    assert_eq!(config.bus.receive_poll_interval(), Duration::from_millis(100));
    assert_eq!(
        config.poison.endpoint,
        Some(EndpointAddress::loopback("infra", "poison"))
    );
    assert_eq!(config.poison.max_dispatch_attempts, 3);
    assert_eq!(config.poison.max_redelivery_count, 10);
    assert!(config.subscriptions.service_address.is_none());

    temp_dir.close()?;
    Ok(())
}

/// A malformed or missing file falls back to the defaults
#[courier_test]
async fn test_broken_configuration_falls_back_to_defaults() -> anyhow::Result<()> {
    initialize_tracing("config_loading_tests.log");
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("courier.toml");
    fs::write(&path, "[bus\naddress = ")?;

    assert_eq!(CourierConfig::load_from(&path), CourierConfig::default());
    assert_eq!(
        CourierConfig::load_from(&temp_dir.path().join("missing.toml")),
        CourierConfig::default()
    );

    temp_dir.close()?;
    Ok(())
}

/// The bus picks up `courier/config.toml` from the XDG config home
#[courier_test]
async fn test_xdg_configuration_is_used_at_launch() -> anyhow::Result<()> {
    initialize_tracing("config_loading_tests.log");
    let temp_dir = TempDir::new()?;
    let config_dir = temp_dir.path().join("courier");
    fs::create_dir_all(&config_dir)?;
    fs::write(
        config_dir.join("config.toml"),
        r#"
        [bus]
        address = "loopback://configured/bus"
        receive_poll_interval_ms = 25

        [sagas]
        missing_correlation = "fabricate"
        "#,
    )?;
    std::env::set_var("XDG_CONFIG_HOME", temp_dir.path());

    let bus = Bus::from_config_file().launch().await?;
    assert_eq!(bus.address().as_str(), "loopback://configured/bus");
    assert_eq!(bus.config().bus.receive_poll_interval_ms, 25);
    assert_eq!(
        bus.config().sagas.missing_correlation,
        MissingCorrelation::Fabricate
    );

    bus.shutdown().await;
    temp_dir.close()?;
    Ok(())
}
