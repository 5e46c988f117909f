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

#![forbid(unsafe_code)]

//! Test support for Courier.
//!
//! - [`courier_test`]: async test attribute with panic capture and a tracing span.
//! - [`initialize_tracing`]: installs a file-backed tracing subscriber once per
//!   test binary.

use std::sync::Once;

use tracing::Level;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

pub use courier_test_macro::courier_test;

static INIT: Once = Once::new();

/// Installs the global tracing subscriber for a test binary.
///
/// Logs go to `logs/<file_name>` through a non-blocking writer. The filter
/// defaults to `trace` for Courier crates and honours `RUST_LOG` when set.
/// Only the first call has any effect.
pub fn initialize_tracing(file_name: &str) {
    INIT.call_once(|| {
        std::fs::create_dir_all("logs").expect("could not create logs dir");

        let file_appender = RollingFileAppender::new(Rotation::NEVER, "logs", file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        // keep the writer alive until the process exits
        Box::leak(Box::new(guard));

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info")
                .add_directive("courier=trace".parse().expect("valid directive"))
                .add_directive("courier_core=trace".parse().expect("valid directive"))
        });

        let subscriber = FmtSubscriber::builder()
            .with_span_events(FmtSpan::NONE)
            .with_max_level(Level::TRACE)
            .compact()
            .with_line_number(true)
            .without_time()
            .with_target(true)
            .with_env_filter(filter)
            .with_writer(non_blocking)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .expect("setting default subscriber failed");
    });
}

#[doc(hidden)]
pub mod __private {
    pub use parking_lot;
    pub use tokio;
    pub use tracing;
}

/// Re-exports for test modules.
pub mod prelude {
    pub use crate::{courier_test, initialize_tracing};
}
