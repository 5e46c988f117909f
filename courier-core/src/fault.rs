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

use std::backtrace::BacktraceStatus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::traits::Message;

/// Published when a consumer of `M` fails.
///
/// Carries a copy of the message that could not be consumed together with the
/// error chain and, when backtraces are enabled, the captured stack frames.
/// Faults are ordinary messages: subscribe to `Fault<M>` to observe them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault<M> {
    /// Unique id of this fault.
    pub fault_id: Uuid,
    /// The message whose consumption failed.
    pub failed_message: M,
    /// The error followed by each of its causes, outermost first.
    pub messages: Vec<String>,
    /// Captured stack frames, empty unless `RUST_BACKTRACE` was set.
    pub stack_trace: Vec<String>,
    /// When the failure was observed.
    pub occurred_at: DateTime<Utc>,
}

impl<M> Fault<M>
where
    M: Message + Clone,
{
    /// Builds a fault for `message` from the consumer's error.
    #[must_use]
    pub fn new(message: M, error: &anyhow::Error) -> Self {
        let backtrace = error.backtrace();
        let stack_trace = match backtrace.status() {
            BacktraceStatus::Captured => backtrace
                .to_string()
                .lines()
                .map(|line| line.trim().to_string())
                .filter(|line| !line.is_empty())
                .collect(),
            _ => Vec::new(),
        };
        Self {
            fault_id: Uuid::now_v7(),
            failed_message: message,
            messages: error.chain().map(ToString::to_string).collect(),
            stack_trace,
            occurred_at: Utc::now(),
        }
    }

    /// Type-erased constructor used by type routers.
    ///
    /// Returns `None` if `message` is not an `M`.
    #[must_use]
    pub fn capture(message: &dyn Message, error: &anyhow::Error) -> Option<Box<dyn Message>> {
        let message = message.as_any().downcast_ref::<M>()?;
        Some(Box::new(Self::new(message.clone(), error)))
    }

    /// The outermost error message.
    #[must_use]
    pub fn reason(&self) -> Option<&str> {
        self.messages.first().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Ping(u8);

    #[test]
    fn captures_the_whole_error_chain() {
        let error = Err::<(), _>(anyhow::anyhow!("socket closed"))
            .context("could not send pong")
            .unwrap_err();
        let fault = Fault::new(Ping(1), &error);

        assert_eq!(fault.failed_message, Ping(1));
        assert_eq!(fault.reason(), Some("could not send pong"));
        assert_eq!(fault.messages, vec!["could not send pong", "socket closed"]);
    }

    #[test]
    fn capture_ignores_other_message_types() {
        let error = anyhow::anyhow!("boom");
        assert!(Fault::<Ping>::capture(&"not a ping", &error).is_none());

        let captured = Fault::<Ping>::capture(&Ping(3), &error).expect("ping fault");
        let fault = captured
            .as_ref()
            .as_any()
            .downcast_ref::<Fault<Ping>>()
            .expect("typed fault");
        assert_eq!(fault.failed_message, Ping(3));
    }
}
