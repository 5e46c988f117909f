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
//! Detection of envelopes that can never be consumed.
//!
//! An inbound envelope is poison when it cannot be decoded, when its
//! transport redelivery count passes the configured limit, or when it was
//! dispatched the configured number of times without any consumer accepting
//! it. Poison envelopes are forwarded unmodified to the poison endpoint.
//!
//! ```rust,ignore
//! let tracker = PoisonTracker::new(PoisonConfig {
//!     max_dispatch_attempts: 3,
//!     ..PoisonConfig::default()
//! });
//! match tracker.record_unaccepted(envelope.message_id) {
//!     PoisonVerdict::Retry { .. } => endpoint.send(envelope.redelivered()).await?,
//!     PoisonVerdict::Poison(reason) => forward_to_poison(envelope, reason).await,
//! }
//! ```

use std::fmt::{self, Display};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::transport::EndpointAddress;

/// Configuration of poison detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoisonConfig {
    /// Where poison envelopes go. Without one they are logged and dropped.
    pub endpoint: Option<EndpointAddress>,

    /// Dispatches without an accepting consumer before an envelope is poison.
    pub max_dispatch_attempts: u32,

    /// Highest transport redelivery count still dispatched.
    pub max_redelivery_count: u32,
}

impl Default for PoisonConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_dispatch_attempts: 5,
            max_redelivery_count: 10,
        }
    }
}

/// Why an envelope was declared poison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoisonReason {
    /// The envelope's type is unknown or its payload does not fit the type.
    Undecodable(String),
    /// The transport redelivered the envelope too often.
    RedeliveryExceeded { redelivery_count: u32 },
    /// No consumer accepted the envelope in any of its dispatches.
    Unaccepted { attempts: u32 },
}

impl Display for PoisonReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undecodable(reason) => write!(f, "undecodable: {reason}"),
            Self::RedeliveryExceeded { redelivery_count } => {
                write!(f, "redelivered {redelivery_count} times")
            }
            Self::Unaccepted { attempts } => {
                write!(f, "not accepted after {attempts} dispatch attempts")
            }
        }
    }
}

/// Outcome of a dispatch nobody accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoisonVerdict {
    /// Dispatch again; this was attempt number `attempt`.
    Retry { attempt: u32 },
    /// Give up and forward to the poison endpoint.
    Poison(PoisonReason),
}

/// Statistics for poison detection.
#[derive(Debug, Default)]
pub struct PoisonStats {
    pub retried: AtomicUsize,
    pub poisoned: AtomicUsize,
}

impl PoisonStats {
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn poisoned(&self) -> usize {
        self.poisoned.load(Ordering::Relaxed)
    }
}

/// Counts unaccepted dispatches per envelope.
#[derive(Debug, Default)]
pub struct PoisonTracker {
    config: PoisonConfig,
    attempts: DashMap<Uuid, u32>,
    stats: PoisonStats,
}

impl PoisonTracker {
    #[must_use]
    pub fn new(config: PoisonConfig) -> Self {
        Self {
            config,
            attempts: DashMap::new(),
            stats: PoisonStats::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &PoisonConfig {
        &self.config
    }

    #[must_use]
    pub const fn stats(&self) -> &PoisonStats {
        &self.stats
    }

    /// Checks the transport's redelivery count before dispatching.
    #[must_use]
    pub fn check_redelivery(&self, redelivery_count: u32) -> Option<PoisonReason> {
        (redelivery_count > self.config.max_redelivery_count)
            .then_some(PoisonReason::RedeliveryExceeded { redelivery_count })
    }

    /// Records a dispatch of `message_id` that no consumer accepted.
    pub fn record_unaccepted(&self, message_id: Uuid) -> PoisonVerdict {
        let attempt = {
            let mut attempts = self.attempts.entry(message_id).or_insert(0);
            *attempts += 1;
            *attempts
        };
        if attempt >= self.config.max_dispatch_attempts {
            self.attempts.remove(&message_id);
            trace!(%message_id, attempt, "Envelope declared poison");
            PoisonVerdict::Poison(PoisonReason::Unaccepted { attempts: attempt })
        } else {
            self.stats.retried.fetch_add(1, Ordering::Relaxed);
            trace!(%message_id, attempt, "Unaccepted envelope will be retried");
            PoisonVerdict::Retry { attempt }
        }
    }

    /// Forgets `message_id` once it was accepted.
    pub fn clear(&self, message_id: &Uuid) {
        self.attempts.remove(message_id);
    }

    /// Counts one envelope forwarded to the poison endpoint.
    pub fn record_poisoned(&self) {
        self.stats.poisoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Envelopes with unaccepted dispatches still being retried.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.attempts.len()
    }
}
