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

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::saga::{SagaError, SagaId};

/// What an orchestrating saga message without a correlation id does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingCorrelation {
    /// Fail the message with [`SagaError::Uncorrelated`].
    #[default]
    Reject,
    /// Start a fresh saga under a newly generated id.
    Fabricate,
}

/// Options applied to every message of one saga subscription.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaOptions {
    pub missing_correlation: MissingCorrelation,
}

/// Decides how a saga message maps onto saga instances.
pub trait SagaPolicy: Send + Sync + Debug {
    /// Whether an already persisted instance may consume the message.
    fn can_use_existing_instance(&self) -> bool;

    /// Whether a missing instance may be created for the message.
    ///
    /// `fabricated` is `true` when the id was generated rather than taken
    /// from the message.
    fn can_create_instance(&self, fabricated: bool) -> bool;

    /// The id of the instance that handles the message.
    fn new_saga_id(
        &self,
        correlation_id: Option<SagaId>,
        message_type: &'static str,
    ) -> Result<SagaId, SagaError>;
}

/// Policy of messages that start a saga.
///
/// Creates the instance when none exists and otherwise hands the message to
/// the stored one. The id is the message's correlation id, or a new
/// time-ordered UUID.
#[derive(Clone, Copy, Debug, Default)]
pub struct InitiatingPolicy;

impl SagaPolicy for InitiatingPolicy {
    fn can_use_existing_instance(&self) -> bool {
        true
    }

    fn can_create_instance(&self, _fabricated: bool) -> bool {
        true
    }

    fn new_saga_id(
        &self,
        correlation_id: Option<SagaId>,
        _message_type: &'static str,
    ) -> Result<SagaId, SagaError> {
        Ok(correlation_id.unwrap_or_else(Uuid::now_v7))
    }
}

/// Policy of messages that drive an existing saga.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrchestratingPolicy {
    missing_correlation: MissingCorrelation,
}

impl OrchestratingPolicy {
    #[must_use]
    pub const fn new(missing_correlation: MissingCorrelation) -> Self {
        Self {
            missing_correlation,
        }
    }
}

impl SagaPolicy for OrchestratingPolicy {
    fn can_use_existing_instance(&self) -> bool {
        true
    }

    fn can_create_instance(&self, fabricated: bool) -> bool {
        fabricated && self.missing_correlation == MissingCorrelation::Fabricate
    }

    fn new_saga_id(
        &self,
        correlation_id: Option<SagaId>,
        message_type: &'static str,
    ) -> Result<SagaId, SagaError> {
        match (correlation_id, self.missing_correlation) {
            (Some(id), _) => Ok(id),
            (None, MissingCorrelation::Fabricate) => Ok(Uuid::now_v7()),
            (None, MissingCorrelation::Reject) => Err(SagaError::Uncorrelated { message_type }),
        }
    }
}
