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
use thiserror::Error;

use crate::saga::SagaId;

/// Why a saga could not consume a message.
///
/// Raised inside the saga's transaction, so the failing message surfaces as a
/// fault and the saga instance is left untouched.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SagaError {
    #[error("`{message_type}` carries no correlation id and uncorrelated orchestration is rejected")]
    Uncorrelated { message_type: &'static str },
    #[error("no saga instance {id} exists and `{message_type}` cannot create one")]
    NotFound {
        id: SagaId,
        message_type: &'static str,
    },
    #[error("saga instance {id} already exists and `{message_type}` cannot use it")]
    ExistingInstanceRejected {
        id: SagaId,
        message_type: &'static str,
    },
    #[error("saga repository failure: {reason}")]
    Repository { reason: String },
}

impl SagaError {
    pub fn repository(reason: impl ToString) -> Self {
        Self::Repository {
            reason: reason.to_string(),
        }
    }
}
