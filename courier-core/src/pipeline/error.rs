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

use crate::traits::MessageType;

/// A consumer or saga type that cannot be subscribed as declared.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConventionViolation {
    #[error("`{consumer}` declares no consume capability")]
    NoCapabilities { consumer: &'static str },
    #[error("`{consumer}` declares a capability for `{message_type}` more than once")]
    DuplicateCapability {
        consumer: &'static str,
        message_type: MessageType,
    },
    #[error("the object builder cannot build component `{component}`")]
    UnbuildableComponent { component: &'static str },
    #[error("component `{component}` was subscribed but the pipeline has no object builder")]
    MissingObjectBuilder { component: &'static str },
    #[error(
        "component `{component}` correlates `{message_type}`; correlated consumers must be subscribed as instances"
    )]
    CorrelatedComponent {
        component: &'static str,
        message_type: MessageType,
    },
}

/// Failure of a subscribe call.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error(transparent)]
    Convention(#[from] ConventionViolation),
    #[error("the message pipeline has been disposed")]
    Disposed,
}
