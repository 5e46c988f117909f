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

/// Failures of translating between messages and envelopes.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// An envelope named a wire type nobody registered.
    #[error("unknown message type `{0}`")]
    UnknownMessageType(String),

    /// A message of an unregistered Rust type was about to be sent.
    #[error("`{0}` is not registered for the wire")]
    Unregistered(&'static str),

    #[error("failed to (de)serialize `{message_type}`: {source}")]
    Serialization {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },
}
