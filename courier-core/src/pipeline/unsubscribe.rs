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
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use parking_lot::Mutex;

/// Removes one registration, returning whether anything was removed.
type Detach = Box<dyn Fn() -> bool + Send + Sync>;

/// One idempotent detach step.
struct DetachOnce {
    done: Mutex<bool>,
    detach: Detach,
}

impl DetachOnce {
    /// Concurrent callers wait until the detach has finished.
    fn run(&self) -> bool {
        let mut done = self.done.lock();
        if *done {
            return false;
        }
        let changed = (self.detach)();
        *done = true;
        changed
    }

    fn is_done(&self) -> bool {
        *self.done.lock()
    }
}

/// Revocable handle returned by every subscribe call.
///
/// The pipeline owns the registered sinks; callers only hold this token.
/// Invoking it detaches the registration synchronously: once
/// [`unsubscribe`](UnsubscribeAction::unsubscribe) returns, no dispatch that
/// starts afterwards reaches the removed sink.
///
/// Tokens compose with `+`; the combined token runs every part. Dropping a
/// token does *not* unsubscribe.
#[derive(Clone, Default)]
pub struct UnsubscribeAction {
    steps: Vec<Arc<DetachOnce>>,
}

impl Debug for UnsubscribeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnsubscribeAction")
            .field("steps", &self.steps.len())
            .field("pending", &self.pending())
            .finish()
    }
}

impl UnsubscribeAction {
    pub(crate) fn new(detach: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            steps: vec![Arc::new(DetachOnce {
                done: Mutex::new(false),
                detach: Box::new(detach),
            })],
        }
    }

    /// A token that detaches nothing.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Detaches every registration covered by this token.
    ///
    /// Returns `true` if this call removed a registration. It returns `false`
    /// once the token has been used and when the registration was already
    /// replaced by a later subscription. Every caller, including concurrent
    /// ones, returns only after the detach has completed.
    pub fn unsubscribe(&self) -> bool {
        self.steps
            .iter()
            .fold(false, |changed, step| step.run() || changed)
    }

    /// Number of registrations that have not been detached yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| !step.is_done())
            .count()
    }
}

impl Add for UnsubscribeAction {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.steps.extend(rhs.steps);
        self
    }
}

impl AddAssign for UnsubscribeAction {
    fn add_assign(&mut self, rhs: Self) {
        self.steps.extend(rhs.steps);
    }
}
