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

//! Delivery targets and the copy-on-write sets that hold them.

use std::fmt::Debug;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::pipeline::{CorrelatedRouter, DispatchContext};
use crate::traits::{ConsumeResult, Message};

/// Type-erased consume call produced by a capability.
pub(crate) type ConsumeFn =
    Arc<dyn Fn(&dyn Message, &DispatchContext) -> ConsumeResult + Send + Sync>;

/// Type-erased selective predicate.
pub(crate) type AcceptFn = Arc<dyn Fn(&dyn Message) -> bool + Send + Sync>;

/// Sink half of a saga router.
pub(crate) trait SagaSink: Send + Sync + Debug {
    fn consume(&self, message: &dyn Message, context: &DispatchContext) -> ConsumeResult;
}

/// Identifier of one registered sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A delivery target for one message type.
pub(crate) enum Sink {
    /// A long-lived consumer instance.
    Instance(ConsumeFn),
    /// A consumer built per message by the object builder.
    Component(ConsumeFn),
    /// Delivers to `inner` only when `accept` returns `true`.
    Selective { accept: AcceptFn, inner: Box<Sink> },
    /// Keyed fan-out for a correlated message type.
    Correlated(Arc<CorrelatedRouter>),
    /// Loads or creates a saga per correlation id.
    Saga(Arc<dyn SagaSink>),
}

impl Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instance(_) => f.write_str("Instance"),
            Self::Component(_) => f.write_str("Component"),
            Self::Selective { inner, .. } => f.debug_tuple("Selective").field(inner).finish(),
            Self::Correlated(router) => f.debug_tuple("Correlated").field(router).finish(),
            Self::Saga(saga) => f.debug_tuple("Saga").field(saga).finish(),
        }
    }
}

impl Sink {
    pub(crate) fn deliver(
        &self,
        message: &dyn Message,
        context: &DispatchContext,
        report: &mut DeliveryReport,
    ) {
        match self {
            Self::Instance(consume) | Self::Component(consume) => {
                report.record(|| consume(message, context));
            }
            Self::Selective { accept, inner } => {
                if accept(message) {
                    inner.deliver(message, context, report);
                } else {
                    trace!(message_type = %message.message_type(), "Selective sink declined message");
                    report.skipped += 1;
                }
            }
            Self::Correlated(router) => router.route(message, context, report),
            Self::Saga(saga) => report.record(|| saga.consume(message, context)),
        }
    }
}

/// Tally of one dispatch across all sinks it reached.
#[derive(Debug, Default)]
pub(crate) struct DeliveryReport {
    pub(crate) delivered: usize,
    pub(crate) skipped: usize,
    pub(crate) failures: Vec<anyhow::Error>,
}

impl DeliveryReport {
    /// Runs one consume call, turning an error or a panic into a recorded failure.
    fn record(&mut self, consume: impl FnOnce() -> ConsumeResult) {
        match catch_unwind(AssertUnwindSafe(consume)) {
            Ok(Ok(())) => self.delivered += 1,
            Ok(Err(error)) => self.failures.push(error),
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic payload".to_string());
                self.failures
                    .push(anyhow::anyhow!("consumer panicked: {reason}"));
            }
        }
    }
}

/// A sink plus its registration identity.
#[derive(Debug)]
pub(crate) struct SinkEntry {
    id: SinkId,
    sink: Sink,
    active: AtomicBool,
}

impl SinkEntry {
    pub(crate) fn new(sink: Sink) -> Self {
        Self {
            id: SinkId::next(),
            sink,
            active: AtomicBool::new(true),
        }
    }

    pub(crate) const fn id(&self) -> SinkId {
        self.id
    }

    pub(crate) fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub(crate) fn deliver(
        &self,
        message: &dyn Message,
        context: &DispatchContext,
        report: &mut DeliveryReport,
    ) {
        // a snapshot may still hold an entry that was removed after it was taken
        if self.active.load(Ordering::Acquire) {
            self.sink.deliver(message, context, report);
        }
    }
}

/// Copy-on-write list of sinks.
///
/// Dispatch clones the current `Arc` under a short read lock and iterates
/// without holding any lock; mutation swaps in a new list.
#[derive(Debug, Default)]
pub(crate) struct SinkSet {
    entries: RwLock<Arc<Vec<Arc<SinkEntry>>>>,
}

impl SinkSet {
    pub(crate) fn insert(&self, entry: Arc<SinkEntry>) -> SinkId {
        let id = entry.id();
        let mut guard = self.entries.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(entry);
        *guard = Arc::new(next);
        id
    }

    pub(crate) fn remove(&self, id: SinkId) -> bool {
        let mut guard = self.entries.write();
        let Some(position) = guard.iter().position(|entry| entry.id() == id) else {
            return false;
        };
        guard[position].deactivate();
        let mut next: Vec<_> = guard.iter().cloned().collect();
        next.remove(position);
        *guard = Arc::new(next);
        true
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Arc<SinkEntry>>> {
        Arc::clone(&self.entries.read())
    }

    pub(crate) fn deliver_all(
        &self,
        message: &dyn Message,
        context: &DispatchContext,
        report: &mut DeliveryReport,
    ) {
        for entry in self.snapshot().iter() {
            entry.deliver(message, context, report);
        }
    }

    pub(crate) fn clear(&self) -> usize {
        let mut guard = self.entries.write();
        for entry in guard.iter() {
            entry.deactivate();
        }
        let cleared = guard.len();
        *guard = Arc::new(Vec::new());
        cleared
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
