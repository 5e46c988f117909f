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
use std::any::type_name;
use std::fmt::Debug;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::pipeline::sink::SagaSink;
use crate::pipeline::DispatchContext;
use crate::saga::locks::SagaLocks;
use crate::saga::{
    InitiatingPolicy, OrchestratingPolicy, Saga, SagaCapability, SagaError, SagaOptions,
    SagaPolicy, SagaRepository, SagaRole, SagaTransaction,
};
use crate::traits::{ConsumeResult, Message};

/// Loads or creates saga instances for incoming messages.
///
/// One router serves every message type of a saga subscription, so messages
/// of different types for the same id are serialised too.
pub struct SagaRouter<S: Saga> {
    repository: Arc<dyn SagaRepository<S>>,
    options: SagaOptions,
    locks: SagaLocks,
}

impl<S: Saga> Debug for SagaRouter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaRouter")
            .field("saga", &type_name::<S>())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S: Saga> SagaRouter<S> {
    pub(crate) fn new(repository: Arc<dyn SagaRepository<S>>, options: SagaOptions) -> Self {
        Self {
            repository,
            options,
            locks: SagaLocks::default(),
        }
    }

    pub(crate) fn policy_for(&self, role: SagaRole) -> Arc<dyn SagaPolicy> {
        match role {
            SagaRole::Initiating => Arc::new(InitiatingPolicy),
            SagaRole::Orchestrating => {
                Arc::new(OrchestratingPolicy::new(self.options.missing_correlation))
            }
        }
    }

    fn route(
        &self,
        capability: &SagaCapability<S>,
        policy: &dyn SagaPolicy,
        message: &dyn Message,
        context: &DispatchContext,
    ) -> ConsumeResult {
        let message_type = message.message_type().name();
        let correlation_id = capability.correlation_id(message);
        let fabricated = correlation_id.is_none();
        let id = policy.new_saga_id(correlation_id, message_type)?;

        let _lock = self.locks.acquire(id);
        let instance = match self.repository.find_by_id(id)? {
            Some(existing) if policy.can_use_existing_instance() => existing,
            Some(_) => return Err(SagaError::ExistingInstanceRejected { id, message_type }.into()),
            None if policy.can_create_instance(fabricated) => {
                debug!(saga = type_name::<S>(), saga_id = %id, message_type, "Creating saga");
                self.repository.create(id)?
            }
            None => return Err(SagaError::NotFound { id, message_type }.into()),
        };

        let mut transaction = SagaTransaction::begin(instance);
        if let Err(error) = capability.handle(transaction.state_mut(), message, context) {
            warn!(saga_id = %id, message_type, %error, "Saga handler failed, changes discarded");
            transaction.rollback();
            return Err(error);
        }
        transaction.commit(self.repository.as_ref())?;
        trace!(saga_id = %id, message_type, "Saga message consumed");
        Ok(())
    }
}

/// The sink of one saga message type.
pub(crate) struct SagaMessageSink<S: Saga> {
    router: Arc<SagaRouter<S>>,
    capability: SagaCapability<S>,
    policy: Arc<dyn SagaPolicy>,
}

impl<S: Saga> SagaMessageSink<S> {
    pub(crate) fn new(router: Arc<SagaRouter<S>>, capability: SagaCapability<S>) -> Self {
        let policy = router.policy_for(capability.role());
        Self {
            router,
            capability,
            policy,
        }
    }
}

impl<S: Saga> Debug for SagaMessageSink<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaMessageSink")
            .field("capability", &self.capability)
            .field("policy", &self.policy)
            .finish()
    }
}

impl<S: Saga> SagaSink for SagaMessageSink<S> {
    fn consume(&self, message: &dyn Message, context: &DispatchContext) -> ConsumeResult {
        self.router
            .route(&self.capability, self.policy.as_ref(), message, context)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    use anyhow::anyhow;
    use uuid::Uuid;

    use super::*;
    use crate::fault::Fault;
    use crate::pipeline::MessagePipeline;
    use crate::saga::{
        InMemorySagaRepository, InitiatedBy, MissingCorrelation, Orchestrates, SagaCapabilities,
        SagaId,
    };
    use crate::traits::CorrelatedBy;

    #[derive(Clone, Debug)]
    struct RegisterUser {
        user_id: SagaId,
    }

    impl CorrelatedBy for RegisterUser {
        type Key = SagaId;

        fn correlation_id(&self) -> SagaId {
            self.user_id
        }
    }

    #[derive(Clone, Debug)]
    struct ConfirmEmail {
        user_id: SagaId,
        valid: bool,
    }

    impl CorrelatedBy for ConfirmEmail {
        type Key = SagaId;

        fn correlation_id(&self) -> SagaId {
            self.user_id
        }
    }

    #[derive(Clone, Debug)]
    struct Reminder;

    #[derive(Clone, Debug, PartialEq)]
    struct Registration {
        id: SagaId,
        registered: bool,
        initiations: u32,
        confirmed: bool,
        reminders: u32,
    }

    impl Saga for Registration {
        fn with_id(id: SagaId) -> Self {
            Self {
                id,
                registered: false,
                initiations: 0,
                confirmed: false,
                reminders: 0,
            }
        }

        fn saga_id(&self) -> SagaId {
            self.id
        }

        fn capabilities(capabilities: &mut SagaCapabilities<Self>) {
            capabilities
                .initiated_by_correlated::<RegisterUser>()
                .orchestrates::<ConfirmEmail>()
                .orchestrates_uncorrelated::<Reminder>();
        }
    }

    impl InitiatedBy<RegisterUser> for Registration {
        fn initiate(&mut self, _: &RegisterUser, _: &DispatchContext) -> ConsumeResult {
            // widen the race window between lookup and save
            thread::sleep(std::time::Duration::from_millis(20));
            self.registered = true;
            self.initiations += 1;
            Ok(())
        }
    }

    impl Orchestrates<ConfirmEmail> for Registration {
        fn orchestrate(&mut self, message: &ConfirmEmail, _: &DispatchContext) -> ConsumeResult {
            self.confirmed = true;
            if message.valid {
                Ok(())
            } else {
                Err(anyhow!("confirmation link expired"))
            }
        }
    }

    impl Orchestrates<Reminder> for Registration {
        fn orchestrate(&mut self, _: &Reminder, _: &DispatchContext) -> ConsumeResult {
            self.reminders += 1;
            Ok(())
        }
    }

    fn pipeline_with(
        options: SagaOptions,
    ) -> (MessagePipeline, Arc<InMemorySagaRepository<Registration>>) {
        let pipeline = MessagePipeline::new();
        let repository = Arc::new(InMemorySagaRepository::new());
        pipeline
            .subscribe_saga::<Registration>(repository.clone(), options)
            .expect("saga");
        (pipeline, repository)
    }

    fn fault_count<M: Message + Clone>(pipeline: &MessagePipeline) -> Arc<AtomicUsize> {
        let faults = Arc::new(AtomicUsize::new(0));
        let recorded = Arc::clone(&faults);
        pipeline
            .subscribe_fn(move |_: &Fault<M>, _| {
                recorded.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .expect("fault observer");
        faults
    }

    #[test]
    fn racing_initiations_create_the_saga_once() {
        let (pipeline, repository) = pipeline_with(SagaOptions::default());
        let faults = fault_count::<RegisterUser>(&pipeline);
        let user_id = Uuid::now_v7();
        let barrier = Arc::new(Barrier::new(2));

        let handles: Vec<_> = (0..2)
            .map(|_| {
                let pipeline = pipeline.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    pipeline.dispatch(&RegisterUser { user_id });
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("dispatch thread");
        }

        assert_eq!(repository.len(), 1);
        assert_eq!(faults.load(Ordering::SeqCst), 0);
        let saga = repository.find_by_id(user_id).expect("find").expect("saga");
        assert!(saga.registered);
        // the later message ran against the committed instance, not a fresh one
        assert_eq!(saga.initiations, 2);
    }

    #[test]
    fn orchestration_requires_an_existing_saga() {
        let (pipeline, repository) = pipeline_with(SagaOptions::default());
        let faults = fault_count::<ConfirmEmail>(&pipeline);

        let outcome = pipeline.dispatch(&ConfirmEmail {
            user_id: Uuid::now_v7(),
            valid: true,
        });

        assert_eq!(outcome.faulted, 1);
        assert_eq!(faults.load(Ordering::SeqCst), 1);
        assert!(repository.is_empty());
    }

    #[test]
    fn failed_handlers_leave_the_stored_saga_untouched() {
        let (pipeline, repository) = pipeline_with(SagaOptions::default());
        let user_id = Uuid::now_v7();
        pipeline.dispatch(&RegisterUser { user_id });

        pipeline.dispatch(&ConfirmEmail {
            user_id,
            valid: false,
        });
        let saga = repository.find_by_id(user_id).expect("find").expect("saga");
        assert!(!saga.confirmed);

        pipeline.dispatch(&ConfirmEmail {
            user_id,
            valid: true,
        });
        let saga = repository.find_by_id(user_id).expect("find").expect("saga");
        assert!(saga.confirmed);
    }

    #[test]
    fn uncorrelated_orchestration_is_rejected_by_default() {
        let (pipeline, repository) = pipeline_with(SagaOptions::default());
        let faults = fault_count::<Reminder>(&pipeline);

        pipeline.dispatch(&Reminder);

        assert_eq!(faults.load(Ordering::SeqCst), 1);
        assert!(repository.is_empty());
    }

    #[test]
    fn uncorrelated_orchestration_can_fabricate_a_saga() {
        let (pipeline, repository) = pipeline_with(SagaOptions {
            missing_correlation: MissingCorrelation::Fabricate,
        });

        assert_eq!(pipeline.dispatch(&Reminder).delivered, 1);

        let sagas = repository
            .find(&|saga: &Registration| saga.reminders == 1)
            .expect("find");
        assert_eq!(sagas.len(), 1);
    }
}
