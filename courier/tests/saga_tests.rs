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
use std::sync::Arc;
use std::time::Duration;

use courier::prelude::*;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::setup::messages::*;
use crate::setup::*;

mod setup;

/// An answer that names no survey.
#[courier_message]
struct SurveyAnswer {
    score: u8,
}

#[derive(Clone, Debug)]
struct Survey {
    id: SagaId,
    scores: Vec<u8>,
}

impl Saga for Survey {
    fn with_id(id: SagaId) -> Self {
        Self {
            id,
            scores: Vec::new(),
        }
    }

    fn saga_id(&self) -> SagaId {
        self.id
    }

    fn capabilities(capabilities: &mut SagaCapabilities<Self>) {
        capabilities.orchestrates_uncorrelated::<SurveyAnswer>();
    }
}

impl Orchestrates<SurveyAnswer> for Survey {
    fn orchestrate(&mut self, answer: &SurveyAnswer, _: &DispatchContext) -> ConsumeResult {
        self.scores.push(answer.score);
        Ok(())
    }
}

fn collect_faults<M: Message + Clone>(bus: &Bus) -> anyhow::Result<Arc<Mutex<Vec<Fault<M>>>>> {
    let faults = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&faults);
    bus.pipeline().subscribe_fn::<Fault<M>, _>(move |fault, _| {
        seen.lock().push(fault.clone());
        Ok(())
    })?;
    Ok(faults)
}

#[courier_test]
async fn test_saga_is_initiated_then_orchestrated() -> anyhow::Result<()> {
    initialize_tracing("saga_tests.log");
    let bus = with_test_messages(Bus::builder()).launch().await?;
    let repository = Arc::new(InMemorySagaRepository::<Onboarding>::new());
    bus.subscribe_saga::<Onboarding>(repository.clone())?;
    let faults = collect_faults::<ConfirmEmail>(&bus)?;

    let user_id = Uuid::now_v7();
    let outcome = bus
        .publish(RegisterUser {
            user_id,
            name: "ada".to_string(),
        })
        .await?;
    assert_eq!(outcome.delivered, 1);
    let saga = repository.find_by_id(user_id)?.expect("saga created");
    assert_eq!(saga.name, "ada");
    assert!(!saga.email_confirmed);

    bus.publish(ConfirmEmail { user_id }).await?;
    let saga = repository.find_by_id(user_id)?.expect("saga kept");
    assert!(saga.email_confirmed);

    // a failing step leaves the stored instance untouched
    let outcome = bus.publish(ConfirmEmail { user_id }).await?;
    assert_eq!(outcome.faulted, 1);
    assert_eq!(faults.lock().len(), 1);
    assert_eq!(repository.find_by_id(user_id)?, Some(saga));
    assert_eq!(repository.len(), 1);

    bus.shutdown().await;
    Ok(())
}

#[courier_test]
async fn test_saga_rejects_unknown_instances_and_reuses_existing_ones() -> anyhow::Result<()> {
    initialize_tracing("saga_tests.log");
    let bus = with_test_messages(Bus::builder()).launch().await?;
    let repository = Arc::new(InMemorySagaRepository::<Onboarding>::new());
    bus.subscribe_saga::<Onboarding>(repository.clone())?;
    let orphaned = collect_faults::<ConfirmEmail>(&bus)?;
    let reregistered = collect_faults::<RegisterUser>(&bus)?;

    bus.publish(ConfirmEmail {
        user_id: Uuid::now_v7(),
    })
    .await?;
    assert!(repository.is_empty());
    let reason = orphaned.lock()[0].reason().map(ToString::to_string);
    assert!(reason.is_some_and(|reason| reason.contains("no saga instance")));

    let user_id = Uuid::now_v7();
    bus.publish(RegisterUser {
        user_id,
        name: "grace".to_string(),
    })
    .await?;
    let outcome = bus
        .publish(RegisterUser {
            user_id,
            name: "grace hopper".to_string(),
        })
        .await?;
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.faulted, 0);
    assert!(reregistered.lock().is_empty());
    assert_eq!(repository.len(), 1);
    let saga = repository.find_by_id(user_id)?.expect("saga");
    assert_eq!(saga.name, "grace hopper");

    bus.shutdown().await;
    Ok(())
}

#[courier_test]
async fn test_uncorrelated_messages_follow_saga_options() -> anyhow::Result<()> {
    initialize_tracing("saga_tests.log");

    let rejecting = Bus::builder().launch().await?;
    let repository = Arc::new(InMemorySagaRepository::<Survey>::new());
    rejecting.subscribe_saga::<Survey>(repository.clone())?;
    let faults = collect_faults::<SurveyAnswer>(&rejecting)?;
    rejecting.publish(SurveyAnswer { score: 4 }).await?;
    assert!(repository.is_empty());
    assert_eq!(faults.lock().len(), 1);
    rejecting.shutdown().await;

    let mut config = CourierConfig::default();
    config.sagas.missing_correlation = MissingCorrelation::Fabricate;
    let fabricating = Bus::builder().with_config(config).launch().await?;
    let repository = Arc::new(InMemorySagaRepository::<Survey>::new());
    fabricating.subscribe_saga::<Survey>(repository.clone())?;
    fabricating.publish(SurveyAnswer { score: 4 }).await?;
    fabricating.publish(SurveyAnswer { score: 5 }).await?;

    // every answer starts its own survey
    let surveys = repository.find(&|_: &Survey| true)?;
    assert_eq!(surveys.len(), 2);
    assert!(surveys.iter().all(|survey| survey.scores.len() == 1));

    fabricating.shutdown().await;
    Ok(())
}

#[courier_test]
async fn test_saga_is_driven_from_another_bus() -> anyhow::Result<()> {
    initialize_tracing("saga_tests.log");
    let network = LoopbackNetwork::new();
    let (infra, service) = service_bus(&network).await?;
    let client = synced_bus(&network, "web").await?;
    let host = synced_bus(&network, "workflows").await?;

    let repository = Arc::new(InMemorySagaRepository::<Onboarding>::new());
    host.subscribe_saga::<Onboarding>(repository.clone())?;
    assert!(eventually(Duration::from_secs(5), || client.cache().len() == 2).await);

    let user_id = Uuid::now_v7();
    client
        .publish(RegisterUser {
            user_id,
            name: "linus".to_string(),
        })
        .await?;
    assert!(eventually(Duration::from_secs(5), || repository.len() == 1).await);

    client.publish(ConfirmEmail { user_id }).await?;
    assert!(
        eventually(Duration::from_secs(5), || {
            repository
                .find_by_id(user_id)
                .ok()
                .flatten()
                .is_some_and(|saga| saga.email_confirmed)
        })
        .await
    );

    host.shutdown().await;
    client.shutdown().await;
    service.stop().await;
    infra.shutdown().await;
    Ok(())
}
