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
use courier::prelude::*;
use uuid::Uuid;

#[courier_message(wire)]
pub struct Ping;

#[courier_message(wire)]
pub struct Pong;

#[courier_message(wire)]
pub struct PriceChanged {
    pub symbol: String,
    pub price: u32,
}

#[courier_message(wire, correlated_by = order_id)]
pub struct OrderShipped {
    pub order_id: u64,
    pub carrier: String,
}

#[courier_message(wire, correlated_by = user_id)]
pub struct RegisterUser {
    pub user_id: Uuid,
    pub name: String,
}

#[courier_message(wire, correlated_by = user_id)]
pub struct ConfirmEmail {
    pub user_id: Uuid,
}

/// Never registered for the wire.
#[courier_message]
pub struct LocalTick(pub u32);

/// Onboarding of one user, started by [`RegisterUser`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Onboarding {
    pub id: SagaId,
    pub name: String,
    pub email_confirmed: bool,
}

impl Saga for Onboarding {
    fn with_id(id: SagaId) -> Self {
        Self {
            id,
            name: String::new(),
            email_confirmed: false,
        }
    }

    fn saga_id(&self) -> SagaId {
        self.id
    }

    fn capabilities(capabilities: &mut SagaCapabilities<Self>) {
        capabilities
            .initiated_by_correlated::<RegisterUser>()
            .orchestrates::<ConfirmEmail>();
    }
}

impl InitiatedBy<RegisterUser> for Onboarding {
    fn initiate(&mut self, message: &RegisterUser, _: &DispatchContext) -> ConsumeResult {
        self.name.clone_from(&message.name);
        Ok(())
    }
}

impl Orchestrates<ConfirmEmail> for Onboarding {
    fn orchestrate(&mut self, _: &ConfirmEmail, _: &DispatchContext) -> ConsumeResult {
        anyhow::ensure!(!self.email_confirmed, "email of {} already confirmed", self.id);
        self.email_confirmed = true;
        Ok(())
    }
}
