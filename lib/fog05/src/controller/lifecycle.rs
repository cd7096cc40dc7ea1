// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Single-instance lifecycle transitions and their composites.

use fog05_api_types::{FduStatus, InstanceRecord};
use slog::info;
use uuid::Uuid;

use super::{not_found, Controller, ControllerError, ResourceKind};
use crate::eligibility;
use crate::path::{InstanceKey, Namespace};
use crate::state::Command;

impl Controller {
    /// Creates an instance of a catalog FDU on `node` and waits until the
    /// node's agent reports it defined. Returns the new instance's id.
    pub async fn define(
        &self,
        fdu_id: Uuid,
        node: Uuid,
    ) -> Result<Uuid, ControllerError> {
        let fdu = self.catalog_fdu(fdu_id).await?;
        if self.registry.get_node(node).await?.is_none() {
            return Err(not_found(ResourceKind::Node, node));
        }

        let instance = Uuid::new_v4();
        let key = InstanceKey { node, fdu: fdu_id, instance };
        let record =
            InstanceRecord::new(&fdu, node, instance, FduStatus::Define, 1);

        let sub = self.subscribe_actual(key).await?;
        self.registry.put_instance(Namespace::Desired, &record).await?;
        info!(self.log, "define requested"; "fdu_id" => %fdu_id,
              "node_id" => %node, "instance_id" => %instance);
        self.await_settled(key, record.generation, Some(FduStatus::Define), sub)
            .await?;
        Ok(instance)
    }

    /// Applies one command to an existing instance and waits for it to
    /// settle. Returns the settled actual record, or `None` once removed.
    async fn transition(
        &self,
        instance: Uuid,
        command: Command,
    ) -> Result<Option<InstanceRecord>, ControllerError> {
        let _lease = self.lease(instance).await?;
        let actual = self.instance_info(instance).await?;
        command.check(Some(actual.status))?;

        let key = InstanceKey::of(&actual);
        let generation = self.next_generation(key, Some(&actual)).await?;
        let desired = InstanceRecord {
            status: command.status(),
            error_code: None,
            error_msg: None,
            migration_properties: None,
            generation,
            ..actual
        };

        let sub = self.subscribe_actual(key).await?;
        self.registry.put_instance(Namespace::Desired, &desired).await?;
        info!(self.log, "transition requested"; "command" => %command,
              "instance_id" => %instance, "node_id" => %key.node,
              "generation" => generation);
        let settled = self
            .await_settled(key, generation, command.settled_state(), sub)
            .await?;

        if settled.is_none() {
            self.registry.remove_instance(Namespace::Desired, key).await?;
        }
        Ok(settled)
    }

    pub async fn configure(
        &self,
        instance: Uuid,
    ) -> Result<(), ControllerError> {
        self.transition(instance, Command::Configure).await.map(drop)
    }

    /// Returns a configured instance to DEFINE.
    pub async fn clean(&self, instance: Uuid) -> Result<(), ControllerError> {
        self.transition(instance, Command::Clean).await.map(drop)
    }

    pub async fn run(&self, instance: Uuid) -> Result<(), ControllerError> {
        self.transition(instance, Command::Run).await.map(drop)
    }

    pub async fn start(&self, instance: Uuid) -> Result<(), ControllerError> {
        self.run(instance).await
    }

    /// Returns a running or paused instance to CONFIGURE.
    pub async fn stop(&self, instance: Uuid) -> Result<(), ControllerError> {
        self.transition(instance, Command::Stop).await.map(drop)
    }

    pub async fn pause(&self, instance: Uuid) -> Result<(), ControllerError> {
        self.transition(instance, Command::Pause).await.map(drop)
    }

    pub async fn resume(&self, instance: Uuid) -> Result<(), ControllerError> {
        self.transition(instance, Command::Resume).await.map(drop)
    }

    /// Removes an instance; waits until the agent has withdrawn its record.
    pub async fn undefine(
        &self,
        instance: Uuid,
    ) -> Result<(), ControllerError> {
        self.transition(instance, Command::Undefine).await.map(drop)
    }

    /// Define, configure and run in sequence.
    pub async fn instantiate(
        &self,
        fdu_id: Uuid,
        node: Uuid,
    ) -> Result<Uuid, ControllerError> {
        let instance = self.define(fdu_id, node).await?;
        self.configure(instance).await?;
        self.run(instance).await?;
        Ok(instance)
    }

    /// Instantiates an FDU on a node picked at random among those that
    /// satisfy its placement constraints. Returns `(node, instance)`.
    pub async fn instantiate_anywhere(
        &self,
        fdu_id: Uuid,
    ) -> Result<(Uuid, Uuid), ControllerError> {
        let eligible = self.eligible_nodes(fdu_id).await?;
        let node =
            eligibility::select_node(&eligible, &mut rand::thread_rng())?;
        info!(self.log, "placed FDU"; "fdu_id" => %fdu_id, "node_id" => %node,
              "candidates" => eligible.len());
        let instance = self.instantiate(fdu_id, node).await?;
        Ok((node, instance))
    }

    /// Walks an instance back to removal from whatever state it is in.
    pub async fn terminate(
        &self,
        instance: Uuid,
    ) -> Result<(), ControllerError> {
        loop {
            let Some(actual) = self.find_instance(instance).await? else {
                return Ok(());
            };
            match actual.status {
                FduStatus::Run | FduStatus::Pause => self.stop(instance).await?,
                FduStatus::Configure => self.clean(instance).await?,
                FduStatus::Define | FduStatus::Error | FduStatus::Land => {
                    return self.undefine(instance).await;
                }
                other => {
                    return Err(crate::state::InvalidTransition {
                        from: Some(other),
                        command: Command::Undefine,
                    }
                    .into());
                }
            }
        }
    }
}
