// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Two-phase live migration.
//!
//! The destination is told to expect the instance (LAND) before the source
//! is told to let go of it (TAKE_OFF), so a failure between the two writes
//! leaves the instance running on the source only. If the source write
//! fails, the destination's landing is rolled back with an UNDEFINE.

use fog05_api_types::{
    FduStatus, InstanceRecord, MigrationKind, MigrationProperties,
};
use slog::{error, info, warn};
use uuid::Uuid;

use super::{not_found, Controller, ControllerError, ResourceKind};
use crate::path::{InstanceKey, Namespace};
use crate::state::Command;

impl Controller {
    /// Moves a running instance to `destination` and waits until it runs
    /// there. Returns the destination's actual record.
    pub async fn migrate(
        &self,
        instance: Uuid,
        destination: Uuid,
    ) -> Result<InstanceRecord, ControllerError> {
        let _lease = self.lease(instance).await?;
        let source = self.instance_info(instance).await?;
        if source.node == destination {
            return Err(ControllerError::SameNode {
                instance,
                node: destination,
            });
        }
        Command::TakeOff.check(Some(source.status))?;
        if source.migration_kind == MigrationKind::Cold {
            return Err(ControllerError::NotImplemented("cold migration"));
        }
        self.check_destination(destination, &source.hypervisor).await?;

        let src_key = InstanceKey::of(&source);
        let dst_key = src_key.on_node(destination);
        let generation = self.next_generation(src_key, Some(&source)).await?;
        let props = MigrationProperties { source: source.node, destination };
        let intent = |node: Uuid, status: FduStatus| InstanceRecord {
            node,
            status,
            error_code: None,
            error_msg: None,
            migration_properties: Some(props),
            generation,
            ..source.clone()
        };

        let log = self.log.new(slog::o!(
            "instance_id" => instance.to_string(),
            "source" => source.node.to_string(),
            "destination" => destination.to_string(),
        ));

        let sub = self.subscribe_actual(dst_key).await?;
        let landing = intent(destination, FduStatus::Land);
        if let Err(e) =
            self.registry.put_instance(Namespace::Desired, &landing).await
        {
            let _ = self.registry.store().unsubscribe(sub.id()).await;
            return Err(e.into());
        }
        info!(log, "landing requested"; "generation" => generation);

        let take_off = intent(source.node, FduStatus::TakeOff);
        if let Err(e) =
            self.registry.put_instance(Namespace::Desired, &take_off).await
        {
            let _ = self.registry.store().unsubscribe(sub.id()).await;
            warn!(log, "take-off request failed; rolling back landing";
                  "error" => %e);
            if let Err(rollback) = self.roll_back_landing(&landing).await {
                error!(log, "landing rollback failed"; "error" => %rollback);
            }
            return Err(ControllerError::MigrationRollback {
                instance,
                destination,
                source: e,
            });
        }
        info!(log, "take-off requested");

        let landed = match self
            .await_settled(dst_key, generation, Some(FduStatus::Run), sub)
            .await
        {
            Ok(landed) => landed,
            Err(e @ ControllerError::Remote { .. }) => {
                // The source resumes on its own once it sees the failure;
                // withdraw the failed landing so only the source remains.
                warn!(log, "destination failed to land"; "error" => %e);
                if let Err(rollback) = self.roll_back_landing(&landing).await {
                    error!(log, "landing rollback failed";
                           "error" => %rollback);
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        let landed =
            landed.ok_or_else(|| not_found(ResourceKind::Instance, instance))?;
        info!(log, "migration complete");
        Ok(landed)
    }

    /// Fails unless `node` exists and carries a runtime plugin for
    /// `hypervisor`.
    async fn check_destination(
        &self,
        node: Uuid,
        hypervisor: &str,
    ) -> Result<(), ControllerError> {
        if self.registry.get_node(node).await?.is_none() {
            return Err(not_found(ResourceKind::Node, node));
        }
        let plugins = self.registry.list_plugins(node).await?;
        if plugins.iter().any(|p| p.handles_hypervisor(hypervisor)) {
            Ok(())
        } else {
            Err(ControllerError::IncompatibleDestination {
                node,
                hypervisor: hypervisor.to_string(),
            })
        }
    }

    /// Withdraws a LAND request and waits until the destination has no
    /// record of the instance.
    async fn roll_back_landing(
        &self,
        landing: &InstanceRecord,
    ) -> Result<(), ControllerError> {
        let key = InstanceKey::of(landing);
        let undefine = InstanceRecord {
            status: FduStatus::Undefine,
            migration_properties: None,
            generation: landing.generation + 1,
            ..landing.clone()
        };

        let sub = self.subscribe_actual(key).await?;
        self.registry.put_instance(Namespace::Desired, &undefine).await?;
        self.await_settled(key, undefine.generation, None, sub).await?;
        self.registry.remove_instance(Namespace::Desired, key).await?;
        Ok(())
    }
}
