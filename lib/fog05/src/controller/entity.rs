// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deployment of multi-component applications (entities).

use std::collections::BTreeSet;

use fog05_api_types::{EntityComponent, EntityDescriptor, FduDescriptor};
use slog::{error, info};
use uuid::Uuid;

use super::{not_found, Controller, ControllerError, ResourceKind};
use crate::dependency::dependency_order;
use crate::manifest;

/// Where one component of a deployed application ended up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeployedComponent {
    pub name: String,
    pub fdu_id: Uuid,
    pub node: Uuid,
    pub instance: Uuid,
}

/// The entity's components, ordered so that each follows everything it needs.
fn ordered(
    entity: &EntityDescriptor,
) -> Result<Vec<&EntityComponent>, ControllerError> {
    let order = dependency_order(entity.components.iter().map(|c| {
        (c.name.as_str(), c.need.iter().map(String::as_str))
    }))?;
    Ok(order
        .iter()
        .filter_map(|name| entity.components.iter().find(|c| &c.name == name))
        .collect())
}

impl Controller {
    /// Onboards and instantiates every component of an application, each
    /// after the components it needs. If a component fails, the ones already
    /// deployed are torn down again before the error is returned.
    pub async fn deploy_entity(
        &self,
        entity: &EntityDescriptor,
    ) -> Result<Vec<DeployedComponent>, ControllerError> {
        manifest::validate_entity(entity)?;
        let components = ordered(entity)?;
        self.registry.add_catalog_entry(entity).await?;

        let log = self.log.new(slog::o!("entity" => entity.uuid.to_string()));
        let order: Vec<&str> =
            components.iter().map(|c| c.name.as_str()).collect();
        info!(log, "deploying application"; "name" => &entity.name,
              "order" => ?order);

        let mut deployed = Vec::with_capacity(components.len());
        let mut onboarded = Vec::new();
        for component in components {
            match self.deploy_component(component, &mut onboarded).await {
                Ok(d) => deployed.push(d),
                Err(e) => {
                    error!(log, "component failed; unwinding";
                           "component" => &component.name, "error" => %e);
                    self.unwind(&deployed, &onboarded).await;
                    let _ = self
                        .registry
                        .remove_catalog_entry::<EntityDescriptor>(entity.uuid)
                        .await;
                    return Err(e);
                }
            }
        }
        Ok(deployed)
    }

    /// Onboards a component's FDU unless the catalog already has it, then
    /// instantiates it. FDUs onboarded here are appended to `onboarded`. An
    /// instance left behind by a failed instantiation is terminated before
    /// the error is returned.
    async fn deploy_component(
        &self,
        component: &EntityComponent,
        onboarded: &mut Vec<Uuid>,
    ) -> Result<DeployedComponent, ControllerError> {
        let fdu_id = component.fdu.uuid;
        let known = self
            .registry
            .get_catalog_entry::<FduDescriptor>(fdu_id)
            .await?
            .is_some();
        if !known {
            self.onboard(&component.fdu).await?;
            onboarded.push(fdu_id);
        }

        let before: BTreeSet<Uuid> =
            self.fdu_instances(fdu_id).await?.iter().map(|r| r.uuid).collect();
        match self.instantiate_anywhere(fdu_id).await {
            Ok((node, instance)) => Ok(DeployedComponent {
                name: component.name.clone(),
                fdu_id,
                node,
                instance,
            }),
            Err(e) => {
                self.terminate_new_instances(fdu_id, &before).await;
                Err(e)
            }
        }
    }

    /// Terminates instances of `fdu_id` that are not in `before`.
    async fn terminate_new_instances(
        &self,
        fdu_id: Uuid,
        before: &BTreeSet<Uuid>,
    ) {
        let instances = match self.fdu_instances(fdu_id).await {
            Ok(instances) => instances,
            Err(e) => {
                error!(self.log, "failed to list instances";
                       "fdu_id" => %fdu_id, "error" => %e);
                return;
            }
        };
        for i in instances.iter().filter(|i| !before.contains(&i.uuid)) {
            if let Err(e) = self.terminate(i.uuid).await {
                error!(self.log, "failed to terminate";
                       "instance_id" => %i.uuid, "error" => %e);
            }
        }
    }

    /// Best-effort teardown of a partial deployment, newest first. Only the
    /// instances and FDUs the deployment created are removed.
    async fn unwind(
        &self,
        deployed: &[DeployedComponent],
        onboarded: &[Uuid],
    ) {
        for d in deployed.iter().rev() {
            if let Err(e) = self.terminate(d.instance).await {
                error!(self.log, "failed to terminate during unwind";
                       "instance_id" => %d.instance, "error" => %e);
            }
        }
        for &fdu_id in onboarded.iter().rev() {
            match self.offload(fdu_id).await {
                Ok(()) | Err(ControllerError::NotFound { .. }) => {}
                Err(e) => {
                    error!(self.log, "failed to offload during unwind";
                           "fdu_id" => %fdu_id, "error" => %e);
                }
            }
        }
    }

    /// Tears down a deployed application in reverse dependency order.
    pub async fn undeploy_entity(
        &self,
        entity_id: Uuid,
    ) -> Result<(), ControllerError> {
        let entity: EntityDescriptor = self
            .registry
            .get_catalog_entry(entity_id)
            .await?
            .ok_or_else(|| not_found(ResourceKind::Entity, entity_id))?;
        let components = ordered(&entity)?;

        for component in components.iter().rev() {
            let fdu_id = component.fdu.uuid;
            for instance in self.fdu_instances(fdu_id).await? {
                self.terminate(instance.uuid).await?;
            }
            match self.offload(fdu_id).await {
                Ok(()) | Err(ControllerError::NotFound { .. }) => {}
                Err(e) => return Err(e),
            }
            info!(self.log, "component removed";
                  "entity" => %entity_id, "component" => &component.name);
        }
        self.registry
            .remove_catalog_entry::<EntityDescriptor>(entity_id)
            .await?;
        Ok(())
    }
}
