// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The client-facing lifecycle controller.
//!
//! Every operation that changes an instance follows the same pattern: take
//! the instance's lease, check the requested transition against the
//! instance's actual state, subscribe to the actual record, write the desired
//! record with the next generation, and wait until the agent publishes the
//! target state (or `ERROR`) for that generation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use fog05_api_types::{
    FduDescriptor, FduStatus, InstanceRecord, NetworkDescriptor,
};
use slog::{debug, info, warn, Logger};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dependency::DependencyError;
use crate::eligibility::{self, EligibilityError};
use crate::lease::{Lease, LeaseMap};
use crate::manifest::{self, ValidationError};
use crate::path::{InstanceKey, Namespace, PathScheme};
use crate::registry::Registry;
use crate::state::InvalidTransition;
use crate::store::{decode, StateStore, StoreError, Subscription};

mod entity;
mod lifecycle;
mod migrate;

pub use entity::DeployedComponent;

/// Resource kinds named in [`ControllerError::NotFound`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Fdu,
    Image,
    Flavor,
    Network,
    Entity,
    Node,
    Instance,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("{kind} {id} not found")]
    NotFound { kind: ResourceKind, id: Uuid },

    #[error("no node satisfies the placement constraints")]
    NoEligibleNode,

    #[error("node {node} has no runtime plugin for hypervisor {hypervisor}")]
    IncompatibleDestination { node: Uuid, hypervisor: String },

    #[error("agent reported error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("store operation failed")]
    Store(#[from] StoreError),

    #[error("manifest validation failed")]
    Validation(#[from] ValidationError),

    #[error("{0} is not implemented")]
    NotImplemented(&'static str),

    #[error("instance {instance} did not reach {target} within {timeout:?}")]
    Timeout { instance: Uuid, target: String, timeout: Duration },

    #[error("wait cancelled; the requested transition may still complete")]
    Cancelled,

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("dependency cycle among components: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("invalid application dependencies")]
    Dependency(#[source] DependencyError),

    #[error(
        "migration of {instance} aborted: source update failed and the \
         landing on {destination} was rolled back"
    )]
    MigrationRollback {
        instance: Uuid,
        destination: Uuid,
        #[source]
        source: StoreError,
    },

    #[error("FDU {fdu} still has {count} instance(s)")]
    InstancesRemain { fdu: Uuid, count: usize },

    #[error("instance {instance} already runs on node {node}")]
    SameNode { instance: Uuid, node: Uuid },
}

impl From<DependencyError> for ControllerError {
    fn from(e: DependencyError) -> Self {
        match e {
            DependencyError::Cyclic(names) => {
                ControllerError::CyclicDependency(names)
            }
            other => ControllerError::Dependency(other),
        }
    }
}

impl From<EligibilityError> for ControllerError {
    fn from(e: EligibilityError) -> Self {
        match e {
            EligibilityError::NoEligibleNode => ControllerError::NoEligibleNode,
        }
    }
}

fn not_found(kind: ResourceKind, id: Uuid) -> ControllerError {
    ControllerError::NotFound { kind, id }
}

/// How long blocking operations wait for agents.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WaitPolicy {
    /// `None` waits without bound.
    pub timeout: Option<Duration>,
    /// Re-read interval once a subscription has closed.
    pub poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self { timeout: None, poll_interval: Duration::from_millis(500) }
    }
}

#[derive(Clone)]
pub struct Controller {
    registry: Registry,
    leases: Arc<LeaseMap<Uuid>>,
    policy: WaitPolicy,
    cancel: CancellationToken,
    log: Logger,
}

impl Controller {
    pub fn new(
        store: Arc<dyn StateStore>,
        scheme: PathScheme,
        policy: WaitPolicy,
        log: &Logger,
    ) -> Self {
        let log = log.new(slog::o!("component" => "controller"));
        Self {
            registry: Registry::new(store, scheme, &log),
            leases: Arc::new(LeaseMap::new()),
            policy,
            cancel: CancellationToken::new(),
            log,
        }
    }

    /// A handle sharing this controller's leases whose blocking operations
    /// give up with [`ControllerError::Cancelled`] once `token` is cancelled.
    /// Cancelling stops local waiting only.
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self { cancel: token, ..self.clone() }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    // Catalog

    /// Validates an FDU descriptor and adds it to the catalog.
    pub async fn onboard(
        &self,
        fdu: &FduDescriptor,
    ) -> Result<Uuid, ControllerError> {
        manifest::validate_fdu(fdu)?;
        self.registry.add_catalog_entry(fdu).await?;
        info!(self.log, "onboarded FDU"; "fdu_id" => %fdu.uuid,
              "name" => &fdu.name);
        Ok(fdu.uuid)
    }

    /// Removes an FDU from the catalog. Every instance of it must already be
    /// gone.
    pub async fn offload(&self, fdu_id: Uuid) -> Result<(), ControllerError> {
        if self
            .registry
            .get_catalog_entry::<FduDescriptor>(fdu_id)
            .await?
            .is_none()
        {
            return Err(not_found(ResourceKind::Fdu, fdu_id));
        }
        let remaining = self.fdu_instances(fdu_id).await?;
        if !remaining.is_empty() {
            return Err(ControllerError::InstancesRemain {
                fdu: fdu_id,
                count: remaining.len(),
            });
        }
        self.registry.remove_catalog_entry::<FduDescriptor>(fdu_id).await?;
        info!(self.log, "offloaded FDU"; "fdu_id" => %fdu_id);
        Ok(())
    }

    pub async fn add_network(
        &self,
        net: &NetworkDescriptor,
    ) -> Result<(), ControllerError> {
        manifest::validate_network(net)?;
        Ok(self.registry.add_catalog_entry(net).await?)
    }

    pub async fn remove_network(
        &self,
        id: Uuid,
    ) -> Result<(), ControllerError> {
        let existing =
            self.registry.get_catalog_entry::<NetworkDescriptor>(id).await?;
        if existing.is_none() {
            return Err(not_found(ResourceKind::Network, id));
        }
        Ok(self.registry.remove_catalog_entry::<NetworkDescriptor>(id).await?)
    }

    async fn catalog_fdu(
        &self,
        fdu_id: Uuid,
    ) -> Result<FduDescriptor, ControllerError> {
        self.registry
            .get_catalog_entry(fdu_id)
            .await?
            .ok_or_else(|| not_found(ResourceKind::Fdu, fdu_id))
    }

    // Queries

    /// Looks up the actual record of an instance on whichever node hosts it.
    pub async fn find_instance(
        &self,
        instance: Uuid,
    ) -> Result<Option<InstanceRecord>, ControllerError> {
        let mut found = self
            .registry
            .list_instances(Namespace::Actual, None, None, Some(instance))
            .await?;
        // During a migration the instance has a record on both nodes. The
        // source is authoritative until the destination runs it.
        found.sort_by_key(|r| match r.status {
            FduStatus::Land => 2,
            FduStatus::TakeOff => 1,
            _ => 0,
        });
        Ok(found.into_iter().next())
    }

    pub async fn instance_info(
        &self,
        instance: Uuid,
    ) -> Result<InstanceRecord, ControllerError> {
        self.find_instance(instance)
            .await?
            .ok_or_else(|| not_found(ResourceKind::Instance, instance))
    }

    /// Every instance of an FDU, across all nodes.
    pub async fn fdu_instances(
        &self,
        fdu_id: Uuid,
    ) -> Result<Vec<InstanceRecord>, ControllerError> {
        Ok(self
            .registry
            .list_instances(Namespace::Actual, None, Some(fdu_id), None)
            .await?)
    }

    pub async fn node_instances(
        &self,
        node: Uuid,
    ) -> Result<Vec<InstanceRecord>, ControllerError> {
        Ok(self
            .registry
            .list_instances(Namespace::Actual, Some(node), None, None)
            .await?)
    }

    /// The nodes able to host the FDU, per its placement constraints.
    pub async fn eligible_nodes(
        &self,
        fdu_id: Uuid,
    ) -> Result<BTreeSet<Uuid>, ControllerError> {
        let fdu = self.catalog_fdu(fdu_id).await?;
        let nodes = self.registry.list_nodes().await?;
        let constraints = fdu.placement_constraints();
        Ok(eligibility::eligible_nodes(&nodes, constraints.as_ref()))
    }

    // Waiting

    async fn lease(&self, instance: Uuid) -> Result<Lease, ControllerError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ControllerError::Cancelled),
            lease = self.leases.acquire(&instance) => Ok(lease),
        }
    }

    /// The generation the next desired write for `key` must carry.
    async fn next_generation(
        &self,
        key: InstanceKey,
        actual: Option<&InstanceRecord>,
    ) -> Result<u64, ControllerError> {
        let desired =
            self.registry.get_instance(Namespace::Desired, key).await?;
        let current = actual
            .map(|r| r.generation)
            .max(desired.map(|r| r.generation))
            .unwrap_or(0);
        Ok(current + 1)
    }

    async fn subscribe_actual(
        &self,
        key: InstanceKey,
    ) -> Result<Subscription, ControllerError> {
        let path = self.registry.scheme().instance(Namespace::Actual, key);
        Ok(self.registry.store().subscribe(&path).await?)
    }

    /// Blocks until the actual record for `key` settles for `generation`:
    /// reaches `target` (or disappears, when `target` is `None`), or reports
    /// `ERROR`. Honors the wait policy's timeout and the cancellation token.
    async fn await_settled(
        &self,
        key: InstanceKey,
        generation: u64,
        target: Option<FduStatus>,
        sub: Subscription,
    ) -> Result<Option<InstanceRecord>, ControllerError> {
        let id = sub.id();
        let watch = self.watch(key, generation, target, sub);
        let bounded = async {
            match self.policy.timeout {
                Some(timeout) => tokio::time::timeout(timeout, watch)
                    .await
                    .unwrap_or_else(|_| {
                        Err(ControllerError::Timeout {
                            instance: key.instance,
                            target: target.map_or_else(
                                || "removal".to_string(),
                                |s| s.to_string(),
                            ),
                            timeout,
                        })
                    }),
                None => watch.await,
            }
        };

        let result = tokio::select! {
            _ = self.cancel.cancelled() => Err(ControllerError::Cancelled),
            result = bounded => result,
        };
        let _ = self.registry.store().unsubscribe(id).await;
        result
    }

    async fn watch(
        &self,
        key: InstanceKey,
        generation: u64,
        target: Option<FduStatus>,
        sub: Subscription,
    ) -> Result<Option<InstanceRecord>, ControllerError> {
        let path = self.registry.scheme().instance(Namespace::Actual, key);
        let mut sub = Some(sub);
        let mut current =
            self.registry.get_instance(Namespace::Actual, key).await?;

        loop {
            if let Some(done) = settled(current.as_ref(), generation, target) {
                return done;
            }

            current = match sub.as_mut() {
                Some(active) => match active.recv().await {
                    Some(change) => match change.value {
                        Some(value) => Some(decode(&path, value)?),
                        None => None,
                    },
                    None => {
                        warn!(self.log, "subscription closed; polling";
                              "instance_id" => %key.instance);
                        sub = None;
                        self.registry
                            .get_instance(Namespace::Actual, key)
                            .await?
                    }
                },
                None => {
                    tokio::time::sleep(self.policy.poll_interval).await;
                    self.registry.get_instance(Namespace::Actual, key).await?
                }
            };
            debug!(self.log, "observed";
                   "instance_id" => %key.instance,
                   "status" => ?current.as_ref().map(|r| r.status),
                   "generation" =>
                       current.as_ref().map_or(0, |r| r.generation));
        }
    }
}

/// Decides whether an observed actual record ends a wait.
fn settled(
    record: Option<&InstanceRecord>,
    generation: u64,
    target: Option<FduStatus>,
) -> Option<Result<Option<InstanceRecord>, ControllerError>> {
    match record {
        None if target.is_none() => Some(Ok(None)),
        None => None,
        Some(r) if r.generation < generation => None,
        Some(r) if r.status == FduStatus::Error => {
            Some(Err(ControllerError::Remote {
                code: r.error_code.unwrap_or_default(),
                message: r.error_msg.clone().unwrap_or_default(),
            }))
        }
        Some(r) if Some(r.status) == target => Some(Ok(Some(r.clone()))),
        Some(_) => None,
    }
}
