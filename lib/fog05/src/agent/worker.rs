// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-instance worker of an agent.
//!
//! A worker drains its queue one record at a time. While a migration half is
//! waiting on the peer node, a newer desired record for the instance
//! preempts the wait and is applied next. Once the instance has left the
//! node the worker closes its queue, finishes what is already queued and
//! exits; the reactor starts a successor if the instance comes back.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use fog05_api_types::{FduStatus, InstanceRecord, MigrationProperties};
use slog::{debug, error, info, warn, Logger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{
    AgentContext, PluginError, RuntimePlugin, ERR_INVALID_TRANSITION,
    ERR_MISSING_MIGRATION, ERR_NO_PLUGIN,
};
use crate::path::{InstanceKey, Namespace};
use crate::state::Command;
use crate::store::{decode, StoreError};

/// How often a migration half re-reads its peer once the peer's
/// subscription has closed.
const PEER_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum MigrateRole {
    Source,
    Destination,
}

/// How a wait on the peer node ended.
enum PeerOutcome<T> {
    Settled(T),
    /// A newer desired record arrived for this instance.
    Preempted(InstanceRecord),
    Shutdown,
    Store(StoreError),
}

/// What the source learned about the destination.
enum Landing {
    Running,
    Failed,
}

/// What a worker does after applying a record.
enum Next {
    Wait,
    /// A newer record preempted the one being applied.
    Apply(InstanceRecord),
    /// The instance is no longer on this node.
    Retire,
}

/// Starts a worker for `instance`. A worker replacing a retired one first
/// waits for `previous` to finish, so records for one instance are never
/// applied concurrently.
pub(super) fn spawn(
    ctx: Arc<AgentContext>,
    instance: Uuid,
    rx: mpsc::UnboundedReceiver<InstanceRecord>,
    previous: Option<JoinHandle<()>>,
) -> JoinHandle<()> {
    let log = ctx.log.new(slog::o!("instance_id" => instance.to_string()));
    ctx.active_workers.fetch_add(1, Ordering::SeqCst);
    let worker = Worker { ctx, rx, log, last_applied: 0 };
    tokio::spawn(worker.run(previous))
}

struct Worker {
    ctx: Arc<AgentContext>,
    rx: mpsc::UnboundedReceiver<InstanceRecord>,
    log: Logger,
    /// Generation of the last desired record acted upon.
    last_applied: u64,
}

impl Worker {
    async fn run(mut self, previous: Option<JoinHandle<()>>) {
        if let Some(previous) = previous {
            let _ = previous.await;
        }

        let mut pending = None;
        loop {
            let desired = match pending.take() {
                Some(record) => record,
                None => tokio::select! {
                    _ = self.ctx.shutdown.cancelled() => break,
                    next = self.rx.recv() => match next {
                        Some(record) => record,
                        None => break,
                    },
                },
            };
            match self.apply(desired).await {
                Ok(Next::Wait) => {}
                Ok(Next::Apply(next)) => pending = Some(next),
                // Later sends fail and start a successor; drain what is
                // already queued first.
                Ok(Next::Retire) => self.rx.close(),
                Err(e) => {
                    error!(self.log, "failed to apply desired record";
                           "error" => %e);
                }
            }
        }
        self.ctx.active_workers.fetch_sub(1, Ordering::SeqCst);
        debug!(self.log, "instance worker exiting");
    }

    /// Applies one desired record.
    async fn apply(
        &mut self,
        desired: InstanceRecord,
    ) -> Result<Next, StoreError> {
        let Some(command) = Command::from_status(desired.status) else {
            warn!(self.log, "ignoring desired record with status ERROR");
            return Ok(Next::Wait);
        };

        let generation = desired.generation;
        if generation != 0 && generation <= self.last_applied {
            debug!(self.log, "desired record already handled";
                   "generation" => generation);
            return Ok(Next::Wait);
        }

        let key = InstanceKey::of(&desired);
        let actual =
            self.ctx.registry.get_instance(Namespace::Actual, key).await?;
        match &actual {
            Some(actual)
                if generation != 0 && actual.generation >= generation =>
            {
                debug!(self.log, "desired record already applied";
                       "generation" => generation);
                return Ok(Next::Wait);
            }
            None if matches!(command, Command::Undefine | Command::TakeOff) => {
                debug!(self.log, "instance already gone"; "command" => %command,
                       "generation" => generation);
                self.last_applied = generation;
                self.withdraw_desired(&desired).await?;
                return Ok(Next::Retire);
            }
            _ => {}
        }
        self.last_applied = generation;

        let current = actual.as_ref().map(|a| a.status);
        if let Err(e) = command.check(current) {
            warn!(self.log, "rejecting transition"; "error" => %e);
            self.publish_error(&desired, ERR_INVALID_TRANSITION, e.to_string())
                .await?;
            return Ok(Next::Wait);
        }

        let Some(plugin) = self.ctx.plugin_for(&desired.hypervisor).cloned()
        else {
            let msg =
                format!("no plugin for hypervisor {}", desired.hypervisor);
            warn!(self.log, "{}", msg);
            self.publish_error(&desired, ERR_NO_PLUGIN, msg).await?;
            return Ok(Next::Wait);
        };

        info!(self.log, "applying"; "command" => %command,
              "generation" => desired.generation);
        let plugin = plugin.as_ref();
        let result = match command {
            Command::Define => plugin.on_define(&desired).await,
            Command::Configure => plugin.on_configure(&desired).await,
            Command::Run => plugin.on_start(&desired).await,
            Command::Stop => plugin.on_stop(&desired).await,
            Command::Pause => plugin.on_pause(&desired).await,
            Command::Resume => plugin.on_resume(&desired).await,
            Command::Clean => plugin.on_clean(&desired).await,
            Command::Undefine => return self.undefine(plugin, &desired).await,
            Command::Land => return self.land(plugin, desired).await,
            Command::TakeOff => return self.take_off(plugin, desired).await,
        };

        match (result, command.settled_state()) {
            (Ok(()), Some(state)) => {
                self.publish(&desired, state, None).await?;
            }
            (Ok(()), None) => {}
            (Err(e), _) => self.publish_plugin_error(&desired, e).await?,
        }
        Ok(Next::Wait)
    }

    async fn undefine(
        &self,
        plugin: &dyn RuntimePlugin,
        desired: &InstanceRecord,
    ) -> Result<Next, StoreError> {
        match plugin.on_undefine(desired).await {
            Ok(()) => {
                let key = InstanceKey::of(desired);
                self.ctx
                    .registry
                    .remove_instance(Namespace::Actual, key)
                    .await?;
                Ok(Next::Retire)
            }
            Err(e) => {
                self.publish_plugin_error(desired, e).await?;
                Ok(Next::Wait)
            }
        }
    }

    /// Removes a desired record left behind for an instance that is gone,
    /// unless it has since been replaced.
    async fn withdraw_desired(
        &self,
        desired: &InstanceRecord,
    ) -> Result<(), StoreError> {
        let registry = &self.ctx.registry;
        let key = InstanceKey::of(desired);
        match registry.get_instance(Namespace::Desired, key).await? {
            Some(current) if current.generation == desired.generation => {
                registry.remove_instance(Namespace::Desired, key).await
            }
            _ => Ok(()),
        }
    }

    /// Destination half of a migration.
    async fn land(
        &mut self,
        plugin: &dyn RuntimePlugin,
        desired: InstanceRecord,
    ) -> Result<Next, StoreError> {
        let Some(props) = self.migration_props(&desired).await? else {
            return Ok(Next::Wait);
        };
        let role = MigrateRole::Destination;

        if let Err(e) = plugin.prepare_landing(&desired).await {
            self.publish_plugin_error(&desired, e).await?;
            return Ok(Next::Wait);
        }
        self.publish(&desired, FduStatus::Land, Some(props)).await?;
        info!(self.log, "waiting for source to take off"; "role" => %role,
              "source" => %props.source);

        let source = InstanceKey::of(&desired).on_node(props.source);
        let outcome = self
            .watch_peer(source, |record| match record {
                None => Some(()),
                Some(r) if r.status == FduStatus::TakeOff => Some(()),
                Some(_) => None,
            })
            .await;
        match outcome {
            PeerOutcome::Settled(()) => {}
            PeerOutcome::Preempted(next) => {
                info!(self.log, "landing preempted"; "role" => %role,
                      "status" => %next.status);
                return Ok(Next::Apply(next));
            }
            PeerOutcome::Shutdown => return Ok(Next::Wait),
            PeerOutcome::Store(e) => return Err(e),
        }

        match plugin.after_migrate(&desired).await {
            Ok(()) => {
                info!(self.log, "landed"; "role" => %role);
                self.publish(&desired, FduStatus::Run, None).await?;
            }
            Err(e) => self.publish_plugin_error(&desired, e).await?,
        }
        Ok(Next::Wait)
    }

    /// Source half of a migration.
    async fn take_off(
        &mut self,
        plugin: &dyn RuntimePlugin,
        desired: InstanceRecord,
    ) -> Result<Next, StoreError> {
        let Some(props) = self.migration_props(&desired).await? else {
            return Ok(Next::Wait);
        };
        let role = MigrateRole::Source;

        if let Err(e) = plugin.before_migrate(&desired).await {
            self.publish_plugin_error(&desired, e).await?;
            return Ok(Next::Wait);
        }
        self.publish(&desired, FduStatus::TakeOff, Some(props)).await?;
        info!(self.log, "waiting for destination to run"; "role" => %role,
              "destination" => %props.destination);

        let destination = InstanceKey::of(&desired).on_node(props.destination);
        let mut seen = false;
        let outcome = self
            .watch_peer(destination, |record| match record {
                Some(r) if r.status == FduStatus::Run => Some(Landing::Running),
                Some(r) if r.status == FduStatus::Error => {
                    Some(Landing::Failed)
                }
                Some(_) => {
                    seen = true;
                    None
                }
                // The destination withdrew after accepting the instance.
                None if seen => Some(Landing::Failed),
                None => None,
            })
            .await;

        let landing = match outcome {
            PeerOutcome::Settled(landing) => landing,
            PeerOutcome::Preempted(next) => {
                info!(self.log, "take-off preempted"; "role" => %role,
                      "status" => %next.status);
                return Ok(Next::Apply(next));
            }
            PeerOutcome::Shutdown => return Ok(Next::Wait),
            PeerOutcome::Store(e) => return Err(e),
        };

        let key = InstanceKey::of(&desired);
        match landing {
            Landing::Running => {
                if let Err(e) = plugin.on_migrated_away(&desired).await {
                    warn!(self.log, "cleanup after migration failed";
                          "error" => %e);
                }
                info!(self.log, "migrated away"; "role" => %role);
                let registry = &self.ctx.registry;
                registry.remove_instance(Namespace::Actual, key).await?;
                registry.remove_instance(Namespace::Desired, key).await?;
                Ok(Next::Retire)
            }
            Landing::Failed => {
                warn!(self.log, "destination failed; resuming locally";
                      "role" => %role);
                match plugin.on_resume(&desired).await {
                    Ok(()) => {
                        self.publish(&desired, FduStatus::Run, None).await?
                    }
                    Err(e) => self.publish_plugin_error(&desired, e).await?,
                }
                Ok(Next::Wait)
            }
        }
    }

    async fn migration_props(
        &self,
        desired: &InstanceRecord,
    ) -> Result<Option<MigrationProperties>, StoreError> {
        if desired.migration_properties.is_none() {
            self.publish_error(
                desired,
                ERR_MISSING_MIGRATION,
                format!("{} without migration properties", desired.status),
            )
            .await?;
        }
        Ok(desired.migration_properties)
    }

    /// Follows the actual record of this instance on a peer node until
    /// `decide` settles, a newer desired record arrives, or the agent shuts
    /// down.
    async fn watch_peer<T, F>(
        &mut self,
        peer: InstanceKey,
        mut decide: F,
    ) -> PeerOutcome<T>
    where
        F: FnMut(Option<&InstanceRecord>) -> Option<T>,
    {
        let registry = &self.ctx.registry;
        let path = registry.scheme().instance(Namespace::Actual, peer);
        let mut sub = match registry.store().subscribe(&path).await {
            Ok(sub) => Some(sub),
            Err(e) => return PeerOutcome::Store(e),
        };

        let first = registry.get_instance(Namespace::Actual, peer).await;
        let mut current = match first {
            Ok(r) => r,
            Err(e) => return PeerOutcome::Store(e),
        };

        let outcome = loop {
            if let Some(v) = decide(current.as_ref()) {
                break PeerOutcome::Settled(v);
            }

            let next = tokio::select! {
                _ = self.ctx.shutdown.cancelled() => {
                    break PeerOutcome::Shutdown
                }
                preempt = self.rx.recv() => match preempt {
                    Some(record) => break PeerOutcome::Preempted(record),
                    None => break PeerOutcome::Shutdown,
                },
                change = next_change(&mut sub) => change,
            };

            current = match next {
                Some(Some(value)) => match decode(&path, value) {
                    Ok(r) => Some(r),
                    Err(e) => break PeerOutcome::Store(e),
                },
                Some(None) => None,
                // Subscription gone: re-read instead.
                None => {
                    let reread =
                        registry.get_instance(Namespace::Actual, peer).await;
                    match reread {
                        Ok(r) => r,
                        Err(e) => break PeerOutcome::Store(e),
                    }
                }
            };
        };

        if let Some(sub) = sub {
            let _ = registry.store().unsubscribe(sub.id()).await;
        }
        outcome
    }

    async fn publish(
        &self,
        desired: &InstanceRecord,
        status: FduStatus,
        migration_properties: Option<MigrationProperties>,
    ) -> Result<(), StoreError> {
        let record = InstanceRecord {
            node: self.ctx.node.uuid,
            status,
            error_code: None,
            error_msg: None,
            migration_properties,
            ..desired.clone()
        };
        debug!(self.log, "publishing"; "status" => %status,
               "generation" => record.generation);
        self.ctx.registry.put_instance(Namespace::Actual, &record).await
    }

    async fn publish_error(
        &self,
        desired: &InstanceRecord,
        code: i32,
        message: String,
    ) -> Result<(), StoreError> {
        let record = InstanceRecord {
            node: self.ctx.node.uuid,
            status: FduStatus::Error,
            error_code: Some(code),
            error_msg: Some(message),
            migration_properties: None,
            ..desired.clone()
        };
        self.ctx.registry.put_instance(Namespace::Actual, &record).await
    }

    async fn publish_plugin_error(
        &self,
        desired: &InstanceRecord,
        err: PluginError,
    ) -> Result<(), StoreError> {
        warn!(self.log, "plugin failed"; "status" => %desired.status,
              "error" => %err);
        self.publish_error(desired, err.code, err.message).await
    }
}

/// The next change on an optional subscription: `Some(value)` for an update,
/// `None` once the subscription has closed (after which it is dropped and
/// the caller re-reads on a timer).
async fn next_change(
    sub: &mut Option<crate::store::Subscription>,
) -> Option<Option<serde_json::Value>> {
    match sub {
        Some(active) => match active.recv().await {
            Some(change) => Some(change.value),
            None => {
                *sub = None;
                None
            }
        },
        None => {
            tokio::time::sleep(PEER_POLL_INTERVAL).await;
            None
        }
    }
}
