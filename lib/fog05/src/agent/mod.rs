// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-node agent: watches its node's desired instance records, drives
//! the runtime plugins, and publishes what actually happened.
//!
//! Each instance on the node gets its own worker task fed by an unbounded
//! queue. The reactor loop only decodes records and routes them, so plugin
//! calls for one instance are strictly sequential while distinct instances
//! proceed independently. Workers exit once their instance leaves the node.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fog05_api_types::{InstanceRecord, NodeDescriptor, NodeStatus};
use serde_json::json;
use slog::{error, info, warn, Logger};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::path::{Namespace, Path, PathScheme};
use crate::registry::Registry;
use crate::store::{
    decode, Change, EvalHandler, EvalSelector, StateStore, StoreError,
    Subscription,
};

pub mod plugin;
pub mod simulated;
mod worker;

pub use plugin::{OsCapability, PluginError, RuntimePlugin};

/// Published when a desired record asks for a transition the instance's
/// current state does not allow.
pub const ERR_INVALID_TRANSITION: i32 = 1;

/// Published when no plugin on the node handles the instance's hypervisor.
pub const ERR_NO_PLUGIN: i32 = 2;

/// Published for a LAND or TAKE_OFF record without migration properties.
pub const ERR_MISSING_MIGRATION: i32 = 3;

/// Names under which the OS capability is exported for eval.
pub const OS_EXECUTE_COMMAND: &str = "execute_command";
pub const OS_FILE_EXISTS: &str = "file_exists";
pub const OS_NETWORK_INFO: &str = "network_info";

const RESUBSCRIBE_INTERVAL: Duration = Duration::from_millis(200);

/// State shared by the reactor loop and every instance worker.
pub(crate) struct AgentContext {
    pub(crate) node: NodeDescriptor,
    pub(crate) registry: Registry,
    pub(crate) plugins: Vec<Arc<dyn RuntimePlugin>>,
    pub(crate) shutdown: CancellationToken,
    pub(crate) log: Logger,
    /// Instance workers that have not exited yet.
    pub(crate) active_workers: AtomicUsize,
}

impl AgentContext {
    pub(crate) fn plugin_for(
        &self,
        hypervisor: &str,
    ) -> Option<&Arc<dyn RuntimePlugin>> {
        self.plugins
            .iter()
            .find(|p| p.descriptor().handles_hypervisor(hypervisor))
    }
}

pub struct AgentReactor {
    node: NodeDescriptor,
    registry: Registry,
    plugins: Vec<Arc<dyn RuntimePlugin>>,
    os: Arc<dyn OsCapability>,
    log: Logger,
}

impl AgentReactor {
    pub fn new(
        mut node: NodeDescriptor,
        store: Arc<dyn StateStore>,
        scheme: PathScheme,
        plugins: Vec<Arc<dyn RuntimePlugin>>,
        os: Arc<dyn OsCapability>,
        log: &Logger,
    ) -> Self {
        node.plugins = plugins.iter().map(|p| p.descriptor().uuid).collect();
        let log = log.new(slog::o!(
            "component" => "agent",
            "node_id" => node.uuid.to_string(),
        ));
        let registry = Registry::new(store, scheme, &log);
        Self { node, registry, plugins, os, log }
    }

    pub fn node_id(&self) -> Uuid {
        self.node.uuid
    }

    /// Publishes the node, exports its OS functions and starts reacting to
    /// desired records. The agent runs until `shutdown` is cancelled.
    pub async fn start(
        self,
        shutdown: CancellationToken,
    ) -> Result<AgentHandle, StoreError> {
        let node_id = self.node.uuid;
        self.publish_node().await?;
        let exported = self.export_os_functions().await?;

        let selector = self.registry.scheme().instances(
            Namespace::Desired,
            Some(node_id),
            None,
            None,
        );
        let sub = self.registry.store().subscribe(&selector).await?;

        let ctx = Arc::new(AgentContext {
            node: self.node,
            registry: self.registry,
            plugins: self.plugins,
            shutdown: shutdown.clone(),
            log: self.log,
            active_workers: AtomicUsize::new(0),
        });
        info!(ctx.log, "agent started"; "plugins" => ctx.plugins.len());

        let mut reactor = Reactor {
            ctx: ctx.clone(),
            selector,
            exported,
            workers: BTreeMap::new(),
        };
        // Desired records written before the subscription existed.
        reactor.catch_up().await;
        let task = tokio::spawn(reactor.run(sub));

        Ok(AgentHandle { node: node_id, ctx, task, shutdown })
    }

    async fn publish_node(&self) -> Result<(), StoreError> {
        self.registry.add_node(&self.node).await?;
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.registry
            .put_node_status(&NodeStatus {
                uuid: self.node.uuid,
                ram_free_mb: self.node.ram.size_mb,
                disk_free_gb: self
                    .node
                    .disks
                    .iter()
                    .map(|d| d.dimension_gb)
                    .sum(),
                timestamp,
            })
            .await?;
        for plugin in &self.plugins {
            self.registry
                .add_plugin(self.node.uuid, plugin.descriptor())
                .await?;
        }
        Ok(())
    }

    async fn export_os_functions(&self) -> Result<Vec<Path>, StoreError> {
        let scheme = self.registry.scheme();
        let store = self.registry.store();
        let node = self.node.uuid;

        let os = self.os.clone();
        let execute: EvalHandler = Arc::new(move |sel: &EvalSelector| {
            let command = sel.get("command").ok_or("missing command")?;
            let sudo = sel.get("sudo") == Some("true");
            os.execute_command(command, sudo)
                .map(|out| json!(out))
                .map_err(|e| e.to_string())
        });

        let os = self.os.clone();
        let file_exists: EvalHandler = Arc::new(move |sel: &EvalSelector| {
            let path = sel.get("file_path").ok_or("missing file_path")?;
            Ok(json!(os.file_exists(path)))
        });

        let os = self.os.clone();
        let network_info: EvalHandler = Arc::new(move |_: &EvalSelector| {
            serde_json::to_value(os.network_info()).map_err(|e| e.to_string())
        });

        let mut exported = Vec::new();
        for (name, handler) in [
            (OS_EXECUTE_COMMAND, execute),
            (OS_FILE_EXISTS, file_exists),
            (OS_NETWORK_INFO, network_info),
        ] {
            let path = scheme.node_os_function(node, name);
            store.register_eval(&path, handler).await?;
            exported.push(path);
        }
        Ok(exported)
    }
}

/// A running agent.
pub struct AgentHandle {
    node: Uuid,
    ctx: Arc<AgentContext>,
    task: JoinHandle<()>,
    shutdown: CancellationToken,
}

impl AgentHandle {
    pub fn node_id(&self) -> Uuid {
        self.node
    }

    /// Number of instances with a live worker on this node.
    pub fn active_workers(&self) -> usize {
        self.ctx.active_workers.load(Ordering::SeqCst)
    }

    /// Stops the agent and waits for it to withdraw its eval functions.
    /// Plugin calls already in progress are abandoned.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }
}

struct WorkerSlot {
    tx: mpsc::UnboundedSender<InstanceRecord>,
    task: JoinHandle<()>,
}

impl WorkerSlot {
    fn is_done(&self) -> bool {
        self.tx.is_closed() && self.task.is_finished()
    }
}

struct Reactor {
    ctx: Arc<AgentContext>,
    selector: Path,
    exported: Vec<Path>,
    workers: BTreeMap<Uuid, WorkerSlot>,
}

impl Reactor {
    async fn run(mut self, sub: Subscription) {
        let mut sub = Some(sub);
        loop {
            let Some(active) = sub.as_mut() else {
                sub = self.resubscribe().await;
                if sub.is_none() {
                    break;
                }
                self.catch_up().await;
                continue;
            };

            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => break,
                change = active.recv() => match change {
                    Some(Change { path, value: Some(value) }) => {
                        self.route(&path, value);
                    }
                    // Removing a desired record is not a command.
                    Some(Change { value: None, .. }) => {}
                    None => {
                        warn!(self.ctx.log,
                              "desired-state subscription closed");
                        sub = None;
                    }
                },
            }
        }

        if let Some(sub) = sub {
            let _ = self.ctx.registry.store().unsubscribe(sub.id()).await;
        }
        for path in &self.exported {
            let _ = self.ctx.registry.store().unregister_eval(path).await;
        }
        info!(self.ctx.log, "agent stopped");
    }

    /// Retries the subscription until it succeeds or the agent shuts down.
    async fn resubscribe(&self) -> Option<Subscription> {
        loop {
            match self.ctx.registry.store().subscribe(&self.selector).await {
                Ok(sub) => return Some(sub),
                Err(e) => {
                    warn!(self.ctx.log, "resubscribe failed"; "error" => %e);
                }
            }
            tokio::select! {
                _ = self.ctx.shutdown.cancelled() => return None,
                _ = tokio::time::sleep(RESUBSCRIBE_INTERVAL) => {}
            }
        }
    }

    async fn catch_up(&mut self) {
        match self.ctx.registry.store().get_all(&self.selector).await {
            Ok(entries) => {
                for (path, value) in entries {
                    self.route(&path, value);
                }
            }
            Err(e) => {
                error!(self.ctx.log, "failed to read desired records";
                       "error" => %e);
            }
        }
    }

    fn route(&mut self, path: &Path, value: serde_json::Value) {
        let record: InstanceRecord = match decode(path, value) {
            Ok(r) => r,
            Err(e) => {
                warn!(self.ctx.log, "ignoring undecodable desired record";
                      "error" => %e);
                return;
            }
        };
        if record.node != self.ctx.node.uuid {
            warn!(self.ctx.log, "desired record names another node";
                  "path" => %path, "record_node" => %record.node);
            return;
        }

        self.workers.retain(|_, slot| !slot.is_done());

        let instance = record.uuid;
        let (record, previous) = match self.workers.remove(&instance) {
            Some(slot) => match slot.tx.send(record) {
                Ok(()) => {
                    self.workers.insert(instance, slot);
                    return;
                }
                // The worker is retiring; its successor waits for it.
                Err(mpsc::error::SendError(record)) => {
                    (record, Some(slot.task))
                }
            },
            None => (record, None),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let task = worker::spawn(self.ctx.clone(), instance, rx, previous);
        // The receiver was just created, so this cannot fail.
        let _ = tx.send(record);
        self.workers.insert(instance, WorkerSlot { tx, task });
    }
}
