// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use fog05::agent::simulated::{SimulatedOs, SimulatedRuntime};
use fog05::agent::{AgentHandle, AgentReactor, RuntimePlugin};
use fog05::{Controller, MemoryStore, PathScheme, StateStore, WaitPolicy};
use fog05_api_types::{
    AcceleratorSpec, CpuSpec, IoDeviceSpec, NetworkInterfaceSpec,
    NodeDescriptor, RamSpec,
};
use fog05_config::{Config, Node};
use slog::{info, Logger};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Hypervisor simulated on nodes whose configuration names none.
const DEFAULT_HYPERVISOR: &str = "BARE";

fn node_descriptor(node: &Node) -> NodeDescriptor {
    NodeDescriptor {
        uuid: node.uuid.unwrap_or_else(Uuid::new_v4),
        name: node.name.clone(),
        os: node.os.clone(),
        cpu: (0..node.cpus)
            .map(|_| CpuSpec {
                model: "simulated".to_string(),
                frequency_mhz: 0,
                arch: node.arch.clone(),
            })
            .collect(),
        ram: RamSpec { size_mb: node.ram_mb },
        disks: vec![],
        network: node
            .interfaces
            .iter()
            .map(|i| NetworkInterfaceSpec {
                intf_name: i.name.clone(),
                intf_type: i.kind.clone(),
                address: None,
                available: i.available,
            })
            .collect(),
        io: node
            .io
            .iter()
            .map(|d| IoDeviceSpec {
                name: d.name.clone(),
                io_type: d.kind.clone(),
                io_file: None,
                available: d.available,
            })
            .collect(),
        accelerator: node
            .accelerators
            .iter()
            .map(|a| AcceleratorSpec {
                name: a.name.clone(),
                hw_address: None,
                supported_library: a.supported_library.clone(),
            })
            .collect(),
        plugins: vec![],
    }
}

/// The controller and one agent per configured node, over a shared
/// in-memory store.
pub struct Cluster {
    controller: Controller,
    agents: Vec<AgentHandle>,
    shutdown: CancellationToken,
    log: Logger,
}

impl Cluster {
    pub async fn start(
        config: &Config,
        policy: WaitPolicy,
        log: &Logger,
    ) -> anyhow::Result<Self> {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new(log));
        let scheme =
            PathScheme::new(&config.system.sys_id, &config.system.tenant_id)?;
        let shutdown = CancellationToken::new();

        let mut agents = Vec::with_capacity(config.nodes.len());
        for node in &config.nodes {
            let desc = node_descriptor(node);
            let hypervisors: Vec<&str> = if node.hypervisors.is_empty() {
                vec![DEFAULT_HYPERVISOR]
            } else {
                node.hypervisors.iter().map(String::as_str).collect()
            };
            let plugins: Vec<Arc<dyn RuntimePlugin>> = hypervisors
                .into_iter()
                .map(|h| {
                    Arc::new(SimulatedRuntime::new(h, log))
                        as Arc<dyn RuntimePlugin>
                })
                .collect();
            let os = Arc::new(SimulatedOs::new(desc.network.clone()));

            info!(log, "starting agent"; "node" => &node.name,
                  "node_id" => %desc.uuid);
            let agent = AgentReactor::new(
                desc,
                store.clone(),
                scheme.clone(),
                plugins,
                os,
                log,
            );
            agents.push(agent.start(shutdown.child_token()).await?);
        }

        let controller = Controller::new(store, scheme, policy, log)
            .with_cancellation(shutdown.child_token());
        Ok(Self { controller, agents, shutdown, log: log.clone() })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub async fn shutdown(self) {
        self.shutdown.cancel();
        futures::future::join_all(
            self.agents.into_iter().map(AgentHandle::shutdown),
        )
        .await;
        info!(self.log, "all agents stopped");
    }
}
