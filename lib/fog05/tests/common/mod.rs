// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A single-process cluster: one in-memory store, a controller, and one agent
//! per node driving a simulated runtime.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use fog05::agent::simulated::{SimulatedOs, SimulatedRuntime};
use fog05::agent::{AgentHandle, AgentReactor, RuntimePlugin};
use fog05::store::{decode, Subscription};
use fog05::{Controller, MemoryStore, PathScheme, WaitPolicy};
use fog05_api_types::{
    ComputationRequirements, CpuSpec, FduDescriptor, InstanceRecord,
    MigrationKind, NetworkInterfaceSpec, NodeDescriptor, RamSpec,
};
use slog::Logger;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub fn test_logger() -> Logger {
    Logger::root(slog::Discard, slog::o!())
}

/// Keeps a misbehaving test from hanging the suite.
pub fn test_policy() -> WaitPolicy {
    WaitPolicy {
        timeout: Some(Duration::from_secs(5)),
        poll_interval: Duration::from_millis(20),
    }
}

pub fn node_descriptor(name: &str, arch: &str) -> NodeDescriptor {
    NodeDescriptor {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        os: "linux".to_string(),
        cpu: vec![CpuSpec {
            model: "sim".to_string(),
            frequency_mhz: 1500,
            arch: arch.to_string(),
        }],
        ram: RamSpec { size_mb: 2048 },
        disks: vec![],
        network: vec![NetworkInterfaceSpec {
            intf_name: "eth0".to_string(),
            intf_type: "ethernet".to_string(),
            address: None,
            available: true,
        }],
        io: vec![],
        accelerator: vec![],
        plugins: vec![],
    }
}

/// A native FDU runnable by the simulated `BARE` runtime.
pub fn native_fdu(name: &str) -> FduDescriptor {
    FduDescriptor {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        image: None,
        computation_requirements: ComputationRequirements {
            cpu_arch: "x86_64".to_string(),
            cpu_min_count: 1,
            ram_size_mb: 64,
            storage_size_gb: 1,
        },
        hypervisor: "BARE".to_string(),
        migration_kind: MigrationKind::Live,
        interfaces: vec![],
        connection_points: vec![],
        depends_on: vec![],
        constraints: None,
    }
}

pub struct TestNode {
    pub id: Uuid,
    pub runtime: Arc<SimulatedRuntime>,
    pub os: Arc<SimulatedOs>,
    handle: AgentHandle,
}

impl TestNode {
    pub fn active_workers(&self) -> usize {
        self.handle.active_workers()
    }
}

pub struct Cluster {
    pub store: Arc<MemoryStore>,
    pub scheme: PathScheme,
    pub controller: Controller,
    pub nodes: Vec<TestNode>,
    shutdown: CancellationToken,
    log: Logger,
}

impl Cluster {
    pub fn new(policy: WaitPolicy) -> Self {
        let log = test_logger();
        let store = Arc::new(MemoryStore::new(&log));
        let scheme = PathScheme::new("0", "0").unwrap();
        let controller =
            Controller::new(store.clone(), scheme.clone(), policy, &log);
        Self {
            store,
            scheme,
            controller,
            nodes: Vec::new(),
            shutdown: CancellationToken::new(),
            log,
        }
    }

    /// A cluster of `count` x86_64 nodes, each with a simulated `BARE`
    /// runtime.
    pub async fn with_nodes(count: usize) -> Self {
        let mut cluster = Self::new(test_policy());
        for i in 0..count {
            cluster
                .add_node(
                    node_descriptor(&format!("node-{}", i), "x86_64"),
                    SimulatedRuntime::new("BARE", &cluster.log),
                )
                .await;
        }
        cluster
    }

    pub async fn add_node(
        &mut self,
        desc: NodeDescriptor,
        runtime: SimulatedRuntime,
    ) -> Uuid {
        let runtime = Arc::new(runtime);
        let os = Arc::new(
            SimulatedOs::new(desc.network.clone()).with_file("/etc/hostname"),
        );
        let id = desc.uuid;
        let plugin: Arc<dyn RuntimePlugin> = runtime.clone();
        let handle = AgentReactor::new(
            desc,
            self.store.clone(),
            self.scheme.clone(),
            vec![plugin],
            os.clone(),
            &self.log,
        )
        .start(self.shutdown.child_token())
        .await
        .unwrap();
        self.nodes.push(TestNode { id, runtime, os, handle });
        id
    }

    pub fn node(&self, idx: usize) -> &TestNode {
        &self.nodes[idx]
    }

    pub fn node_by_id(&self, id: Uuid) -> &TestNode {
        self.nodes.iter().find(|n| n.id == id).unwrap()
    }

    pub async fn shutdown(self) {
        for node in self.nodes {
            node.handle.shutdown().await;
        }
    }
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check().await {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Every instance record delivered on `sub` so far, oldest first.
pub fn written_records(sub: &mut Subscription) -> Vec<InstanceRecord> {
    let mut records = Vec::new();
    while let Some(change) = sub.try_recv() {
        if let Some(value) = change.value {
            records.push(decode(&change.path, value).unwrap());
        }
    }
    records
}
