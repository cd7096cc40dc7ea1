// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node inventory as published by each node's own agent.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CpuSpec {
    pub model: String,
    pub frequency_mhz: u32,
    pub arch: String,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct RamSpec {
    pub size_mb: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DiskSpec {
    pub local_address: String,
    pub dimension_gb: u64,
    pub mount_point: String,
    pub filesystem: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkInterfaceSpec {
    pub intf_name: String,
    /// ethernet, wireless, ...
    pub intf_type: String,
    #[serde(default)]
    pub address: Option<String>,
    pub available: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IoDeviceSpec {
    pub name: String,
    pub io_type: String,
    #[serde(default)]
    pub io_file: Option<String>,
    pub available: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AcceleratorSpec {
    pub name: String,
    #[serde(default)]
    pub hw_address: Option<String>,
    /// Libraries or capabilities the accelerator supports, e.g. `cuda`.
    #[serde(default)]
    pub supported_library: Vec<String>,
}

/// A snapshot of a node's hardware and installed plugins. Only the node's
/// own agent publishes this record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeDescriptor {
    pub uuid: Uuid,
    pub name: String,
    pub os: String,
    #[serde(default)]
    pub cpu: Vec<CpuSpec>,
    #[serde(default)]
    pub ram: RamSpec,
    #[serde(default)]
    pub disks: Vec<DiskSpec>,
    #[serde(default)]
    pub network: Vec<NetworkInterfaceSpec>,
    #[serde(default)]
    pub io: Vec<IoDeviceSpec>,
    #[serde(default)]
    pub accelerator: Vec<AcceleratorSpec>,
    #[serde(default)]
    pub plugins: Vec<Uuid>,
}

impl NodeDescriptor {
    /// The node's CPU architecture, taken from its first CPU.
    pub fn arch(&self) -> Option<&str> {
        self.cpu.first().map(|c| c.arch.as_str())
    }
}

/// Periodically refreshed resource usage of a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NodeStatus {
    pub uuid: Uuid,
    pub ram_free_mb: u64,
    pub disk_free_gb: u64,
    /// Seconds since the UNIX epoch at which the status was sampled.
    pub timestamp: u64,
}

#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PluginKind {
    Runtime,
    Network,
    Os,
    Monitoring,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PluginDescriptor {
    pub uuid: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    /// For runtime plugins, the hypervisor the plugin drives (e.g. `LXD`).
    #[serde(default)]
    pub hypervisor: Option<String>,
}

impl PluginDescriptor {
    pub fn handles_hypervisor(&self, hypervisor: &str) -> bool {
        self.kind == PluginKind::Runtime
            && self
                .hypervisor
                .as_deref()
                .is_some_and(|h| h.eq_ignore_ascii_case(hypervisor))
    }
}
