// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fog Deployable Unit descriptors and the per-node instance records that
//! track them through their lifecycle.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The status vocabulary shared by desired and actual instance records.
///
/// Desired records carry the command a controller wants applied (including
/// the command-only values `STOP`, `CLEAN`, `UNDEFINE` and `RESUME`); actual
/// records carry the state an agent observed after applying it.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum FduStatus {
    Define,
    Configure,
    Run,
    Pause,
    Stop,
    Clean,
    Undefine,
    Resume,
    TakeOff,
    Land,
    Error,
}

#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
    strum::Display,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum MigrationKind {
    #[default]
    Live,
    Cold,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Image {
    pub uri: String,
    pub format: String,
    #[serde(default)]
    pub checksum: String,
}

#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct ComputationRequirements {
    pub cpu_arch: String,
    #[serde(default = "one")]
    pub cpu_min_count: u32,
    #[serde(alias = "ram_size")]
    pub ram_size_mb: u64,
    #[serde(alias = "disk_size")]
    pub storage_size_gb: u64,
}

fn one() -> u32 {
    1
}

/// A virtual interface requested by an FDU.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FduInterface {
    pub name: String,
    /// INTERNAL, EXTERNAL, WLAN or BRIDGED.
    pub kind: String,
    #[serde(default)]
    pub mac_address: Option<String>,
    /// The connection point this interface is plugged into, if any.
    #[serde(default)]
    pub cp_id: Option<Uuid>,
}

/// An interface of a running instance, with the runtime details the agent
/// filled in when it created the interface.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceInterface {
    #[serde(flatten)]
    pub interface: FduInterface,
    #[serde(default)]
    pub vintf_name: Option<String>,
    #[serde(default)]
    pub phy_face: Option<String>,
}

impl From<FduInterface> for InstanceInterface {
    fn from(interface: FduInterface) -> Self {
        Self { interface, vintf_name: None, phy_face: None }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ConnectionPointDescriptor {
    pub uuid: Uuid,
    pub name: String,
    /// The virtual network this connection point attaches to.
    #[serde(default)]
    pub vld_ref: Option<Uuid>,
    #[serde(default)]
    pub port_security_enabled: bool,
}

/// A `(type, count)` requirement on a node's network interfaces or I/O
/// devices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CountConstraint {
    #[serde(rename = "type")]
    pub kind: String,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AcceleratorConstraint {
    #[serde(rename = "type")]
    pub kind: String,
}

/// Placement constraints for an FDU. Every category is optional; absent
/// categories do not restrict placement.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema,
)]
pub struct PlacementConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub networks: Option<Vec<CountConstraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io: Option<Vec<CountConstraint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerators: Option<Vec<AcceleratorConstraint>>,
}

impl PlacementConstraints {
    pub fn is_empty(&self) -> bool {
        self.os.is_none()
            && self.arch.is_none()
            && self.networks.is_none()
            && self.io.is_none()
            && self.accelerators.is_none()
    }
}

/// A catalog entry describing a deployable unit. Not tied to any node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FduDescriptor {
    pub uuid: Uuid,
    pub name: String,
    #[serde(default)]
    pub image: Option<Image>,
    pub computation_requirements: ComputationRequirements,
    pub hypervisor: String,
    #[serde(default)]
    pub migration_kind: MigrationKind,
    #[serde(default)]
    pub interfaces: Vec<FduInterface>,
    #[serde(default)]
    pub connection_points: Vec<ConnectionPointDescriptor>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<PlacementConstraints>,
}

impl FduDescriptor {
    /// Returns the constraint set placement should honor for this FDU.
    ///
    /// The CPU architecture from the computation requirements acts as an
    /// `arch` constraint unless the explicit constraints already name one.
    pub fn placement_constraints(&self) -> Option<PlacementConstraints> {
        let mut constraints = self.constraints.clone().unwrap_or_default();
        if constraints.arch.is_none()
            && !self.computation_requirements.cpu_arch.is_empty()
        {
            constraints.arch =
                Some(self.computation_requirements.cpu_arch.clone());
        }

        (!constraints.is_empty()).then_some(constraints)
    }
}

/// The source and destination nodes of an in-progress migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct MigrationProperties {
    pub source: Uuid,
    pub destination: Uuid,
}

/// The record describing one FDU instance on one node.
///
/// The same shape is written to the desired namespace (by controllers) and to
/// the actual namespace (by the node's agent).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InstanceRecord {
    pub uuid: Uuid,
    #[serde(alias = "fdu_uuid")]
    pub fdu_id: Uuid,
    pub node: Uuid,
    pub status: FduStatus,
    #[serde(default)]
    pub image: Option<Image>,
    pub computation_requirements: ComputationRequirements,
    pub hypervisor: String,
    #[serde(default)]
    pub migration_kind: MigrationKind,
    #[serde(default)]
    pub interfaces: Vec<InstanceInterface>,
    #[serde(default)]
    pub connection_points: Vec<ConnectionPointDescriptor>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub error_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migration_properties: Option<MigrationProperties>,

    /// Incremented by the controller on every desired write and echoed back
    /// by the agent once that write has been applied.
    #[serde(default)]
    pub generation: u64,
}

impl InstanceRecord {
    pub fn new(
        fdu: &FduDescriptor,
        node: Uuid,
        uuid: Uuid,
        status: FduStatus,
        generation: u64,
    ) -> Self {
        Self {
            uuid,
            fdu_id: fdu.uuid,
            node,
            status,
            image: fdu.image.clone(),
            computation_requirements: fdu.computation_requirements.clone(),
            hypervisor: fdu.hypervisor.clone(),
            migration_kind: fdu.migration_kind,
            interfaces: fdu
                .interfaces
                .iter()
                .cloned()
                .map(InstanceInterface::from)
                .collect(),
            connection_points: fdu.connection_points.clone(),
            depends_on: fdu.depends_on.clone(),
            error_code: None,
            error_msg: None,
            migration_properties: None,
            generation,
        }
    }
}
