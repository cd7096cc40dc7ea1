// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Simple system-wide catalog entities.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ImageDescriptor {
    pub uuid: Uuid,
    pub name: String,
    pub uri: String,
    pub format: String,
    #[serde(default)]
    pub checksum: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FlavorDescriptor {
    pub uuid: Uuid,
    pub name: String,
    pub cpu_min_count: u32,
    pub ram_size_mb: u64,
    pub storage_size_gb: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NetworkDescriptor {
    pub uuid: Uuid,
    pub name: String,
    /// ELAN, ELINE, ...
    pub net_type: String,
    #[serde(default)]
    pub is_mgmt: bool,
    #[serde(default)]
    pub vlan_id: Option<u16>,
    #[serde(default)]
    pub subnet: Option<String>,
}
