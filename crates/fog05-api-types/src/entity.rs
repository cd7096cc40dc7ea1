// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Multi-component applications ("entities").

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fdu::FduDescriptor;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EntityComponent {
    pub name: String,
    pub fdu: FduDescriptor,
    /// Names of the components that must be running before this one.
    #[serde(default)]
    pub need: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EntityDescriptor {
    pub uuid: Uuid,
    pub name: String,
    pub components: Vec<EntityComponent>,
}
