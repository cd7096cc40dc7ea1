// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shape validation of user-supplied manifests.
//!
//! A manifest is first decoded into its typed descriptor, which catches
//! missing or mistyped fields, and then checked against the rules of the
//! named schema it claims to follow.

use std::collections::BTreeSet;

use fog05_api_types::{EntityDescriptor, FduDescriptor, NetworkDescriptor};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// The named manifest schemas.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Schema {
    Vm,
    Container,
    Native,
    Ros2,
    Network,
    Entity,
}

impl Schema {
    /// The FDU schema a hypervisor tag belongs to.
    pub fn for_hypervisor(hypervisor: &str) -> Option<Self> {
        match hypervisor.to_ascii_uppercase().as_str() {
            "KVM" | "XEN" => Some(Schema::Vm),
            "LXD" | "DOCKER" => Some(Schema::Container),
            "BARE" | "NATIVE" => Some(Schema::Native),
            "ROS2" => Some(Schema::Ros2),
            _ => None,
        }
    }

    fn is_fdu(self) -> bool {
        matches!(
            self,
            Schema::Vm | Schema::Container | Schema::Native | Schema::Ros2
        )
    }
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("manifest does not match the {schema} schema: {source}")]
    Malformed {
        schema: Schema,
        #[source]
        source: serde_json::Error,
    },

    #[error("{schema} manifest: {reason}")]
    Invalid { schema: Schema, reason: String },

    #[error("hypervisor {0:?} matches no FDU schema")]
    UnknownHypervisor(String),
}

fn invalid(schema: Schema, reason: impl Into<String>) -> ValidationError {
    ValidationError::Invalid { schema, reason: reason.into() }
}

fn decode<T: DeserializeOwned>(
    schema: Schema,
    manifest: &Value,
) -> Result<T, ValidationError> {
    T::deserialize(manifest)
        .map_err(|source| ValidationError::Malformed { schema, source })
}

/// Checks `manifest` against `schema`.
pub fn validate(
    schema: Schema,
    manifest: &Value,
) -> Result<(), ValidationError> {
    match schema {
        Schema::Network => validate_network(&decode(schema, manifest)?),
        Schema::Entity => validate_entity(&decode(schema, manifest)?),
        fdu_schema => {
            let fdu: FduDescriptor = decode(fdu_schema, manifest)?;
            check_fdu(fdu_schema, &fdu)
        }
    }
}

/// Checks a typed FDU descriptor against the schema implied by its
/// hypervisor.
pub fn validate_fdu(fdu: &FduDescriptor) -> Result<(), ValidationError> {
    let schema = Schema::for_hypervisor(&fdu.hypervisor).ok_or_else(|| {
        ValidationError::UnknownHypervisor(fdu.hypervisor.clone())
    })?;
    check_fdu(schema, fdu)
}

fn check_fdu(
    schema: Schema,
    fdu: &FduDescriptor,
) -> Result<(), ValidationError> {
    debug_assert!(schema.is_fdu());

    if fdu.name.is_empty() {
        return Err(invalid(schema, "name must not be empty"));
    }
    match Schema::for_hypervisor(&fdu.hypervisor) {
        Some(s) if s == schema => {}
        _ => {
            return Err(invalid(
                schema,
                format!("hypervisor {:?} does not belong here", fdu.hypervisor),
            ))
        }
    }
    if matches!(schema, Schema::Vm | Schema::Container) && fdu.image.is_none()
    {
        return Err(invalid(schema, "an image is required"));
    }
    if fdu.computation_requirements.cpu_min_count == 0 {
        return Err(invalid(schema, "cpu_min_count must be at least 1"));
    }

    let mut names = BTreeSet::new();
    for intf in &fdu.interfaces {
        if !names.insert(intf.name.as_str()) {
            return Err(invalid(
                schema,
                format!("interface {} is declared twice", intf.name),
            ));
        }
    }
    for intf in &fdu.interfaces {
        if let Some(cp) = intf.cp_id {
            if !fdu.connection_points.iter().any(|c| c.uuid == cp) {
                return Err(invalid(
                    schema,
                    format!(
                        "interface {} references unknown connection point {}",
                        intf.name, cp
                    ),
                ));
            }
        }
    }
    Ok(())
}

pub fn validate_network(
    net: &NetworkDescriptor,
) -> Result<(), ValidationError> {
    if net.name.is_empty() {
        return Err(invalid(Schema::Network, "name must not be empty"));
    }
    if let Some(vlan) = net.vlan_id {
        if !(1..=4094).contains(&vlan) {
            return Err(invalid(
                Schema::Network,
                format!("vlan_id {} is out of range", vlan),
            ));
        }
    }
    Ok(())
}

/// Checks an application manifest and every component FDU in it.
pub fn validate_entity(
    entity: &EntityDescriptor,
) -> Result<(), ValidationError> {
    if entity.components.is_empty() {
        return Err(invalid(
            Schema::Entity,
            "at least one component is required",
        ));
    }
    for component in &entity.components {
        if component.name.is_empty() {
            return Err(invalid(
                Schema::Entity,
                "component names must not be empty",
            ));
        }
        validate_fdu(&component.fdu).map_err(|e| {
            let msg = format!("component {}: {}", component.name, e);
            invalid(Schema::Entity, msg)
        })?;
    }
    Ok(())
}
