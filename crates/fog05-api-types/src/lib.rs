// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Definitions for the records fog05 components exchange through the
//! distributed store.
//!
//! Every type here is shared between the control plane (which writes desired
//! state) and node agents (which publish actual state), so the serialized
//! shape of each type is part of the wire contract between them.

pub mod catalog;
pub mod entity;
pub mod fdu;
pub mod node;

pub use catalog::{FlavorDescriptor, ImageDescriptor, NetworkDescriptor};
pub use entity::{EntityComponent, EntityDescriptor};
pub use fdu::{
    AcceleratorConstraint, ComputationRequirements, ConnectionPointDescriptor,
    CountConstraint, FduDescriptor, FduInterface, FduStatus, Image,
    InstanceInterface, InstanceRecord, MigrationKind, MigrationProperties,
    PlacementConstraints,
};
pub use node::{
    AcceleratorSpec, CpuSpec, DiskSpec, IoDeviceSpec, NetworkInterfaceSpec,
    NodeDescriptor, NodeStatus, PluginDescriptor, PluginKind, RamSpec,
};
