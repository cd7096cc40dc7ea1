// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The fog05 orchestration core.
//!
//! Controllers express intent by writing *desired* instance records into a
//! shared key/value store; the agent on each node applies that intent through
//! its runtime plugins and publishes the *actual* result. Nothing else is
//! shared between the two.

pub mod agent;
pub mod controller;
pub mod dependency;
pub mod eligibility;
pub mod lease;
pub mod manifest;
pub mod path;
pub mod registry;
pub mod state;
pub mod store;

pub use controller::{Controller, ControllerError, WaitPolicy};
pub use path::PathScheme;
pub use store::{MemoryStore, StateStore};
