// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Capabilities an agent drives on behalf of the instances it hosts.

use async_trait::async_trait;
use fog05_api_types::{
    InstanceRecord, NetworkInterfaceSpec, PluginDescriptor,
};
use thiserror::Error;

/// A failure reported by a plugin. The code and message are carried into the
/// `ERROR` record the agent publishes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("plugin error {code}: {message}")]
pub struct PluginError {
    pub code: i32,
    pub message: String,
}

impl PluginError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }
}

/// A runtime plugin (LXD, KVM, native processes, ...) that carries out
/// lifecycle operations on a node.
///
/// The agent guarantees that calls for one instance never overlap.
#[async_trait]
pub trait RuntimePlugin: Send + Sync {
    fn descriptor(&self) -> &PluginDescriptor;

    async fn on_define(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;
    async fn on_configure(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;
    async fn on_start(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;
    async fn on_stop(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;
    async fn on_pause(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;
    async fn on_resume(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;
    async fn on_clean(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;
    async fn on_undefine(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;

    /// Source side: freeze the instance so its state can be transferred.
    async fn before_migrate(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;

    /// Destination side: reserve what the incoming instance needs.
    async fn prepare_landing(
        &self,
        _instance: &InstanceRecord,
    ) -> Result<(), PluginError> {
        Ok(())
    }

    /// Destination side: bring the transferred instance up.
    async fn after_migrate(
        &self,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError>;

    /// Source side: release the local copy once the destination runs it.
    async fn on_migrated_away(
        &self,
        _instance: &InstanceRecord,
    ) -> Result<(), PluginError> {
        Ok(())
    }
}

/// OS-level functions an agent exports through the store's eval mechanism.
pub trait OsCapability: Send + Sync {
    fn execute_command(
        &self,
        command: &str,
        sudo: bool,
    ) -> Result<String, PluginError>;

    fn file_exists(&self, path: &str) -> bool;

    fn network_info(&self) -> Vec<NetworkInterfaceSpec>;
}
