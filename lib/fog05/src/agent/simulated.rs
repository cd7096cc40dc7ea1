// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-process stand-ins for runtime and OS plugins.
//!
//! The simulated runtime keeps no real workloads. It records every call, can
//! be told to fail specific operations, and tracks how many calls for one
//! instance were ever in flight at once.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use fog05_api_types::{
    InstanceRecord, NetworkInterfaceSpec, PluginDescriptor, PluginKind,
};
use slog::{debug, Logger};
use uuid::Uuid;

use super::plugin::{OsCapability, PluginError, RuntimePlugin};

/// The plugin entry points, as recorded by [`SimulatedRuntime`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Define,
    Configure,
    Start,
    Stop,
    Pause,
    Resume,
    Clean,
    Undefine,
    BeforeMigrate,
    PrepareLanding,
    AfterMigrate,
    MigratedAway,
}

#[derive(Default)]
struct Tracking {
    calls: Vec<(Uuid, Operation)>,
    in_flight: BTreeMap<Uuid, usize>,
    max_in_flight: usize,
    failures: BTreeMap<Operation, PluginError>,
}

pub struct SimulatedRuntime {
    descriptor: PluginDescriptor,
    delay: Duration,
    tracking: Mutex<Tracking>,
    log: Logger,
}

impl SimulatedRuntime {
    pub fn new(hypervisor: &str, log: &Logger) -> Self {
        Self {
            descriptor: PluginDescriptor {
                uuid: Uuid::new_v4(),
                name: format!("simulated-{}", hypervisor.to_ascii_lowercase()),
                kind: PluginKind::Runtime,
                hypervisor: Some(hypervisor.to_string()),
            },
            delay: Duration::ZERO,
            tracking: Mutex::new(Tracking::default()),
            log: log.new(slog::o!("plugin" => hypervisor.to_string())),
        }
    }

    /// Makes every operation take `delay` before completing.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes `op` fail with `error` until cleared.
    pub fn fail_on(&self, op: Operation, error: PluginError) {
        self.tracking.lock().unwrap().failures.insert(op, error);
    }

    pub fn clear_failures(&self) {
        self.tracking.lock().unwrap().failures.clear();
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<(Uuid, Operation)> {
        self.tracking.lock().unwrap().calls.clone()
    }

    /// The operations applied to one instance, in order.
    pub fn calls_for(&self, instance: Uuid) -> Vec<Operation> {
        self.tracking
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|(id, _)| *id == instance)
            .map(|(_, op)| *op)
            .collect()
    }

    /// The largest number of overlapping calls ever observed for any single
    /// instance.
    pub fn max_in_flight(&self) -> usize {
        self.tracking.lock().unwrap().max_in_flight
    }

    async fn call(
        &self,
        op: Operation,
        instance: &InstanceRecord,
    ) -> Result<(), PluginError> {
        {
            let mut t = self.tracking.lock().unwrap();
            t.calls.push((instance.uuid, op));
            let n = t.in_flight.entry(instance.uuid).or_default();
            *n += 1;
            let n = *n;
            t.max_in_flight = t.max_in_flight.max(n);
        }
        debug!(self.log, "plugin call"; "op" => %op,
               "instance_id" => %instance.uuid);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut t = self.tracking.lock().unwrap();
        if let Some(n) = t.in_flight.get_mut(&instance.uuid) {
            *n -= 1;
            if *n == 0 {
                t.in_flight.remove(&instance.uuid);
            }
        }
        match t.failures.get(&op) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RuntimePlugin for SimulatedRuntime {
    fn descriptor(&self) -> &PluginDescriptor {
        &self.descriptor
    }

    async fn on_define(&self, i: &InstanceRecord) -> Result<(), PluginError> {
        self.call(Operation::Define, i).await
    }

    async fn on_configure(
        &self,
        i: &InstanceRecord,
    ) -> Result<(), PluginError> {
        self.call(Operation::Configure, i).await
    }

    async fn on_start(&self, i: &InstanceRecord) -> Result<(), PluginError> {
        self.call(Operation::Start, i).await
    }

    async fn on_stop(&self, i: &InstanceRecord) -> Result<(), PluginError> {
        self.call(Operation::Stop, i).await
    }

    async fn on_pause(&self, i: &InstanceRecord) -> Result<(), PluginError> {
        self.call(Operation::Pause, i).await
    }

    async fn on_resume(&self, i: &InstanceRecord) -> Result<(), PluginError> {
        self.call(Operation::Resume, i).await
    }

    async fn on_clean(&self, i: &InstanceRecord) -> Result<(), PluginError> {
        self.call(Operation::Clean, i).await
    }

    async fn on_undefine(&self, i: &InstanceRecord) -> Result<(), PluginError> {
        self.call(Operation::Undefine, i).await
    }

    async fn before_migrate(
        &self,
        i: &InstanceRecord,
    ) -> Result<(), PluginError> {
        self.call(Operation::BeforeMigrate, i).await
    }

    async fn prepare_landing(
        &self,
        i: &InstanceRecord,
    ) -> Result<(), PluginError> {
        self.call(Operation::PrepareLanding, i).await
    }

    async fn after_migrate(
        &self,
        i: &InstanceRecord,
    ) -> Result<(), PluginError> {
        self.call(Operation::AfterMigrate, i).await
    }

    async fn on_migrated_away(
        &self,
        i: &InstanceRecord,
    ) -> Result<(), PluginError> {
        self.call(Operation::MigratedAway, i).await
    }
}

/// An OS capability over a fixed file set and interface list. Commands are
/// echoed back rather than run.
#[derive(Default)]
pub struct SimulatedOs {
    files: BTreeSet<String>,
    interfaces: Vec<NetworkInterfaceSpec>,
    commands: Mutex<Vec<String>>,
}

impl SimulatedOs {
    pub fn new(interfaces: Vec<NetworkInterfaceSpec>) -> Self {
        Self { interfaces, ..Default::default() }
    }

    pub fn with_file(mut self, path: impl Into<String>) -> Self {
        self.files.insert(path.into());
        self
    }

    /// Commands received through `execute_command`, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl OsCapability for SimulatedOs {
    fn execute_command(
        &self,
        command: &str,
        sudo: bool,
    ) -> Result<String, PluginError> {
        if command.trim().is_empty() {
            return Err(PluginError::new(22, "empty command"));
        }
        let line = if sudo {
            format!("sudo {}", command)
        } else {
            command.to_string()
        };
        self.commands.lock().unwrap().push(line.clone());
        Ok(line)
    }

    fn file_exists(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    fn network_info(&self) -> Vec<NetworkInterfaceSpec> {
        self.interfaces.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fog05_api_types::{ComputationRequirements, FduStatus, MigrationKind};

    fn record() -> InstanceRecord {
        InstanceRecord {
            uuid: Uuid::new_v4(),
            fdu_id: Uuid::new_v4(),
            node: Uuid::new_v4(),
            status: FduStatus::Define,
            image: None,
            computation_requirements: ComputationRequirements {
                cpu_arch: "x86_64".to_string(),
                cpu_min_count: 1,
                ram_size_mb: 128,
                storage_size_gb: 1,
            },
            hypervisor: "BARE".to_string(),
            migration_kind: MigrationKind::Live,
            interfaces: vec![],
            connection_points: vec![],
            depends_on: vec![],
            error_code: None,
            error_msg: None,
            migration_properties: None,
            generation: 1,
        }
    }

    #[tokio::test]
    async fn records_calls_and_injected_failures() {
        let log = Logger::root(slog::Discard, slog::o!());
        let rt = SimulatedRuntime::new("BARE", &log);
        assert!(rt.descriptor().handles_hypervisor("bare"));

        let r = record();
        rt.on_define(&r).await.unwrap();
        rt.fail_on(Operation::Configure, PluginError::new(7, "no disk"));
        assert_eq!(
            rt.on_configure(&r).await,
            Err(PluginError::new(7, "no disk"))
        );
        rt.clear_failures();
        rt.on_configure(&r).await.unwrap();

        assert_eq!(
            rt.calls_for(r.uuid),
            vec![Operation::Define, Operation::Configure, Operation::Configure]
        );
        assert_eq!(rt.max_in_flight(), 1);
    }

    #[test]
    fn simulated_os_echoes_commands() {
        let os = SimulatedOs::new(vec![]).with_file("/etc/hosts");
        assert!(os.file_exists("/etc/hosts"));
        assert!(!os.file_exists("/etc/shadow"));
        assert_eq!(os.execute_command("ls", true).unwrap(), "sudo ls");
        assert!(os.execute_command("  ", false).is_err());
        assert_eq!(os.commands(), vec!["sudo ls".to_string()]);
    }
}
