// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Describes a fog05 configuration which may be parsed from a TOML file.

use std::path::Path;
use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Configuration shared by the controller and the agents it drives.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub system: System,

    #[serde(default)]
    pub controller: Controller,

    /// Simulated node inventory used by the standalone runner.
    #[serde(default, rename = "node")]
    pub nodes: Vec<Node>,
}

/// The (system, tenant) scope every store path is rooted under.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct System {
    pub sys_id: String,
    pub tenant_id: String,
}

impl Default for System {
    fn default() -> Self {
        Self { sys_id: "0".to_string(), tenant_id: "0".to_string() }
    }
}

/// How the controller waits for agents to confirm transitions.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Controller {
    /// Upper bound on a single transition wait. Absent means the controller
    /// blocks until the agent answers.
    #[serde(default)]
    pub transition_timeout_ms: Option<u64>,

    /// Interval between reads of the actual namespace when the store's
    /// change notifications are unavailable.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            transition_timeout_ms: None,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl Controller {
    pub fn transition_timeout(&self) -> Option<Duration> {
        self.transition_timeout_ms.map(Duration::from_millis)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// A node to simulate: its inventory and the hypervisors its agent drives.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Node {
    #[serde(default)]
    pub uuid: Option<Uuid>,
    pub name: String,
    pub os: String,
    pub arch: String,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default)]
    pub ram_mb: u64,
    #[serde(default)]
    pub hypervisors: Vec<String>,
    #[serde(default, rename = "interface")]
    pub interfaces: Vec<Interface>,
    #[serde(default)]
    pub io: Vec<IoDevice>,
    #[serde(default, rename = "accelerator")]
    pub accelerators: Vec<Accelerator>,
}

fn default_cpus() -> u32 {
    1
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Interface {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct IoDevice {
    pub name: String,
    pub kind: String,
    #[serde(default = "default_available")]
    pub available: bool,
}

fn default_available() -> bool {
    true
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Accelerator {
    pub name: String,
    #[serde(default)]
    pub supported_library: Vec<String>,
}

/// Errors which may be returned when parsing the configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Duplicate node name {0}")]
    DuplicateNode(String),
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Parses TOML text into a configuration object.
pub fn parse_str(contents: &str) -> Result<Config, ParseError> {
    let cfg = toml::from_str::<Config>(contents)?;

    let mut names = std::collections::BTreeSet::new();
    for node in &cfg.nodes {
        if !names.insert(node.name.as_str()) {
            return Err(ParseError::DuplicateNode(node.name.clone()));
        }
    }

    Ok(cfg)
}
