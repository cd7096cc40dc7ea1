// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hierarchical store paths and the scheme that names every fog05 resource.
//!
//! A [`Path`] is a sequence of `/`-separated segments. Paths used for reads and
//! subscriptions may be *selectors*: a `*` segment matches exactly one segment
//! and a trailing `**` segment matches any (possibly empty) suffix. Only
//! concrete paths may be written.
//!
//! [`PathScheme`] is a pure function of its inputs, which is what lets a
//! controller and an agent that never talk to each other directly agree on
//! where a resource lives.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use uuid::Uuid;

/// Root segment of the namespace agents publish observed state to.
pub const GLOBAL_ACTUAL_PREFIX: &str = "agfos";

/// Root segment of the namespace controllers write intent to.
pub const GLOBAL_DESIRED_PREFIX: &str = "dgfos";

const ANY_SEGMENT: &str = "*";
const ANY_SUFFIX: &str = "**";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path must start with '/': {0:?}")]
    NotAbsolute(String),

    #[error("path {0:?} contains an empty segment")]
    EmptySegment(String),

    #[error("segment {0:?} contains a reserved character")]
    ReservedCharacter(String),

    #[error("'**' may only appear as the last segment of {0:?}")]
    MisplacedSuffixWildcard(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// Builds a path from individual segments, validating each.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, PathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> =
            segments.into_iter().map(Into::into).collect();
        let rendered = format!("/{}", segments.join("/"));

        for (idx, seg) in segments.iter().enumerate() {
            if seg.is_empty() {
                return Err(PathError::EmptySegment(rendered));
            }
            if seg.contains(|c: char| matches!(c, '/' | '?' | ';')) {
                return Err(PathError::ReservedCharacter(seg.clone()));
            }
            if seg == ANY_SUFFIX && idx + 1 != segments.len() {
                return Err(PathError::MisplacedSuffixWildcard(rendered));
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true if this path contains wildcard segments and so can only
    /// be used to read or subscribe.
    pub fn is_selector(&self) -> bool {
        self.segments.iter().any(|s| s == ANY_SEGMENT || s == ANY_SUFFIX)
    }

    /// Returns true if `concrete` is addressed by this path (used as a
    /// selector). A concrete path only matches itself.
    pub fn matches(&self, concrete: &Path) -> bool {
        let mut candidate = concrete.segments.iter();
        for seg in &self.segments {
            if seg == ANY_SUFFIX {
                return true;
            }
            match candidate.next() {
                Some(c) if seg == ANY_SEGMENT || seg == c => {}
                _ => return false,
            }
        }
        candidate.next().is_none()
    }

    /// Extends the path with scheme-generated segments. Callers only pass
    /// segments produced by this module or by `Display` of a UUID.
    fn child(&self, segment: impl fmt::Display) -> Path {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Path { segments }
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for seg in &self.segments {
            write!(f, "/{}", seg)?;
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err(PathError::NotAbsolute(s.to_string()));
        };
        Path::from_segments(rest.split('/'))
    }
}

/// The two top-level namespaces of the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum Namespace {
    /// State observed and published by node agents.
    Actual,
    /// Intent written by controllers.
    Desired,
}

impl Namespace {
    fn prefix(self) -> &'static str {
        match self {
            Namespace::Actual => GLOBAL_ACTUAL_PREFIX,
            Namespace::Desired => GLOBAL_DESIRED_PREFIX,
        }
    }
}

/// Kinds of system-wide catalog entries.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum CatalogKind {
    Fdu,
    Image,
    Flavor,
    Network,
    Entity,
}

/// The explicit identifiers of one FDU instance record. Paths for the record
/// are always derived from these fields, never parsed back out of a path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub node: Uuid,
    pub fdu: Uuid,
    pub instance: Uuid,
}

impl InstanceKey {
    pub fn of(record: &fog05_api_types::InstanceRecord) -> Self {
        Self { node: record.node, fdu: record.fdu_id, instance: record.uuid }
    }

    /// The same instance, addressed on a different node.
    pub fn on_node(self, node: Uuid) -> Self {
        Self { node, ..self }
    }
}

fn id_or_any(id: Option<Uuid>) -> String {
    id.map_or_else(|| ANY_SEGMENT.to_string(), |id| id.to_string())
}

/// Maps (system, tenant, resource) tuples to store paths.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathScheme {
    sys_id: String,
    tenant_id: String,
}

impl PathScheme {
    pub fn new(
        sys_id: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Result<Self, PathError> {
        let scheme =
            Self { sys_id: sys_id.into(), tenant_id: tenant_id.into() };
        // Validate the ids once here so every derived path is well formed.
        Path::from_segments([
            scheme.sys_id.as_str(),
            scheme.tenant_id.as_str(),
        ])?;
        Ok(scheme)
    }

    pub fn sys_id(&self) -> &str {
        &self.sys_id
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn tenant_root(&self, ns: Namespace) -> Path {
        Path {
            segments: vec![
                ns.prefix().to_string(),
                self.sys_id.clone(),
                "tenants".to_string(),
                self.tenant_id.clone(),
            ],
        }
    }

    fn node_root(&self, ns: Namespace, node: Option<Uuid>) -> Path {
        self.tenant_root(ns).child("nodes").child(id_or_any(node))
    }

    /// `/<ns>/<sys>/tenants/<tenant>/catalog/<kind>/<id>/info`
    pub fn catalog_entry(
        &self,
        ns: Namespace,
        kind: CatalogKind,
        id: Uuid,
    ) -> Path {
        self.tenant_root(ns)
            .child("catalog")
            .child(kind)
            .child(id)
            .child("info")
    }

    /// Selects every catalog entry of one kind.
    pub fn catalog_entries(&self, ns: Namespace, kind: CatalogKind) -> Path {
        self.tenant_root(ns)
            .child("catalog")
            .child(kind)
            .child(ANY_SEGMENT)
            .child("info")
    }

    /// `/<ns>/<sys>/tenants/<tenant>/nodes/<node>/info`; `None` selects all
    /// nodes.
    pub fn node_info(&self, ns: Namespace, node: Option<Uuid>) -> Path {
        self.node_root(ns, node).child("info")
    }

    pub fn node_status(&self, ns: Namespace, node: Option<Uuid>) -> Path {
        self.node_root(ns, node).child("status")
    }

    pub fn node_plugin(
        &self,
        ns: Namespace,
        node: Uuid,
        plugin: Option<Uuid>,
    ) -> Path {
        self.node_root(ns, Some(node))
            .child("plugins")
            .child(id_or_any(plugin))
            .child("info")
    }

    pub fn node_connection_point(
        &self,
        ns: Namespace,
        node: Uuid,
        cp: Option<Uuid>,
    ) -> Path {
        self.node_root(ns, Some(node))
            .child("network")
            .child("connection_points")
            .child(id_or_any(cp))
            .child("info")
    }

    /// The record for one instance.
    pub fn instance(&self, ns: Namespace, key: InstanceKey) -> Path {
        self.instances(ns, Some(key.node), Some(key.fdu), Some(key.instance))
    }

    /// Selects instance records; each `None` becomes a `*` segment.
    pub fn instances(
        &self,
        ns: Namespace,
        node: Option<Uuid>,
        fdu: Option<Uuid>,
        instance: Option<Uuid>,
    ) -> Path {
        self.node_root(ns, node)
            .child("fdu")
            .child(id_or_any(fdu))
            .child("instances")
            .child(id_or_any(instance))
            .child("info")
    }

    /// The eval path of an OS-level function exported by a node's agent.
    pub fn node_os_function(&self, node: Uuid, function: &str) -> Path {
        self.node_root(Namespace::Actual, Some(node))
            .child("os")
            .child("exec")
            .child(function)
    }
}
