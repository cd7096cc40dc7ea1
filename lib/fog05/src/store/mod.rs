// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The client interface to the distributed key/value store every fog05
//! component coordinates through.
//!
//! The store itself is an external collaborator; [`StateStore`] captures only
//! the primitives the rest of the crate relies on. A read that finds nothing
//! is a successful `None`/empty result, never an error.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::path::{Path, PathError};

pub mod memory;

pub use memory::MemoryStore;

pub type Value = serde_json::Value;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot write through selector {0}")]
    SelectorNotWritable(Path),

    #[error("eval requires a concrete path, got {0}")]
    SelectorNotEvaluable(Path),

    #[error("no evaluator registered at {0}")]
    NoEvaluator(Path),

    #[error("evaluator at {path} failed: {message}")]
    EvalFailed { path: Path, message: String },

    #[error("failed to (de)serialize value at {path}: {source}")]
    Serialization {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid path: {0}")]
    Path(#[from] PathError),

    #[error("store backend unavailable: {0}")]
    Unavailable(String),
}

/// A single update delivered to a subscriber.
#[derive(Clone, Debug, PartialEq)]
pub struct Change {
    pub path: Path,
    /// The new value, or `None` if the path was removed.
    pub value: Option<Value>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

/// The receiving side of a subscription. Updates to any one path arrive in
/// the order they were written; no order is promised across paths.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<Change>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        rx: mpsc::UnboundedReceiver<Change>,
    ) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next change. Returns `None` once the store has dropped
    /// the subscription, after which callers must fall back to reads.
    pub async fn recv(&mut self) -> Option<Change> {
        self.rx.recv().await
    }

    /// Returns an already-delivered change without waiting.
    pub fn try_recv(&mut self) -> Option<Change> {
        self.rx.try_recv().ok()
    }
}

/// The selector of an eval invocation: a concrete path followed by a
/// `?key=val;key2=val2` parameter block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalSelector {
    path: Path,
    params: Vec<(String, String)>,
}

impl EvalSelector {
    pub fn new(path: Path) -> Self {
        Self { path, params: Vec::new() }
    }

    /// Appends a parameter. Strings are rendered verbatim; every other value
    /// (including lists and maps) is JSON-serialized inline.
    pub fn param<T: Serialize>(
        mut self,
        key: &str,
        value: T,
    ) -> Result<Self, StoreError> {
        let rendered = match serde_json::to_value(&value) {
            Ok(Value::String(s)) => s,
            Ok(other) => other.to_string(),
            Err(source) => {
                return Err(StoreError::Serialization {
                    path: format!("{}?{}", self.path, key),
                    source,
                })
            }
        };
        self.params.push((key.to_string(), rendered));
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Looks up a parameter by name.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for EvalSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path)?;
        for (idx, (k, v)) in self.params.iter().enumerate() {
            let sep = if idx == 0 { '?' } else { ';' };
            write!(f, "{}{}={}", sep, k, v)?;
        }
        Ok(())
    }
}

/// A function registered at a path and invoked through [`StateStore::eval`].
pub type EvalHandler =
    Arc<dyn Fn(&EvalSelector) -> Result<Value, String> + Send + Sync>;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads one value. Absence is `Ok(None)`.
    async fn get(&self, path: &Path) -> Result<Option<Value>, StoreError>;

    /// Resolves a selector to every matching `(path, value)` pair.
    async fn get_all(
        &self,
        selector: &Path,
    ) -> Result<Vec<(Path, Value)>, StoreError>;

    /// Upserts a value; last write wins.
    async fn put(&self, path: &Path, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, path: &Path) -> Result<(), StoreError>;

    /// Starts delivering changes to paths matching `selector`.
    async fn subscribe(
        &self,
        selector: &Path,
    ) -> Result<Subscription, StoreError>;

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError>;

    /// Exposes `handler` to evals of `path`, replacing any previous one.
    async fn register_eval(
        &self,
        path: &Path,
        handler: EvalHandler,
    ) -> Result<(), StoreError>;

    async fn unregister_eval(&self, path: &Path) -> Result<(), StoreError>;

    /// Synchronously invokes the function registered at the selector's path.
    async fn eval(&self, selector: &EvalSelector) -> Result<Value, StoreError>;
}

/// Reads and deserializes one value.
pub async fn get_typed<T: DeserializeOwned>(
    store: &dyn StateStore,
    path: &Path,
) -> Result<Option<T>, StoreError> {
    match store.get(path).await? {
        Some(value) => decode(path, value).map(Some),
        None => Ok(None),
    }
}

/// Reads and deserializes every value matching a selector.
pub async fn get_all_typed<T: DeserializeOwned>(
    store: &dyn StateStore,
    selector: &Path,
) -> Result<Vec<T>, StoreError> {
    store
        .get_all(selector)
        .await?
        .into_iter()
        .map(|(path, value)| decode(&path, value))
        .collect()
}

/// Serializes and writes one value.
pub async fn put_typed<T: Serialize + ?Sized>(
    store: &dyn StateStore,
    path: &Path,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value).map_err(|source| {
        StoreError::Serialization { path: path.to_string(), source }
    })?;
    store.put(path, value).await
}

pub fn decode<T: DeserializeOwned>(
    path: &Path,
    value: Value,
) -> Result<T, StoreError> {
    serde_json::from_value(value).map_err(|source| StoreError::Serialization {
        path: path.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_selector_renders_parameter_block() {
        let path: Path = "/agfos/0/tenants/0/nodes/n1/os/exec/execute_command"
            .parse()
            .unwrap();
        let sel = EvalSelector::new(path)
            .param("command", "ls -l")
            .unwrap()
            .param("sudo", true)
            .unwrap()
            .param("args", vec!["a", "b"])
            .unwrap();

        assert_eq!(
            sel.to_string(),
            "/agfos/0/tenants/0/nodes/n1/os/exec/execute_command\
             ?command=ls -l;sudo=true;args=[\"a\",\"b\"]"
        );
        assert_eq!(sel.get("command"), Some("ls -l"));
        assert_eq!(sel.get("missing"), None);
    }

    #[test]
    fn eval_selector_without_params_is_bare_path() {
        let path: Path = "/a/b".parse().unwrap();
        assert_eq!(EvalSelector::new(path).to_string(), "/a/b");
    }
}
