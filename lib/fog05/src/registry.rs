// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed accessors for every resource kept in the store.
//!
//! The registry owns no state of its own: every call is a store read or write
//! at the path the [`PathScheme`] assigns to the resource.

use std::sync::Arc;

use fog05_api_types::{
    ConnectionPointDescriptor, EntityDescriptor, FduDescriptor,
    FlavorDescriptor, ImageDescriptor, InstanceRecord, NetworkDescriptor,
    NodeDescriptor, NodeStatus, PluginDescriptor,
};
use serde::{de::DeserializeOwned, Serialize};
use slog::{debug, Logger};
use uuid::Uuid;

use crate::path::{CatalogKind, InstanceKey, Namespace, PathScheme};
use crate::store::{
    get_all_typed, get_typed, put_typed, EvalSelector, StateStore, StoreError,
    Value,
};

/// A descriptor that lives in the system-wide catalog.
pub trait CatalogEntry: Serialize + DeserializeOwned + Send + Sync {
    const KIND: CatalogKind;

    fn id(&self) -> Uuid;
}

macro_rules! catalog_entry {
    ($ty:ty, $kind:expr) => {
        impl CatalogEntry for $ty {
            const KIND: CatalogKind = $kind;

            fn id(&self) -> Uuid {
                self.uuid
            }
        }
    };
}

catalog_entry!(FduDescriptor, CatalogKind::Fdu);
catalog_entry!(ImageDescriptor, CatalogKind::Image);
catalog_entry!(FlavorDescriptor, CatalogKind::Flavor);
catalog_entry!(NetworkDescriptor, CatalogKind::Network);
catalog_entry!(EntityDescriptor, CatalogKind::Entity);

/// Catalog entries are client-written intent and live in the desired
/// namespace.
const CATALOG_NS: Namespace = Namespace::Desired;

#[derive(Clone)]
pub struct Registry {
    store: Arc<dyn StateStore>,
    scheme: PathScheme,
    log: Logger,
}

impl Registry {
    pub fn new(
        store: Arc<dyn StateStore>,
        scheme: PathScheme,
        log: &Logger,
    ) -> Self {
        let log = log.new(slog::o!("component" => "registry"));
        Self { store, scheme, log }
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn scheme(&self) -> &PathScheme {
        &self.scheme
    }

    // Catalog

    pub async fn add_catalog_entry<T: CatalogEntry>(
        &self,
        entry: &T,
    ) -> Result<(), StoreError> {
        let path = self.scheme.catalog_entry(CATALOG_NS, T::KIND, entry.id());
        debug!(self.log, "catalog add"; "kind" => %T::KIND,
               "id" => %entry.id());
        put_typed(self.store.as_ref(), &path, entry).await
    }

    pub async fn get_catalog_entry<T: CatalogEntry>(
        &self,
        id: Uuid,
    ) -> Result<Option<T>, StoreError> {
        let path = self.scheme.catalog_entry(CATALOG_NS, T::KIND, id);
        get_typed(self.store.as_ref(), &path).await
    }

    pub async fn list_catalog_entries<T: CatalogEntry>(
        &self,
    ) -> Result<Vec<T>, StoreError> {
        let selector = self.scheme.catalog_entries(CATALOG_NS, T::KIND);
        get_all_typed(self.store.as_ref(), &selector).await
    }

    pub async fn remove_catalog_entry<T: CatalogEntry>(
        &self,
        id: Uuid,
    ) -> Result<(), StoreError> {
        let path = self.scheme.catalog_entry(CATALOG_NS, T::KIND, id);
        debug!(self.log, "catalog remove"; "kind" => %T::KIND, "id" => %id);
        self.store.remove(&path).await
    }

    // Nodes, as published by their agents

    pub async fn add_node(
        &self,
        node: &NodeDescriptor,
    ) -> Result<(), StoreError> {
        let path = self.scheme.node_info(Namespace::Actual, Some(node.uuid));
        put_typed(self.store.as_ref(), &path, node).await
    }

    /// Removes a node's descriptor and status. Instances and plugins it
    /// published are left for the agent to clean up.
    pub async fn remove_node(&self, node: Uuid) -> Result<(), StoreError> {
        self.store
            .remove(&self.scheme.node_info(Namespace::Actual, Some(node)))
            .await?;
        self.store
            .remove(&self.scheme.node_status(Namespace::Actual, Some(node)))
            .await
    }

    pub async fn get_node(
        &self,
        node: Uuid,
    ) -> Result<Option<NodeDescriptor>, StoreError> {
        let path = self.scheme.node_info(Namespace::Actual, Some(node));
        get_typed(self.store.as_ref(), &path).await
    }

    pub async fn list_nodes(&self) -> Result<Vec<NodeDescriptor>, StoreError> {
        let selector = self.scheme.node_info(Namespace::Actual, None);
        get_all_typed(self.store.as_ref(), &selector).await
    }

    pub async fn put_node_status(
        &self,
        status: &NodeStatus,
    ) -> Result<(), StoreError> {
        let path =
            self.scheme.node_status(Namespace::Actual, Some(status.uuid));
        put_typed(self.store.as_ref(), &path, status).await
    }

    pub async fn get_node_status(
        &self,
        node: Uuid,
    ) -> Result<Option<NodeStatus>, StoreError> {
        let path = self.scheme.node_status(Namespace::Actual, Some(node));
        get_typed(self.store.as_ref(), &path).await
    }

    pub async fn add_plugin(
        &self,
        node: Uuid,
        plugin: &PluginDescriptor,
    ) -> Result<(), StoreError> {
        let path =
            self.scheme.node_plugin(Namespace::Actual, node, Some(plugin.uuid));
        put_typed(self.store.as_ref(), &path, plugin).await
    }

    pub async fn remove_plugin(
        &self,
        node: Uuid,
        plugin: Uuid,
    ) -> Result<(), StoreError> {
        let path =
            self.scheme.node_plugin(Namespace::Actual, node, Some(plugin));
        self.store.remove(&path).await
    }

    pub async fn list_plugins(
        &self,
        node: Uuid,
    ) -> Result<Vec<PluginDescriptor>, StoreError> {
        let selector = self.scheme.node_plugin(Namespace::Actual, node, None);
        get_all_typed(self.store.as_ref(), &selector).await
    }

    // Connection points requested on a node

    pub async fn add_connection_point(
        &self,
        node: Uuid,
        cp: &ConnectionPointDescriptor,
    ) -> Result<(), StoreError> {
        let path = self.scheme.node_connection_point(
            Namespace::Desired,
            node,
            Some(cp.uuid),
        );
        put_typed(self.store.as_ref(), &path, cp).await
    }

    pub async fn remove_connection_point(
        &self,
        node: Uuid,
        cp: Uuid,
    ) -> Result<(), StoreError> {
        let path = self.scheme.node_connection_point(
            Namespace::Desired,
            node,
            Some(cp),
        );
        self.store.remove(&path).await
    }

    pub async fn list_connection_points(
        &self,
        node: Uuid,
    ) -> Result<Vec<ConnectionPointDescriptor>, StoreError> {
        let selector =
            self.scheme.node_connection_point(Namespace::Desired, node, None);
        get_all_typed(self.store.as_ref(), &selector).await
    }

    // Instance records

    pub async fn get_instance(
        &self,
        ns: Namespace,
        key: InstanceKey,
    ) -> Result<Option<InstanceRecord>, StoreError> {
        get_typed(self.store.as_ref(), &self.scheme.instance(ns, key)).await
    }

    pub async fn list_instances(
        &self,
        ns: Namespace,
        node: Option<Uuid>,
        fdu: Option<Uuid>,
        instance: Option<Uuid>,
    ) -> Result<Vec<InstanceRecord>, StoreError> {
        let selector = self.scheme.instances(ns, node, fdu, instance);
        get_all_typed(self.store.as_ref(), &selector).await
    }

    pub async fn put_instance(
        &self,
        ns: Namespace,
        record: &InstanceRecord,
    ) -> Result<(), StoreError> {
        let path = self.scheme.instance(ns, InstanceKey::of(record));
        put_typed(self.store.as_ref(), &path, record).await
    }

    pub async fn remove_instance(
        &self,
        ns: Namespace,
        key: InstanceKey,
    ) -> Result<(), StoreError> {
        self.store.remove(&self.scheme.instance(ns, key)).await
    }

    /// Invokes an OS-level function exported by a node's agent.
    pub async fn node_eval(
        &self,
        node: Uuid,
        function: &str,
        params: &[(&str, Value)],
    ) -> Result<Value, StoreError> {
        let mut selector =
            EvalSelector::new(self.scheme.node_os_function(node, function));
        for (key, value) in params {
            selector = selector.param(key, value)?;
        }
        self.store.eval(&selector).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use fog05_api_types::PluginKind;
    use serde_json::json;

    fn registry() -> Registry {
        let log = Logger::root(slog::Discard, slog::o!());
        let store = Arc::new(MemoryStore::new(&log));
        Registry::new(store, PathScheme::new("0", "0").unwrap(), &log)
    }

    fn image(name: &str) -> ImageDescriptor {
        ImageDescriptor {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            uri: format!("file:///images/{}.qcow2", name),
            format: "qcow2".to_string(),
            checksum: String::new(),
        }
    }

    #[tokio::test]
    async fn catalog_kinds_are_kept_apart() {
        let reg = registry();
        let a = image("a");
        let b = image("b");
        reg.add_catalog_entry(&a).await.unwrap();
        reg.add_catalog_entry(&b).await.unwrap();
        reg.add_catalog_entry(&FlavorDescriptor {
            uuid: Uuid::new_v4(),
            name: "small".to_string(),
            cpu_min_count: 1,
            ram_size_mb: 512,
            storage_size_gb: 4,
        })
        .await
        .unwrap();

        let images: Vec<ImageDescriptor> =
            reg.list_catalog_entries().await.unwrap();
        assert_eq!(images.len(), 2);
        let flavors: Vec<FlavorDescriptor> =
            reg.list_catalog_entries().await.unwrap();
        assert_eq!(flavors.len(), 1);

        assert_eq!(
            reg.get_catalog_entry::<ImageDescriptor>(a.uuid).await.unwrap(),
            Some(a.clone())
        );
        // Same id, wrong kind: nothing there.
        assert_eq!(
            reg.get_catalog_entry::<NetworkDescriptor>(a.uuid).await.unwrap(),
            None
        );

        reg.remove_catalog_entry::<ImageDescriptor>(a.uuid).await.unwrap();
        assert_eq!(
            reg.get_catalog_entry::<ImageDescriptor>(a.uuid).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn plugins_and_connection_points_are_node_scoped() {
        let reg = registry();
        let n1 = Uuid::new_v4();
        let n2 = Uuid::new_v4();
        let plugin = PluginDescriptor {
            uuid: Uuid::new_v4(),
            name: "lxd".to_string(),
            kind: PluginKind::Runtime,
            hypervisor: Some("LXD".to_string()),
        };
        reg.add_plugin(n1, &plugin).await.unwrap();
        assert_eq!(reg.list_plugins(n1).await.unwrap(), vec![plugin.clone()]);
        assert!(reg.list_plugins(n2).await.unwrap().is_empty());
        reg.remove_plugin(n1, plugin.uuid).await.unwrap();
        assert!(reg.list_plugins(n1).await.unwrap().is_empty());

        let cp = ConnectionPointDescriptor {
            uuid: Uuid::new_v4(),
            name: "cp0".to_string(),
            vld_ref: None,
            port_security_enabled: false,
        };
        reg.add_connection_point(n2, &cp).await.unwrap();
        assert_eq!(
            reg.list_connection_points(n2).await.unwrap(),
            vec![cp.clone()]
        );
        assert!(reg.list_connection_points(n1).await.unwrap().is_empty());
        reg.remove_connection_point(n2, cp.uuid).await.unwrap();
        assert!(reg.list_connection_points(n2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn undecodable_values_surface_as_serialization_errors() {
        let reg = registry();
        let id = Uuid::new_v4();
        let path = reg.scheme().catalog_entry(
            Namespace::Desired,
            CatalogKind::Image,
            id,
        );
        reg.store().put(&path, json!({"bogus": true})).await.unwrap();
        assert!(matches!(
            reg.get_catalog_entry::<ImageDescriptor>(id).await,
            Err(StoreError::Serialization { .. })
        ));
    }

    #[tokio::test]
    async fn node_eval_renders_parameters() {
        let reg = registry();
        let node = Uuid::new_v4();
        let path = reg.scheme().node_os_function(node, "file_exists");
        reg.store()
            .register_eval(
                &path,
                Arc::new(|sel: &EvalSelector| {
                    Ok(json!(sel.get("file_path") == Some("/etc/hosts")))
                }),
            )
            .await
            .unwrap();

        let out = reg
            .node_eval(
                node,
                "file_exists",
                &[("file_path", json!("/etc/hosts"))],
            )
            .await
            .unwrap();
        assert_eq!(out, json!(true));

        let missing = reg.node_eval(Uuid::new_v4(), "file_exists", &[]).await;
        assert!(matches!(missing, Err(StoreError::NoEvaluator(_))));
    }
}
