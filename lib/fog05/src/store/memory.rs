// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-process [`StateStore`] used by the standalone runner and by tests.
//!
//! Notifications are sent while the store lock is held, so every subscriber
//! observes writes to a given path in the order they were applied.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use slog::{debug, info, Logger};
use tokio::sync::mpsc;

use super::{
    Change, EvalHandler, EvalSelector, StateStore, StoreError, Subscription,
    SubscriptionId, Value,
};
use crate::path::Path;

struct Subscriber {
    selector: Path,
    tx: mpsc::UnboundedSender<Change>,
}

#[derive(Default)]
struct Inner {
    values: BTreeMap<Path, Value>,
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
    evaluators: BTreeMap<Path, EvalHandler>,
    next_subscription: u64,

    /// Selectors whose writes fail with `StoreError::Unavailable`.
    failing_puts: Vec<Path>,
}

impl Inner {
    fn notify(&mut self, change: Change) {
        // Subscribers whose receivers are gone are pruned as a side effect.
        self.subscribers.retain(|_, sub| {
            if !sub.selector.matches(&change.path) {
                return true;
            }
            sub.tx.send(change.clone()).is_ok()
        });
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    log: Logger,
}

impl MemoryStore {
    pub fn new(log: &Logger) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            log: log.new(slog::o!("component" => "memory-store")),
        }
    }

    /// Makes every subsequent write to a path matching `selector` fail, to
    /// simulate a partitioned or crashed writer.
    pub fn inject_put_failure(&self, selector: Path) {
        info!(self.log, "injecting write failures"; "selector" => %selector);
        self.inner.lock().unwrap().failing_puts.push(selector);
    }

    pub fn clear_injected_failures(&self) {
        self.inner.lock().unwrap().failing_puts.clear();
    }

    /// Drops every live subscription. Subscribers see their streams end and
    /// must fall back to polling.
    pub fn disconnect_subscribers(&self) {
        let mut inner = self.inner.lock().unwrap();
        info!(self.log, "disconnecting subscribers";
              "count" => inner.subscribers.len());
        inner.subscribers.clear();
    }

    /// Number of values currently stored.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, path: &Path) -> Result<Option<Value>, StoreError> {
        Ok(self.inner.lock().unwrap().values.get(path).cloned())
    }

    async fn get_all(
        &self,
        selector: &Path,
    ) -> Result<Vec<(Path, Value)>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .values
            .iter()
            .filter(|(path, _)| selector.matches(path))
            .map(|(path, value)| (path.clone(), value.clone()))
            .collect())
    }

    async fn put(&self, path: &Path, value: Value) -> Result<(), StoreError> {
        if path.is_selector() {
            return Err(StoreError::SelectorNotWritable(path.clone()));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.failing_puts.iter().any(|sel| sel.matches(path)) {
            return Err(StoreError::Unavailable(format!(
                "injected write failure at {}",
                path
            )));
        }

        debug!(self.log, "put"; "path" => %path);
        inner.values.insert(path.clone(), value.clone());
        inner.notify(Change { path: path.clone(), value: Some(value) });
        Ok(())
    }

    async fn remove(&self, path: &Path) -> Result<(), StoreError> {
        if path.is_selector() {
            return Err(StoreError::SelectorNotWritable(path.clone()));
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.values.remove(path).is_some() {
            debug!(self.log, "remove"; "path" => %path);
            inner.notify(Change { path: path.clone(), value: None });
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        selector: &Path,
    ) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        let id = SubscriptionId(inner.next_subscription);
        inner.next_subscription += 1;
        inner
            .subscribers
            .insert(id, Subscriber { selector: selector.clone(), tx });
        debug!(self.log, "subscribe"; "selector" => %selector, "id" => id.0);
        Ok(Subscription::new(id, rx))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<(), StoreError> {
        self.inner.lock().unwrap().subscribers.remove(&id);
        Ok(())
    }

    async fn register_eval(
        &self,
        path: &Path,
        handler: EvalHandler,
    ) -> Result<(), StoreError> {
        if path.is_selector() {
            return Err(StoreError::SelectorNotEvaluable(path.clone()));
        }
        self.inner.lock().unwrap().evaluators.insert(path.clone(), handler);
        Ok(())
    }

    async fn unregister_eval(&self, path: &Path) -> Result<(), StoreError> {
        self.inner.lock().unwrap().evaluators.remove(path);
        Ok(())
    }

    async fn eval(&self, selector: &EvalSelector) -> Result<Value, StoreError> {
        let path = selector.path();
        if path.is_selector() {
            return Err(StoreError::SelectorNotEvaluable(path.clone()));
        }

        // Run the handler without holding the lock; it may touch the store.
        let handler = self
            .inner
            .lock()
            .unwrap()
            .evaluators
            .get(path)
            .cloned()
            .ok_or_else(|| StoreError::NoEvaluator(path.clone()))?;

        debug!(self.log, "eval"; "selector" => %selector);
        handler(selector).map_err(|message| StoreError::EvalFailed {
            path: path.clone(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn test_logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    fn p(s: &str) -> Path {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn get_of_absent_path_is_none() {
        let store = MemoryStore::new(&test_logger());
        assert_eq!(store.get(&p("/a/b")).await.unwrap(), None);
        assert!(store.get_all(&p("/a/*")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_get_remove() {
        let store = MemoryStore::new(&test_logger());
        store.put(&p("/a/b"), json!({"x": 1})).await.unwrap();
        store.put(&p("/a/c"), json!({"x": 2})).await.unwrap();
        store.put(&p("/z/b"), json!({"x": 3})).await.unwrap();

        assert_eq!(store.get(&p("/a/b")).await.unwrap(), Some(json!({"x": 1})));
        let all = store.get_all(&p("/a/*")).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(store.get_all(&p("/**")).await.unwrap().len(), 3);

        store.remove(&p("/a/b")).await.unwrap();
        assert_eq!(store.get(&p("/a/b")).await.unwrap(), None);
        // Removing something absent is not an error.
        store.remove(&p("/a/b")).await.unwrap();
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn selectors_are_not_writable() {
        let store = MemoryStore::new(&test_logger());
        assert!(matches!(
            store.put(&p("/a/*"), json!(1)).await,
            Err(StoreError::SelectorNotWritable(_))
        ));
        assert!(matches!(
            store.remove(&p("/a/**")).await,
            Err(StoreError::SelectorNotWritable(_))
        ));
    }

    #[tokio::test]
    async fn subscribers_see_matching_changes_in_order() {
        let store = MemoryStore::new(&test_logger());
        let mut sub = store.subscribe(&p("/a/*")).await.unwrap();

        store.put(&p("/a/b"), json!(1)).await.unwrap();
        store.put(&p("/x/b"), json!(99)).await.unwrap();
        store.put(&p("/a/b"), json!(2)).await.unwrap();
        store.remove(&p("/a/b")).await.unwrap();

        let c1 = sub.recv().await.unwrap();
        assert_eq!(c1.value, Some(json!(1)));
        let c2 = sub.recv().await.unwrap();
        assert_eq!(c2.value, Some(json!(2)));
        let c3 = sub.recv().await.unwrap();
        assert_eq!(c3, Change { path: p("/a/b"), value: None });

        store.unsubscribe(sub.id()).await.unwrap();
        store.put(&p("/a/b"), json!(3)).await.unwrap();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn disconnect_ends_subscription_streams() {
        let store = MemoryStore::new(&test_logger());
        let mut sub = store.subscribe(&p("/**")).await.unwrap();
        store.disconnect_subscribers();
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn injected_failures_reject_matching_writes() {
        let store = MemoryStore::new(&test_logger());
        store.inject_put_failure(p("/a/*"));
        assert!(matches!(
            store.put(&p("/a/b"), json!(1)).await,
            Err(StoreError::Unavailable(_))
        ));
        store.put(&p("/b/b"), json!(1)).await.unwrap();

        store.clear_injected_failures();
        store.put(&p("/a/b"), json!(1)).await.unwrap();
    }

    #[tokio::test]
    async fn eval_dispatches_to_registered_handler() {
        let store = MemoryStore::new(&test_logger());
        let path = p("/agfos/0/tenants/0/nodes/n/os/exec/echo");

        let err = store.eval(&EvalSelector::new(path.clone())).await;
        assert!(matches!(err, Err(StoreError::NoEvaluator(_))));

        let handler: EvalHandler = Arc::new(|sel: &EvalSelector| {
            match sel.get("msg") {
                Some(msg) => Ok(json!({ "echo": msg })),
                None => Err("missing msg".to_string()),
            }
        });
        store.register_eval(&path, handler).await.unwrap();

        let sel = EvalSelector::new(path.clone()).param("msg", "hi").unwrap();
        assert_eq!(store.eval(&sel).await.unwrap(), json!({"echo": "hi"}));

        let err = store.eval(&EvalSelector::new(path.clone())).await;
        assert!(matches!(err, Err(StoreError::EvalFailed { .. })));

        store.unregister_eval(&path).await.unwrap();
        let err = store.eval(&sel).await;
        assert!(matches!(err, Err(StoreError::NoEvaluator(_))));
    }
}
