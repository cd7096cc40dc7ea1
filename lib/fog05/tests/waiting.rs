// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! How the controller waits for a transition to settle, driven by a scripted
//! stand-in for the node agent.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{native_fdu, test_logger, test_policy};
use fog05::path::{InstanceKey, Namespace};
use fog05::store::decode;
use fog05::{
    Controller, ControllerError, MemoryStore, PathScheme, StateStore,
    WaitPolicy,
};
use fog05_api_types::{FduStatus, InstanceRecord};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct Fixture {
    store: Arc<MemoryStore>,
    controller: Controller,
    record: InstanceRecord,
}

impl Fixture {
    /// A catalog FDU with one instance whose actual record is `status`,
    /// and no agent behind it.
    async fn new(policy: WaitPolicy, status: FduStatus) -> Self {
        let log = test_logger();
        let store = Arc::new(MemoryStore::new(&log));
        let scheme = PathScheme::new("0", "0").unwrap();
        let controller = Controller::new(store.clone(), scheme, policy, &log);

        let fdu = native_fdu("scripted");
        controller.onboard(&fdu).await.unwrap();
        let (node, instance) = (Uuid::new_v4(), Uuid::new_v4());
        let record = InstanceRecord::new(&fdu, node, instance, status, 1);
        let registry = controller.registry();
        registry.put_instance(Namespace::Desired, &record).await.unwrap();
        registry.put_instance(Namespace::Actual, &record).await.unwrap();

        Self { store, controller, record }
    }

    fn key(&self) -> InstanceKey {
        InstanceKey::of(&self.record)
    }

    async fn put_actual(&self, record: &InstanceRecord) {
        self.controller
            .registry()
            .put_instance(Namespace::Actual, record)
            .await
            .unwrap();
    }

    /// Answers every desired write after `delay` with whatever `reply`
    /// returns: a record to publish as actual, or `None` to remove it.
    async fn respond<F>(&self, delay: Duration, reply: F) -> JoinHandle<()>
    where
        F: Fn(InstanceRecord) -> Option<InstanceRecord> + Send + 'static,
    {
        let registry = self.controller.registry().clone();
        let key = self.key();
        let path = registry.scheme().instance(Namespace::Desired, key);
        let mut sub = registry.store().subscribe(&path).await.unwrap();
        tokio::spawn(async move {
            while let Some(change) = sub.recv().await {
                let Some(value) = change.value else { continue };
                let desired: InstanceRecord =
                    decode(&change.path, value).unwrap();
                tokio::time::sleep(delay).await;
                match reply(desired) {
                    Some(actual) => registry
                        .put_instance(Namespace::Actual, &actual)
                        .await
                        .unwrap(),
                    None => registry
                        .remove_instance(Namespace::Actual, key)
                        .await
                        .unwrap(),
                }
            }
        })
    }
}

#[tokio::test]
async fn settles_when_the_node_reports_the_target() {
    let fx = Fixture::new(test_policy(), FduStatus::Configure).await;
    let responder = fx.respond(Duration::from_millis(50), Some).await;

    fx.controller.run(fx.record.uuid).await.unwrap();
    let actual = fx.controller.instance_info(fx.record.uuid).await.unwrap();
    assert_eq!(actual.status, FduStatus::Run);
    assert_eq!(actual.generation, 2);

    responder.abort();
}

#[tokio::test]
async fn node_errors_are_returned_verbatim() {
    let fx = Fixture::new(test_policy(), FduStatus::Configure).await;
    let responder = fx
        .respond(Duration::from_millis(10), |desired| {
            Some(InstanceRecord {
                status: FduStatus::Error,
                error_code: Some(17),
                error_msg: Some("image unreachable".to_string()),
                ..desired
            })
        })
        .await;

    match fx.controller.run(fx.record.uuid).await {
        Err(ControllerError::Remote { code, message }) => {
            assert_eq!(code, 17);
            assert_eq!(message, "image unreachable");
        }
        other => panic!("unexpected result: {other:?}"),
    }

    responder.abort();
}

#[tokio::test]
async fn silent_nodes_time_out() {
    let policy = WaitPolicy {
        timeout: Some(Duration::from_millis(100)),
        poll_interval: Duration::from_millis(20),
    };
    let fx = Fixture::new(policy, FduStatus::Configure).await;

    match fx.controller.run(fx.record.uuid).await {
        Err(ControllerError::Timeout { instance, target, timeout }) => {
            assert_eq!(instance, fx.record.uuid);
            assert_eq!(target, FduStatus::Run.to_string());
            assert_eq!(timeout, Duration::from_millis(100));
        }
        other => panic!("unexpected result: {other:?}"),
    }

    // The intent stays in place for the node to pick up later.
    let desired = fx
        .controller
        .registry()
        .get_instance(Namespace::Desired, fx.key())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(desired.status, FduStatus::Run);
}

#[tokio::test]
async fn waits_stop_on_cancellation() {
    let policy = WaitPolicy { timeout: None, ..test_policy() };
    let fx = Fixture::new(policy, FduStatus::Configure).await;
    let token = CancellationToken::new();
    let controller = fx.controller.with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    assert!(matches!(
        controller.run(fx.record.uuid).await,
        Err(ControllerError::Cancelled)
    ));
    canceller.await.unwrap();
}

#[tokio::test]
async fn falls_back_to_polling_when_the_subscription_drops() {
    let fx = Fixture::new(test_policy(), FduStatus::Configure).await;

    let store = fx.store.clone();
    let registry = fx.controller.registry().clone();
    let running = InstanceRecord {
        status: FduStatus::Run,
        generation: 2,
        ..fx.record.clone()
    };
    let late = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        store.disconnect_subscribers();
        tokio::time::sleep(Duration::from_millis(30)).await;
        registry.put_instance(Namespace::Actual, &running).await.unwrap();
    });

    fx.controller.run(fx.record.uuid).await.unwrap();
    late.await.unwrap();
}

#[tokio::test]
async fn stale_errors_do_not_end_a_removal() {
    let fx = Fixture::new(test_policy(), FduStatus::Configure).await;
    let failed = InstanceRecord {
        status: FduStatus::Error,
        error_code: Some(5),
        error_msg: Some("crashed".to_string()),
        ..fx.record.clone()
    };
    fx.put_actual(&failed).await;

    // The stale ERROR is already visible when the wait starts; only the
    // removal that answers the UNDEFINE may end it.
    let responder = fx.respond(Duration::from_millis(50), |_| None).await;
    fx.controller.undefine(fx.record.uuid).await.unwrap();

    let found = fx.controller.find_instance(fx.record.uuid).await.unwrap();
    assert!(found.is_none());
    let scheme = fx.controller.registry().scheme();
    let desired = scheme.instance(Namespace::Desired, fx.key());
    assert!(fx.store.get(&desired).await.unwrap().is_none());

    responder.abort();
}

#[tokio::test]
async fn generations_advance_past_both_namespaces() {
    let fx = Fixture::new(test_policy(), FduStatus::Configure).await;
    // A desired write the node never answered.
    let pending = InstanceRecord {
        status: FduStatus::Run,
        generation: 4,
        ..fx.record.clone()
    };
    fx.controller
        .registry()
        .put_instance(Namespace::Desired, &pending)
        .await
        .unwrap();

    let responder = fx.respond(Duration::from_millis(10), Some).await;
    fx.controller.run(fx.record.uuid).await.unwrap();
    assert_eq!(
        fx.controller.instance_info(fx.record.uuid).await.unwrap().generation,
        5
    );

    responder.abort();
}
