//! Integration tests for the databroker client.
//!
//! These tests connect to an in-process broker and exercise the connection
//! facade end to end: subscription sharing, replay, tree aggregation and the
//! disconnect lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use databroker_client::{
    BrokerError, Connection, ConnectivityState, Connector, MemoryBroker, NodeListener,
    PathListener, Transport,
};
use databroker_core::{
    Branch, ConnectorConfig, DataPoint, DataType, EntryType, EntryUpdate, Field, Leaf,
    MemoryStore, SignalNode, SignalPath,
};
use databroker_protocol::{StatusCode, TransportError};

fn path(s: &str) -> SignalPath {
    SignalPath::new(s).unwrap()
}

/// The tree declared by every test broker.
fn vehicle_tree() -> SignalNode {
    Branch::new(
        path("Vehicle"),
        vec![
            Leaf::new(path("Vehicle.Speed"), DataType::Float, EntryType::Sensor).into(),
            body_tree(),
        ],
    )
    .into()
}

fn body_tree() -> SignalNode {
    Branch::new(
        path("Vehicle.Body"),
        vec![
            Leaf::new(path("Vehicle.Body.Horn"), DataType::Bool, EntryType::Actuator).into(),
            Leaf::new(path("Vehicle.Body.Mirror"), DataType::Uint32, EntryType::Actuator).into(),
            Leaf::new(path("Vehicle.Body.Roof"), DataType::String, EntryType::Attribute).into(),
        ],
    )
    .into()
}

fn test_broker() -> MemoryBroker {
    let mut store = MemoryStore::new();
    store.declare_tree(&vehicle_tree());
    MemoryBroker::new(store)
}

fn fast_config() -> ConnectorConfig {
    ConnectorConfig::default()
        .with_timeout(Duration::from_secs(1))
        .with_poll_interval(Duration::from_millis(10))
}

/// Connect to `broker` with a short timeout.
async fn connect(broker: &Arc<MemoryBroker>) -> Connection {
    Connector::new(broker.clone())
        .with_config(fast_config())
        .connect()
        .await
        .expect("Failed to connect")
}

/// Give pump tasks time to deliver or wind down.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Poll `condition` until it holds or two seconds have passed.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[derive(Default)]
struct RecordingListener {
    updates: Mutex<Vec<Vec<EntryUpdate>>>,
    errors: Mutex<Vec<BrokerError>>,
}

impl RecordingListener {
    fn update_count(&self) -> usize {
        self.updates.lock().unwrap().len()
    }

    fn error_count(&self) -> usize {
        self.errors.lock().unwrap().len()
    }

    fn last_value(&self) -> Option<DataPoint> {
        let updates = self.updates.lock().unwrap();
        updates.last()?.last()?.entry.value.clone()
    }
}

impl PathListener for RecordingListener {
    fn on_entry_changed(&self, updates: &[EntryUpdate]) {
        self.updates.lock().unwrap().push(updates.to_vec());
    }

    fn on_error(&self, error: &BrokerError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

#[derive(Default)]
struct RecordingNodeListener {
    nodes: Mutex<Vec<SignalNode>>,
    errors: Mutex<Vec<BrokerError>>,
}

impl RecordingNodeListener {
    fn node_count(&self) -> usize {
        self.nodes.lock().unwrap().len()
    }
}

impl NodeListener for RecordingNodeListener {
    fn on_node_changed(&self, node: &SignalNode) {
        self.nodes.lock().unwrap().push(node.clone());
    }

    fn on_error(&self, error: &BrokerError) {
        self.errors.lock().unwrap().push(error.clone());
    }
}

fn leaf_value(node: &SignalNode, p: &str) -> DataPoint {
    match node.find(&path(p)) {
        Some(SignalNode::Leaf(leaf)) => leaf.value.clone(),
        other => panic!("expected a leaf at {p}, found {other:?}"),
    }
}

#[tokio::test]
async fn test_write_and_read_leaf() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;

    let response = connection
        .write(&path("Vehicle.Speed"), &[Field::Value], &DataPoint::Float(42.5))
        .await
        .unwrap();
    assert!(response.is_success());

    let response = connection
        .read(&path("Vehicle.Speed"), &[Field::Value])
        .await
        .unwrap();
    assert_eq!(response.entries.len(), 1);
    assert_eq!(response.entries[0].value, Some(DataPoint::Float(42.5)));
}

#[tokio::test]
async fn test_write_actuator_target_and_value() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let horn = path("Vehicle.Body.Horn");

    let response = connection
        .write(&horn, &[Field::Value, Field::ActuatorTarget], &DataPoint::Bool(true))
        .await
        .unwrap();
    assert!(response.is_success());
    assert_eq!(
        broker.value(&horn, Field::ActuatorTarget).await,
        Some(DataPoint::Bool(true))
    );

    let response = connection
        .write(&horn, &[Field::Value], &DataPoint::Uint32(1))
        .await
        .unwrap();
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].error.reason, "type_mismatch");
}

#[tokio::test]
async fn test_same_listener_is_registered_once() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let speed = path("Vehicle.Speed");
    let listener = Arc::new(RecordingListener::default());

    connection
        .subscribe(&speed, Field::Value, listener.clone())
        .await
        .unwrap();
    connection
        .subscribe(&speed, Field::Value, listener.clone())
        .await
        .unwrap();
    assert_eq!(broker.streams_opened(), 1);

    broker
        .publish(&speed, Field::Value, DataPoint::Float(10.0))
        .await
        .unwrap();
    assert!(eventually(|| listener.update_count() == 1).await);
    settle().await;
    assert_eq!(listener.update_count(), 1);
}

#[tokio::test]
async fn test_listeners_share_one_stream() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let speed = path("Vehicle.Speed");
    let listeners: Vec<Arc<RecordingListener>> =
        (0..3).map(|_| Arc::new(RecordingListener::default())).collect();

    for listener in &listeners {
        connection
            .subscribe(&speed, Field::Value, listener.clone())
            .await
            .unwrap();
    }
    assert_eq!(broker.streams_opened(), 1);
    assert_eq!(connection.subscription_count().await, 1);

    broker
        .publish(&speed, Field::Value, DataPoint::Float(20.0))
        .await
        .unwrap();
    for listener in &listeners {
        assert!(eventually(|| listener.update_count() == 1).await);
    }

    connection
        .unsubscribe(&speed, Field::Value, &*listeners[0])
        .await;
    connection
        .unsubscribe(&speed, Field::Value, &*listeners[1])
        .await;
    assert_eq!(connection.subscription_count().await, 1);
    assert_eq!(broker.open_stream_count(), 1);

    connection
        .unsubscribe(&speed, Field::Value, &*listeners[2])
        .await;
    assert_eq!(connection.subscription_count().await, 0);
    assert!(eventually(|| broker.open_stream_count() == 0).await);
}

#[tokio::test]
async fn test_fields_are_separate_subscriptions() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let horn = path("Vehicle.Body.Horn");
    let listener = Arc::new(RecordingListener::default());

    connection
        .subscribe(&horn, Field::Value, listener.clone())
        .await
        .unwrap();
    connection
        .subscribe(&horn, Field::ActuatorTarget, listener.clone())
        .await
        .unwrap();
    assert_eq!(connection.subscription_count().await, 2);
    assert_eq!(broker.streams_opened(), 2);
}

#[tokio::test]
async fn test_late_listener_receives_last_update() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let speed = path("Vehicle.Speed");

    let first = Arc::new(RecordingListener::default());
    connection
        .subscribe(&speed, Field::Value, first.clone())
        .await
        .unwrap();
    broker
        .publish(&speed, Field::Value, DataPoint::Float(30.0))
        .await
        .unwrap();
    assert!(eventually(|| first.update_count() == 1).await);

    let second = Arc::new(RecordingListener::default());
    connection
        .subscribe(&speed, Field::Value, second.clone())
        .await
        .unwrap();
    assert_eq!(second.update_count(), 1);
    assert_eq!(second.last_value(), Some(DataPoint::Float(30.0)));
    assert_eq!(first.update_count(), 1);
}

#[tokio::test]
async fn test_late_listener_receives_last_error() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let speed = path("Vehicle.Speed");

    let first = Arc::new(RecordingListener::default());
    connection
        .subscribe(&speed, Field::Value, first.clone())
        .await
        .unwrap();
    broker.fail_streams(&speed, TransportError::unavailable("io exception"));
    assert!(eventually(|| first.error_count() == 1).await);

    let second = Arc::new(RecordingListener::default());
    connection
        .subscribe(&speed, Field::Value, second.clone())
        .await
        .unwrap();
    assert_eq!(second.error_count(), 1);
    assert_eq!(second.update_count(), 0);

    let error = second.errors.lock().unwrap()[0].clone();
    assert_eq!(
        error.transport_error().map(|err| err.code),
        Some(StatusCode::Unavailable)
    );
}

#[tokio::test]
async fn test_subscribe_unknown_path_reports_error() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let listener = Arc::new(RecordingListener::default());

    connection
        .subscribe(&path("Vehicle.Cabin.Light"), Field::Value, listener.clone())
        .await
        .unwrap();
    assert!(eventually(|| listener.error_count() == 1).await);
}

#[tokio::test]
async fn test_unsubscribe_unknown_key_is_noop() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let listener = RecordingListener::default();

    connection
        .unsubscribe(&path("Vehicle.Speed"), Field::Value, &listener)
        .await;
    assert_eq!(connection.subscription_count().await, 0);
}

#[tokio::test]
async fn test_node_listener_waits_for_every_leaf() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let body = body_tree();
    let listener = Arc::new(RecordingNodeListener::default());

    connection
        .subscribe_node(&body, Field::Value, listener.clone())
        .await
        .unwrap();
    assert_eq!(connection.subscription_count().await, 3);

    broker
        .publish(&path("Vehicle.Body.Horn"), Field::Value, DataPoint::Bool(true))
        .await
        .unwrap();
    broker
        .publish(&path("Vehicle.Body.Mirror"), Field::Value, DataPoint::Uint32(15))
        .await
        .unwrap();
    settle().await;
    assert_eq!(listener.node_count(), 0);

    broker
        .publish(
            &path("Vehicle.Body.Roof"),
            Field::Value,
            DataPoint::String("panorama".to_string()),
        )
        .await
        .unwrap();
    assert!(eventually(|| listener.node_count() == 1).await);

    broker
        .publish(&path("Vehicle.Body.Horn"), Field::Value, DataPoint::Bool(false))
        .await
        .unwrap();
    assert!(eventually(|| listener.node_count() == 2).await);

    let nodes = listener.nodes.lock().unwrap();
    assert_eq!(leaf_value(&nodes[1], "Vehicle.Body.Horn"), DataPoint::Bool(false));
    assert_eq!(leaf_value(&nodes[1], "Vehicle.Body.Mirror"), DataPoint::Uint32(15));
    assert_eq!(
        leaf_value(&nodes[1], "Vehicle.Body.Roof"),
        DataPoint::String("panorama".to_string())
    );
}

#[tokio::test]
async fn test_node_subscription_is_idempotent() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let body = body_tree();
    let listener = Arc::new(RecordingNodeListener::default());

    for _ in 0..2 {
        connection
            .subscribe_node(&body, Field::Value, listener.clone())
            .await
            .unwrap();
    }
    assert_eq!(broker.streams_opened(), 3);

    broker
        .publish(&path("Vehicle.Body.Horn"), Field::Value, DataPoint::Bool(true))
        .await
        .unwrap();
    broker
        .publish(&path("Vehicle.Body.Mirror"), Field::Value, DataPoint::Uint32(1))
        .await
        .unwrap();
    broker
        .publish(
            &path("Vehicle.Body.Roof"),
            Field::Value,
            DataPoint::String("steel".to_string()),
        )
        .await
        .unwrap();
    assert!(eventually(|| listener.node_count() == 1).await);
    settle().await;
    assert_eq!(listener.node_count(), 1);

    connection
        .unsubscribe_node(&body, Field::Value, &*listener)
        .await;
    assert_eq!(connection.subscription_count().await, 0);
}

#[tokio::test]
async fn test_read_node_folds_entries() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    broker
        .publish(&path("Vehicle.Speed"), Field::Value, DataPoint::Float(55.0))
        .await
        .unwrap();
    broker
        .publish(&path("Vehicle.Body.Mirror"), Field::Value, DataPoint::Uint32(7))
        .await
        .unwrap();

    let tree = vehicle_tree();
    let updated = connection.read_node(&tree, &[Field::Value]).await.unwrap();
    assert_eq!(leaf_value(&updated, "Vehicle.Speed"), DataPoint::Float(55.0));
    assert_eq!(leaf_value(&updated, "Vehicle.Body.Mirror"), DataPoint::Uint32(7));
    // Unset broker values reset the leaf to its type default
    assert_eq!(leaf_value(&updated, "Vehicle.Body.Horn"), DataPoint::Bool(false));
    // The input tree is unchanged
    assert_eq!(leaf_value(&tree, "Vehicle.Speed"), DataPoint::Float(0.0));
}

#[tokio::test]
async fn test_read_node_without_entries_returns_input() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let cabin: SignalNode = Branch::new(
        path("Vehicle.Cabin"),
        vec![Leaf::new(path("Vehicle.Cabin.Light"), DataType::Bool, EntryType::Actuator).into()],
    )
    .into();

    let result = connection.read_node(&cabin, &[Field::Value]).await.unwrap();
    assert_eq!(result, cabin);
}

#[tokio::test]
async fn test_write_node_continues_after_rejected_leaf() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;

    // The local model disagrees with the broker on the horn's type
    let body: SignalNode = Branch::new(
        path("Vehicle.Body"),
        vec![
            Leaf::new(path("Vehicle.Body.Horn"), DataType::String, EntryType::Actuator)
                .with_value(DataPoint::String("loud".to_string()))
                .unwrap()
                .into(),
            Leaf::new(path("Vehicle.Body.Mirror"), DataType::Uint32, EntryType::Actuator)
                .with_value(DataPoint::Uint32(9))
                .unwrap()
                .into(),
            Leaf::new(path("Vehicle.Body.Roof"), DataType::String, EntryType::Attribute)
                .with_value(DataPoint::String("glass".to_string()))
                .unwrap()
                .into(),
        ],
    )
    .into();

    let responses = connection.write_node(&body, &[Field::Value]).await.unwrap();
    assert_eq!(responses.len(), 3);
    let failed: Vec<_> = responses.iter().filter(|r| !r.is_success()).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].errors[0].path, path("Vehicle.Body.Horn"));
    assert_eq!(failed[0].errors[0].error.reason, "type_mismatch");

    assert_eq!(
        broker.value(&path("Vehicle.Body.Mirror"), Field::Value).await,
        Some(DataPoint::Uint32(9))
    );
    assert_eq!(
        broker.value(&path("Vehicle.Body.Roof"), Field::Value).await,
        Some(DataPoint::String("glass".to_string()))
    );
}

#[tokio::test]
async fn test_disconnect_cancels_subscriptions_and_notifies_once() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let listener = Arc::new(RecordingListener::default());
    connection
        .subscribe(&path("Vehicle.Speed"), Field::Value, listener.clone())
        .await
        .unwrap();
    connection
        .subscribe(&path("Vehicle.Body.Horn"), Field::Value, listener.clone())
        .await
        .unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let on_disconnect = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(connection.register_disconnect_listener(on_disconnect.clone()));
    assert!(!connection.register_disconnect_listener(on_disconnect.clone()));

    connection.disconnect();
    connection.disconnect();

    assert!(eventually(|| notified.load(Ordering::SeqCst) == 1).await);
    assert!(eventually(|| broker.open_stream_count() == 0).await);
    assert_eq!(connection.subscription_count().await, 0);
    assert_eq!(broker.connectivity_state(false), ConnectivityState::Shutdown);

    settle().await;
    assert_eq!(notified.load(Ordering::SeqCst), 1);
    assert_eq!(listener.update_count(), 0);
}

#[tokio::test]
async fn test_operations_fail_after_disconnect() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    connection.disconnect();
    assert!(!connection.is_connected());

    let speed = path("Vehicle.Speed");
    let err = connection.read(&speed, &[Field::Value]).await.unwrap_err();
    assert_eq!(err, BrokerError::Shutdown);

    let listener = Arc::new(RecordingListener::default());
    let err = connection
        .subscribe(&speed, Field::Value, listener.clone())
        .await
        .unwrap_err();
    assert_eq!(err, BrokerError::Shutdown);

    let err = connection
        .read_node(&vehicle_tree(), &[Field::Value])
        .await
        .unwrap_err();
    assert_eq!(err, BrokerError::Shutdown);

    connection
        .unsubscribe(&speed, Field::Value, &*listener)
        .await;
}

#[tokio::test]
async fn test_disconnect_refuses_subscriptions_before_teardown() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let listener = Arc::new(RecordingListener::default());
    connection
        .subscribe(&path("Vehicle.Speed"), Field::Value, listener.clone())
        .await
        .unwrap();

    connection.disconnect();
    let err = connection
        .subscribe(&path("Vehicle.Body.Horn"), Field::Value, listener.clone())
        .await
        .unwrap_err();
    assert_eq!(err, BrokerError::Shutdown);
    let err = connection
        .subscribe_node(&body_tree(), Field::Value, Arc::new(RecordingNodeListener::default()))
        .await
        .unwrap_err();
    assert_eq!(err, BrokerError::Shutdown);

    assert!(eventually(|| broker.open_stream_count() == 0).await);
    assert_eq!(connection.subscription_count().await, 0);
}

#[tokio::test]
async fn test_disconnect_listener_rejected_after_shutdown() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    connection.disconnect();

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let late = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert!(!connection.register_disconnect_listener(late.clone()));
    assert!(!connection.unregister_disconnect_listener(&*late));

    settle().await;
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lost_transport_rejects_late_disconnect_listener() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    broker.set_state(ConnectivityState::TransientFailure);
    assert!(eventually(|| broker.connectivity_state(false) == ConnectivityState::Shutdown).await);

    assert!(!connection.register_disconnect_listener(Arc::new(|| {})));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribe_and_unsubscribe_on_one_key() {
    let broker = Arc::new(test_broker());
    let connection = Arc::new(connect(&broker).await);
    let speed = path("Vehicle.Speed");

    for _ in 0..200 {
        let leaving = Arc::new(RecordingListener::default());
        let joining = Arc::new(RecordingListener::default());
        connection
            .subscribe(&speed, Field::Value, leaving.clone())
            .await
            .unwrap();

        let unsubscribe = tokio::spawn({
            let connection = connection.clone();
            let speed = speed.clone();
            async move {
                connection
                    .unsubscribe(&speed, Field::Value, &*leaving)
                    .await
            }
        });
        let subscribe = tokio::spawn({
            let connection = connection.clone();
            let speed = speed.clone();
            let joining = joining.clone();
            async move { connection.subscribe(&speed, Field::Value, joining).await }
        });
        unsubscribe.await.unwrap();
        subscribe.await.unwrap().unwrap();

        assert_eq!(connection.subscription_count().await, 1);

        connection
            .unsubscribe(&speed, Field::Value, &*joining)
            .await;
        assert_eq!(connection.subscription_count().await, 0);
    }

    assert!(eventually(|| broker.open_stream_count() == 0).await);
}

#[tokio::test]
async fn test_lost_transport_notifies_listeners() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;
    let listener = Arc::new(RecordingListener::default());
    connection
        .subscribe(&path("Vehicle.Speed"), Field::Value, listener.clone())
        .await
        .unwrap();

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    connection.register_disconnect_listener(Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    broker.set_state(ConnectivityState::TransientFailure);

    assert!(eventually(|| notified.load(Ordering::SeqCst) == 1).await);
    assert_eq!(broker.connectivity_state(false), ConnectivityState::Shutdown);
    assert_eq!(connection.subscription_count().await, 0);
    assert!(!connection.is_connected());
}

#[tokio::test]
async fn test_unregistered_disconnect_listener_is_not_notified() {
    let broker = Arc::new(test_broker());
    let connection = connect(&broker).await;

    let notified = Arc::new(AtomicUsize::new(0));
    let counter = notified.clone();
    let on_disconnect = Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    connection.register_disconnect_listener(on_disconnect.clone());
    assert!(connection.unregister_disconnect_listener(&*on_disconnect));

    connection.disconnect();
    settle().await;
    assert_eq!(notified.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_credentials_are_attached() {
    let broker = Arc::new(test_broker().with_required_token("secret-token"));
    let speed = path("Vehicle.Speed");

    let connection = Connector::new(broker.clone())
        .with_config(fast_config().with_token("secret-token"))
        .connect()
        .await
        .unwrap();
    assert!(connection.read(&speed, &[Field::Value]).await.is_ok());

    connection.set_credentials(None);
    let err = connection.read(&speed, &[Field::Value]).await.unwrap_err();
    assert_eq!(
        err.transport_error().map(|err| err.code),
        Some(StatusCode::Unauthenticated)
    );
}
