//! End-to-end hub flows against a scripted in-memory connector. Real TCP is
//! only used where the hub probes reachability, via loopback listeners.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

use tuya_doorbell::{
    Connector, DeviceConfig, DeviceIdentity, DeviceValue, DomainEventKind, DoorbellError,
    DpId, DpSubscriber, DpsSnapshot, FirmwareVersion, HashStore, Hub, HubRegistry, PushEvent,
    Result, Session, dp_definitions,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct MockState {
    dps: DpsSnapshot,
    /// Whether writes are reflected back in subsequent status calls.
    apply_writes: bool,
    set_calls: Vec<(DpId, DeviceValue)>,
    bulk_calls: usize,
    status_calls: usize,
    get_calls: usize,
    connects: usize,
    closes: usize,
    fail_next_connects: usize,
    fail_next_status: usize,
    push_tx: Option<mpsc::Sender<PushEvent>>,
}

#[derive(Clone)]
struct MockConnector {
    state: Arc<Mutex<MockState>>,
    live_sessions: Arc<AtomicUsize>,
    max_live: Arc<AtomicUsize>,
}

impl MockConnector {
    fn new(state: MockState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            live_sessions: Arc::new(AtomicUsize::new(0)),
            max_live: Arc::new(AtomicUsize::new(0)),
        }
    }

    async fn push(&self, event: PushEvent) {
        let tx = self.state.lock().push_tx.clone().expect("no open session");
        tx.send(event).await.expect("push channel closed");
    }
}

struct MockSession {
    state: Arc<Mutex<MockState>>,
    live_sessions: Arc<AtomicUsize>,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.live_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Session for MockSession {
    async fn status(&mut self) -> Result<DpsSnapshot> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        if state.fail_next_status > 0 {
            state.fail_next_status -= 1;
            return Err(DoorbellError::Authentication);
        }
        Ok(state.dps.clone())
    }

    async fn get_dp(&mut self, dp: DpId) -> Result<Option<DeviceValue>> {
        let mut state = self.state.lock();
        state.get_calls += 1;
        Ok(state.dps.get(&dp).cloned())
    }

    async fn set_dp(&mut self, dp: DpId, value: &DeviceValue) -> Result<()> {
        let mut state = self.state.lock();
        state.set_calls.push((dp, value.clone()));
        if state.apply_writes {
            state.dps.insert(dp, value.clone());
        }
        Ok(())
    }

    async fn set_dps(&mut self, dps: &DpsSnapshot) -> Result<()> {
        let mut state = self.state.lock();
        state.bulk_calls += 1;
        if state.apply_writes {
            for (dp, value) in dps {
                state.dps.insert(*dp, value.clone());
            }
        }
        Ok(())
    }

    async fn heartbeat(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(self) {
        self.state.lock().closes += 1;
    }
}

impl Connector for MockConnector {
    type Session = MockSession;

    async fn connect(
        &self,
        _host: &str,
        _port: u16,
        _identity: &DeviceIdentity,
        push_tx: mpsc::Sender<PushEvent>,
    ) -> Result<MockSession> {
        {
            let mut state = self.state.lock();
            state.connects += 1;
            if state.fail_next_connects > 0 {
                state.fail_next_connects -= 1;
                return Err(DoorbellError::ConnectionFailed);
            }
            state.push_tx = Some(push_tx);
        }
        let live = self.live_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(MockSession {
            state: Arc::clone(&self.state),
            live_sessions: Arc::clone(&self.live_sessions),
        })
    }
}

struct RecordingSubscriber {
    dp: DpId,
    seen: Mutex<Vec<DeviceValue>>,
}

impl RecordingSubscriber {
    fn new(dp: DpId) -> Arc<Self> {
        Arc::new(Self {
            dp,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

impl DpSubscriber for RecordingSubscriber {
    fn dp(&self) -> DpId {
        self.dp
    }

    fn on_update(&self, value: &DeviceValue) {
        self.seen.lock().push(value.clone());
    }
}

/// A hub whose configured host is a live loopback listener, so the
/// reachability probe passes. Returns the listener to keep the port open.
async fn reachable_hub(connector: MockConnector, firmware: FirmwareVersion) -> (Hub<MockConnector>, TcpListener) {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let mut config = DeviceConfig::new("bf0testdevice", "0123456789abcdef")
        .with_host("127.0.0.1")
        .with_firmware(firmware);
    config.endpoint.port = port;
    let hub = Hub::new(config, connector, HashStore::ephemeral());
    (hub, listener)
}

#[tokio::test]
async fn connect_runs_initial_sweep_and_emits_connected() {
    let mut state = MockState::default();
    state.dps.insert(DpId(101), DeviceValue::Bool(true));
    let connector = MockConnector::new(state);
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;

    let mut events = hub.subscribe();
    hub.connect().await.unwrap();

    assert!(hub.is_connected());
    assert_eq!(hub.last_known_host().as_deref(), Some("127.0.0.1"));

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.kind,
        DomainEventKind::Connected {
            host: "127.0.0.1".into()
        }
    );

    // One bulk status plus a per-DP query for every catalog DP the
    // snapshot omitted.
    let catalog_size = dp_definitions(FirmwareVersion::V4).len();
    let state = connector.state.lock();
    assert_eq!(state.status_calls, 1);
    assert_eq!(state.get_calls, catalog_size - 1);
}

#[tokio::test]
async fn duplicate_updates_are_dropped() {
    let connector = MockConnector::new(MockState::default());
    let config = DeviceConfig::new("bf0testdevice", "key");
    let hub = Hub::new(config, connector, HashStore::ephemeral());

    let subscriber = RecordingSubscriber::new(DpId(101));
    hub.register_entity(subscriber.clone());

    let a = DeviceValue::from(json!({"x": 1, "y": 2}));
    let reordered = DeviceValue::from(json!({"y": 2, "x": 1}));
    let changed = DeviceValue::from(json!({"x": 1, "y": 3}));

    hub.handle_dp_update(DpId(101), a).await;
    hub.handle_dp_update(DpId(101), reordered).await;
    hub.handle_dp_update(DpId(101), changed).await;

    assert_eq!(subscriber.count(), 2);
}

#[tokio::test]
async fn registration_is_idempotent_and_removable() {
    let connector = MockConnector::new(MockState::default());
    let hub = Hub::new(
        DeviceConfig::new("bf0testdevice", "key"),
        connector,
        HashStore::ephemeral(),
    );

    let subscriber = RecordingSubscriber::new(DpId(101));
    hub.register_entity(subscriber.clone());
    hub.register_entity(subscriber.clone());
    hub.handle_dp_update(DpId(101), DeviceValue::Bool(true)).await;
    assert_eq!(subscriber.count(), 1);

    let dyn_sub: Arc<dyn DpSubscriber> = subscriber.clone();
    hub.unregister_entity(&dyn_sub);
    hub.handle_dp_update(DpId(101), DeviceValue::Bool(false)).await;
    assert_eq!(subscriber.count(), 1);
}

#[tokio::test]
async fn button_push_decodes_payload_and_fires_event() {
    let connector = MockConnector::new(MockState::default());
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;

    hub.connect().await.unwrap();
    let mut events = hub.subscribe();

    // base64 of {"foo": 1} on the default button DP
    let mut dps = DpsSnapshot::new();
    dps.insert(DpId(185), DeviceValue::Str("eyJmb28iOiAxfQ==".into()));
    connector.push(PushEvent::Status(dps)).await;

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event.kind {
        DomainEventKind::ButtonPressed {
            dp,
            payload,
            image_url,
            decoded_by,
        } => {
            assert_eq!(dp, DpId(185));
            assert_eq!(payload, json!({"foo": 1}));
            assert_eq!(image_url, None);
            assert_eq!(decoded_by, "base64_json");
        }
        other => panic!("expected button event, got {:?}", other),
    }
}

#[tokio::test]
async fn motion_push_extracts_image_url() {
    let connector = MockConnector::new(MockState::default());
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;

    hub.connect().await.unwrap();
    let mut events = hub.subscribe();

    let payload = json!({"bucket": "ty-us-storage30-pic", "files": [["/snap/m1.jpg", "k"]]});
    let mut dps = DpsSnapshot::new();
    dps.insert(DpId(115), DeviceValue::from(payload));
    connector.push(PushEvent::Status(dps)).await;

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    match event.kind {
        DomainEventKind::MotionDetected { image_url, .. } => {
            assert_eq!(
                image_url.as_deref(),
                Some("https://ty-us-storage30-pic.oss-us-west-1.aliyuncs.com/snap/m1.jpg")
            );
        }
        other => panic!("expected motion event, got {:?}", other),
    }
}

#[tokio::test]
async fn set_dp_verifies_by_polling() {
    let mut state = MockState::default();
    state.apply_writes = true;
    let connector = MockConnector::new(state);
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;
    hub.connect().await.unwrap();

    assert!(hub.set_dp(DpId(134), DeviceValue::Bool(true)).await);

    let state = connector.state.lock();
    assert_eq!(state.set_calls, vec![(DpId(134), DeviceValue::Bool(true))]);
    // Initial sweep plus at least one verification poll
    assert!(state.status_calls >= 2);
    assert_eq!(state.bulk_calls, 0);
}

#[tokio::test]
async fn duplicate_commands_are_suppressed() {
    let mut state = MockState::default();
    state.apply_writes = true;
    let connector = MockConnector::new(state);
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;
    hub.connect().await.unwrap();

    assert!(hub.set_dp(DpId(134), DeviceValue::Bool(true)).await);
    assert!(hub.set_dp(DpId(134), DeviceValue::Bool(true)).await);

    assert_eq!(connector.state.lock().set_calls.len(), 1);
}

#[tokio::test]
async fn momentary_command_skips_verification() {
    let connector = MockConnector::new(MockState::default());
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V5).await;
    hub.connect().await.unwrap();
    let polls_after_connect = connector.state.lock().status_calls;

    // 155 bell_pairing is momentary on firmware 5
    assert!(hub.set_dp(DpId(155), DeviceValue::Bool(true)).await);

    let state = connector.state.lock();
    assert_eq!(state.set_calls.len(), 1);
    assert_eq!(state.status_calls, polls_after_connect);
}

#[tokio::test]
async fn failed_command_stays_retryable() {
    let mut state = MockState::default();
    state.apply_writes = true;
    let connector = MockConnector::new(state);
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;

    // No session yet: the retry must fail too, not be swallowed by
    // duplicate suppression.
    assert!(!hub.set_dp(DpId(134), DeviceValue::Bool(true)).await);
    assert!(!hub.set_dp(DpId(134), DeviceValue::Bool(true)).await);
    assert!(connector.state.lock().set_calls.is_empty());

    // Once connected the very same command goes out.
    hub.connect().await.unwrap();
    assert!(hub.set_dp(DpId(134), DeviceValue::Bool(true)).await);
    assert_eq!(connector.state.lock().set_calls.len(), 1);
}

#[tokio::test]
async fn rejected_candidate_session_is_closed() {
    let mut state = MockState::default();
    state.fail_next_status = 1;
    let connector = MockConnector::new(state);
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;

    assert!(hub.connect().await.is_err());
    assert!(!hub.is_connected());
    assert_eq!(connector.state.lock().closes, 1);
    assert_eq!(connector.live_sessions.load(Ordering::SeqCst), 0);
    hub.shutdown().await;
}

#[tokio::test]
async fn push_disconnect_tears_down_session() {
    let connector = MockConnector::new(MockState::default());
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;

    let mut events = hub.subscribe();
    hub.connect().await.unwrap();
    // Drain the connected event
    timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();

    connector
        .push(PushEvent::Disconnected {
            reason: Some("device rebooted".into()),
        })
        .await;

    let event = timeout(Duration::from_secs(2), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event.kind,
        DomainEventKind::Disconnected {
            reason: Some("device rebooted".into())
        }
    );

    for _ in 0..50 {
        if !hub.is_connected() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert!(!hub.is_connected());
    assert_eq!(connector.live_sessions.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rediscovers_device_via_subnet_scan() {
    init_logging();
    let connector = MockConnector::new(MockState::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Configured host refuses; the /30 sweep finds the listener on .1
    let mut config = DeviceConfig::new("bf0testdevice", "key")
        .with_host("127.0.0.3")
        .with_subnet("127.0.0.0/30");
    config.endpoint.port = port;
    let hub = Hub::new(config, connector.clone(), HashStore::ephemeral());

    hub.connect().await.unwrap();
    assert!(hub.is_connected());
    assert_eq!(hub.last_known_host().as_deref(), Some("127.0.0.1"));
}

#[tokio::test]
async fn at_most_one_session_under_concurrent_connects() {
    let connector = MockConnector::new(MockState::default());
    let (hub, _listener) = reachable_hub(connector.clone(), FirmwareVersion::V4).await;

    let (a, b) = tokio::join!(hub.connect(), hub.connect());
    a.unwrap();
    b.unwrap();
    // Another connect on an already-connected hub is a no-op
    hub.connect().await.unwrap();

    assert_eq!(connector.max_live.load(Ordering::SeqCst), 1);
    assert_eq!(connector.state.lock().connects, 1);
}

#[tokio::test]
async fn registry_lifecycle() {
    let connector = MockConnector::new(MockState::default());
    let registry = HubRegistry::new(connector);

    let hub = registry
        .create(
            "entry-1",
            DeviceConfig::new("bf0testdevice", "key"),
            HashStore::ephemeral(),
        )
        .unwrap();
    assert_eq!(registry.get("entry-1").unwrap().device_id(), hub.device_id());

    let dup = registry.create(
        "entry-1",
        DeviceConfig::new("bf0other", "key"),
        HashStore::ephemeral(),
    );
    assert!(matches!(dup, Err(DoorbellError::DuplicateHub(_))));

    registry.remove("entry-1").await.unwrap();
    assert!(matches!(
        registry.get("entry-1"),
        Err(DoorbellError::HubNotFound(_))
    ));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn dedup_survives_restart_via_store() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hashes.json");

    let connector = MockConnector::new(MockState::default());
    let hub = Hub::new(
        DeviceConfig::new("bf0testdevice", "key"),
        connector.clone(),
        HashStore::load(&path).await,
    );
    let value = DeviceValue::Str("eyJmb28iOiAxfQ==".into());
    hub.handle_dp_update(DpId(185), value.clone()).await;
    hub.shutdown().await;

    // A new hub over the same store treats the replayed report as seen.
    let hub = Hub::new(
        DeviceConfig::new("bf0testdevice", "key"),
        connector,
        HashStore::load(&path).await,
    );
    let subscriber = RecordingSubscriber::new(DpId(185));
    hub.register_entity(subscriber.clone());
    hub.handle_dp_update(DpId(185), value).await;
    assert_eq!(subscriber.count(), 0);
}
