//! Per-device connection hub.
//!
//! One [`Hub`] owns the whole lifecycle of a single doorbell: host
//! resolution and subnet rediscovery, the (single) protocol session,
//! heartbeats, exponential-backoff reconnects, deduplicated datapoint
//! routing to entity adapters, verified commands and domain event fan-out.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_core::stream::Stream;
use log::{debug, error, info, warn};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

use crate::catalog::{DpId, dp_definition, dp_definitions};
use crate::config::{DeviceConfig, DeviceIdentity, DpsMap};
use crate::decode::{decode, extract_image_url};
use crate::entity::DpSubscriber;
use crate::error::{DoorbellError, Result};
use crate::event::{DomainEvent, DomainEventKind};
use crate::protocol::{Connector, DpsSnapshot, PushEvent, Session};
use crate::scanner::{REACHABILITY_TIMEOUT, SCAN_PROBE_TIMEOUT, probe_host, scan_subnet};
use crate::store::HashStore;
use crate::value::DeviceValue;

/// Initial reconnect delay.
pub const RECONNECT_BASE: Duration = Duration::from_secs(10);

/// Reconnect delay ceiling.
pub const RECONNECT_MAX: Duration = Duration::from_secs(300);

/// Two disconnects inside this window count as flapping and pre-double the
/// next delay.
const RAPID_DISCONNECT: Duration = Duration::from_secs(5);

/// Keep-alive cadence on an open session.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// Identical commands inside this window are suppressed.
const WRITE_SUPPRESS: Duration = Duration::from_secs(5);

const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Exponential backoff with jitter for reconnect scheduling.
struct ReconnectState {
    delay: Duration,
    last_disconnect: Option<Instant>,
}

impl ReconnectState {
    fn new() -> Self {
        Self {
            delay: RECONNECT_BASE,
            last_disconnect: None,
        }
    }

    fn clamp(d: Duration) -> Duration {
        d.clamp(RECONNECT_BASE, RECONNECT_MAX)
    }

    /// Note a disconnect. A second disconnect within [`RAPID_DISCONNECT`]
    /// doubles the delay before it is even used, so a flapping device backs
    /// off faster.
    fn on_disconnect(&mut self) {
        let now = Instant::now();
        if let Some(last) = self.last_disconnect
            && now.duration_since(last) < RAPID_DISCONNECT
        {
            self.delay = Self::clamp(self.delay * 2);
        }
        self.last_disconnect = Some(now);
    }

    /// Current delay to wait, advancing the series: the stored delay doubles
    /// with a +/-20% jitter factor, clamped to the ceiling.
    fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        let jitter: f64 = rand::rng().random_range(0.8..=1.2);
        self.delay = Self::clamp(self.delay.mul_f64(2.0 * jitter));
        current
    }

    fn reset(&mut self) {
        self.delay = RECONNECT_BASE;
    }
}

struct HubInner<C: Connector> {
    identity: DeviceIdentity,
    dps_map: DpsMap,
    endpoint: RwLock<crate::config::ConnectionEndpoint>,
    connector: C,

    /// At most one live session, ever.
    session: tokio::sync::Mutex<Option<C::Session>>,
    connected: AtomicBool,
    connecting: AtomicBool,
    reconnect_pending: AtomicBool,
    reconnect: Mutex<ReconnectState>,

    subscribers: RwLock<HashMap<DpId, Vec<Arc<dyn DpSubscriber>>>>,
    recent_writes: Mutex<HashMap<DpId, (String, Instant)>>,
    store: tokio::sync::Mutex<HashStore>,
    last_heartbeat: Mutex<Option<DateTime<Utc>>>,

    event_tx: broadcast::Sender<DomainEvent>,
    cancel: CancellationToken,
    /// Cancels the tasks tied to the current session only.
    session_cancel: Mutex<CancellationToken>,
}

/// Handle to one doorbell's connection hub. Cheap to clone.
pub struct Hub<C: Connector> {
    inner: Arc<HubInner<C>>,
}

impl<C: Connector> Clone for Hub<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connector> Hub<C> {
    pub fn new(config: DeviceConfig, connector: C, store: HashStore) -> Self {
        let (event_tx, _) = broadcast::channel(32);
        Self {
            inner: Arc::new(HubInner {
                identity: config.identity,
                dps_map: config.dps_map,
                endpoint: RwLock::new(config.endpoint),
                connector,
                session: tokio::sync::Mutex::new(None),
                connected: AtomicBool::new(false),
                connecting: AtomicBool::new(false),
                reconnect_pending: AtomicBool::new(false),
                reconnect: Mutex::new(ReconnectState::new()),
                subscribers: RwLock::new(HashMap::new()),
                recent_writes: Mutex::new(HashMap::new()),
                store: tokio::sync::Mutex::new(store),
                last_heartbeat: Mutex::new(None),
                event_tx,
                cancel: CancellationToken::new(),
                session_cancel: Mutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.inner.identity.device_id
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Time of the last successful keep-alive, for a connectivity sensor.
    pub fn last_heartbeat(&self) -> Option<DateTime<Utc>> {
        *self.inner.last_heartbeat.lock()
    }

    /// Address the device last answered on.
    pub fn last_known_host(&self) -> Option<String> {
        self.inner.endpoint.read().last_known_good.clone()
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Domain events as a stream. Slow consumers that lag the broadcast
    /// buffer skip ahead rather than erroring out.
    pub fn events(&self) -> impl Stream<Item = DomainEvent> + Send + 'static {
        let mut rx = self.inner.event_tx.subscribe();
        async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Event stream lagged, skipped {} event(s)", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    fn emit(&self, kind: DomainEventKind) {
        let _ = self
            .inner
            .event_tx
            .send(DomainEvent::now(&self.inner.identity.device_id, kind));
    }

    // -----------------------------------------------------------------------
    // Entity registration
    // -----------------------------------------------------------------------

    /// Register an adapter for its datapoint. Idempotent: registering the
    /// same adapter twice keeps a single membership.
    pub fn register_entity(&self, subscriber: Arc<dyn DpSubscriber>) {
        let mut map = self.inner.subscribers.write();
        let list = map.entry(subscriber.dp()).or_default();
        if !list.iter().any(|s| Arc::ptr_eq(s, &subscriber)) {
            list.push(subscriber);
        }
    }

    /// Remove an adapter. Unknown adapters are a no-op.
    pub fn unregister_entity(&self, subscriber: &Arc<dyn DpSubscriber>) {
        let mut map = self.inner.subscribers.write();
        if let Some(list) = map.get_mut(&subscriber.dp()) {
            list.retain(|s| !Arc::ptr_eq(s, subscriber));
            if list.is_empty() {
                map.remove(&subscriber.dp());
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Establish the session. Already-connected hubs and hubs with a
    /// connect already in flight no-op. Any failure schedules a backoff
    /// reconnect before returning the error.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() || self.inner.cancel.is_cancelled() {
            return Ok(());
        }
        if self.inner.connecting.swap(true, Ordering::SeqCst) {
            debug!("Connect already in flight for {}", self.device_id());
            return Ok(());
        }

        let result = self.connect_inner().await;
        self.inner.connecting.store(false, Ordering::SeqCst);

        if let Err(e) = &result {
            warn!("Connect failed for {}: {}", self.device_id(), e);
            self.inner.reconnect.lock().on_disconnect();
            self.schedule_reconnect();
        }
        result
    }

    async fn connect_inner(&self) -> Result<()> {
        let (port, configured) = {
            let endpoint = self.inner.endpoint.read();
            (endpoint.port, endpoint.candidates())
        };
        let mut candidates = Vec::new();
        for host in configured {
            if probe_host(&host, port, REACHABILITY_TIMEOUT).await {
                candidates.push(host);
            } else {
                debug!("{}:{} not reachable", host, port);
            }
        }

        // Nothing answered on the known addresses; sweep the subnet.
        if candidates.is_empty() {
            let subnet = self.inner.endpoint.read().subnet.clone();
            match subnet {
                Some(subnet) => {
                    info!(
                        "Rediscovering {} on subnet {}",
                        self.device_id(),
                        subnet
                    );
                    let found = scan_subnet(&subnet, port, SCAN_PROBE_TIMEOUT).await?;
                    candidates.extend(found.into_iter().map(|ip| ip.to_string()));
                }
                None => {
                    error!(
                        "Device {} unreachable and no subnet configured",
                        self.device_id()
                    );
                }
            }
        }

        if candidates.is_empty() {
            return Err(DoorbellError::NotFound);
        }

        // First candidate that passes protocol authentication wins. The
        // status call both proves the key is right and seeds initial state.
        let mut last_err = DoorbellError::NotFound;
        for host in candidates {
            match self.open_session(&host, port).await {
                Ok((session, snapshot, push_rx)) => {
                    return self.finish_connect(host, session, snapshot, push_rx).await;
                }
                Err(e) => {
                    debug!("Candidate {} rejected: {}", host, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn open_session(
        &self,
        host: &str,
        port: u16,
    ) -> Result<(C::Session, DpsSnapshot, mpsc::Receiver<PushEvent>)> {
        let (push_tx, push_rx) = mpsc::channel(64);
        let mut session = self
            .inner
            .connector
            .connect(host, port, &self.inner.identity, push_tx)
            .await?;
        match session.status().await {
            Ok(snapshot) => Ok((session, snapshot, push_rx)),
            Err(e) => {
                // Rejected candidates get a proper close, not just a drop.
                session.close().await;
                Err(e)
            }
        }
    }

    async fn finish_connect(
        &self,
        host: String,
        mut session: C::Session,
        snapshot: DpsSnapshot,
        push_rx: mpsc::Receiver<PushEvent>,
    ) -> Result<()> {
        // Catalog DPs the bulk snapshot omitted get an individual query.
        let firmware = self.inner.identity.firmware_version;
        let missing: Vec<DpId> = dp_definitions(firmware)
            .keys()
            .filter(|dp| !snapshot.contains_key(dp))
            .copied()
            .collect();
        let mut extra = Vec::new();
        for dp in missing {
            match session.get_dp(dp).await {
                Ok(Some(value)) => extra.push((dp, value)),
                Ok(None) => {}
                Err(e) => {
                    warn!("Initial query of dp {} failed: {}", dp, e);
                    break;
                }
            }
        }

        {
            let mut slot = self.inner.session.lock().await;
            *slot = Some(session);
        }
        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.reconnect.lock().reset();
        self.inner.endpoint.write().last_known_good = Some(host.clone());
        info!("Connected to {} at {}", self.device_id(), host);
        self.emit(DomainEventKind::Connected { host });

        let session_token = self.inner.cancel.child_token();
        *self.inner.session_cancel.lock() = session_token.clone();
        self.spawn_push_task(push_rx, session_token.clone());
        self.spawn_heartbeat_task(session_token);

        for (dp, value) in snapshot {
            self.handle_dp_update(dp, value).await;
        }
        for (dp, value) in extra {
            self.handle_dp_update(dp, value).await;
        }
        Ok(())
    }

    fn spawn_push_task(&self, mut push_rx: mpsc::Receiver<PushEvent>, token: CancellationToken) {
        let hub = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = push_rx.recv() => {
                        match event {
                            Some(PushEvent::Status(dps)) => {
                                for (dp, value) in dps {
                                    hub.handle_dp_update(dp, value).await;
                                }
                            }
                            Some(PushEvent::Disconnected { reason }) => {
                                hub.handle_disconnect(reason).await;
                                break;
                            }
                            None => {
                                hub.handle_disconnect(Some("push channel closed".into())).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Push task for {} exited", hub.device_id());
        });
    }

    fn spawn_heartbeat_task(&self, token: CancellationToken) {
        let hub = self.clone();
        tokio::spawn(async move {
            // Startup jitter so a fleet of hubs does not tick in lockstep.
            let jitter = Duration::from_millis(rand::rng().random_range(0..5000));
            let mut interval =
                tokio::time::interval_at(Instant::now() + HEARTBEAT_INTERVAL + jitter, HEARTBEAT_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let outcome = {
                            let mut slot = hub.inner.session.lock().await;
                            match slot.as_mut() {
                                Some(session) => session.heartbeat().await,
                                None => break,
                            }
                        };
                        match outcome {
                            Ok(()) => {
                                *hub.inner.last_heartbeat.lock() = Some(Utc::now());
                            }
                            Err(e) => {
                                warn!("Heartbeat failed for {}: {}", hub.device_id(), e);
                                hub.handle_disconnect(Some(e.to_string())).await;
                                break;
                            }
                        }
                    }
                }
            }
            debug!("Heartbeat task for {} exited", hub.device_id());
        });
    }

    async fn handle_disconnect(&self, reason: Option<String>) {
        if !self.inner.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.session_cancel.lock().cancel();
        if let Some(session) = self.inner.session.lock().await.take() {
            session.close().await;
        }
        info!(
            "Disconnected from {}: {}",
            self.device_id(),
            reason.as_deref().unwrap_or("unknown")
        );
        self.emit(DomainEventKind::Disconnected {
            reason: reason.clone(),
        });

        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.reconnect.lock().on_disconnect();
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        if self.inner.reconnect_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let delay = self.inner.reconnect.lock().next_delay();
        warn!(
            "Reconnecting to {} in {}s",
            self.device_id(),
            delay.as_secs()
        );

        let hub = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = hub.inner.cancel.cancelled() => {
                    hub.inner.reconnect_pending.store(false, Ordering::SeqCst);
                }
                _ = sleep(delay) => {
                    hub.inner.reconnect_pending.store(false, Ordering::SeqCst);
                    if hub.is_connected() {
                        // A stale timer racing a successful connect.
                        debug!("Reconnect timer for {} found hub connected", hub.device_id());
                    } else {
                        let _ = hub.connect().await;
                    }
                }
            }
        });
    }

    /// Stop the hub permanently: cancels all tasks and closes the session.
    pub async fn shutdown(&self) {
        info!("Shutting down hub for {}", self.device_id());
        self.inner.cancel.cancel();
        self.inner.connected.store(false, Ordering::SeqCst);
        if let Some(session) = self.inner.session.lock().await.take() {
            session.close().await;
        }
    }

    // -----------------------------------------------------------------------
    // Datapoint routing
    // -----------------------------------------------------------------------

    /// Route one DP update: dedup by content hash, persist, fan out to
    /// adapters and raise domain events for the mapped event DPs.
    pub async fn handle_dp_update(&self, dp: DpId, value: DeviceValue) {
        let hash = value.content_hash();
        {
            let mut store = self.inner.store.lock().await;
            if store.get(dp) == Some(hash.as_str()) {
                debug!("Duplicate update for dp {} dropped", dp);
                return;
            }
            store.insert(dp, hash);
            if let Err(e) = store.save().await {
                warn!("Persisting DP hashes failed: {}", e);
            }
        }

        // Copy-on-read snapshot: adapters may (un)register concurrently.
        let subscribers = self
            .inner
            .subscribers
            .read()
            .get(&dp)
            .cloned()
            .unwrap_or_default();
        for subscriber in &subscribers {
            subscriber.on_update(&value);
        }

        if dp == self.inner.dps_map.button {
            self.emit_activity(dp, &value, true);
        } else if dp == self.inner.dps_map.motion {
            self.emit_activity(dp, &value, false);
        } else if subscribers.is_empty() {
            debug!("Update for unmapped dp {} dropped (no subscribers)", dp);
        }
    }

    fn emit_activity(&self, dp: DpId, value: &DeviceValue, button: bool) {
        let (payload, strategy) = decode(value);
        let image_url = extract_image_url(&payload);
        info!(
            "{} event on {} (dp {}, decoded by {}, image: {})",
            if button { "Button" } else { "Motion" },
            self.device_id(),
            dp,
            strategy.as_str(),
            image_url.as_deref().unwrap_or("none")
        );
        let kind = if button {
            DomainEventKind::ButtonPressed {
                dp,
                payload,
                image_url,
                decoded_by: strategy.as_str().to_string(),
            }
        } else {
            DomainEventKind::MotionDetected {
                dp,
                payload,
                image_url,
                decoded_by: strategy.as_str().to_string(),
            }
        };
        self.emit(kind);
    }

    /// Query one DP and route the result like a push update.
    pub async fn refresh_dp(&self, dp: DpId) -> Result<()> {
        let value = {
            let mut slot = self.inner.session.lock().await;
            let session = slot.as_mut().ok_or(DoorbellError::Offline)?;
            session.get_dp(dp).await?
        };
        if let Some(value) = value {
            self.handle_dp_update(dp, value).await;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Send a command to one DP and verify it took effect. Returns `true`
    /// when the write was sent (and, for non-momentary DPs, verified or
    /// accepted optimistically after the retry ladder), `false` when the
    /// session was unusable.
    pub async fn set_dp(&self, dp: DpId, value: DeviceValue) -> bool {
        let hash = value.content_hash();
        {
            let writes = self.inner.recent_writes.lock();
            if let Some((last_hash, at)) = writes.get(&dp)
                && *last_hash == hash
                && at.elapsed() < WRITE_SUPPRESS
            {
                debug!("Suppressing duplicate command for dp {}", dp);
                return true;
            }
        }

        let momentary = dp_definition(self.inner.identity.firmware_version, dp)
            .map(|def| def.momentary)
            .unwrap_or(false);

        match self.send_and_verify(dp, &value, momentary).await {
            Ok(verified) => {
                // Only a command that actually went out suppresses repeats;
                // a failed send must stay retryable.
                self.inner
                    .recent_writes
                    .lock()
                    .insert(dp, (hash, Instant::now()));
                if !verified {
                    warn!(
                        "Command for dp {} on {} unverified, accepting optimistically",
                        dp,
                        self.device_id()
                    );
                }
                true
            }
            Err(e) => {
                error!("Command for dp {} on {} failed: {}", dp, self.device_id(), e);
                if e.is_connection_loss() {
                    self.handle_disconnect(Some(e.to_string())).await;
                }
                false
            }
        }
    }

    async fn send_and_verify(
        &self,
        dp: DpId,
        value: &DeviceValue,
        momentary: bool,
    ) -> Result<bool> {
        let mut slot = self.inner.session.lock().await;
        let session = slot.as_mut().ok_or(DoorbellError::Offline)?;

        session.set_dp(dp, value).await?;
        if momentary {
            // Self-reverting DPs never echo a stable state; trust the send.
            return Ok(true);
        }

        for attempt in 0..VERIFY_ATTEMPTS {
            sleep(VERIFY_BASE_DELAY * (attempt + 1)).await;
            let snapshot = session.status().await?;
            if snapshot
                .get(&dp)
                .map(|reported| reported.loosely_eq(value))
                .unwrap_or(false)
            {
                debug!("Command for dp {} verified on attempt {}", dp, attempt + 1);
                return Ok(true);
            }
        }

        // Last resort: re-issue as a bulk write, poll once more.
        debug!("Retrying dp {} as bulk write", dp);
        let mut dps = DpsSnapshot::new();
        dps.insert(dp, value.clone());
        session.set_dps(&dps).await?;
        sleep(VERIFY_BASE_DELAY).await;
        let snapshot = session.status().await?;
        Ok(snapshot
            .get(&dp)
            .map(|reported| reported.loosely_eq(value))
            .unwrap_or(false))
    }
}
