//! Device session with the Vwire broker.
//!
//! A [`Device`] owns one MQTT connection, the pin router and a [`Timer`].
//! Outbound operations are non-blocking and may be called from timer
//! callbacks or pin handlers.

use crate::config::{Config, DEFAULT_HTTP_SERVER, DEFAULT_SERVER};
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::router::{PinHandler, PinMessage, Router};
use crate::timer::Timer;
use crate::topic::{STATUS_OFFLINE, STATUS_ONLINE, Topics};
use crate::transport;
use crate::types::{ConnectionState, PinValue, QoS};
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing, Packet};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{Notify, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default time [`Device::connect`] waits for the broker.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout of reconnection attempts made by [`Device::run`].
const RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timer polling period of [`Device::run`].
const RUN_TICK: Duration = Duration::from_millis(10);

/// How long [`Device::disconnect`] waits for queued packets to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Disconnects closer together than this count as a burst.
const DISCONNECT_WINDOW: Duration = Duration::from_secs(10);

/// Capacity of the rumqttc request channel.
const REQUEST_CAPACITY: usize = 100;

const TOKEN_COLLISION_HINT: &str = "Hint: the broker allows one active connection per device \
token. If another device uses the same token it will kick this client. Create a separate \
device/token for each client.";

type Callback = Arc<dyn Fn() + Send + Sync>;

/// Alarm priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

/// Values outside `1..=3` are clamped: 0 becomes [`Priority::Normal`] and
/// anything above 3 becomes [`Priority::Critical`].
impl From<u8> for Priority {
    fn from(v: u8) -> Self {
        match v {
            0 | 1 => Priority::Normal,
            2 => Priority::High,
            _ => Priority::Critical,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AlarmPayload<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a str,
    alarm_id: String,
    sound: &'a str,
    priority: u8,
    timestamp: i64,
}

#[derive(Serialize)]
struct EmailPayload<'a> {
    subject: &'a str,
    body: &'a str,
}

/// Counts disconnects that happen in quick succession.
#[derive(Debug, Default)]
struct DisconnectWindow {
    last: Option<Instant>,
    count: u32,
}

impl DisconnectWindow {
    /// Records a disconnect and returns how many fell into the current burst.
    fn record(&mut self, now: Instant) -> u32 {
        self.count = match self.last {
            Some(last) if now.duration_since(last) <= DISCONNECT_WINDOW => self.count + 1,
            _ => 1,
        };
        self.last = Some(now);
        self.count
    }
}

struct Session {
    handle: JoinHandle<()>,
    shutdown_tx: broadcast::Sender<()>,
}

struct Inner {
    auth_token: String,
    config: Config,
    topics: Topics,
    router: Router,
    timer: Timer,
    state_tx: watch::Sender<ConnectionState>,
    client: Mutex<Option<AsyncClient>>,
    session: Mutex<Option<Session>>,
    last_error: Mutex<Option<String>>,
    reconnect_attempts: AtomicU32,
    disconnects: Mutex<DisconnectWindow>,
    closing: AtomicBool,
    stop_requested: AtomicBool,
    stop: Notify,
    on_connected: RwLock<Option<Callback>>,
    on_disconnected: RwLock<Option<Callback>>,
}

/// Vwire device client.
///
/// Cloning yields another handle to the same session.
///
/// ```no_run
/// use vwire::{Config, Device};
///
/// #[tokio::main]
/// async fn main() -> vwire::Result<()> {
///     let device = Device::new("auth-token", "VW-ABC123", Config::default());
///
///     device.on_virtual_receive(0, |msg| {
///         println!("V0 = {:?}", msg.as_str());
///         Ok(())
///     });
///
///     device.connect(vwire::DEFAULT_CONNECT_TIMEOUT).await?;
///     device.virtual_send(1, 25.5)?;
///     device.run().await
/// }
/// ```
#[derive(Clone)]
pub struct Device {
    inner: Arc<Inner>,
}

impl Device {
    /// Create a device client. Nothing is sent until [`Device::connect`].
    pub fn new(auth_token: impl Into<String>, device_id: impl Into<String>, config: Config) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let device = Self {
            inner: Arc::new(Inner {
                auth_token: auth_token.into(),
                config,
                topics: Topics::new(device_id),
                router: Router::new(),
                timer: Timer::new(),
                state_tx,
                client: Mutex::new(None),
                session: Mutex::new(None),
                last_error: Mutex::new(None),
                reconnect_attempts: AtomicU32::new(0),
                disconnects: Mutex::new(DisconnectWindow::default()),
                closing: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                stop: Notify::new(),
                on_connected: RwLock::new(None),
                on_disconnected: RwLock::new(None),
            }),
        };
        debug!("device client initialized: {}", device.inner.config);
        device
    }

    pub fn device_id(&self) -> &str {
        self.inner.topics.device_id()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    /// The built-in timer, driven by [`Device::run`].
    pub fn timer(&self) -> &Timer {
        &self.inner.timer
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Watch connection state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    // ========== Connection ==========

    /// Connect to the broker and wait for its acknowledgement.
    ///
    /// Once connected, lost connections are retried in the background every
    /// `reconnect_interval` seconds, up to `max_reconnect_attempts`.
    pub async fn connect(&self, timeout: Duration) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let mut state_rx = self.inner.state_tx.subscribe();
        self.inner.clone().start_session()?;
        info!(
            "connecting to {}:{}...",
            self.inner.config.server, self.inner.config.port
        );

        let outcome = tokio::time::timeout(
            timeout,
            state_rx.wait_for(|s| *s != ConnectionState::Connecting),
        )
        .await;

        match outcome {
            Ok(Ok(state)) if *state == ConnectionState::Connected => Ok(()),
            Ok(_) => {
                let reason = self
                    .inner
                    .last_error
                    .lock()
                    .take()
                    .unwrap_or_else(|| "connection failed".to_string());
                Err(Error::Connection(reason))
            }
            Err(_) => {
                error!("connection timeout");
                self.inner.stop_session();
                self.inner.set_state(ConnectionState::Disconnected);
                Err(Error::ConnectTimeout)
            }
        }
    }

    /// Publish the offline status and close the connection.
    pub async fn disconnect(&self) -> Result<()> {
        let session = self.inner.session.lock().take();
        let was_connected = self.is_connected();
        self.inner.timer.stop();

        let Some(session) = session else {
            self.inner.set_state(ConnectionState::Disconnected);
            return Ok(());
        };

        info!("disconnecting...");
        self.inner.closing.store(true, Ordering::SeqCst);

        let Session {
            mut handle,
            shutdown_tx,
        } = session;

        match self.inner.client() {
            Some(client) if was_connected => {
                if let Err(e) = client.try_publish(
                    self.inner.topics.status(),
                    QoS::AtLeastOnce.into(),
                    true,
                    STATUS_OFFLINE,
                ) {
                    warn!("offline status publish error: {}", e);
                }
                if let Err(e) = client.try_disconnect() {
                    warn!("disconnect request error: {}", e);
                    let _ = shutdown_tx.send(());
                }
            }
            // Nothing to flush while waiting for a reconnect.
            _ => {
                let _ = shutdown_tx.send(());
            }
        }

        if tokio::time::timeout(FLUSH_TIMEOUT, &mut handle).await.is_err() {
            let _ = shutdown_tx.send(());
            handle.abort();
        }

        *self.inner.client.lock() = None;
        self.inner.closing.store(false, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Disconnected);

        if was_connected {
            self.inner.fire(&self.inner.on_disconnected, "disconnected");
        }
        Ok(())
    }

    /// Drive timers and reconnection until [`Device::stop`] or Ctrl-C, then
    /// disconnect.
    pub async fn run(&self) -> Result<()> {
        self.inner.stop_requested.store(false, Ordering::SeqCst);
        let mut ticker = tokio::time::interval(RUN_TICK);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_attempt: Option<Instant> = None;

        while !self.inner.stop_requested.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.inner.stop.notified() => break,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, shutting down");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if self.is_connected() {
                self.inner.timer.run();
                continue;
            }

            if self.inner.session_active() || !self.inner.reconnect_allowed() {
                continue;
            }

            let interval = Duration::from_secs(self.inner.config.reconnect_interval);
            if last_attempt.is_some_and(|t| t.elapsed() < interval) {
                continue;
            }
            last_attempt = Some(Instant::now());

            let attempt = self.inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            info!("reconnecting (attempt {})...", attempt);
            if let Err(e) = self.connect(RECONNECT_TIMEOUT).await {
                warn!("reconnect failed: {}", e);
            }
        }

        self.disconnect().await
    }

    /// Ask a running [`Device::run`] to return.
    pub fn stop(&self) {
        self.inner.stop_requested.store(true, Ordering::SeqCst);
        self.inner.stop.notify_waiters();
    }

    /// Process due timers once, for applications with their own loop.
    pub fn run_pending(&self) -> usize {
        self.inner.timer.run()
    }

    // ========== Virtual pins ==========

    /// Send a value to a virtual pin.
    pub fn virtual_send(&self, pin: u8, value: impl Into<PinValue>) -> Result<()> {
        self.virtual_send_all(pin, &[value.into()])
    }

    /// Send several values to a virtual pin as one comma separated payload.
    pub fn virtual_send_all(&self, pin: u8, values: &[PinValue]) -> Result<()> {
        if values.is_empty() {
            warn!("cannot write V{}: no values provided", pin);
            return Err(Error::NoValues);
        }
        self.inner
            .publish("write", self.inner.topics.pin(pin), PinValue::join(values))
    }

    /// Last value received for a virtual pin.
    pub fn virtual_read(&self, pin: u8) -> Option<String> {
        self.inner.router.value(pin)
    }

    /// Ask the server to resend the stored value of a pin.
    pub fn sync_virtual(&self, pin: u8) -> Result<()> {
        self.inner
            .publish("sync", self.inner.topics.sync_pin(pin), Vec::new())
    }

    /// Ask the server to resend every stored pin value.
    pub fn sync_all(&self) -> Result<()> {
        self.inner
            .publish("sync", self.inner.topics.sync_all(), Vec::new())
    }

    /// Register the handler for values written to a pin from the dashboard.
    pub fn on_virtual_receive<F>(&self, pin: u8, f: F)
    where
        F: Fn(&PinMessage) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.router.handle_func(pin, f);
    }

    /// Register a [`PinHandler`] for a pin.
    pub fn handle(&self, pin: u8, handler: Arc<dyn PinHandler>) {
        self.inner.router.handle(pin, handler);
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    // ========== Notifications ==========

    /// Push notification to the device owner.
    pub fn notify(&self, message: &str) -> Result<()> {
        self.inner
            .publish("send notification", self.inner.topics.notify(), message)
    }

    /// Persistent alarm that needs acknowledgement in the mobile app.
    pub fn alarm(&self, message: &str, sound: &str, priority: Priority) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        let payload = AlarmPayload {
            kind: "alarm",
            message,
            alarm_id: alarm_id(now),
            sound,
            priority: priority as u8,
            timestamp: now,
        };
        let payload = serde_json::to_vec(&payload)?;
        self.inner
            .publish("send alarm", self.inner.topics.alarm(), payload)
    }

    /// Email to the device owner.
    pub fn email(&self, subject: &str, body: &str) -> Result<()> {
        let payload = serde_json::to_vec(&EmailPayload { subject, body })?;
        self.inner
            .publish("send email", self.inner.topics.email(), payload)
    }

    /// Remote log line.
    pub fn log(&self, message: &str) -> Result<()> {
        self.inner
            .publish("send log", self.inner.topics.log(), message)
    }

    // ========== Callbacks ==========

    /// Called after every successful (re)connection.
    pub fn on_connected<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.on_connected.write() = Some(Arc::new(f));
    }

    /// Called when an established connection is lost or closed.
    pub fn on_disconnected<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.inner.on_disconnected.write() = Some(Arc::new(f));
    }

    /// HTTP client for the same device, for environments where MQTT is
    /// unavailable.
    pub fn http_fallback(&self) -> Result<HttpClient> {
        let config = &self.inner.config;
        let server = if config.server == DEFAULT_SERVER {
            DEFAULT_HTTP_SERVER
        } else {
            config.server.as_str()
        };
        HttpClient::builder(self.inner.auth_token.clone())
            .server(server)
            .port(config.http_port)
            .use_tls(config.use_tls())
            .build()
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("device_id", &self.device_id())
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn client(&self) -> Option<AsyncClient> {
        self.client.lock().clone()
    }

    fn set_state(&self, state: ConnectionState) -> ConnectionState {
        self.state_tx.send_replace(state)
    }

    fn session_active(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    fn reconnect_allowed(&self) -> bool {
        let max = self.config.max_reconnect_attempts;
        max == 0 || self.reconnect_attempts.load(Ordering::SeqCst) < max
    }

    fn publish(&self, what: &str, topic: String, payload: impl Into<Vec<u8>>) -> Result<()> {
        let client = match self.client() {
            Some(client) if *self.state_tx.borrow() == ConnectionState::Connected => client,
            _ => {
                warn!("cannot {}: not connected", what);
                return Err(Error::NotConnected);
            }
        };
        client.try_publish(topic, QoS::AtLeastOnce.into(), false, payload)?;
        Ok(())
    }

    fn fire(&self, slot: &RwLock<Option<Callback>>, name: &str) {
        let callback = slot.read().clone();
        if let Some(callback) = callback {
            debug!("running {} callback", name);
            callback();
        }
    }

    /// Spawns the event loop unless one is already running.
    fn start_session(self: Arc<Self>) -> Result<()> {
        let mut session = self.session.lock();
        if session.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            self.set_state(ConnectionState::Connecting);
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let options = transport::mqtt_options(&self.config, &self.auth_token, &self.topics)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        *self.client.lock() = Some(client);
        self.last_error.lock().take();
        self.set_state(ConnectionState::Connecting);

        let inner = self.clone();
        let handle = runtime.spawn(async move {
            inner.run_event_loop(event_loop, shutdown_rx).await;
        });
        *session = Some(Session {
            handle,
            shutdown_tx,
        });
        Ok(())
    }

    fn stop_session(&self) {
        if let Some(session) = self.session.lock().take() {
            let _ = session.shutdown_tx.send(());
            session.handle.abort();
        }
        *self.client.lock() = None;
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut event_loop: EventLoop,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut connected_once = false;

        loop {
            let event = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("event loop shutdown requested");
                    break;
                }
                event = event_loop.poll() => event,
            };

            match event {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    connected_once = true;
                    self.handle_connected();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    self.router
                        .dispatch(&publish.topic, &publish.payload, publish.retain);
                }
                Ok(Event::Incoming(Packet::SubAck(suback))) => {
                    debug!("subscription acknowledged: {:?}", suback);
                }
                Ok(Event::Incoming(Packet::PubAck(puback))) => {
                    debug!("publish acknowledged: {}", puback.pkid);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    debug!("disconnect sent");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.closing.load(Ordering::SeqCst) {
                        break;
                    }

                    let reason = describe_connection_error(&e);
                    if !connected_once {
                        error!("connection failed: {}", reason);
                        *self.last_error.lock() = Some(reason);
                        self.set_state(ConnectionState::Disconnected);
                        break;
                    }

                    self.handle_connection_lost(&reason);

                    if !self.reconnect_allowed() {
                        error!("giving up after {} reconnect attempts", self.config.max_reconnect_attempts);
                        break;
                    }

                    let interval = Duration::from_secs(self.config.reconnect_interval);
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }

                    let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    info!("reconnecting (attempt {})...", attempt);
                    self.set_state(ConnectionState::Connecting);
                }
            }
        }

        if !self.closing.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    fn handle_connected(&self) {
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        info!("connected to {}", self.config.server);

        if let Some(client) = self.client() {
            if let Err(e) = client.try_subscribe(self.topics.commands(), QoS::AtLeastOnce.into()) {
                error!("subscribe error: {}", e);
            }
            if let Err(e) = client.try_publish(
                self.topics.status(),
                QoS::AtLeastOnce.into(),
                true,
                STATUS_ONLINE,
            ) {
                error!("status publish error: {}", e);
            }
        }

        self.set_state(ConnectionState::Connected);
        self.fire(&self.on_connected, "connected");
    }

    fn handle_connection_lost(&self, reason: &str) {
        let previous = self.set_state(ConnectionState::Disconnected);
        if previous != ConnectionState::Connected {
            debug!("reconnect attempt failed: {}", reason);
            return;
        }

        let burst = self.disconnects.lock().record(Instant::now());
        if burst >= 2 {
            warn!("unexpected disconnection: {} | {}", reason, TOKEN_COLLISION_HINT);
        } else {
            warn!("unexpected disconnection: {}", reason);
        }

        self.fire(&self.on_disconnected, "disconnected");
    }
}

/// Alarm ids look like `alarm_{ms}_{1000..=9999}`.
fn alarm_id(now_ms: i64) -> String {
    let suffix = 1000 + (Uuid::new_v4().as_u128() % 9000) as u32;
    format!("alarm_{}_{}", now_ms, suffix)
}

/// Readable reason for a broker refusal or network failure.
fn describe_connection_error(e: &ConnectionError) -> String {
    match e {
        ConnectionError::ConnectionRefused(code) => refusal_reason(*code).to_string(),
        other => other.to_string(),
    }
}

fn refusal_reason(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "accepted",
        ConnectReturnCode::RefusedProtocolVersion => "incorrect protocol version",
        ConnectReturnCode::BadClientId => "invalid client identifier",
        ConnectReturnCode::ServiceUnavailable => "server unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorized",
    }
}
