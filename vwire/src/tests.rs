//! Integration tests against an in-process rumqttd broker.
//!
//! A second rumqttc client plays the dashboard: it watches everything the
//! device publishes and writes pin commands back.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use crate::{Config, ConnectionState, Device, Error, Priority};

const TOKEN: &str = "test-token-0123456789";

fn find_available_port() -> u16 {
    static PORT: AtomicUsize = AtomicUsize::new(19300);
    PORT.fetch_add(1, Ordering::SeqCst) as u16
}

/// Broker settings. With `token` set only that token may log in; with `gate`
/// set every login is refused while the flag is false.
fn create_rumqttd_config(
    addr: &str,
    token: Option<&str>,
    gate: Option<Arc<AtomicBool>>,
) -> rumqttd::Config {
    use rumqttd::{ConnectionSettings, RouterConfig, ServerSettings};
    use std::future::Future;
    use std::net::SocketAddr;
    use std::pin::Pin;

    let socket_addr: SocketAddr = addr.parse().unwrap();

    let external_auth = (token.is_some() || gate.is_some()).then(|| {
        let expected = token.map(str::to_string);
        let handler: Arc<
            dyn Fn(String, String, String) -> Pin<Box<dyn Future<Output = bool> + Send + 'static>>
                + Send
                + Sync,
        > = Arc::new(move |_client_id, user, pass| {
            let ok = expected
                .as_ref()
                .is_none_or(|expected| user == *expected && pass == *expected)
                && gate.as_ref().is_none_or(|gate| gate.load(Ordering::SeqCst));
            Box::pin(async move { ok })
        });
        handler
    });

    let mut servers = HashMap::new();
    servers.insert(
        "tcp".to_string(),
        ServerSettings {
            name: "tcp".to_string(),
            listen: socket_addr,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 60000,
                max_payload_size: 1024 * 1024,
                max_inflight_count: 100,
                auth: None,
                external_auth,
                dynamic_filters: false,
            },
        },
    );

    rumqttd::Config {
        id: 0,
        router: RouterConfig {
            max_connections: 1000,
            max_outgoing_packet_count: 200,
            max_segment_size: 1024 * 1024,
            max_segment_count: 10,
            ..Default::default()
        },
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        console: None,
        bridge: None,
        cluster: None,
    }
}

/// Starts a broker and returns its port.
async fn start_broker(token: Option<&str>) -> u16 {
    start_broker_with(token, None).await
}

async fn start_broker_with(token: Option<&str>, gate: Option<Arc<AtomicBool>>) -> u16 {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("vwire=debug")
        .with_test_writer()
        .try_init();

    let port = find_available_port();
    let config = create_rumqttd_config(&format!("127.0.0.1:{}", port), token, gate);
    let mut broker = rumqttd::Broker::new(config);
    std::thread::spawn(move || {
        let _ = broker.start();
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    port
}

/// Dashboard side of the conversation.
struct Dashboard {
    client: AsyncClient,
    rx: mpsc::UnboundedReceiver<(String, String)>,
}

impl Dashboard {
    async fn connect(port: u16, filter: &str) -> Self {
        let mut opts = MqttOptions::new("dashboard", "127.0.0.1", port);
        opts.set_credentials(TOKEN, TOKEN);
        opts.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(opts, 100);
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let payload = String::from_utf8_lossy(&p.payload).to_string();
                        if tx.send((p.topic.clone(), payload)).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
                }
            }
        });

        client
            .subscribe(filter, rumqttc::QoS::AtLeastOnce)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        Self { client, rx }
    }

    /// Next message on `topic`, skipping others.
    async fn expect(&mut self, topic: &str) -> String {
        let wait = async {
            loop {
                match self.rx.recv().await {
                    Some((t, payload)) if t == topic => return payload,
                    Some(_) => continue,
                    None => panic!("dashboard closed"),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("no message on {}", topic))
    }

    async fn write(&self, topic: &str, payload: &str) {
        self.client
            .publish(topic, rumqttc::QoS::AtLeastOnce, false, payload)
            .await
            .unwrap();
    }
}

/// Logs in with the device's client id, which makes the broker drop the
/// device's session. The intruder goes away again right after its ConnAck.
async fn kick(port: u16, device_id: &str) {
    let mut opts = MqttOptions::new(crate::client_id(device_id), "127.0.0.1", port);
    opts.set_credentials(TOKEN, TOKEN);
    let (_client, mut event_loop) = AsyncClient::new(opts, 10);

    let connack = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => break,
                Ok(_) => {}
                Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), connack)
        .await
        .expect("duplicate client was not accepted");
}

/// Polls `f` until it holds, failing after ten seconds.
async fn eventually(what: &str, f: impl Fn() -> bool) {
    let wait = async {
        while !f() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", what));
}

fn counting(device: &Device) -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
    let connected = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(AtomicUsize::new(0));
    let c = connected.clone();
    device.on_connected(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });
    let l = lost.clone();
    device.on_disconnected(move || {
        l.fetch_add(1, Ordering::SeqCst);
    });
    (connected, lost)
}

fn local_config(port: u16) -> Config {
    Config::development("127.0.0.1", port).with_reconnect(1, 3)
}

#[tokio::test]
async fn test_connect_publishes_online_status() {
    let port = start_broker(None).await;
    let mut dashboard = Dashboard::connect(port, "vwire/dev-online/#").await;

    let device = Device::new(TOKEN, "dev-online", local_config(port));
    let connected = Arc::new(AtomicUsize::new(0));
    let c = connected.clone();
    device.on_connected(move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    device.connect(Duration::from_secs(5)).await.unwrap();
    assert!(device.is_connected());
    assert_eq!(device.state(), ConnectionState::Connected);

    let status = dashboard.expect("vwire/dev-online/status").await;
    assert_eq!(status, r#"{"status":"online"}"#);
    assert_eq!(connected.load(Ordering::SeqCst), 1);

    // Already connected is a no-op.
    device.connect(Duration::from_secs(5)).await.unwrap();
    assert_eq!(connected.load(Ordering::SeqCst), 1);

    device.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_virtual_send_payloads() {
    let port = start_broker(None).await;
    let mut dashboard = Dashboard::connect(port, "vwire/dev-send/#").await;

    let device = Device::new(TOKEN, "dev-send", local_config(port));
    device.connect(Duration::from_secs(5)).await.unwrap();

    device.virtual_send(1, 25.5).unwrap();
    assert_eq!(dashboard.expect("vwire/dev-send/pin/V1").await, "25.5");

    device.virtual_send(2, true).unwrap();
    assert_eq!(dashboard.expect("vwire/dev-send/pin/V2").await, "1");

    device
        .virtual_send_all(3, &[255.into(), 128.into(), 0.into()])
        .unwrap();
    assert_eq!(dashboard.expect("vwire/dev-send/pin/V3").await, "255,128,0");

    assert_err!(device.virtual_send_all(4, &[]));
    device.sync_virtual(4).unwrap();
    assert_eq!(dashboard.expect("vwire/dev-send/sync/V4").await, "");

    device.notify("door opened").unwrap();
    assert_eq!(dashboard.expect("vwire/dev-send/notify").await, "door opened");

    device.log("boot complete").unwrap();
    assert_eq!(dashboard.expect("vwire/dev-send/log").await, "boot complete");

    device.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_alarm_and_email_json() {
    let port = start_broker(None).await;
    let mut dashboard = Dashboard::connect(port, "vwire/dev-alarm/#").await;

    let device = Device::new(TOKEN, "dev-alarm", local_config(port));
    device.connect(Duration::from_secs(5)).await.unwrap();

    device.alarm("Smoke detected", "siren", Priority::Critical).unwrap();
    let alarm: serde_json::Value =
        serde_json::from_str(&dashboard.expect("vwire/dev-alarm/alarm").await).unwrap();
    assert_eq!(alarm["type"], "alarm");
    assert_eq!(alarm["message"], "Smoke detected");
    assert_eq!(alarm["sound"], "siren");
    assert_eq!(alarm["priority"], 3);
    assert!(alarm["alarmId"].as_str().unwrap().starts_with("alarm_"));
    assert!(alarm["timestamp"].as_i64().unwrap() > 0);

    device.email("Report", "All good").unwrap();
    let email: serde_json::Value =
        serde_json::from_str(&dashboard.expect("vwire/dev-alarm/email").await).unwrap();
    assert_eq!(email, serde_json::json!({"subject": "Report", "body": "All good"}));

    device.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_receive_pin_command() {
    let port = start_broker(None).await;
    let dashboard = Dashboard::connect(port, "vwire/dev-recv/pin/#").await;

    let device = Device::new(TOKEN, "dev-recv", local_config(port));
    let (tx, mut rx) = mpsc::unbounded_channel();
    device.on_virtual_receive(3, move |msg| {
        let _ = tx.send(msg.as_str().unwrap_or_default().to_string());
        Ok(())
    });

    device.connect(Duration::from_secs(5)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    dashboard.write("vwire/dev-recv/cmd/V3", "42").await;
    let value = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value, "42");
    assert_eq!(device.virtual_read(3).as_deref(), Some("42"));

    // Pins without a handler still update the cache.
    dashboard.write("vwire/dev-recv/cmd/7", "on").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(device.virtual_read(7).as_deref(), Some("on"));

    device.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_disconnect_publishes_offline_status() {
    let port = start_broker(None).await;
    let mut dashboard = Dashboard::connect(port, "vwire/dev-off/status").await;

    let device = Device::new(TOKEN, "dev-off", local_config(port));
    let disconnected = Arc::new(AtomicUsize::new(0));
    let d = disconnected.clone();
    device.on_disconnected(move || {
        d.fetch_add(1, Ordering::SeqCst);
    });

    device.connect(Duration::from_secs(5)).await.unwrap();
    assert_eq!(dashboard.expect("vwire/dev-off/status").await, r#"{"status":"online"}"#);

    device.disconnect().await.unwrap();
    assert_eq!(dashboard.expect("vwire/dev-off/status").await, r#"{"status":"offline"}"#);
    assert_eq!(device.state(), ConnectionState::Disconnected);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);

    assert!(matches!(device.virtual_send(0, 1), Err(Error::NotConnected)));

    // Second disconnect is a no-op.
    assert_ok!(device.disconnect().await);
    assert_eq!(disconnected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connect_rejected_token() {
    let port = start_broker(Some(TOKEN)).await;

    let device = Device::new("wrong-token", "dev-auth", local_config(port));
    let result = device.connect(Duration::from_secs(5)).await;
    assert!(
        matches!(result, Err(Error::Connection(_)) | Err(Error::ConnectTimeout)),
        "unexpected result: {:?}",
        result
    );
    assert!(!device.is_connected());

    let device = Device::new(TOKEN, "dev-auth", local_config(port));
    device.connect(Duration::from_secs(5)).await.unwrap();
    device.disconnect().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_kick() {
    let port = start_broker(None).await;
    let mut dashboard = Dashboard::connect(port, "vwire/dev-kick/#").await;

    // One attempt allowed per loss, so the second round only reconnects if a
    // successful connection resets the attempt counter.
    let config = Config::development("127.0.0.1", port).with_reconnect(1, 1);
    let device = Device::new(TOKEN, "dev-kick", config);
    let (connected, lost) = counting(&device);

    device.connect(Duration::from_secs(5)).await.unwrap();
    assert_eq!(dashboard.expect("vwire/dev-kick/status").await, r#"{"status":"online"}"#);

    for round in 1..=2 {
        kick(port, "dev-kick").await;
        eventually("connection loss", || lost.load(Ordering::SeqCst) == round).await;
        assert!(!device.is_connected());
        assert!(matches!(device.virtual_send(0, 1), Err(Error::NotConnected)));

        eventually("reconnection", || {
            device.is_connected() && connected.load(Ordering::SeqCst) == round + 1
        })
        .await;
        // The broker may deliver the offline will first.
        while dashboard.expect("vwire/dev-kick/status").await != r#"{"status":"online"}"# {}
    }

    device.virtual_send(0, "back").unwrap();
    assert_eq!(dashboard.expect("vwire/dev-kick/pin/V0").await, "back");

    device.disconnect().await.unwrap();
    assert_eq!(lost.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_gives_up_after_max_reconnect_attempts() {
    let gate = Arc::new(AtomicBool::new(true));
    let port = start_broker_with(None, Some(gate.clone())).await;

    let config = Config::development("127.0.0.1", port).with_reconnect(1, 2);
    let device = Device::new(TOKEN, "dev-giveup", config);
    let (connected, lost) = counting(&device);
    device.connect(Duration::from_secs(5)).await.unwrap();

    kick(port, "dev-giveup").await;
    gate.store(false, Ordering::SeqCst);
    eventually("connection loss", || lost.load(Ordering::SeqCst) == 1).await;

    // Two refused attempts one second apart, then the event loop stops.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(device.state(), ConnectionState::Disconnected);

    gate.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(device.state(), ConnectionState::Disconnected);
    assert_eq!(connected.load(Ordering::SeqCst), 1);
    assert_eq!(lost.load(Ordering::SeqCst), 1);
    assert!(matches!(device.virtual_send(0, 1), Err(Error::NotConnected)));

    assert_ok!(device.disconnect().await);
    assert_eq!(lost.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tls_against_plain_listener_fails() {
    let port = start_broker(None).await;

    for verify_tls in [true, false] {
        let config = Config::custom("127.0.0.1", port, true, false, verify_tls);
        let device = Device::new(TOKEN, "dev-tls", config);
        let result = device.connect(Duration::from_secs(3)).await;
        assert!(
            matches!(result, Err(Error::Connection(_)) | Err(Error::ConnectTimeout)),
            "unexpected result: {:?}",
            result
        );
        assert!(!device.is_connected());
    }
}

#[tokio::test]
async fn test_run_drives_timers_until_stop() {
    let port = start_broker(None).await;
    let mut dashboard = Dashboard::connect(port, "vwire/dev-run/pin/#").await;

    let device = Device::new(TOKEN, "dev-run", local_config(port));
    device.connect(Duration::from_secs(5)).await.unwrap();

    let sender = device.clone();
    device
        .timer()
        .set_interval(Duration::from_millis(50), move || {
            let _ = sender.virtual_send(0, "tick");
        })
        .unwrap();

    let runner = device.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    assert_eq!(dashboard.expect("vwire/dev-run/pin/V0").await, "tick");
    assert_eq!(dashboard.expect("vwire/dev-run/pin/V0").await, "tick");

    device.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(device.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_http_fallback_from_device() {
    let device = Device::new(TOKEN, "dev-http", Config::development("127.0.0.1", 1883));
    let http = device.http_fallback().unwrap();
    assert_eq!(http.base_url(), "http://127.0.0.1:3001/api/v1");
    assert_eq!(http.auth_token(), TOKEN);
}
