//! Connection configuration.
//!
//! Defaults are secure: MQTT over TLS to the public broker on port 8883.
//! Use [`Config::development`] for a local plaintext broker and
//! [`Config::websocket`] when the MQTT ports are blocked.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Default broker hostname.
pub const DEFAULT_SERVER: &str = "mqtt.vwire.io";
/// Default HTTP API hostname.
pub const DEFAULT_HTTP_SERVER: &str = "api.vwire.io";
/// Plaintext MQTT port.
pub const DEFAULT_PORT_TCP: u16 = 1883;
/// MQTT over TLS port.
pub const DEFAULT_PORT_TLS: u16 = 8883;
/// HTTPS port.
pub const DEFAULT_HTTP_PORT: u16 = 443;
/// HTTP port of a local development server.
pub const DEVELOPMENT_HTTP_PORT: u16 = 3001;
/// Keep-alive interval in seconds.
pub const DEFAULT_KEEP_ALIVE: u64 = 30;
/// Seconds between reconnection attempts.
pub const DEFAULT_RECONNECT_INTERVAL: u64 = 5;

/// Transport used for the MQTT connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Transport {
    /// MQTT over TCP with TLS.
    #[default]
    #[serde(rename = "tcp_tls")]
    TcpTls,
    /// MQTT over plain TCP.
    #[serde(rename = "tcp")]
    Tcp,
    /// MQTT over WebSocket with TLS.
    #[serde(rename = "wss")]
    WebSocketTls,
    /// MQTT over plain WebSocket.
    #[serde(rename = "ws")]
    WebSocket,
}

impl Transport {
    /// Returns the short name used in config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::TcpTls => "tcp_tls",
            Transport::Tcp => "tcp",
            Transport::WebSocketTls => "wss",
            Transport::WebSocket => "ws",
        }
    }

    /// Picks the transport for the given flags.
    pub fn from_flags(use_tls: bool, use_websocket: bool) -> Self {
        match (use_websocket, use_tls) {
            (true, true) => Transport::WebSocketTls,
            (true, false) => Transport::WebSocket,
            (false, true) => Transport::TcpTls,
            (false, false) => Transport::Tcp,
        }
    }
}

impl FromStr for Transport {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp_tls" | "tls" => Ok(Transport::TcpTls),
            "tcp" => Ok(Transport::Tcp),
            "wss" => Ok(Transport::WebSocketTls),
            "ws" => Ok(Transport::WebSocket),
            other => Err(Error::InvalidTransport(other.to_string())),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for a [`Device`](crate::Device).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker hostname.
    pub server: String,
    /// Broker port.
    pub port: u16,
    /// HTTP API port used by the HTTP fallback.
    pub http_port: u16,
    /// MQTT transport.
    pub transport: Transport,
    /// MQTT keep-alive in seconds.
    pub keep_alive: u64,
    /// Seconds between reconnection attempts.
    pub reconnect_interval: u64,
    /// Maximum reconnection attempts, 0 for unlimited.
    pub max_reconnect_attempts: u32,
    /// Verify the broker certificate.
    pub verify_tls: bool,
    /// PEM file with CA certificates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_certs: Option<PathBuf>,
    /// PEM file with the client certificate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,
    /// PEM file with the client private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,
    /// Enable debug logging in front-ends that honor it.
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            port: DEFAULT_PORT_TLS,
            http_port: DEFAULT_HTTP_PORT,
            transport: Transport::TcpTls,
            keep_alive: DEFAULT_KEEP_ALIVE,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: 0,
            verify_tls: true,
            ca_certs: None,
            client_cert: None,
            client_key: None,
            debug: false,
        }
    }
}

impl Config {
    /// Plaintext configuration for a local broker. Never use in production.
    pub fn development(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            http_port: DEVELOPMENT_HTTP_PORT,
            transport: Transport::Tcp,
            verify_tls: false,
            debug: true,
            ..Default::default()
        }
    }

    /// MQTT over secure WebSocket, useful when the MQTT ports are blocked.
    pub fn websocket(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            transport: Transport::WebSocketTls,
            verify_tls: true,
            ..Default::default()
        }
    }

    /// Custom server with explicit transport flags.
    pub fn custom(
        server: impl Into<String>,
        port: u16,
        use_tls: bool,
        use_websocket: bool,
        verify_tls: bool,
    ) -> Self {
        Self {
            server: server.into(),
            port,
            transport: Transport::from_flags(use_tls, use_websocket),
            verify_tls,
            ..Default::default()
        }
    }

    /// Set the CA certificates file.
    pub fn with_ca_certs(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_certs = Some(path.into());
        self
    }

    /// Set the client certificate and key files.
    pub fn with_client_auth(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.client_cert = Some(cert.into());
        self.client_key = Some(key.into());
        self
    }

    /// Set the reconnection policy.
    pub fn with_reconnect(mut self, interval_secs: u64, max_attempts: u32) -> Self {
        self.reconnect_interval = interval_secs;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Whether the transport is encrypted.
    pub fn use_tls(&self) -> bool {
        matches!(self.transport, Transport::TcpTls | Transport::WebSocketTls)
    }

    /// Whether the transport is a WebSocket.
    pub fn use_websocket(&self) -> bool {
        matches!(self.transport, Transport::WebSocket | Transport::WebSocketTls)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tls = if self.use_tls() { "TLS" } else { "insecure" };
        let ws = if self.use_websocket() { "WebSocket" } else { "TCP" };
        write!(f, "Config({}:{}, {}, {})", self.server, self.port, ws, tls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_secure() {
        let cfg = Config::default();
        assert_eq!(cfg.server, DEFAULT_SERVER);
        assert_eq!(cfg.port, 8883);
        assert!(cfg.use_tls());
        assert!(!cfg.use_websocket());
        assert!(cfg.verify_tls);
        assert_eq!(cfg.max_reconnect_attempts, 0);
    }

    #[test]
    fn test_development() {
        let cfg = Config::development("192.168.1.100", DEFAULT_PORT_TCP);
        assert_eq!(cfg.transport, Transport::Tcp);
        assert_eq!(cfg.http_port, 3001);
        assert!(!cfg.verify_tls);
        assert!(cfg.debug);
        assert_eq!(cfg.to_string(), "Config(192.168.1.100:1883, TCP, insecure)");
    }

    #[test]
    fn test_websocket() {
        let cfg = Config::websocket(DEFAULT_SERVER, 443);
        assert!(cfg.use_websocket());
        assert!(cfg.use_tls());
        assert_eq!(cfg.to_string(), "Config(mqtt.vwire.io:443, WebSocket, TLS)");
    }

    #[test]
    fn test_custom_transport_flags() {
        assert_eq!(Config::custom("h", 1, true, false, true).transport, Transport::TcpTls);
        assert_eq!(Config::custom("h", 1, false, false, true).transport, Transport::Tcp);
        assert_eq!(Config::custom("h", 1, true, true, true).transport, Transport::WebSocketTls);
        assert_eq!(Config::custom("h", 1, false, true, true).transport, Transport::WebSocket);
    }

    #[test]
    fn test_transport_parse() {
        assert_eq!("wss".parse::<Transport>().unwrap(), Transport::WebSocketTls);
        assert_eq!("tcp".parse::<Transport>().unwrap(), Transport::Tcp);
        assert!("quic".parse::<Transport>().is_err());
    }

    #[test]
    fn test_serde_defaults() {
        let cfg: Config = serde_json::from_str(r#"{"server":"localhost","transport":"tcp"}"#).unwrap();
        assert_eq!(cfg.server, "localhost");
        assert_eq!(cfg.transport, Transport::Tcp);
        assert_eq!(cfg.port, DEFAULT_PORT_TLS);
        assert_eq!(cfg.keep_alive, DEFAULT_KEEP_ALIVE);
    }
}
