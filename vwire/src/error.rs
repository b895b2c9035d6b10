//! Error types for the Vwire client.

use thiserror::Error;

/// Error type for Vwire operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The device is not connected to the broker.
    #[error("vwire: not connected")]
    NotConnected,

    /// A send was requested without any value.
    #[error("vwire: no values provided")]
    NoValues,

    /// Connection attempt did not complete in time.
    #[error("vwire: connection timeout")]
    ConnectTimeout,

    /// Connection refused or failed.
    #[error("vwire: connection error: {0}")]
    Connection(String),

    /// TLS setup failed.
    #[error("vwire: tls error: {0}")]
    Tls(String),

    /// Background work needs a tokio runtime.
    #[error("vwire: no tokio runtime available")]
    NoRuntime,

    /// Timer table is full.
    #[error("vwire: maximum number of timers ({0}) exceeded")]
    TooManyTimers(usize),

    /// Malformed pin identifier.
    #[error("vwire: invalid pin: {0}")]
    InvalidPin(String),

    /// Auth token cannot be sent in a header.
    #[error("vwire: invalid auth token: {0}")]
    InvalidToken(String),

    /// Unknown transport name.
    #[error("vwire: invalid transport: {0}")]
    InvalidTransport(String),

    /// The HTTP API answered with a non-success status.
    #[error("vwire: http status {status}: {message}")]
    Status { status: u16, message: String },

    /// Some pins of a batch write failed.
    #[error("vwire: failed to write pins: {}", .0.join(", "))]
    BatchWrite(Vec<String>),

    /// Handler error.
    #[error("vwire: handler error: {0}")]
    Handler(String),

    /// Client error from rumqttc.
    #[error("mqtt client error: {0}")]
    ClientError(#[from] rumqttc::ClientError),

    /// Connection error from rumqttc.
    #[error("mqtt connection error: {0}")]
    ConnectionError(#[from] rumqttc::ConnectionError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Vwire operations.
pub type Result<T> = std::result::Result<T, Error>;
