//! HTTP client for the Vwire REST API.
//!
//! Request/response access to pins without a persistent MQTT session, for
//! scripts, scheduled jobs and networks where MQTT is blocked.

use std::time::Duration;

use reqwest::{
    Client as ReqwestClient, Response, StatusCode,
    header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, error, warn};

use crate::config::DEFAULT_HTTP_PORT;
use crate::error::{Error, Result};
use crate::types::PinValue;

/// Default HTTP API host.
pub const DEFAULT_API_SERVER: &str = crate::config::DEFAULT_HTTP_SERVER;

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const X_AUTH_TOKEN: HeaderName = HeaderName::from_static("x-auth-token");

#[derive(Serialize)]
struct WriteRequest<'a> {
    pin: &'a str,
    value: String,
}

#[derive(Deserialize)]
struct PinResponse {
    value: Option<serde_json::Value>,
}

/// HTTP client for one device token.
///
/// ```no_run
/// # async fn demo() -> vwire::Result<()> {
/// let client = vwire::HttpClient::new("your-auth-token")?;
/// client.virtual_send(0, 25.5).await?;
/// let v = client.virtual_read(0).await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: ReqwestClient,
    base_url: String,
    auth_token: String,
}

impl HttpClient {
    /// Client for the production API.
    pub fn new(auth_token: impl Into<String>) -> Result<Self> {
        HttpClientBuilder::new(auth_token).build()
    }

    pub fn builder(auth_token: impl Into<String>) -> HttpClientBuilder {
        HttpClientBuilder::new(auth_token)
    }

    /// `{scheme}://{server}:{port}/api/v1`
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth_token(&self) -> &str {
        &self.auth_token
    }

    /// Write a value to a pin such as `"V0"`.
    ///
    /// Succeeds only on HTTP 200.
    pub async fn write_pin(&self, pin: &str, value: impl Into<PinValue>) -> Result<()> {
        let body = WriteRequest {
            pin,
            value: value.into().to_string(),
        };
        debug!("http write {} = {}", pin, body.value);

        let response = self
            .client
            .post(self.url(&format!("webhooks/device/{}", self.auth_token)))
            .headers(self.default_headers()?)
            .json(&body)
            .send()
            .await
            .inspect_err(|e| error!("error writing to pin {}: {}", pin, e))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    /// Write a value to virtual pin `V{pin}`.
    pub async fn virtual_send(&self, pin: u8, value: impl Into<PinValue>) -> Result<()> {
        self.write_pin(&format!("V{}", pin), value).await
    }

    /// Write several pins. Every entry is attempted; pins that failed are
    /// reported together in [`Error::BatchWrite`].
    pub async fn write_batch<I, K, V>(&self, values: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<PinValue>,
    {
        let mut failed = Vec::new();
        for (pin, value) in values {
            let pin = pin.as_ref();
            if let Err(e) = self.write_pin(pin, value).await {
                warn!("failed to write to pin {}: {}", pin, e);
                failed.push(pin.to_string());
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::BatchWrite(failed))
        }
    }

    /// Current value of a pin as stored on the server.
    pub async fn read_pin(&self, pin: &str) -> Result<Option<String>> {
        let response: PinResponse = self
            .get_json(&format!("device/{}/pin/{}", self.auth_token, pin))
            .await?;

        Ok(response.value.map(|v| match v {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        }))
    }

    /// Current value of virtual pin `V{pin}`.
    pub async fn virtual_read(&self, pin: u8) -> Result<Option<String>> {
        self.read_pin(&format!("V{}", pin)).await
    }

    /// Device metadata.
    pub async fn device_info(&self) -> Result<serde_json::Value> {
        self.get_json(&format!("device/{}/info", self.auth_token))
            .await
    }

    /// Whether the API answers its health check.
    pub async fn ping(&self) -> bool {
        match self.client.get(self.url("health")).send().await {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                debug!("ping failed: {}", e);
                false
            }
        }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn get_json<R>(&self, endpoint: &str) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let response = self
            .client
            .get(self.url(endpoint))
            .headers(self.default_headers()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(serde_json::from_slice(b"{}")?);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn default_headers(&self) -> Result<HeaderMap> {
        let token = HeaderValue::from_str(&self.auth_token)
            .map_err(|e| Error::InvalidToken(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.auth_token))
            .map_err(|e| Error::InvalidToken(e.to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(X_AUTH_TOKEN, token);
        Ok(headers)
    }
}

async fn status_error(response: Response) -> Error {
    let status = response.status().as_u16();
    let message = match response.text().await {
        Ok(body) if !body.is_empty() => body,
        _ => StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("unexpected status")
            .to_string(),
    };
    error!("http error {}: {}", status, message);
    Error::Status { status, message }
}

/// Builder for [`HttpClient`].
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    auth_token: String,
    server: String,
    port: u16,
    use_tls: bool,
    timeout: Duration,
}

impl HttpClientBuilder {
    pub fn new(auth_token: impl Into<String>) -> Self {
        Self {
            auth_token: auth_token.into(),
            server: DEFAULT_API_SERVER.to_string(),
            port: DEFAULT_HTTP_PORT,
            use_tls: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = server.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Use HTTPS (default) or plain HTTP.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let client = ReqwestClient::builder().timeout(self.timeout).build()?;
        let scheme = if self.use_tls { "https" } else { "http" };

        Ok(HttpClient {
            client,
            base_url: format!("{}://{}:{}/api/v1", scheme, self.server, self.port),
            auth_token: self.auth_token,
        })
    }
}

/// Write one pin without keeping a client around.
pub async fn quick_write(
    auth_token: &str,
    pin: &str,
    value: impl Into<PinValue>,
    server: &str,
    port: u16,
) -> Result<()> {
    HttpClient::builder(auth_token)
        .server(server)
        .port(port)
        .build()?
        .write_pin(pin, value)
        .await
}
