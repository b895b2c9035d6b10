//! Virtual pin client for the Vwire IoT platform.
//!
//! A [`Device`] keeps an MQTT session with the broker and exchanges values
//! on numbered virtual pins, the same model the embedded firmware exposes.
//! [`HttpClient`] covers the same pin operations over the REST API for
//! programs that cannot hold a connection open.
//!
//! # Example - Device
//!
//! ```no_run
//! use std::time::Duration;
//! use vwire::{Config, Device};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let device = Device::new("your-auth-token", "VW-ABC123", Config::default());
//!
//!     device.on_virtual_receive(0, |msg| {
//!         println!("LED is now {}", if msg.as_bool() { "on" } else { "off" });
//!         Ok(())
//!     });
//!
//!     device.connect(vwire::DEFAULT_CONNECT_TIMEOUT).await?;
//!
//!     let sender = device.clone();
//!     device.timer().set_interval(Duration::from_secs(2), move || {
//!         let _ = sender.virtual_send(1, 22.5);
//!     })?;
//!
//!     device.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example - HTTP
//!
//! ```no_run
//! use vwire::HttpClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = HttpClient::new("your-auth-token")?;
//!     client.write_batch([("V0", 25.5), ("V1", 60.0)]).await?;
//!     println!("V0 = {:?}", client.virtual_read(0).await?);
//!     Ok(())
//! }
//! ```

mod config;
mod device;
mod error;
mod http;
mod router;
#[cfg(test)]
mod tests;
mod timer;
mod topic;
mod transport;
mod types;
pub mod util;

pub use config::{
    Config, DEFAULT_HTTP_PORT, DEFAULT_HTTP_SERVER, DEFAULT_KEEP_ALIVE, DEFAULT_PORT_TCP,
    DEFAULT_PORT_TLS, DEFAULT_RECONNECT_INTERVAL, DEFAULT_SERVER, DEVELOPMENT_HTTP_PORT,
    Transport,
};
pub use device::{DEFAULT_CONNECT_TIMEOUT, Device, Priority};
pub use error::{Error, Result};
pub use http::{HttpClient, HttpClientBuilder, quick_write};
pub use router::{PinHandler, PinHandlerFunc, PinMessage, Router};
pub use timer::{DEFAULT_TICK, MAX_TIMERS, Timer, TimerId};
pub use topic::{Topics, parse_command_topic};
pub use transport::{broker_host, client_id, mqtt_options};
pub use types::{ConnectionState, PinValue, QoS};
pub use util::{local_ip, version};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::{
        Config, ConnectionState, Device, Error, HttpClient, PinHandler, PinMessage, PinValue,
        Priority, Result, Timer, Transport,
    };
}
