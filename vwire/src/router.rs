//! Routing of inbound pin commands.
//!
//! The broker delivers dashboard writes on `vwire/{id}/cmd/{pin}`. The router
//! keeps the last value of every pin and forwards each command to the handler
//! registered for its pin.

use crate::error::Result;
use crate::topic::parse_command_topic;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// A value received for a virtual pin.
#[derive(Debug, Clone)]
pub struct PinMessage {
    /// Topic the command was published to.
    pub topic: String,
    /// Virtual pin number.
    pub pin: u8,
    /// Raw payload.
    pub payload: Bytes,
    /// Retain flag.
    pub retain: bool,
}

impl PinMessage {
    /// Create a new pin message.
    pub fn new(topic: impl Into<String>, pin: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            pin,
            payload: payload.into(),
            retain: false,
        }
    }

    /// Payload as text, if valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Payload split on commas, for multi-value pins.
    pub fn values(&self) -> Vec<&str> {
        self.as_str().map(|s| s.split(',').collect()).unwrap_or_default()
    }

    /// Payload parsed as a number.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_str()?.trim().parse().ok()
    }

    /// Payload interpreted as a switch state (`1`, `true`, `on`).
    pub fn as_bool(&self) -> bool {
        matches!(
            self.as_str().map(|s| s.trim().to_ascii_lowercase()).as_deref(),
            Some("1" | "true" | "on")
        )
    }
}

/// Handler trait for pin commands.
pub trait PinHandler: Send + Sync {
    fn handle_pin(&self, msg: &PinMessage) -> Result<()>;
}

/// Handler function type.
pub type PinHandlerFunc = dyn Fn(&PinMessage) -> Result<()> + Send + Sync;

struct FnHandler {
    f: Box<PinHandlerFunc>,
}

impl PinHandler for FnHandler {
    fn handle_pin(&self, msg: &PinMessage) -> Result<()> {
        (self.f)(msg)
    }
}

/// Pin command router.
#[derive(Default)]
pub struct Router {
    handlers: RwLock<HashMap<u8, Arc<dyn PinHandler>>>,
    values: RwLock<HashMap<u8, String>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler function for a pin, replacing any previous one.
    pub fn handle_func<F>(&self, pin: u8, f: F)
    where
        F: Fn(&PinMessage) -> Result<()> + Send + Sync + 'static,
    {
        self.handle(pin, Arc::new(FnHandler { f: Box::new(f) }));
    }

    /// Register a handler for a pin, replacing any previous one.
    pub fn handle(&self, pin: u8, handler: Arc<dyn PinHandler>) {
        if self.handlers.write().insert(pin, handler).is_some() {
            debug!("replaced handler for V{}", pin);
        }
    }

    /// Remove the handler for a pin.
    pub fn remove(&self, pin: u8) -> bool {
        self.handlers.write().remove(&pin).is_some()
    }

    /// Check if a pin has a handler.
    pub fn has_handler(&self, pin: u8) -> bool {
        self.handlers.read().contains_key(&pin)
    }

    /// Last value received for a pin.
    pub fn value(&self, pin: u8) -> Option<String> {
        self.values.read().get(&pin).cloned()
    }

    /// Route one inbound publish.
    ///
    /// Returns the pin that was updated, or `None` if the topic was not a pin
    /// command. Handler failures are logged and do not abort routing.
    pub fn dispatch(&self, topic: &str, payload: &[u8], retain: bool) -> Option<u8> {
        let Some(pin) = parse_command_topic(topic) else {
            debug!("ignoring message on {}", topic);
            return None;
        };

        let Ok(value) = std::str::from_utf8(payload) else {
            warn!("dropping non UTF-8 payload for V{}", pin);
            return None;
        };

        debug!("V{} <- {}", pin, value);
        self.values.write().insert(pin, value.to_string());

        // Clone out so the handler can register or remove handlers.
        let handler = self.handlers.read().get(&pin).cloned();
        if let Some(handler) = handler {
            let msg = PinMessage {
                topic: topic.to_string(),
                pin,
                payload: Bytes::copy_from_slice(payload),
                retain,
            };
            if let Err(e) = handler.handle_pin(&msg) {
                error!("handler for V{} failed: {}", pin, e);
            }
        }

        Some(pin)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pins: Vec<u8> = self.handlers.read().keys().copied().collect();
        pins.sort_unstable();
        write!(f, "Router {{ pins: {:?} }}", pins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_calls_handler() {
        let router = Router::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        router.handle_func(0, move |msg| {
            assert_eq!(msg.as_str(), Some("42"));
            counter_clone.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(router.dispatch("vwire/dev/cmd/V0", b"42", false), Some(0));
        assert_eq!(router.dispatch("vwire/dev/cmd/0", b"42", false), Some(0));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dispatch_stores_value_without_handler() {
        let router = Router::new();
        router.dispatch("vwire/dev/cmd/V3", b"on", false);
        assert_eq!(router.value(3).as_deref(), Some("on"));
        assert!(router.value(4).is_none());
    }

    #[test]
    fn test_dispatch_ignores_other_topics() {
        let router = Router::new();
        assert_eq!(router.dispatch("vwire/dev/status", b"x", true), None);
        assert_eq!(router.dispatch("vwire/dev/cmd/Vx", b"x", false), None);
    }

    #[test]
    fn test_handler_error_is_contained() {
        let router = Router::new();
        router.handle_func(1, |_| Err(Error::Handler("boom".into())));
        assert_eq!(router.dispatch("vwire/dev/cmd/V1", b"1", false), Some(1));
        assert_eq!(router.value(1).as_deref(), Some("1"));
    }

    #[test]
    fn test_replace_handler() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));

        router.handle_func(2, |_| Ok(()));
        let h = hits.clone();
        router.handle_func(2, move |_| {
            h.fetch_add(10, Ordering::SeqCst);
            Ok(())
        });

        router.dispatch("vwire/dev/cmd/V2", b"1", false);
        assert_eq!(hits.load(Ordering::SeqCst), 10);
        assert!(router.remove(2));
        assert!(!router.has_handler(2));
    }

    #[test]
    fn test_pin_message_helpers() {
        let msg = PinMessage::new("vwire/dev/cmd/V0", 0, "12.5");
        assert_eq!(msg.as_f64(), Some(12.5));
        assert!(!msg.as_bool());

        let msg = PinMessage::new("vwire/dev/cmd/V0", 0, "ON");
        assert!(msg.as_bool());

        let msg = PinMessage::new("vwire/dev/cmd/V0", 0, "255,128,0");
        assert_eq!(msg.values(), vec!["255", "128", "0"]);
    }
}
