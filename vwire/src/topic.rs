//! Topic layout for a device.
//!
//! Every topic lives under `vwire/{device_id}/`.

/// Topic prefix shared by all devices.
pub const TOPIC_ROOT: &str = "vwire";

/// Retained status payload published on connect.
pub const STATUS_ONLINE: &str = r#"{"status":"online"}"#;
/// Retained status payload published on disconnect and used as last will.
pub const STATUS_OFFLINE: &str = r#"{"status":"offline"}"#;

/// Topic builder scoped by device id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    device_id: String,
}

impl Topics {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn topic(&self, suffix: &str) -> String {
        format!("{}/{}/{}", TOPIC_ROOT, self.device_id, suffix)
    }

    /// Topic a pin value is published to.
    pub fn pin(&self, pin: u8) -> String {
        self.topic(&format!("pin/V{}", pin))
    }

    /// Topic requesting the server to resend one pin.
    pub fn sync_pin(&self, pin: u8) -> String {
        self.topic(&format!("sync/V{}", pin))
    }

    /// Topic requesting the server to resend every pin.
    pub fn sync_all(&self) -> String {
        self.topic("sync")
    }

    pub fn notify(&self) -> String {
        self.topic("notify")
    }

    pub fn alarm(&self) -> String {
        self.topic("alarm")
    }

    pub fn email(&self) -> String {
        self.topic("email")
    }

    pub fn log(&self) -> String {
        self.topic("log")
    }

    pub fn status(&self) -> String {
        self.topic("status")
    }

    /// Subscription filter for inbound pin commands.
    pub fn commands(&self) -> String {
        self.topic("cmd/#")
    }
}

/// Extracts the pin number from a command topic.
///
/// Accepts `vwire/{id}/cmd/5` as well as `vwire/{id}/cmd/V5`. Returns `None`
/// for topics that are not pin commands.
pub fn parse_command_topic(topic: &str) -> Option<u8> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() < 4 || parts[2] != "cmd" {
        return None;
    }

    let pin = parts[3];
    let digits = match pin.strip_prefix(['V', 'v']) {
        Some(rest) => rest,
        None => pin,
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topics() {
        let t = Topics::new("VW-ABC123");
        assert_eq!(t.pin(0), "vwire/VW-ABC123/pin/V0");
        assert_eq!(t.sync_pin(7), "vwire/VW-ABC123/sync/V7");
        assert_eq!(t.sync_all(), "vwire/VW-ABC123/sync");
        assert_eq!(t.notify(), "vwire/VW-ABC123/notify");
        assert_eq!(t.alarm(), "vwire/VW-ABC123/alarm");
        assert_eq!(t.email(), "vwire/VW-ABC123/email");
        assert_eq!(t.log(), "vwire/VW-ABC123/log");
        assert_eq!(t.status(), "vwire/VW-ABC123/status");
        assert_eq!(t.commands(), "vwire/VW-ABC123/cmd/#");
    }

    #[test]
    fn test_parse_command_topic() {
        assert_eq!(parse_command_topic("vwire/dev/cmd/V5"), Some(5));
        assert_eq!(parse_command_topic("vwire/dev/cmd/v12"), Some(12));
        assert_eq!(parse_command_topic("vwire/dev/cmd/3"), Some(3));
        assert_eq!(parse_command_topic("vwire/dev/cmd/V255/extra"), Some(255));
    }

    #[test]
    fn test_parse_command_topic_rejects() {
        assert_eq!(parse_command_topic("vwire/dev/cmd"), None);
        assert_eq!(parse_command_topic("vwire/dev/pin/V1"), None);
        assert_eq!(parse_command_topic("vwire/dev/cmd/D4"), None);
        assert_eq!(parse_command_topic("vwire/dev/cmd/V"), None);
        assert_eq!(parse_command_topic("vwire/dev/cmd/Vx1"), None);
        assert_eq!(parse_command_topic("vwire/dev/cmd/V256"), None);
    }
}
