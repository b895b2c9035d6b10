//! Small helpers shared by applications.

use std::net::{Ipv4Addr, UdpSocket};

use crate::error::{Error, Result};

/// Minimum length of a device auth token.
pub const MIN_TOKEN_LEN: usize = 20;

/// Library version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Address of the interface that routes to the internet, or `"localhost"`.
///
/// Useful where `localhost` is intercepted, e.g. WSL forwarding to Docker.
/// No packet is sent; connecting a UDP socket only selects a route.
pub fn local_ip() -> String {
    let detect = || -> std::io::Result<String> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip().to_string())
    };
    detect().unwrap_or_else(|_| "localhost".to_string())
}

/// Parse a pin name such as `"V5"` into its number.
pub fn parse_pin(pin: &str) -> Result<u8> {
    let mut chars = pin.chars();
    let kind = match chars.next() {
        Some(c) if pin.len() >= 2 => c,
        _ => return Err(Error::InvalidPin(format!("invalid pin: {}", pin))),
    };
    if !kind.eq_ignore_ascii_case(&'v') {
        return Err(Error::InvalidPin(format!(
            "invalid pin type {}: only virtual pins (V) are supported",
            kind
        )));
    }
    let number = chars.as_str();
    number
        .parse()
        .map_err(|_| Error::InvalidPin(format!("invalid pin number: {}", number)))
}

/// Format check only; says nothing about whether the server accepts it.
pub fn validate_auth_token(token: &str) -> bool {
    token.len() >= MIN_TOKEN_LEN
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    min.max(max.min(value))
}

/// Linear mapping between ranges, like Arduino's `map`.
///
/// A degenerate input range yields `out_min`.
pub fn map_range(value: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    if in_max == in_min {
        return out_min;
    }
    (value - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}
