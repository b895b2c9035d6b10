//! Common types for Vwire.

use std::fmt;

/// MQTT Quality of Service level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QoS {
    /// At most once delivery (fire and forget).
    #[default]
    AtMostOnce = 0,
    /// At least once delivery (acknowledged delivery).
    AtLeastOnce = 1,
    /// Exactly once delivery (assured delivery).
    ExactlyOnce = 2,
}

impl From<QoS> for rumqttc::QoS {
    fn from(qos: QoS) -> Self {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

impl From<rumqttc::QoS> for QoS {
    fn from(qos: rumqttc::QoS) -> Self {
        match qos {
            rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
            rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
            rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

impl From<u8> for QoS {
    fn from(v: u8) -> Self {
        match v {
            1 => QoS::AtLeastOnce,
            2 => QoS::ExactlyOnce,
            _ => QoS::AtMostOnce,
        }
    }
}

/// Connection state of a [`Device`](crate::Device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        };
        f.write_str(s)
    }
}

/// A value written to a virtual pin.
///
/// The wire format matches the embedded library: booleans become `1`/`0`,
/// floats are printed with at most four decimals and no trailing zeros.
#[derive(Debug, Clone, PartialEq)]
pub enum PinValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PinValue {
    /// Joins several values into one comma separated payload.
    pub fn join(values: &[PinValue]) -> String {
        values
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for PinValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinValue::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            PinValue::Int(i) => write!(f, "{}", i),
            PinValue::Float(v) if v.is_nan() => f.write_str("nan"),
            PinValue::Float(v) if v.is_infinite() => {
                f.write_str(if *v > 0.0 { "inf" } else { "-inf" })
            }
            PinValue::Float(v) => {
                let text = format!("{:.4}", v);
                let text = text.trim_end_matches('0').trim_end_matches('.');
                match text {
                    "" | "-" | "-0" => f.write_str("0"),
                    t => f.write_str(t),
                }
            }
            PinValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for PinValue {
    fn from(v: bool) -> Self {
        PinValue::Bool(v)
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for PinValue {
            fn from(v: $t) -> Self {
                PinValue::Int(v as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<f32> for PinValue {
    fn from(v: f32) -> Self {
        PinValue::Float(v as f64)
    }
}

impl From<f64> for PinValue {
    fn from(v: f64) -> Self {
        PinValue::Float(v)
    }
}

impl From<&str> for PinValue {
    fn from(v: &str) -> Self {
        PinValue::Text(v.to_string())
    }
}

impl From<String> for PinValue {
    fn from(v: String) -> Self {
        PinValue::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_format() {
        assert_eq!(PinValue::from(true).to_string(), "1");
        assert_eq!(PinValue::from(false).to_string(), "0");
    }

    #[test]
    fn test_float_format() {
        assert_eq!(PinValue::from(25.5).to_string(), "25.5");
        assert_eq!(PinValue::from(3.0).to_string(), "3");
        assert_eq!(PinValue::from(0.0).to_string(), "0");
        assert_eq!(PinValue::from(1.23456).to_string(), "1.2346");
        assert_eq!(PinValue::from(-0.00001).to_string(), "0");
        assert_eq!(PinValue::from(-2.5).to_string(), "-2.5");
    }

    #[test]
    fn test_non_finite_float_format() {
        assert_eq!(PinValue::from(f64::NAN).to_string(), "nan");
        assert_eq!(PinValue::from(f64::INFINITY).to_string(), "inf");
        assert_eq!(PinValue::from(f64::NEG_INFINITY).to_string(), "-inf");
    }

    #[test]
    fn test_join() {
        let values = vec![PinValue::from(1), PinValue::from(2.5), PinValue::from("on")];
        assert_eq!(PinValue::join(&values), "1,2.5,on");
    }

    #[test]
    fn test_qos_from_u8() {
        assert_eq!(QoS::from(0u8), QoS::AtMostOnce);
        assert_eq!(QoS::from(1u8), QoS::AtLeastOnce);
        assert_eq!(QoS::from(2u8), QoS::ExactlyOnce);
        assert_eq!(QoS::from(255u8), QoS::AtMostOnce);
    }

    #[test]
    fn test_qos_conversion() {
        assert_eq!(rumqttc::QoS::from(QoS::AtLeastOnce), rumqttc::QoS::AtLeastOnce);
        assert_eq!(QoS::from(rumqttc::QoS::ExactlyOnce), QoS::ExactlyOnce);
    }
}
