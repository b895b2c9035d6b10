//! Commands that talk to the broker as the device.

use std::io::Write;

use clap::Args;
use vwire::{PinValue, Priority};

use super::{connect_device, flush_and_disconnect, get_context, print_info, print_success};
use crate::Cli;

/// Parses a CLI argument into the most specific pin value.
pub fn parse_value(s: &str) -> PinValue {
    if let Ok(i) = s.parse::<i64>() {
        return PinValue::Int(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() {
            return PinValue::Float(f);
        }
    }
    PinValue::Text(s.to_string())
}

/// Send values to a virtual pin.
#[derive(Args)]
pub struct SendCommand {
    /// Pin, as a number or V-name (5 or V5)
    pin: String,
    /// Values; several are sent as one comma separated payload
    #[arg(required = true)]
    values: Vec<String>,
}

impl SendCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let pin = parse_pin_arg(&self.pin)?;
        let ctx = get_context(cli)?;
        let device = connect_device(cli, &ctx).await?;

        let values: Vec<PinValue> = self.values.iter().map(|v| parse_value(v)).collect();
        device.virtual_send_all(pin, &values)?;
        flush_and_disconnect(&device).await?;

        print_success(&format!("V{} <- {}", pin, PinValue::join(&values)));
        Ok(())
    }
}

/// Print pin commands received from the dashboard until Ctrl-C.
#[derive(Args)]
pub struct ListenCommand {
    /// Pins to listen on (default: all)
    pins: Vec<String>,
    /// Ask the server to resend stored values after connecting
    #[arg(long)]
    sync: bool,
}

impl ListenCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let pins = if self.pins.is_empty() {
            (0..=u8::MAX).collect::<Vec<_>>()
        } else {
            self.pins
                .iter()
                .map(|p| parse_pin_arg(p))
                .collect::<anyhow::Result<Vec<_>>>()?
        };

        let ctx = get_context(cli)?;
        let device = vwire::Device::new(&ctx.token, &ctx.device_id, ctx.connection.clone());
        for pin in pins {
            device.on_virtual_receive(pin, |msg| {
                let mut out = std::io::stdout().lock();
                let _ = writeln!(
                    out,
                    "V{}\t{}",
                    msg.pin,
                    msg.as_str().unwrap_or("<binary>")
                );
                Ok(())
            });
        }
        device.on_disconnected(|| print_info("connection lost, waiting to reconnect"));

        device.connect(vwire::DEFAULT_CONNECT_TIMEOUT).await?;
        print_info(&format!("Listening as {} (Ctrl-C to stop)", ctx.device_id));

        if self.sync {
            device.sync_all()?;
        }

        device.run().await?;
        Ok(())
    }
}

/// Send a push notification.
#[derive(Args)]
pub struct NotifyCommand {
    message: String,
}

impl NotifyCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let device = connect_device(cli, &ctx).await?;
        device.notify(&self.message)?;
        flush_and_disconnect(&device).await?;
        print_success("Notification sent");
        Ok(())
    }
}

/// Raise an alarm in the mobile app.
#[derive(Args)]
pub struct AlarmCommand {
    message: String,
    /// Alarm sound
    #[arg(long, default_value = "default")]
    sound: String,
    /// Priority: 1 normal, 2 high, 3 critical
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=3))]
    priority: u8,
}

impl AlarmCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let device = connect_device(cli, &ctx).await?;
        device.alarm(&self.message, &self.sound, Priority::from(self.priority))?;
        flush_and_disconnect(&device).await?;
        print_success("Alarm sent");
        Ok(())
    }
}

/// Email the device owner.
#[derive(Args)]
pub struct EmailCommand {
    subject: String,
    body: String,
}

impl EmailCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let device = connect_device(cli, &ctx).await?;
        device.email(&self.subject, &self.body)?;
        flush_and_disconnect(&device).await?;
        print_success("Email queued");
        Ok(())
    }
}

/// Write a line to the device log.
#[derive(Args)]
pub struct LogCommand {
    message: String,
}

impl LogCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let device = connect_device(cli, &ctx).await?;
        device.log(&self.message)?;
        flush_and_disconnect(&device).await?;
        print_success("Log sent");
        Ok(())
    }
}

/// Accepts `5`, `V5` and `v5`.
pub fn parse_pin_arg(s: &str) -> anyhow::Result<u8> {
    match s.parse::<u8>() {
        Ok(pin) => Ok(pin),
        Err(_) => Ok(vwire::util::parse_pin(s)?),
    }
}
