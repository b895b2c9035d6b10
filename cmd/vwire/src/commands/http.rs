//! HTTP API commands.

use clap::{Args, Subcommand};

use super::device::{parse_pin_arg, parse_value};
use super::{create_http_client, get_context, print_success, print_warning};
use crate::Cli;

/// Pin access over the REST API, without an MQTT connection.
#[derive(Args)]
pub struct HttpCommand {
    #[command(subcommand)]
    command: HttpSubcommand,
}

#[derive(Subcommand)]
enum HttpSubcommand {
    /// Write one or more pins: `V0=25.5 V1=on`
    Write {
        #[arg(required = true)]
        pairs: Vec<String>,
    },
    /// Read the stored value of a pin
    Read { pin: String },
    /// Show device information
    Info,
    /// Check that the API is reachable
    Ping,
}

impl HttpCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let ctx = get_context(cli)?;
        let client = create_http_client(cli, &ctx)?;

        match &self.command {
            HttpSubcommand::Write { pairs } => {
                let values = pairs
                    .iter()
                    .map(|p| parse_pair(p))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                let count = values.len();
                client
                    .write_batch(values.into_iter().map(|(pin, v)| (pin, parse_value(&v))))
                    .await?;
                print_success(&format!("{} pin(s) written", count));
                Ok(())
            }
            HttpSubcommand::Read { pin } => {
                let pin = parse_pin_arg(pin)?;
                match client.virtual_read(pin).await? {
                    Some(value) => println!("{}", value),
                    None => print_warning(&format!("V{} has no value", pin)),
                }
                Ok(())
            }
            HttpSubcommand::Info => {
                let info = client.device_info().await?;
                println!("{}", serde_json::to_string_pretty(&info)?);
                Ok(())
            }
            HttpSubcommand::Ping => {
                if client.ping().await {
                    print_success(&format!("{} is reachable", client.base_url()));
                    Ok(())
                } else {
                    anyhow::bail!("{} is not reachable", client.base_url())
                }
            }
        }
    }
}

/// Splits `V0=25.5` into a normalized pin name and the raw value.
fn parse_pair(s: &str) -> anyhow::Result<(String, String)> {
    let Some((pin, value)) = s.split_once('=') else {
        anyhow::bail!("expected PIN=VALUE, got '{}'", s);
    };
    let pin = parse_pin_arg(pin.trim())?;
    Ok((format!("V{}", pin), value.to_string()))
}
