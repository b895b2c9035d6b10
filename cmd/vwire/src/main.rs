//! Vwire CLI - drive a Vwire device from the command line.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{
    AlarmCommand, ConfigCommand, EmailCommand, HttpCommand, ListenCommand, LogCommand,
    NotifyCommand, SendCommand,
};

/// Vwire CLI - act as a Vwire device from the command line.
///
/// Publish pin values, watch dashboard commands, send notifications and
/// alarms over MQTT, or use the REST API when MQTT is not available.
///
/// Configuration is stored in ~/.vwire/ and supports multiple contexts,
/// similar to kubectl's context management.
#[derive(Parser)]
#[command(name = "vwire")]
#[command(about = "Vwire IoT device CLI tool")]
#[command(version)]
pub struct Cli {
    /// Config file (default is ~/.vwire/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Context name to use
    #[arg(short = 'c', long, global = true)]
    pub context: Option<String>,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage CLI configuration
    Config(ConfigCommand),
    /// Send values to a virtual pin
    Send(SendCommand),
    /// Print pin commands from the dashboard
    Listen(ListenCommand),
    /// Send a push notification
    Notify(NotifyCommand),
    /// Raise an alarm
    Alarm(AlarmCommand),
    /// Email the device owner
    Email(EmailCommand),
    /// Write to the device log
    Log(LogCommand),
    /// Pin access over the HTTP API
    Http(HttpCommand),
    /// Print the outbound local IP address
    #[command(name = "local-ip")]
    LocalIp,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise -v or a debug context enables library output.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let debug = cli.verbose || commands::context_debug(&cli);
        EnvFilter::new(if debug { "vwire=debug,info" } else { "warn" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match &cli.command {
        Commands::Config(cmd) => cmd.run(&cli).await,
        Commands::Send(cmd) => cmd.run(&cli).await,
        Commands::Listen(cmd) => cmd.run(&cli).await,
        Commands::Notify(cmd) => cmd.run(&cli).await,
        Commands::Alarm(cmd) => cmd.run(&cli).await,
        Commands::Email(cmd) => cmd.run(&cli).await,
        Commands::Log(cmd) => cmd.run(&cli).await,
        Commands::Http(cmd) => cmd.run(&cli).await,
        Commands::LocalIp => {
            println!("{}", vwire::local_ip());
            Ok(())
        }
    }
}
