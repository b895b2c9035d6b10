//! Configuration management commands.

use clap::{Args, Subcommand};

use vwire::{DEFAULT_PORT_TCP, DEFAULT_PORT_TLS, Transport};

use super::cli_config::{Context, mask_token};
use super::{get_config, print_success, print_warning};
use crate::Cli;

/// Manage CLI configuration.
///
/// Contexts hold one device each (token, device id, broker settings).
///
/// Configuration is stored in ~/.vwire/config.yaml
#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    command: ConfigSubcommand,
}

#[derive(Subcommand)]
enum ConfigSubcommand {
    /// Add a new context
    #[command(name = "add-context")]
    AddContext {
        /// Context name
        name: String,
        /// Device auth token (required)
        #[arg(long)]
        token: String,
        /// Device id (required)
        #[arg(long)]
        device_id: String,
        /// Broker hostname
        #[arg(long)]
        server: Option<String>,
        /// Broker port (default depends on transport)
        #[arg(long)]
        port: Option<u16>,
        /// HTTP API port
        #[arg(long)]
        http_port: Option<u16>,
        /// Transport: tcp_tls, tcp, wss, ws
        #[arg(long)]
        transport: Option<String>,
        /// Skip broker certificate verification
        #[arg(long)]
        insecure: bool,
    },
    /// Delete a context
    #[command(name = "delete-context")]
    DeleteContext {
        /// Context name
        name: String,
    },
    /// Set the current context
    #[command(name = "use-context")]
    UseContext {
        /// Context name
        name: String,
    },
    /// Display the current context
    #[command(name = "get-context")]
    GetContext,
    /// List all contexts
    #[command(name = "list-contexts", alias = "get-contexts")]
    ListContexts,
    /// View the current configuration
    View,
}

impl ConfigCommand {
    pub async fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        match &self.command {
            ConfigSubcommand::AddContext {
                name,
                token,
                device_id,
                server,
                port,
                http_port,
                transport,
                insecure,
            } => {
                if !vwire::util::validate_auth_token(token) {
                    print_warning("token does not look like a device auth token");
                }

                let mut cfg = get_config(cli)?;
                let mut connection = vwire::Config::default();
                if let Some(server) = server {
                    connection.server = server.clone();
                }
                if let Some(transport) = transport {
                    connection.transport = transport.parse()?;
                }
                connection.port = port.unwrap_or(match connection.transport {
                    Transport::TcpTls => DEFAULT_PORT_TLS,
                    Transport::Tcp => DEFAULT_PORT_TCP,
                    Transport::WebSocketTls => 443,
                    Transport::WebSocket => 80,
                });
                if let Some(http_port) = http_port {
                    connection.http_port = *http_port;
                }
                connection.verify_tls = !insecure;

                let ctx = Context {
                    token: token.clone(),
                    device_id: device_id.clone(),
                    connection,
                    ..Default::default()
                };

                cfg.add_context(name, ctx)?;
                print_success(&format!("Context \"{}\" added successfully", name));
                Ok(())
            }

            ConfigSubcommand::DeleteContext { name } => {
                let mut cfg = get_config(cli)?;
                cfg.delete_context(name)?;
                print_success(&format!("Context \"{}\" deleted", name));
                Ok(())
            }

            ConfigSubcommand::UseContext { name } => {
                let mut cfg = get_config(cli)?;
                cfg.use_context(name)?;
                print_success(&format!("Switched to context \"{}\"", name));
                Ok(())
            }

            ConfigSubcommand::GetContext => {
                let cfg = get_config(cli)?;
                if cfg.current_context.is_empty() {
                    println!("No current context set");
                } else {
                    println!("{}", cfg.current_context);
                }
                Ok(())
            }

            ConfigSubcommand::ListContexts => {
                let cfg = get_config(cli)?;

                if cfg.contexts.is_empty() {
                    println!("No contexts configured");
                    return Ok(());
                }

                println!("{:<8} {:<20} {:<16} {}", "CURRENT", "NAME", "DEVICE", "SERVER");

                for name in cfg.list_contexts() {
                    let Some(ctx) = cfg.contexts.get(name) else {
                        continue;
                    };
                    let current = if name == cfg.current_context { "*" } else { "" };
                    println!(
                        "{:<8} {:<20} {:<16} {}:{}",
                        current, name, ctx.device_id, ctx.connection.server, ctx.connection.port
                    );
                }

                Ok(())
            }

            ConfigSubcommand::View => {
                let cfg = get_config(cli)?;

                println!("Config file: {}", cfg.path().display());
                println!("Current context: {}", cfg.current_context);
                println!("Contexts: {}", cfg.contexts.len());

                if !cfg.contexts.is_empty() {
                    println!("\nContext details:");

                    for name in cfg.list_contexts() {
                        let Some(ctx) = cfg.contexts.get(name) else {
                            continue;
                        };
                        println!("\n  {}:", name);
                        println!("    Token: {}", mask_token(&ctx.token));
                        println!("    Device: {}", ctx.device_id);
                        println!("    Connection: {}", ctx.connection);
                        println!("    Transport: {}", ctx.connection.transport);
                        if ctx.connection.max_reconnect_attempts > 0 {
                            println!(
                                "    Reconnect: every {}s, up to {} attempts",
                                ctx.connection.reconnect_interval,
                                ctx.connection.max_reconnect_attempts
                            );
                        }
                    }
                }

                Ok(())
            }
        }
    }
}
