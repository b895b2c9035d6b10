//! Utility functions for CLI commands.

use std::time::Duration;

use tracing::debug;
use vwire::{Device, HttpClient};

use super::cli_config::{Config, Context, load_config};
use crate::Cli;

/// Gets the global configuration.
pub fn get_config(cli: &Cli) -> anyhow::Result<Config> {
    load_config(cli.config.as_deref())
}

/// Gets the context configuration to use.
pub fn get_context(cli: &Cli) -> anyhow::Result<Context> {
    let cfg = get_config(cli)?;

    match cfg.resolve_context(cli.context.as_deref()) {
        Some(ctx) => Ok(ctx.clone()),
        None => match cli.context.as_deref() {
            None => anyhow::bail!(
                "no context specified. Use -c flag or set a default context with 'vwire config use-context'"
            ),
            Some(name) => anyhow::bail!("context '{}' not found", name),
        },
    }
}

/// Whether the selected context asks for debug logging.
pub fn context_debug(cli: &Cli) -> bool {
    get_context(cli)
        .map(|ctx| ctx.connection.debug)
        .unwrap_or(false)
}

/// Connects a device for the context.
pub async fn connect_device(cli: &Cli, ctx: &Context) -> anyhow::Result<Device> {
    print_verbose(cli, &format!("Using context: {}", ctx.name));
    print_verbose(cli, &format!("Connection: {}", ctx.connection));

    let device = Device::new(&ctx.token, &ctx.device_id, ctx.connection.clone());
    device.connect(vwire::DEFAULT_CONNECT_TIMEOUT).await?;
    debug!("connected as {}", ctx.device_id);
    Ok(device)
}

/// Gives queued publishes time to reach the broker, then disconnects.
pub async fn flush_and_disconnect(device: &Device) -> anyhow::Result<()> {
    tokio::time::sleep(Duration::from_millis(200)).await;
    device.disconnect().await?;
    Ok(())
}

/// HTTP client for the context.
pub fn create_http_client(cli: &Cli, ctx: &Context) -> anyhow::Result<HttpClient> {
    print_verbose(cli, &format!("Using context: {}", ctx.name));
    let device = Device::new(&ctx.token, &ctx.device_id, ctx.connection.clone());
    Ok(device.http_fallback()?)
}

/// Prints verbose message.
pub fn print_verbose(cli: &Cli, msg: &str) {
    if cli.verbose {
        eprintln!("[verbose] {}", msg);
    }
}

/// Prints success message.
pub fn print_success(msg: &str) {
    eprintln!("\x1b[32m✓\x1b[0m {}", msg);
}

/// Prints info message.
pub fn print_info(msg: &str) {
    eprintln!("\x1b[34mℹ\x1b[0m {}", msg);
}

/// Prints warning message.
pub fn print_warning(msg: &str) {
    eprintln!("\x1b[33m⚠\x1b[0m {}", msg);
}
