//! CLI commands module.

mod cli_config;
mod config;
mod device;
mod http;
mod util;

pub use config::ConfigCommand;
pub use device::{AlarmCommand, EmailCommand, ListenCommand, LogCommand, NotifyCommand, SendCommand};
pub use http::HttpCommand;

// Re-export utils for use in commands
pub(crate) use util::*;
