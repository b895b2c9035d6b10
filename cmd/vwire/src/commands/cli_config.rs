//! CLI configuration file.
//!
//! Configuration is stored in ~/.vwire/config.yaml and holds named device
//! contexts, similar to kubectl's context management.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_BASE_DIR: &str = ".vwire";
const DEFAULT_CONFIG_FILE: &str = "config.yaml";

/// CLI configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_context: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub contexts: HashMap<String, Context>,

    #[serde(skip)]
    config_path: PathBuf,
}

/// One device: its token, id and connection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Device auth token.
    pub token: String,

    /// Device id used in topic names.
    pub device_id: String,

    /// Broker and HTTP API settings.
    #[serde(default)]
    pub connection: vwire::Config,
}

impl Config {
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(DEFAULT_BASE_DIR).join(DEFAULT_CONFIG_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(&self.config_path, content)?;
        Ok(())
    }

    /// Adds or replaces a context. The first context becomes current.
    pub fn add_context(&mut self, name: &str, mut ctx: Context) -> anyhow::Result<()> {
        ctx.name = name.to_string();
        self.contexts.insert(name.to_string(), ctx);
        if self.current_context.is_empty() {
            self.current_context = name.to_string();
        }
        self.save()
    }

    pub fn delete_context(&mut self, name: &str) -> anyhow::Result<()> {
        if self.contexts.remove(name).is_none() {
            anyhow::bail!("context '{}' not found", name);
        }
        if self.current_context == name {
            self.current_context.clear();
        }
        self.save()
    }

    pub fn use_context(&mut self, name: &str) -> anyhow::Result<()> {
        if !self.contexts.contains_key(name) {
            anyhow::bail!("context '{}' not found", name);
        }
        self.current_context = name.to_string();
        self.save()
    }

    pub fn get_current_context(&self) -> Option<&Context> {
        if self.current_context.is_empty() {
            return None;
        }
        self.contexts.get(&self.current_context)
    }

    /// Resolves the context by name, or current context if name is empty.
    pub fn resolve_context(&self, name: Option<&str>) -> Option<&Context> {
        match name {
            Some(n) if !n.is_empty() => self.contexts.get(n),
            _ => self.get_current_context(),
        }
    }

    /// Context names, sorted.
    pub fn list_contexts(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.contexts.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Loads the configuration, creating an empty file on first use.
pub fn load_config(custom_path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = match custom_path {
        Some(p) => PathBuf::from(p),
        None => Config::default_config_path()
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path"))?,
    };

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut cfg = if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)?;
        serde_yaml::from_str(&content)?
    } else {
        let cfg = Config::default();
        let content = serde_yaml::to_string(&cfg)?;
        std::fs::write(&config_path, content)?;
        cfg
    };

    cfg.config_path = config_path;
    Ok(cfg)
}

/// Masks a token for display.
pub fn mask_token(token: &str) -> String {
    if token.len() <= 8 {
        "*".repeat(token.len())
    } else {
        format!(
            "{}{}{}",
            &token[..4],
            "*".repeat(token.len() - 8),
            &token[token.len() - 4..]
        )
    }
}
