//! Server configuration management.
//!
//! Configuration is stored as TOML at `$SYSTEK_CONFIG`, or else
//! `~/.config/systek/server.toml` (`%APPDATA%/systek/server.toml` on Windows).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use systek_net::ConnectionConfig;
use systek_protocol::constants::DEFAULT_PORT;
use systek_server::{ListenerConfig, MemoryMachineStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared secret accepted from hosts without their own entry.
    #[serde(default)]
    pub auth_key: String,

    #[serde(default = "default_interval_ms")]
    pub sync_timeout_ms: u64,

    #[serde(default = "default_interval_ms")]
    pub frame_timeout_ms: u64,

    /// How often disconnected machines are dropped from the registry.
    #[serde(default = "default_interval_ms")]
    pub prune_interval_ms: u64,

    #[serde(default)]
    pub verbose: bool,

    /// JSON object of per-host auth keys, read at startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machines_file: Option<PathBuf>,

    /// Per-host auth keys (hostname -> key). Entries here win over
    /// `machines_file`.
    #[serde(default)]
    pub machines: HashMap<String, String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_interval_ms() -> u64 {
    5_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            auth_key: String::new(),
            sync_timeout_ms: default_interval_ms(),
            frame_timeout_ms: default_interval_ms(),
            prune_interval_ms: default_interval_ms(),
            verbose: false,
            machines_file: None,
            machines: HashMap::new(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            connection: ConnectionConfig {
                sync_timeout: Duration::from_millis(self.sync_timeout_ms),
                frame_timeout: Duration::from_millis(self.frame_timeout_ms),
                verbose: self.verbose,
            },
            ..ListenerConfig::new(self.port)
        }
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_millis(self.prune_interval_ms)
    }

    pub fn machine_store(&self) -> anyhow::Result<MemoryMachineStore> {
        let store = match &self.machines_file {
            Some(path) => MemoryMachineStore::load(path)?,
            None => MemoryMachineStore::new(),
        };
        for (hostname, key) in &self.machines {
            store.insert(hostname.clone(), key.clone());
        }
        Ok(store)
    }
}

fn config_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = std::env::var_os("SYSTEK_CONFIG") {
        return Ok(PathBuf::from(path));
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("systek").join("server.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("systek")
            .join("server.toml"))
    }
}
