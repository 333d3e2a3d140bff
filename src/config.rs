use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_COMMAND_PORT: u16 = 9000;
pub const DEFAULT_STATUS_PORT: u16 = DEFAULT_COMMAND_PORT + 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub toolkit: ToolkitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_host")]
    pub bind_host: String,
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    #[serde(default = "default_status_port")]
    pub status_port: u16,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: default_bind_host(),
            command_port: default_command_port(),
            status_port: default_status_port(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeysConfig {
    #[serde(default = "default_keys_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_key_file")]
    pub key_file: String,
    #[serde(default = "default_cert_file")]
    pub cert_file: String,
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            dir: default_keys_dir(),
            key_file: default_key_file(),
            cert_file: default_cert_file(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolkitConfig {
    #[serde(default)]
    pub launcher: Option<PathBuf>,
}

/// One listening endpoint: plaintext when `tls` is empty, TLS otherwise.
/// Two instances exist for the process lifetime, status and command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub port: u16,
    pub tls: Option<TlsMaterial>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_owned()
}

fn default_command_port() -> u16 {
    DEFAULT_COMMAND_PORT
}

fn default_status_port() -> u16 {
    DEFAULT_STATUS_PORT
}

fn default_event_queue_capacity() -> usize {
    32
}

fn default_keys_dir() -> PathBuf {
    PathBuf::from("resources/keys")
}

fn default_key_file() -> String {
    "server.key".to_owned()
}

fn default_cert_file() -> String {
    "server.crt".to_owned()
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut cfg = if path.exists() {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed reading config file {}", path.display()))?;
            toml::from_str::<BridgeConfig>(&text)
                .with_context(|| format!("failed parsing TOML config {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("TANK_PORT") {
            if let Ok(port) = v.trim().parse::<u16>() {
                self.server.command_port = port;
            }
        }
        if let Ok(v) = env::var("TANK_PORT_STATUS") {
            if let Ok(port) = v.trim().parse::<u16>() {
                self.server.status_port = port;
            }
        }
        if let Ok(v) = env::var("TANK_DESKTOP_CERTIFICATE") {
            let trimmed = v.trim();
            if !trimmed.is_empty() {
                self.keys.dir = PathBuf::from(trimmed);
            }
        }
        if let Ok(v) = env::var("SHOTGUN_PLUGIN_LAUNCHER") {
            let trimmed = v.trim();
            self.toolkit.launcher = if trimmed.is_empty() {
                None
            } else {
                Some(PathBuf::from(trimmed))
            };
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.bind_host.trim().is_empty() {
            bail!("server.bind_host must not be empty");
        }
        if self.server.command_port == self.server.status_port {
            bail!(
                "command and status channels must use distinct ports (both set to {})",
                self.server.command_port
            );
        }
        if self.keys.key_file.trim().is_empty() || self.keys.cert_file.trim().is_empty() {
            bail!("keys.key_file and keys.cert_file must not be empty");
        }
        Ok(())
    }

    pub fn status_channel(&self) -> ChannelConfig {
        ChannelConfig {
            port: self.server.status_port,
            tls: None,
        }
    }

    pub fn command_channel(&self) -> ChannelConfig {
        ChannelConfig {
            port: self.server.command_port,
            tls: Some(TlsMaterial {
                key_path: self.keys.dir.join(&self.keys.key_file),
                cert_path: self.keys.dir.join(&self.keys.cert_file),
            }),
        }
    }
}
