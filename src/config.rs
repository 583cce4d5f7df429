//! Server configuration: bind address, shared-directory root, server
//! display name, and the handful of tunables the distilled spec leaves
//! to "sanity" (max packet size, max upload size).
//!
//! Loaded from a small TOML file via `serde`, in the spirit of the
//! teacher's `CommyConfig`, but flattened — this crate has one server,
//! not a mesh of transports.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ServerError, ServerResult};
use crate::protocol::DEFAULT_MAX_PACKET_SIZE;

pub const DEFAULT_DISCOVERY_PORT: u16 = 57777;
pub const DEFAULT_MAX_TRANSFER_SIZE: u64 = 1024 * 1024 * 1024; // 1 GiB

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Display name advertised over UDP discovery. Alphanumerics and `-`.
    pub server_name: String,

    /// Address the TCP control listener binds to, e.g. `0.0.0.0:2277`.
    pub bind_address: String,

    /// IPv4 address advertised in discovery responses.
    pub advertise_ip: String,

    /// Root of the shared directory. Must exist at startup.
    pub share_dir: PathBuf,

    /// Path to the CSV-shaped user list.
    pub user_list_path: PathBuf,

    #[serde(default = "default_discovery_port")]
    pub discovery_port: u16,

    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: u32,

    #[serde(default = "default_max_transfer_size")]
    pub max_transfer_size: u64,
}

fn default_discovery_port() -> u16 {
    DEFAULT_DISCOVERY_PORT
}

fn default_max_packet_size() -> u32 {
    DEFAULT_MAX_PACKET_SIZE
}

fn default_max_transfer_size() -> u64 {
    DEFAULT_MAX_TRANSFER_SIZE
}

impl ServerConfig {
    pub fn from_toml_file(path: &Path) -> ServerResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| ServerError::Config(format!("reading config {path:?}: {e}")))?;
        let cfg: ServerConfig =
            toml::from_str(&text).map_err(|e| ServerError::Config(format!("parsing config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> ServerResult<()> {
        if !self
            .server_name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
            || self.server_name.is_empty()
        {
            return Err(ServerError::Config(format!(
                "server_name `{}` must be non-empty alphanumerics and `-`",
                self.server_name
            )));
        }
        if !self.share_dir.is_dir() {
            return Err(ServerError::ShareDirMissing {
                path: self.share_dir.clone(),
            });
        }
        Ok(())
    }

    /// The shared directory resolved to an absolute, canonical path —
    /// the root every client-supplied path is resolved against.
    pub fn share_root(&self) -> ServerResult<PathBuf> {
        self.share_dir
            .canonicalize()
            .map_err(|e| ServerError::io(e, "canonicalizing share_dir"))
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    server_name: Option<String>,
    bind_address: Option<String>,
    advertise_ip: Option<String>,
    share_dir: Option<PathBuf>,
    user_list_path: Option<PathBuf>,
    discovery_port: Option<u16>,
    max_packet_size: Option<u32>,
    max_transfer_size: Option<u64>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server_name(mut self, v: impl Into<String>) -> Self {
        self.server_name = Some(v.into());
        self
    }

    pub fn bind_address(mut self, v: impl Into<String>) -> Self {
        self.bind_address = Some(v.into());
        self
    }

    pub fn advertise_ip(mut self, v: impl Into<String>) -> Self {
        self.advertise_ip = Some(v.into());
        self
    }

    pub fn share_dir(mut self, v: impl Into<PathBuf>) -> Self {
        self.share_dir = Some(v.into());
        self
    }

    pub fn user_list_path(mut self, v: impl Into<PathBuf>) -> Self {
        self.user_list_path = Some(v.into());
        self
    }

    pub fn discovery_port(mut self, v: u16) -> Self {
        self.discovery_port = Some(v);
        self
    }

    pub fn max_packet_size(mut self, v: u32) -> Self {
        self.max_packet_size = Some(v);
        self
    }

    pub fn max_transfer_size(mut self, v: u64) -> Self {
        self.max_transfer_size = Some(v);
        self
    }

    pub fn build(self) -> ServerResult<ServerConfig> {
        let cfg = ServerConfig {
            server_name: self
                .server_name
                .ok_or_else(|| ServerError::Config("server_name is required".into()))?,
            bind_address: self
                .bind_address
                .ok_or_else(|| ServerError::Config("bind_address is required".into()))?,
            advertise_ip: self
                .advertise_ip
                .ok_or_else(|| ServerError::Config("advertise_ip is required".into()))?,
            share_dir: self
                .share_dir
                .ok_or_else(|| ServerError::Config("share_dir is required".into()))?,
            user_list_path: self
                .user_list_path
                .ok_or_else(|| ServerError::Config("user_list_path is required".into()))?,
            discovery_port: self.discovery_port.unwrap_or(DEFAULT_DISCOVERY_PORT),
            max_packet_size: self.max_packet_size.unwrap_or(DEFAULT_MAX_PACKET_SIZE),
            max_transfer_size: self
                .max_transfer_size
                .unwrap_or(DEFAULT_MAX_TRANSFER_SIZE),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_missing_share_dir() {
        let result = ConfigBuilder::new()
            .server_name("S1")
            .bind_address("0.0.0.0:2277")
            .advertise_ip("127.0.0.1")
            .share_dir("/does/not/exist/hopefully")
            .user_list_path("/tmp/users.csv")
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_accepts_valid_share_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ConfigBuilder::new()
            .server_name("S1")
            .bind_address("0.0.0.0:2277")
            .advertise_ip("127.0.0.1")
            .share_dir(dir.path())
            .user_list_path("/tmp/users.csv")
            .build()
            .unwrap();
        assert_eq!(cfg.discovery_port, DEFAULT_DISCOVERY_PORT);
    }

    #[test]
    fn rejects_bad_server_name() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigBuilder::new()
            .server_name("bad name!")
            .bind_address("0.0.0.0:2277")
            .advertise_ip("127.0.0.1")
            .share_dir(dir.path())
            .user_list_path("/tmp/users.csv")
            .build();
        assert!(result.is_err());
    }
}
