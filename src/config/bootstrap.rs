//! Host bootstrap configuration: the handful of settings needed before
//! any OCPP traffic flows at all (where to persist state, which CSMS to
//! dial, how to identify this charge point). Grounded on the teacher's
//! `main.rs` `AppConfig::load(&config_path)` / `default_config_path()`
//! pair, adapted from `AppConfig`'s TOML-over-the-filesystem shape.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HostConfigError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Host-level bootstrap settings, loaded once at process start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Directory the filesystem adapter roots all persisted state under.
    pub data_dir: PathBuf,
    /// CSMS WebSocket endpoint, e.g. `wss://csms.example.com/ocpp`.
    pub csms_url: String,
    /// This charge point's identity string, appended to `csms_url`.
    pub charge_point_id: String,
    /// Basic-auth / TLS client-cert password, if the CSMS requires one.
    pub auth_password: Option<String>,
    pub log_level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: default_config_path().parent().unwrap().join("state"),
            csms_url: "ws://localhost:9000/ocpp".to_string(),
            charge_point_id: "CP001".to_string(),
            auth_password: None,
            log_level: "info".to_string(),
        }
    }
}

impl HostConfig {
    pub fn load(path: &Path) -> Result<Self, HostConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| HostConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| HostConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), HostConfigError> {
        let text = toml::to_string_pretty(self).expect("HostConfig always serializes");
        std::fs::write(path, text).map_err(|source| HostConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// `~/.config/evse-ocpp-core/config.toml`, mirroring the teacher's
/// `default_config_path()`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("evse-ocpp-core")
        .join("config.toml")
}
