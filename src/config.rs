//! Configuration management for the Hixtunnel client.
//!
//! Handles loading and saving configuration from `~/.hixtunnel/config.toml`.

use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::TunnelError;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        write_private(path, &contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        restrict_permissions(path)
    }

    pub fn config_path() -> Result<PathBuf> {
        let dirs = BaseDirs::new().context("Could not determine home directory")?;

        Ok(dirs.home_dir().join(".hixtunnel").join("config.toml"))
    }

    /// The saved auth token. Its format is not checked.
    pub fn token(&self) -> std::result::Result<&str, TunnelError> {
        match self.token.as_deref() {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(TunnelError::ConfigMissing),
        }
    }
}

/// Persist `token` (and `server`, when given) to `path`, replacing the whole file.
///
/// The token is stored exactly as given. A blank token is rejected before
/// anything touches the disk. A server saved by an earlier call survives when
/// `server` is `None`.
pub fn save_token(path: &Path, token: &str, server: Option<&str>) -> Result<()> {
    if token.trim().is_empty() {
        return Err(TunnelError::TokenRequired.into());
    }

    let previous_server = Config::load_from(path).ok().and_then(|c| c.server);

    let config = Config {
        token: Some(token.to_string()),
        server: server.map(str::to_string).or(previous_server),
    };
    config.save_to(path)
}

/// Write `contents` to a file that is created owner-only.
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.flush()
}

/// Tighten a file that existed before with a wider mode.
#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
