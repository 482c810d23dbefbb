//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::api::ClientConfig;
use crate::auth::{SaveToken, Token};

/// Environment variable holding a static access token
pub const TOKEN_ENV: &str = "GLOBALPING_TOKEN";

/// Application configuration
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dashboard_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_client_secret: Option<String>,
    /// Token from the last login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
}

impl Config {
    fn config_dir() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("io", "globalping", "globalping-cli")
            .context("Could not determine config directory")?;
        Ok(proj_dirs.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;

        // Contains tokens
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Client parameters from this config. A static `access_token` (usually
    /// from [`TOKEN_ENV`]) replaces the stored token and disables persistence.
    pub fn client_config(&self, path: PathBuf, access_token: Option<String>) -> ClientConfig {
        let defaults = ClientConfig::default();
        let access_token = access_token.filter(|t| !t.is_empty());
        let on_token_change = match access_token {
            Some(_) => None,
            None => Some(persist_token(path)),
        };
        ClientConfig {
            api_url: self.api_url.clone().unwrap_or(defaults.api_url),
            auth_url: self.auth_url.clone().unwrap_or(defaults.auth_url),
            dashboard_url: self.dashboard_url.clone().unwrap_or(defaults.dashboard_url),
            client_id: self.auth_client_id.clone().unwrap_or(defaults.client_id),
            client_secret: self
                .auth_client_secret
                .clone()
                .unwrap_or(defaults.client_secret),
            token: self.token.clone(),
            access_token,
            on_token_change,
            ..defaults
        }
    }
}

/// Callback that writes every token change to the config file at `path`.
/// Failures are logged, never propagated.
pub fn persist_token(path: PathBuf) -> SaveToken {
    Arc::new(move |token: Option<&Token>| {
        let result = Config::load_from(&path).and_then(|mut config| {
            config.token = token.cloned();
            config.save_to(&path)
        });
        match result {
            Ok(()) => tracing::debug!("Saved token to {}", path.display()),
            Err(e) => tracing::warn!("Failed to save token: {:#}", e),
        }
    })
}
