use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use core_types::{SecretRef, UiLanguage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub const API_KEY_ENV: &str = "MEDIAQA_API_KEY";
pub const BASE_URL_ENV: &str = "MEDIAQA_BASE_URL";

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_MAX_FILE_BYTES: u64 = 200 * 1024 * 1024;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub local_encryption_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// Where the fixed service credential is kept in the secret store.
    pub api_key_ref: SecretRef,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_ref: SecretRef::new("backend", "api_key"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: DEFAULT_MAX_FILE_BYTES,
        }
    }
}

const fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub schema_version: u32,
    pub language: UiLanguage,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub security: SecurityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            language: UiLanguage::EnUs,
            backend: BackendConfig::default(),
            upload: UploadConfig::default(),
            security: SecurityConfig {
                local_encryption_enabled: false,
            },
        }
    }
}

impl ClientConfig {
    /// Applies `MEDIAQA_BASE_URL` when set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::var(BASE_URL_ENV).ok());
    }

    fn apply_overrides(&mut self, base_url: Option<String>) {
        if let Some(base_url) = base_url.filter(|url| !url.trim().is_empty()) {
            info!(%base_url, "backend base url overridden from environment");
            self.backend.base_url = base_url.trim().to_string();
        }
    }
}

/// Picks the service credential: environment first, then the stored secret.
pub fn resolve_api_key(stored: Option<String>) -> String {
    pick_api_key(std::env::var(API_KEY_ENV).ok(), stored)
}

fn pick_api_key(env: Option<String>, stored: Option<String>) -> String {
    env.filter(|key| !key.trim().is_empty())
        .or(stored)
        .unwrap_or_else(|| {
            warn!("no service credential configured; backend calls will be rejected");
            String::new()
        })
}

pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.into().join("config.json"),
        }
    }

    pub fn from_default_location() -> Result<Self> {
        let mut dir = dirs::config_dir().context("failed to resolve config_dir")?;
        dir.push("mediaqa");
        Ok(Self::from_dir(dir))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load_or_init(&self) -> Result<ClientConfig> {
        if !self.path.exists() {
            let config = ClientConfig::default();
            self.save(&config)?;
            return Ok(config);
        }

        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let mut config: ClientConfig =
            serde_json::from_str(&raw).context("failed to parse client config json")?;
        if self.migrate(&mut config) {
            self.save(&config)?;
        }
        Ok(config)
    }

    pub fn save(&self, config: &ClientConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let text = serde_json::to_string_pretty(config).context("failed to serialize config")?;
        fs::write(&self.path, text)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }

    fn migrate(&self, config: &mut ClientConfig) -> bool {
        if config.schema_version >= CURRENT_SCHEMA_VERSION {
            return false;
        }

        warn!(
            from = config.schema_version,
            to = CURRENT_SCHEMA_VERSION,
            "migrating client config schema"
        );

        // v1 had no upload section; a zero limit would reject every file.
        if config.upload.max_file_bytes == 0 {
            config.upload = UploadConfig::default();
        }
        config.schema_version = CURRENT_SCHEMA_VERSION;
        true
    }
}
