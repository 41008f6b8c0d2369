//! Configuration loader and validator for the wedding guest bot.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub storage: Storage,
    pub geocoder: Geocoder,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct App {
    pub data_dir: String,
    /// Code of the command shown when nothing more specific resolves.
    #[serde(default = "default_command_code")]
    pub default_command_code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Telegram {
    pub bot_token: String,
    #[serde(default = "default_row_width")]
    pub inline_keyboard_row_width: usize,
}

/// Where message templates and images live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Storage {
    /// Public prefix image keys are joined onto. Must end with `/`.
    pub base_files_url: String,
    pub backend: StorageBackend,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageBackend {
    Fs { root: String },
    /// S3 compatible bucket (MinIO, Yandex Object Storage, AWS).
    S3 {
        endpoint: String,
        bucket: String,
        #[serde(default = "default_region")]
        region: String,
        access_key_id: String,
        secret_access_key: String,
    },
}

/// Reverse geocoding service (Nominatim compatible).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Geocoder {
    pub base_url: String,
    pub user_agent: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
}

fn default_command_code() -> String {
    "menu".to_string()
}

fn default_row_width() -> usize {
    1
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_language_code() -> String {
    "ru".to_string()
}

impl Config {
    /// Ensure required directories exist (data dir and a filesystem storage root).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if !self.app.data_dir.trim().is_empty() {
            fs::create_dir_all(&self.app.data_dir)?;
        }
        if let StorageBackend::Fs { root } = &self.storage.backend {
            fs::create_dir_all(root)?;
        }
        Ok(())
    }

    /// `DATABASE_URL` wins over the SQLite file inside `app.data_dir`.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/guests.db", self.app.data_dir))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if is_blank(&cfg.app.data_dir) {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if is_blank(&cfg.app.default_command_code) {
        return Err(ConfigError::Invalid("app.default_command_code must be non-empty"));
    }

    if is_blank(&cfg.telegram.bot_token) {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }
    if cfg.telegram.inline_keyboard_row_width == 0 {
        return Err(ConfigError::Invalid("telegram.inline_keyboard_row_width must be > 0"));
    }

    if Url::parse(&cfg.storage.base_files_url).is_err() {
        return Err(ConfigError::Invalid("storage.base_files_url must be an absolute URL"));
    }
    if !cfg.storage.base_files_url.ends_with('/') {
        return Err(ConfigError::Invalid("storage.base_files_url must end with '/'"));
    }
    match &cfg.storage.backend {
        StorageBackend::Fs { root } if is_blank(root) => {
            return Err(ConfigError::Invalid("storage.backend.root must be non-empty"));
        }
        StorageBackend::S3 {
            endpoint,
            bucket,
            region,
            access_key_id,
            secret_access_key,
        } => {
            if Url::parse(endpoint).is_err() {
                return Err(ConfigError::Invalid("storage.backend.endpoint must be an absolute URL"));
            }
            if is_blank(bucket) {
                return Err(ConfigError::Invalid("storage.backend.bucket must be non-empty"));
            }
            if is_blank(region) {
                return Err(ConfigError::Invalid("storage.backend.region must be non-empty"));
            }
            if is_blank(access_key_id) || is_blank(secret_access_key) {
                return Err(ConfigError::Invalid(
                    "storage.backend.access_key_id and secret_access_key must be non-empty",
                ));
            }
        }
        StorageBackend::Fs { .. } => {}
    }

    if Url::parse(&cfg.geocoder.base_url).is_err() {
        return Err(ConfigError::Invalid("geocoder.base_url must be an absolute URL"));
    }
    if is_blank(&cfg.geocoder.user_agent) {
        return Err(ConfigError::Invalid("geocoder.user_agent must be non-empty"));
    }
    if is_blank(&cfg.geocoder.language_code) {
        return Err(ConfigError::Invalid("geocoder.language_code must be non-empty"));
    }

    Ok(())
}

/// Example configuration documenting every key.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  default_command_code: "menu"

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  inline_keyboard_row_width: 1

storage:
  base_files_url: "https://files.example.com/wedding/"
  # or: { kind: s3, endpoint, bucket, region, access_key_id, secret_access_key }
  backend:
    kind: fs
    root: "./data/files"

geocoder:
  base_url: "https://nominatim.openstreetmap.org/"
  user_agent: "wedding-guest-bot/0.1"
  language_code: "ru"
"#
}
