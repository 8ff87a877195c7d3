//! Client configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment variable overriding [`Config::api_url`]
pub const ENV_API_URL: &str = "EDU_CHAT_API_URL";
/// Environment variable overriding [`Config::ws_url`]
pub const ENV_WS_URL: &str = "EDU_CHAT_WS_URL";

/// Client configuration
///
/// Stored as JSON. Missing or empty files yield the defaults, which point at
/// a local development backend.
///
/// # Example
/// ```rust,no_run
/// use edu_chat::Config;
///
/// let mut config = Config::load("edu-chat.json").expect("Failed to load");
/// config.apply_env();
/// println!("API: {}", config.api_url);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Versioned REST prefix, e.g. `http://localhost:8000/api/v1`
    pub api_url: String,
    /// Event stream endpoint
    pub ws_url: String,
    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Largest attachment accepted for upload, in bytes
    pub max_file_size: usize,
    /// Lowercase file extensions accepted for upload
    pub allowed_file_types: Vec<String>,
    /// Where the session token is persisted
    pub session_path: String,
}

impl Config {
    /// Load configuration from a JSON file, or defaults if it doesn't exist
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| Error::Config(format!("Failed to write config: {}", e)))?;

        Ok(())
    }

    /// Apply `EDU_CHAT_API_URL` / `EDU_CHAT_WS_URL` overrides
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_API_URL) {
            self.api_url = url;
        }
        if let Ok(url) = std::env::var(ENV_WS_URL) {
            self.ws_url = url;
        }
    }

    /// Reject configurations the transport cannot use
    pub fn validate(&self) -> Result<()> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(Error::Config(format!("api_url must be http(s): {}", self.api_url)));
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            return Err(Error::Config(format!("ws_url must be ws(s): {}", self.ws_url)));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config("request_timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    /// Request timeout as a [`Duration`]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Join a path onto the REST prefix
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000/api/v1".to_string(),
            ws_url: "ws://localhost:8000/ws".to_string(),
            request_timeout_secs: 30,
            max_file_size: 5 * 1024 * 1024, // 5 MiB
            allowed_file_types: ["jpg", "jpeg", "png", "pdf", "doc", "docx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            session_path: "./data/session.json".to_string(),
        }
    }
}
