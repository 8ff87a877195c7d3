//! Session state persistence
//!
//! Holds the bearer token for the signed-in user and persists it to a local
//! JSON file so a restart does not force a new login.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredSession {
    access_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
}

/// Shared, persisted authentication state
///
/// Cloning is cheap; all clones see the same token.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<RwLock<StoredSession>>,
    path: Option<Arc<PathBuf>>,
}

impl Session {
    /// Session that lives in memory only
    pub fn in_memory() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoredSession::default())),
            path: None,
        }
    }

    /// In-memory session already holding a token
    pub fn with_token(token: impl Into<String>) -> Self {
        let session = Self::in_memory();
        session.write_state(|s| s.access_token = Some(token.into()));
        session
    }

    /// Load a session from a JSON file
    ///
    /// A missing or empty file yields a signed-out session bound to `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let stored = if path_ref.exists() {
            let json = std::fs::read_to_string(path_ref)
                .map_err(|e| Error::Storage(format!("Failed to read session file: {}", e)))?;
            if json.trim().is_empty() {
                StoredSession::default()
            } else {
                serde_json::from_str(&json)?
            }
        } else {
            StoredSession::default()
        };

        debug!("Loaded session from {}", path_ref.display());
        Ok(Self {
            state: Arc::new(RwLock::new(stored)),
            path: Some(Arc::new(path_ref.to_path_buf())),
        })
    }

    /// Current bearer token, if signed in
    pub fn token(&self) -> Option<String> {
        self.read_state(|s| s.access_token.clone())
    }

    /// Whether a token is present
    pub fn is_authenticated(&self) -> bool {
        self.read_state(|s| s.access_token.is_some())
    }

    /// `Authorization` header value for the current token
    pub fn bearer(&self) -> Option<String> {
        self.token().map(|t| format!("Bearer {}", t))
    }

    /// Store a freshly issued token and persist it
    pub fn set_token(&self, token: impl Into<String>, token_type: impl Into<String>) -> Result<()> {
        let token = token.into();
        let token_type = token_type.into();
        self.write_state(|s| {
            s.access_token = Some(token);
            s.token_type = Some(token_type);
        });
        info!("Session token stored");
        self.persist()
    }

    /// Drop the token and persist the signed-out state
    pub fn clear(&self) -> Result<()> {
        self.write_state(|s| *s = StoredSession::default());
        info!("Session cleared");
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create session directory: {}", e)))?;
        }

        let json = self.read_state(|s| serde_json::to_string_pretty(s))?;
        std::fs::write(path.as_path(), json)
            .map_err(|e| Error::Storage(format!("Failed to write session file: {}", e)))?;
        Ok(())
    }

    fn read_state<T>(&self, f: impl FnOnce(&StoredSession) -> T) -> T {
        let guard = self.state.read().unwrap_or_else(|p| p.into_inner());
        f(&guard)
    }

    fn write_state(&self, f: impl FnOnce(&mut StoredSession)) {
        let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}
