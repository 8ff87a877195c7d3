//! edu-chat - chat synchronization client for the Smart Education ERP
//!
//! This library keeps a local, invalidation-driven view of the user's chats
//! consistent with the ERP backend. It combines an authenticated REST
//! transport, a persistent push-event connection, a keyed cache and a
//! controller that reconciles user actions and server pushes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod protocol;
pub mod session;
pub mod sync;
pub mod transport;

pub use cache::{CacheEvent, CacheEventKind, CacheKey, ChatCache};
pub use config::Config;
pub use protocol::{Attachment, ChatListing, ChatSummary, Message, NewMessageEvent};
pub use session::Session;
pub use sync::{ChatSync, EventPump, SendOutcome};
pub use transport::{ChatApi, EventStream, HttpTransport};

/// Result type alias for edu-chat operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for edu-chat operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Network failure before a response was received
    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Server-provided detail, or the status reason
        message: String,
    },

    /// Missing or rejected bearer token
    #[error("Not authenticated, please log in again")]
    Unauthorized,

    /// Input rejected locally before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Push-event connection failure
    #[error("Event stream error: {0}")]
    Stream(String),

    /// Invalid or unreadable configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Session file could not be read or written
    #[error("Storage error: {0}")]
    Storage(String),

    /// General I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

/// Initialize logging for the edu-chat library
///
/// Honors `RUST_LOG`, defaulting to `info`.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests;
