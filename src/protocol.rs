//! Protocol module
//!
//! Wire types exchanged with the ERP chat API:
//! - Chat summaries and the chat listing with unread counts
//! - Messages and their attachments
//! - Push frames delivered over the event stream
//! - Outgoing attachments prepared from local files

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Push event name for newly created messages
pub const NEW_MESSAGE_EVENT: &str = "new_message";

/// Preview of the most recent message in a chat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LastMessage {
    /// Message text
    pub content: String,
    /// Server-assigned creation time
    #[serde(with = "server_time")]
    pub created_at: DateTime<Utc>,
}

/// Lightweight chat record shown in a chat list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSummary {
    /// Unique chat identifier
    pub id: i64,
    /// Optional display name
    #[serde(default)]
    pub name: Option<String>,
    /// Whether the chat has more than two participants
    #[serde(default)]
    pub is_group: bool,
    /// Most recent message, if any
    #[serde(default)]
    pub last_message: Option<LastMessage>,
}

impl ChatSummary {
    /// Name to show for this chat
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unnamed Chat")
    }

    /// Last-message preview to show for this chat
    pub fn preview(&self) -> &str {
        self.last_message
            .as_ref()
            .map(|m| m.content.as_str())
            .unwrap_or("No messages yet")
    }
}

/// File attached to a message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    /// Attachment identifier
    pub id: i64,
    /// Original file name
    pub file_name: String,
    /// Retrieval URL
    pub file_url: String,
}

/// A chat message as returned by the server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Identifier, unique within its chat
    pub id: i64,
    /// Owning chat
    pub chat_id: i64,
    /// Message text (may be empty when attachments are present)
    #[serde(default)]
    pub content: String,
    /// Author's user id
    pub sender_id: i64,
    /// Author's display name
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Whether the viewing user wrote this message
    #[serde(default)]
    pub is_sender: bool,
    /// Server-assigned creation time
    #[serde(with = "server_time")]
    pub created_at: DateTime<Utc>,
    /// Attachments in upload order
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Response of `GET /chats`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChatListing {
    /// Chats in server order
    #[serde(default)]
    pub chats: Vec<ChatSummary>,
    /// Unseen message count per chat id
    #[serde(default)]
    pub unread_counts: HashMap<i64, u32>,
}

impl ChatListing {
    /// Server-reported unread count for a chat (0 when absent)
    pub fn unread_count(&self, chat_id: i64) -> u32 {
        self.unread_counts.get(&chat_id).copied().unwrap_or(0)
    }

    /// Look up a chat by id
    pub fn chat(&self, chat_id: i64) -> Option<&ChatSummary> {
        self.chats.iter().find(|c| c.id == chat_id)
    }

    /// First chat in list order, used as the default selection
    pub fn first_chat_id(&self) -> Option<i64> {
        self.chats.first().map(|c| c.id)
    }
}

/// Response of `GET /chats/{id}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatDetail {
    /// Chat fields
    #[serde(flatten)]
    pub chat: ChatSummary,
    /// Message history
    #[serde(default)]
    pub messages: Vec<Message>,
}

/// Response of `POST /auth/login`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoginResponse {
    /// Bearer token
    pub access_token: String,
    /// Token type, normally "bearer"
    #[serde(default)]
    pub token_type: String,
}

/// Raw frame received over the event stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PushFrame {
    /// Event name
    pub event: String,
    /// Event payload
    #[serde(default)]
    pub data: serde_json::Value,
}

/// A message pushed by the server for some chat
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessageEvent {
    /// Chat the message belongs to
    pub chat_id: i64,
    /// The new message
    pub message: Message,
}

/// Decoded push event
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// A message was created in some chat
    NewMessage(NewMessageEvent),
    /// Any event this client does not act on
    Other(String),
}

impl PushFrame {
    /// Decode a frame from its JSON text
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Interpret the frame payload
    pub fn into_event(self) -> Result<PushEvent> {
        if self.event != NEW_MESSAGE_EVENT {
            return Ok(PushEvent::Other(self.event));
        }

        let message: Message = serde_json::from_value(self.data)?;
        Ok(PushEvent::NewMessage(NewMessageEvent {
            chat_id: message.chat_id,
            message,
        }))
    }
}

/// A local file about to be uploaded with a message
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingAttachment {
    /// File name sent to the server
    pub file_name: String,
    /// MIME type of the content
    pub mime_type: String,
    /// File content
    pub data: bytes::Bytes,
}

impl OutgoingAttachment {
    /// Build an attachment from in-memory content
    pub fn new(file_name: impl Into<String>, data: impl Into<bytes::Bytes>) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_for(&file_name).to_string();
        Self {
            file_name,
            mime_type,
            data: data.into(),
        }
    }

    /// Read an attachment from disk
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::Validation(format!("Not a file: {}", path.display())))?;

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| Error::Validation(format!("Failed to read {}: {}", path.display(), e)))?;

        Ok(Self::new(file_name, data))
    }

    /// Lowercase file extension, if any
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check the attachment against the upload limits
    pub fn validate(&self, max_file_size: usize, allowed_types: &[String]) -> Result<()> {
        if self.size() > max_file_size {
            return Err(Error::Validation(format!(
                "{} is {} bytes, the limit is {} bytes",
                self.file_name,
                self.size(),
                max_file_size
            )));
        }

        let allowed = self
            .extension()
            .map(|ext| allowed_types.iter().any(|t| t.eq_ignore_ascii_case(&ext)))
            .unwrap_or(false);
        if !allowed {
            return Err(Error::Validation(format!(
                "{} has a file type that is not allowed",
                self.file_name
            )));
        }

        Ok(())
    }
}

/// Timestamps as sent by the backend
///
/// Accepts RFC 3339 and offset-less ISO 8601 (taken as UTC), always writes RFC 3339.
pub mod server_time {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as RFC 3339
    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    /// Deserialize RFC 3339 or naive ISO 8601
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    /// Parse a backend timestamp
    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

fn mime_for(file_name: &str) -> &'static str {
    let ext = Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}
