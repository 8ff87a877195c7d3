//! Chat synchronization controller
//!
//! Keeps the [`ChatCache`] consistent with the server by reacting to:
//! - User actions: opening a chat, sending a message, marking a chat read
//! - Push events delivered over the [`EventStream`]
//!
//! Consistency is coarse on purpose: every change invalidates whole entries
//! and the next read refetches them in full.

use crate::{
    cache::{CacheKey, ChatCache},
    config::Config,
    protocol::{ChatListing, ChatSummary, Message, NewMessageEvent, OutgoingAttachment},
    transport::{ChatApi, EventStream},
    Error, Result,
};
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a send attempt
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Content and attachments were both empty; nothing was sent
    NothingToSend,
    /// The server accepted the message
    Sent(Message),
}

/// Attachment limits enforced before upload
#[derive(Debug, Clone, PartialEq)]
pub struct UploadLimits {
    /// Largest accepted file, in bytes
    pub max_file_size: usize,
    /// Accepted lowercase extensions
    pub allowed_file_types: Vec<String>,
}

impl From<&Config> for UploadLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_file_size: config.max_file_size,
            allowed_file_types: config.allowed_file_types.clone(),
        }
    }
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// Invalidate the entries a pushed message makes out of date
///
/// Applies to chat X regardless of which chat is being viewed.
pub fn reconcile_push(cache: &ChatCache, event: &NewMessageEvent) {
    debug!("Reconciling push for chat {}", event.chat_id);
    cache.invalidate(CacheKey::Messages(event.chat_id));
    cache.invalidate(CacheKey::Chats);
}

/// Feed every event of a stream into the cache
///
/// Runs until the stream ends or `shutdown` resolves. On shutdown the stream
/// is closed with a close frame.
pub async fn pump_events(
    cache: Arc<ChatCache>,
    mut stream: EventStream,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        let next = tokio::select! {
            _ = &mut shutdown => None,
            next = stream.next_event() => Some(next),
        };

        match next {
            None => {
                info!("Event pump shutting down");
                return stream.close().await;
            }
            Some(Ok(Some(event))) => reconcile_push(&cache, &event),
            Some(Ok(None)) => {
                info!("Event stream ended");
                return Ok(());
            }
            Some(Err(e)) => {
                warn!("Event stream failed: {}", e);
                return Err(e);
            }
        }
    }
}

/// A running background event pump
///
/// Dropping the handle also stops the pump and closes its stream.
#[derive(Debug)]
pub struct EventPump {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl EventPump {
    /// Close the stream and wait for the pump to finish
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        join_pump(self.handle).await
    }

    /// Wait for the stream to end on its own
    pub async fn join(self) -> Result<()> {
        let Self { shutdown, handle } = self;
        let result = join_pump(handle).await;
        drop(shutdown);
        result
    }
}

async fn join_pump(handle: JoinHandle<Result<()>>) -> Result<()> {
    handle
        .await
        .map_err(|e| Error::Stream(format!("Event pump task failed: {}", e)))?
}

/// Chat synchronization controller
///
/// # Example
/// ```rust,no_run
/// use edu_chat::{ChatCache, ChatSync, Config, HttpTransport, SendOutcome, Session};
/// use std::sync::Arc;
///
/// # async fn example() -> edu_chat::Result<()> {
/// let config = Config::default();
/// let transport = HttpTransport::new(config, Session::with_token("token"))?;
/// let events = transport.connect_events().await?;
///
/// let sync = ChatSync::new(transport, Arc::new(ChatCache::new()));
/// let _pump = sync.spawn_event_pump(events);
///
/// let listing = sync.list_chats().await?;
/// let messages = sync.open_chat(None).await?;
/// println!("{} chats, {} messages in the first", listing.chats.len(), messages.len());
///
/// if let Some(chat_id) = sync.active_chat() {
///     if let SendOutcome::Sent(message) = sync.send(chat_id, "hello", &[]).await? {
///         println!("Sent message {}", message.id);
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ChatSync<A> {
    api: A,
    cache: Arc<ChatCache>,
    limits: UploadLimits,
    active_chat: Mutex<Option<i64>>,
}

impl<A: ChatApi> ChatSync<A> {
    /// Create a controller over a transport and a shared cache
    pub fn new(api: A, cache: Arc<ChatCache>) -> Self {
        Self {
            api,
            cache,
            limits: UploadLimits::default(),
            active_chat: Mutex::new(None),
        }
    }

    /// Replace the attachment limits
    pub fn with_upload_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The shared cache
    pub fn cache(&self) -> &Arc<ChatCache> {
        &self.cache
    }

    /// The underlying transport
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Chat listing with unread counts, fetched on first access or after invalidation
    pub async fn list_chats(&self) -> Result<ChatListing> {
        if let Some(listing) = self.cache.chats() {
            return Ok(listing);
        }

        let ticket = self.cache.begin_fetch(CacheKey::Chats);
        let listing = self.api.fetch_chats().await?;
        if self.cache.store_chats(ticket, listing.clone()) {
            Ok(listing)
        } else {
            // A newer response landed first
            Ok(self.cache.peek_chats().unwrap_or(listing))
        }
    }

    /// Messages of a chat, making it the active chat
    ///
    /// Without an explicit id the active chat is reopened, or the first chat
    /// in list order becomes active. With no chats at all, returns an empty
    /// list and leaves the selection untouched.
    pub async fn open_chat(&self, chat_id: Option<i64>) -> Result<Vec<Message>> {
        let chat_id = match chat_id.or_else(|| self.active_chat()) {
            Some(id) => id,
            None => match self.list_chats().await?.first_chat_id() {
                Some(id) => id,
                None => {
                    debug!("No chats to open");
                    return Ok(Vec::new());
                }
            },
        };

        self.select_chat(chat_id);
        self.load_messages(chat_id).await
    }

    /// Make a chat the active one, replacing any previous selection
    pub fn select_chat(&self, chat_id: i64) {
        let mut active = self.active_chat.lock().unwrap_or_else(|p| p.into_inner());
        if *active != Some(chat_id) {
            debug!("Active chat: {:?} -> {}", *active, chat_id);
        }
        *active = Some(chat_id);
    }

    /// Currently active chat, if any
    pub fn active_chat(&self) -> Option<i64> {
        *self.active_chat.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Cached summary of the active chat
    pub fn current_chat(&self) -> Option<ChatSummary> {
        let chat_id = self.active_chat()?;
        self.cache.peek_chats()?.chat(chat_id).cloned()
    }

    /// Send a message with optional attachments
    ///
    /// Blank content with no attachments is not sent and touches nothing.
    /// On success the chat's messages and the chat listing are invalidated,
    /// since the listing carries the last-message preview.
    pub async fn send(
        &self,
        chat_id: i64,
        content: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<SendOutcome> {
        if content.trim().is_empty() && attachments.is_empty() {
            debug!("Nothing to send to chat {}", chat_id);
            return Ok(SendOutcome::NothingToSend);
        }

        for attachment in attachments {
            attachment.validate(self.limits.max_file_size, &self.limits.allowed_file_types)?;
        }

        let message = self.api.send_message(chat_id, content, attachments).await?;
        info!("Message {} sent to chat {}", message.id, chat_id);

        self.cache.invalidate(CacheKey::Messages(chat_id));
        self.cache.invalidate(CacheKey::Chats);
        Ok(SendOutcome::Sent(message))
    }

    /// Mark every message in a chat as read
    ///
    /// Only the listing is invalidated: unread counts live there.
    pub async fn mark_as_read(&self, chat_id: i64) -> Result<()> {
        self.api.mark_read(chat_id).await?;
        debug!("Chat {} marked as read", chat_id);
        self.cache.invalidate(CacheKey::Chats);
        Ok(())
    }

    /// Apply a push event to the cache
    pub fn handle_event(&self, event: &NewMessageEvent) {
        reconcile_push(&self.cache, event);
    }

    /// Consume an event stream on the current task until it ends
    pub async fn run_events(&self, stream: EventStream) -> Result<()> {
        pump_events(self.cache.clone(), stream, std::future::pending()).await
    }

    /// Consume an event stream on a background task
    pub fn spawn_event_pump(&self, stream: EventStream) -> EventPump {
        let (shutdown, signal) = oneshot::channel::<()>();
        let shutdown_signal = async move {
            let _ = signal.await;
        };
        let handle = tokio::spawn(pump_events(self.cache.clone(), stream, shutdown_signal));
        EventPump { shutdown, handle }
    }

    async fn load_messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        if let Some(messages) = self.cache.messages(chat_id) {
            return Ok(messages);
        }

        let key = CacheKey::Messages(chat_id);
        let ticket = self.cache.begin_fetch(key);
        let messages = self.api.fetch_messages(chat_id).await?;
        if self.cache.store_messages(chat_id, ticket, messages.clone()) {
            Ok(messages)
        } else {
            Ok(self.cache.peek_messages(chat_id).unwrap_or(messages))
        }
    }
}
