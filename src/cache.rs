//! Chat and message cache
//!
//! An in-memory, invalidation-driven store for:
//! - The chat listing (`"chats"`), including server-reported unread counts
//! - One message list per chat (`"messages:{chat_id}"`)
//!
//! Entries are replaced wholesale, never merged. Invalidation marks an entry
//! stale so the next read refetches it. Every change is broadcast to
//! subscribers, which is how a presentation layer learns to re-render.

use crate::protocol::{ChatListing, Message};
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Capacity of the notification channel
const EVENT_CAPACITY: usize = 256;

/// Identifies one cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The chat listing with unread counts
    Chats,
    /// The message list of one chat
    Messages(i64),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Chats => write!(f, "chats"),
            CacheKey::Messages(id) => write!(f, "messages:{}", id),
        }
    }
}

/// What happened to a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    /// The entry was marked stale
    Invalidated,
    /// A fetched value replaced the entry
    Updated,
}

/// Notification sent to cache subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEvent {
    /// Affected entry
    pub key: CacheKey,
    /// Kind of change
    pub kind: CacheEventKind,
}

/// Ticket handed out when a fetch starts
///
/// Tickets grow monotonically. A response is only stored if its ticket is not
/// older than the one that produced the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchTicket(u64);

#[derive(Debug)]
struct Entry<T> {
    value: Option<T>,
    stale: bool,
    stored_ticket: u64,
    /// First ticket issued after the latest invalidation
    invalidated_before: u64,
}

impl<T> Default for Entry<T> {
    fn default() -> Self {
        Self {
            value: None,
            stale: false,
            stored_ticket: 0,
            invalidated_before: 0,
        }
    }
}

impl<T: Clone> Entry<T> {
    fn fresh(&self) -> Option<T> {
        if self.stale {
            None
        } else {
            self.value.clone()
        }
    }

    /// Returns false when the ticket is older than the stored value
    fn store(&mut self, ticket: FetchTicket, value: T) -> bool {
        if ticket.0 < self.stored_ticket {
            return false;
        }
        self.value = Some(value);
        self.stored_ticket = ticket.0;
        // Fetched before the latest invalidation: keep it visible but refetch on next read
        self.stale = ticket.0 < self.invalidated_before;
        true
    }

    fn invalidate(&mut self, next_ticket: u64) {
        self.stale = true;
        self.invalidated_before = next_ticket;
    }
}

#[derive(Debug, Default)]
struct CacheState {
    chats: Entry<ChatListing>,
    messages: HashMap<i64, Entry<Vec<Message>>>,
    next_ticket: u64,
}

/// Keyed chat/message cache with change notifications
///
/// Shared between the controller, the push-event pump and any presentation
/// layer, typically behind an `Arc`.
#[derive(Debug)]
pub struct ChatCache {
    state: Mutex<CacheState>,
    events: broadcast::Sender<CacheEvent>,
}

impl ChatCache {
    /// Create an empty cache
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Mutex::new(CacheState {
                next_ticket: 1,
                ..CacheState::default()
            }),
            events,
        }
    }

    /// Chat listing, if cached and not stale
    pub fn chats(&self) -> Option<ChatListing> {
        self.with_state(|s| s.chats.fresh())
    }

    /// Chat listing even if stale, for display while a refetch is in flight
    pub fn peek_chats(&self) -> Option<ChatListing> {
        self.with_state(|s| s.chats.value.clone())
    }

    /// Messages of a chat, if cached and not stale
    pub fn messages(&self, chat_id: i64) -> Option<Vec<Message>> {
        self.with_state(|s| s.messages.get(&chat_id).and_then(Entry::fresh))
    }

    /// Messages of a chat even if stale
    pub fn peek_messages(&self, chat_id: i64) -> Option<Vec<Message>> {
        self.with_state(|s| s.messages.get(&chat_id).and_then(|e| e.value.clone()))
    }

    /// Whether the entry holds a value that has not been invalidated
    pub fn is_fresh(&self, key: CacheKey) -> bool {
        self.with_state(|s| match key {
            CacheKey::Chats => s.chats.value.is_some() && !s.chats.stale,
            CacheKey::Messages(id) => s
                .messages
                .get(&id)
                .map(|e| e.value.is_some() && !e.stale)
                .unwrap_or(false),
        })
    }

    /// Reserve a ticket for a fetch that is about to start
    ///
    /// Registers the entry so an invalidation racing the fetch is recorded.
    pub fn begin_fetch(&self, key: CacheKey) -> FetchTicket {
        let ticket = self.with_state(|s| {
            if let CacheKey::Messages(id) = key {
                s.messages.entry(id).or_default();
            }
            let ticket = s.next_ticket;
            s.next_ticket += 1;
            ticket
        });
        debug!("Fetching {} (ticket {})", key, ticket);
        FetchTicket(ticket)
    }

    /// Replace the chat listing with a fetched value
    ///
    /// Returns false if a newer fetch already stored its result.
    pub fn store_chats(&self, ticket: FetchTicket, listing: ChatListing) -> bool {
        let stored = self.with_state(|s| s.chats.store(ticket, listing));
        self.after_store(CacheKey::Chats, ticket, stored)
    }

    /// Replace a chat's message list with a fetched value
    ///
    /// Returns false if a newer fetch already stored its result.
    pub fn store_messages(&self, chat_id: i64, ticket: FetchTicket, messages: Vec<Message>) -> bool {
        let stored = self.with_state(|s| {
            s.messages
                .entry(chat_id)
                .or_default()
                .store(ticket, messages)
        });
        self.after_store(CacheKey::Messages(chat_id), ticket, stored)
    }

    /// Mark an entry stale and notify subscribers
    ///
    /// Invalidating an absent or already-stale entry is harmless. Chats that
    /// were never fetched get no entry.
    pub fn invalidate(&self, key: CacheKey) {
        self.with_state(|s| {
            let next = s.next_ticket;
            match key {
                CacheKey::Chats => s.chats.invalidate(next),
                CacheKey::Messages(id) => {
                    if let Some(entry) = s.messages.get_mut(&id) {
                        entry.invalidate(next);
                    }
                }
            }
        });
        debug!("Invalidated {}", key);
        self.notify(key, CacheEventKind::Invalidated);
    }

    /// Receive every cache change
    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.events.subscribe()
    }

    /// Receive changes to one entry only
    pub fn subscribe_key(&self, key: CacheKey) -> KeySubscription {
        KeySubscription {
            key,
            rx: self.events.subscribe(),
        }
    }

    fn after_store(&self, key: CacheKey, ticket: FetchTicket, stored: bool) -> bool {
        if stored {
            debug!("Stored {} (ticket {})", key, ticket.0);
            self.notify(key, CacheEventKind::Updated);
        } else {
            debug!("Dropped out-of-date response for {} (ticket {})", key, ticket.0);
        }
        stored
    }

    fn notify(&self, key: CacheKey, kind: CacheEventKind) {
        // No receivers is fine: nobody is rendering
        let _ = self.events.send(CacheEvent { key, kind });
    }

    #[cfg(test)]
    pub(crate) fn message_entry_count(&self) -> usize {
        self.with_state(|s| s.messages.len())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut CacheState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut guard)
    }
}

impl Default for ChatCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Subscription filtered to a single cache key
#[derive(Debug)]
pub struct KeySubscription {
    key: CacheKey,
    rx: broadcast::Receiver<CacheEvent>,
}

impl KeySubscription {
    /// Key this subscription watches
    pub fn key(&self) -> CacheKey {
        self.key
    }

    /// Wait for the next change to the watched key
    ///
    /// Returns `None` once the cache is dropped. If the subscriber fell behind,
    /// the missed changes are reported as a single invalidation.
    pub async fn recv(&mut self) -> Option<CacheEventKind> {
        loop {
            match self.rx.recv().await {
                Ok(event) if event.key == self.key => return Some(event.kind),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber for {} lagged by {} events", self.key, skipped);
                    return Some(CacheEventKind::Invalidated);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
