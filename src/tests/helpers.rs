// Shared fixtures: sample wire data and an in-memory ChatApi

use crate::protocol::{ChatListing, ChatSummary, LastMessage, Message, OutgoingAttachment};
use crate::transport::ChatApi;
use crate::{Error, Result};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub fn ts(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 10, minute, 0).unwrap()
}

pub fn create_test_chat(id: i64, name: &str) -> ChatSummary {
    ChatSummary {
        id,
        name: Some(name.to_string()),
        is_group: false,
        last_message: None,
    }
}

pub fn create_test_message(id: i64, chat_id: i64, content: &str) -> Message {
    Message {
        id,
        chat_id,
        content: content.to_string(),
        sender_id: 42,
        sender_name: Some("Ms. Rivera".to_string()),
        is_sender: false,
        created_at: ts(id as u32 % 60),
        attachments: Vec::new(),
    }
}

/// One request observed by the fake server
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    FetchChats,
    FetchMessages(i64),
    SendMessage {
        chat_id: i64,
        content: String,
        attachments: usize,
    },
    MarkRead(i64),
}

#[derive(Debug, Default)]
struct FakeServer {
    chats: Vec<ChatSummary>,
    messages: HashMap<i64, Vec<Message>>,
    unread: HashMap<i64, u32>,
    next_message_id: i64,
    fail_with: Option<String>,
}

/// In-memory backend that behaves like the ERP chat API and records calls
#[derive(Debug, Default)]
pub struct FakeApi {
    server: Mutex<FakeServer>,
    calls: Mutex<Vec<ApiCall>>,
}

impl FakeApi {
    pub fn new() -> Self {
        let api = Self::default();
        api.server.lock().unwrap().next_message_id = 1000;
        api
    }

    pub fn with_chats(chats: Vec<ChatSummary>) -> Self {
        let api = Self::new();
        api.server.lock().unwrap().chats = chats;
        api
    }

    pub fn set_unread(&self, chat_id: i64, count: u32) {
        self.server.lock().unwrap().unread.insert(chat_id, count);
    }

    /// Simulate a message created by someone else, as the server would
    pub fn deliver(&self, message: Message) {
        let mut server = self.server.lock().unwrap();
        *server.unread.entry(message.chat_id).or_insert(0) += 1;
        if let Some(chat) = server.chats.iter_mut().find(|c| c.id == message.chat_id) {
            chat.last_message = Some(LastMessage {
                content: message.content.clone(),
                created_at: message.created_at,
            });
        }
        server.messages.entry(message.chat_id).or_default().push(message);
    }

    pub fn fail_requests(&self, reason: &str) {
        self.server.lock().unwrap().fail_with = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn record(&self, call: ApiCall) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        match &self.server.lock().unwrap().fail_with {
            Some(reason) => Err(Error::Transport(reason.clone())),
            None => Ok(()),
        }
    }
}

impl ChatApi for FakeApi {
    async fn fetch_chats(&self) -> Result<ChatListing> {
        self.record(ApiCall::FetchChats)?;
        let server = self.server.lock().unwrap();
        Ok(ChatListing {
            chats: server.chats.clone(),
            unread_counts: server.unread.clone(),
        })
    }

    async fn fetch_messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        self.record(ApiCall::FetchMessages(chat_id))?;
        let server = self.server.lock().unwrap();
        Ok(server.messages.get(&chat_id).cloned().unwrap_or_default())
    }

    async fn send_message(
        &self,
        chat_id: i64,
        content: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<Message> {
        self.record(ApiCall::SendMessage {
            chat_id,
            content: content.to_string(),
            attachments: attachments.len(),
        })?;

        let mut server = self.server.lock().unwrap();
        server.next_message_id += 1;
        let message = Message {
            id: server.next_message_id,
            chat_id,
            content: content.to_string(),
            sender_id: 1,
            sender_name: Some("me".to_string()),
            is_sender: true,
            created_at: ts(30),
            attachments: Vec::new(),
        };

        if let Some(chat) = server.chats.iter_mut().find(|c| c.id == chat_id) {
            chat.last_message = Some(LastMessage {
                content: message.content.clone(),
                created_at: message.created_at,
            });
        }
        server.messages.entry(chat_id).or_default().push(message.clone());
        Ok(message)
    }

    async fn mark_read(&self, chat_id: i64) -> Result<()> {
        self.record(ApiCall::MarkRead(chat_id))?;
        self.server.lock().unwrap().unread.insert(chat_id, 0);
        Ok(())
    }
}
