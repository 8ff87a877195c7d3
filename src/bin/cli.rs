//! edu-chat terminal client
//!
//! A line-oriented chat client: plain lines are sent to the active chat,
//! `/`-prefixed lines are commands. The screen is refreshed whenever the
//! cache reports a change, including changes caused by server pushes.

use anyhow::{bail, Context};
use edu_chat::{
    cache::{CacheEventKind, CacheKey},
    protocol::OutgoingAttachment,
    sync::UploadLimits,
    ChatCache, ChatSync, Config, HttpTransport, SendOutcome, Session,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

const HELP: &str = "\
Commands:
  /chats          list chats with unread counts
  /open <id>      switch to a chat
  /read           mark the active chat as read
  /attach <path>  attach a file to the next message
  /logout         forget the saved token and quit
  /quit           exit
Anything else is sent to the active chat.";

enum Command {
    Chats,
    Open(i64),
    Read,
    Attach(String),
    Logout,
    Quit,
    Help,
    Send(String),
}

fn parse_command(line: &str) -> anyhow::Result<Command> {
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    Ok(match name {
        "chats" => Command::Chats,
        "open" => Command::Open(arg.parse().context("usage: /open <chat id>")?),
        "read" => Command::Read,
        "attach" if !arg.is_empty() => Command::Attach(arg.to_string()),
        "attach" => bail!("usage: /attach <path>"),
        "logout" => Command::Logout,
        "quit" | "exit" => Command::Quit,
        "help" => Command::Help,
        other => bail!("unknown command /{}, try /help", other),
    })
}

struct Client {
    sync: ChatSync<HttpTransport>,
    pending: Vec<OutgoingAttachment>,
    shown: HashSet<i64>,
}

impl Client {
    async fn print_chats(&self) -> anyhow::Result<()> {
        let listing = self.sync.list_chats().await?;
        if listing.chats.is_empty() {
            println!("(no chats)");
        }
        for chat in &listing.chats {
            let marker = if self.sync.active_chat() == Some(chat.id) { '*' } else { ' ' };
            let unread = listing.unread_count(chat.id);
            let badge = if unread > 0 { format!(" [{}]", unread) } else { String::new() };
            println!(
                "{} {:>4}  {}{}  - {}",
                marker,
                chat.id,
                chat.display_name(),
                badge,
                chat.preview()
            );
        }
        Ok(())
    }

    /// Print messages of the active chat not shown yet
    async fn print_new_messages(&mut self, chat_id: Option<i64>) -> anyhow::Result<()> {
        let messages = self.sync.open_chat(chat_id).await?;
        for message in messages {
            if !self.shown.insert(message.id) {
                continue;
            }
            let who = if message.is_sender {
                "me".to_string()
            } else {
                message
                    .sender_name
                    .clone()
                    .unwrap_or_else(|| format!("user {}", message.sender_id))
            };
            println!(
                "[{}] {}: {}",
                message.created_at.format("%H:%M"),
                who,
                message.content
            );
            for attachment in &message.attachments {
                println!("        + {} ({})", attachment.file_name, attachment.file_url);
            }
        }
        Ok(())
    }

    async fn switch_to(&mut self, chat_id: Option<i64>) -> anyhow::Result<()> {
        self.shown.clear();
        self.print_new_messages(chat_id).await?;
        match self.sync.current_chat() {
            Some(chat) => {
                println!("--- {} ---", chat.display_name());
                self.sync.mark_as_read(chat.id).await?;
            }
            None if self.sync.active_chat().is_none() => println!("(no chats yet)"),
            None => {}
        }
        Ok(())
    }

    /// Returns false when the client should exit
    async fn handle_line(&mut self, line: &str) -> anyhow::Result<bool> {
        match parse_command(line)? {
            Command::Chats => self.print_chats().await?,
            Command::Open(id) => self.switch_to(Some(id)).await?,
            Command::Read => {
                if let Some(id) = self.sync.active_chat() {
                    self.sync.mark_as_read(id).await?;
                }
            }
            Command::Attach(path) => {
                let attachment = OutgoingAttachment::from_path(&path).await?;
                println!("attached {} ({} bytes)", attachment.file_name, attachment.size());
                self.pending.push(attachment);
            }
            Command::Logout => {
                self.sync.api().logout()?;
                return Ok(false);
            }
            Command::Quit => return Ok(false),
            Command::Help => println!("{}", HELP),
            Command::Send(text) => {
                let Some(chat_id) = self.sync.active_chat() else {
                    bail!("no active chat, use /open <id>");
                };
                let outcome = self.sync.send(chat_id, &text, &self.pending).await?;
                if let SendOutcome::Sent(_) = outcome {
                    self.pending.clear();
                }
            }
        }
        Ok(true)
    }

    async fn handle_cache_change(&mut self, key: CacheKey) -> anyhow::Result<()> {
        match key {
            CacheKey::Chats => {
                // Fill in a default selection once chats appear
                if self.sync.active_chat().is_none() {
                    self.switch_to(None).await?;
                }
            }
            CacheKey::Messages(id) if Some(id) == self.sync.active_chat() => {
                self.print_new_messages(Some(id)).await?;
            }
            CacheKey::Messages(id) => {
                let listing = self.sync.list_chats().await?;
                if let Some(chat) = listing.chat(id) {
                    println!("(new message in {})", chat.display_name());
                }
            }
        }
        Ok(())
    }
}

async fn ensure_logged_in(transport: &HttpTransport) -> anyhow::Result<()> {
    if transport.session().is_authenticated() {
        return Ok(());
    }

    let email = std::env::var("EDU_CHAT_EMAIL").context("not logged in and EDU_CHAT_EMAIL is not set")?;
    let password =
        std::env::var("EDU_CHAT_PASSWORD").context("not logged in and EDU_CHAT_PASSWORD is not set")?;
    transport.login(&email, &password).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    edu_chat::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "edu-chat.json".to_string());
    let mut config = Config::load(&config_path)?;
    config.apply_env();
    info!("Using API at {}", config.api_url);

    let session = Session::load(&config.session_path)?;
    let limits = UploadLimits::from(&config);
    let transport = HttpTransport::new(config, session)?;
    ensure_logged_in(&transport).await?;

    let cache = Arc::new(ChatCache::new());
    let mut changes = cache.subscribe();
    let sync = ChatSync::new(transport, cache).with_upload_limits(limits);

    let pump = match sync.api().connect_events().await {
        Ok(stream) => Some(sync.spawn_event_pump(stream)),
        Err(e) => {
            warn!("Live updates unavailable: {}", e);
            None
        }
    };

    let mut client = Client {
        sync,
        pending: Vec::new(),
        shown: HashSet::new(),
    };
    client.print_chats().await?;
    client.switch_to(None).await?;
    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match client.handle_line(line.trim_end()).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            change = changes.recv() => match change {
                Ok(event) if event.kind == CacheEventKind::Invalidated => {
                    if let Err(e) = client.handle_cache_change(event.key).await {
                        eprintln!("error: {}", e);
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {
                    if let Err(e) = client.print_chats().await {
                        eprintln!("error: {}", e);
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    if let Some(pump) = pump {
        if let Err(e) = pump.shutdown().await {
            warn!("Event stream did not close cleanly: {}", e);
        }
    }
    Ok(())
}
