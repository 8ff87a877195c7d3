//! Network transport module
//!
//! This module handles all traffic with the ERP backend:
//! - Authenticated REST calls for chats, messages and read receipts
//! - Multipart uploads for messages with attachments
//! - Login/logout against the auth endpoint
//! - The persistent push-event connection (one per session)

use crate::{
    config::Config,
    protocol::{
        ChatDetail, ChatListing, LoginResponse, Message, NewMessageEvent, OutgoingAttachment,
        PushEvent, PushFrame,
    },
    session::Session,
    Error, Result,
};
use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{
    self,
    client::IntoClientRequest,
    http::{header::AUTHORIZATION, HeaderValue},
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Request/response operations the sync controller depends on
///
/// [`HttpTransport`] is the production implementation; tests substitute an
/// in-memory one.
pub trait ChatApi: Send + Sync {
    /// `GET /chats`
    fn fetch_chats(&self) -> impl Future<Output = Result<ChatListing>> + Send;

    /// `GET /chats/{id}`, returning only the message history
    fn fetch_messages(&self, chat_id: i64) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// `POST /chats/{id}/messages`
    fn send_message(
        &self,
        chat_id: i64,
        content: &str,
        attachments: &[OutgoingAttachment],
    ) -> impl Future<Output = Result<Message>> + Send;

    /// `POST /chats/{id}/read`
    fn mark_read(&self, chat_id: i64) -> impl Future<Output = Result<()>> + Send;
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

/// REST + event-stream client for the ERP chat API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: Arc<Config>,
    session: Session,
}

impl HttpTransport {
    /// Create a transport bound to a session
    pub fn new(config: Config, session: Session) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
            session,
        })
    }

    /// The session whose token is attached to every call
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The configuration this transport was built with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Exchange credentials for a bearer token and store it in the session
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        info!("Logging in as {}", email);

        let builder = self
            .client
            .post(self.config.endpoint("auth/login"))
            .json(&LoginRequest { email, password });
        // A 401 here means bad credentials, not an expired session
        let response = check_status(dispatch(builder).await?).await?;

        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read login response: {}", e)))?;

        let token_type = if login.token_type.is_empty() {
            "bearer".to_string()
        } else {
            login.token_type
        };
        self.session.set_token(login.access_token, token_type)?;
        info!("Logged in as {}", email);
        Ok(())
    }

    /// Forget the bearer token
    pub fn logout(&self) -> Result<()> {
        self.session.clear()
    }

    /// Open the push-event connection
    ///
    /// The bearer token is sent on the WebSocket handshake. Each call opens a
    /// new connection; callers keep one per session.
    pub async fn connect_events(&self) -> Result<EventStream> {
        let bearer = self.session.bearer().ok_or(Error::Unauthorized)?;

        let mut request = self
            .config
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::Stream(format!("Invalid stream URL {}: {}", self.config.ws_url, e)))?;
        let header = HeaderValue::from_str(&bearer)
            .map_err(|e| Error::Stream(format!("Invalid token for handshake: {}", e)))?;
        request.headers_mut().insert(AUTHORIZATION, header);

        info!("Connecting to event stream at {}", self.config.ws_url);
        match tokio_tungstenite::connect_async(request).await {
            Ok((ws, _)) => {
                info!("Connected to event stream");
                Ok(EventStream { ws })
            }
            Err(tungstenite::Error::Http(response)) if response.status().as_u16() == 401 => {
                warn!("Event stream rejected the token");
                self.session.clear()?;
                Err(Error::Unauthorized)
            }
            Err(e) => {
                error!("Failed to connect to event stream: {}", e);
                Err(Error::Stream(format!("Connect failed: {}", e)))
            }
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.session.bearer() {
            Some(bearer) => builder.header(reqwest::header::AUTHORIZATION, bearer),
            None => builder,
        }
    }

    /// Send an authorized request and map failures onto [`Error`]
    ///
    /// A 401 means the token is no longer accepted, so the session is cleared.
    async fn execute(&self, builder: RequestBuilder) -> Result<Response> {
        let response = dispatch(self.authorized(builder)).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            warn!("Server rejected the session token");
            self.session.clear()?;
            return Err(Error::Unauthorized);
        }

        check_status(response).await
    }
}

async fn dispatch(builder: RequestBuilder) -> Result<Response> {
    builder.send().await.map_err(|e| {
        error!("Request failed: {}", e);
        Error::Transport(format!("Request failed: {}", e))
    })
}

/// Turn a non-success response into [`Error::Api`] carrying the server's detail
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_detail(&body).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("Request failed")
            .to_string()
    });
    warn!("Request failed with status {}: {}", status, message);
    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

impl ChatApi for HttpTransport {
    async fn fetch_chats(&self) -> Result<ChatListing> {
        debug!("GET /chats");
        let response = self
            .execute(self.client.get(self.config.endpoint("chats")))
            .await?;

        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read chat list: {}", e)))
    }

    async fn fetch_messages(&self, chat_id: i64) -> Result<Vec<Message>> {
        debug!("GET /chats/{}", chat_id);
        let response = self
            .execute(self.client.get(self.config.endpoint(&format!("chats/{}", chat_id))))
            .await?;

        let detail: ChatDetail = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read chat {}: {}", chat_id, e)))?;
        Ok(detail.messages)
    }

    async fn send_message(
        &self,
        chat_id: i64,
        content: &str,
        attachments: &[OutgoingAttachment],
    ) -> Result<Message> {
        info!(
            "Sending message to chat {} ({} attachments)",
            chat_id,
            attachments.len()
        );

        let mut form = reqwest::multipart::Form::new().text("content", content.to_string());
        for attachment in attachments {
            let part = reqwest::multipart::Part::bytes(attachment.data.to_vec())
                .file_name(attachment.file_name.clone())
                .mime_str(&attachment.mime_type)
                .map_err(|e| Error::Validation(format!("Bad MIME type for {}: {}", attachment.file_name, e)))?;
            form = form.part("files", part);
        }

        let url = self.config.endpoint(&format!("chats/{}/messages", chat_id));
        let response = self.execute(self.client.post(url).multipart(form)).await?;

        let message: Message = response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to read sent message: {}", e)))?;
        info!("Message {} sent to chat {}", message.id, chat_id);
        Ok(message)
    }

    async fn mark_read(&self, chat_id: i64) -> Result<()> {
        debug!("POST /chats/{}/read", chat_id);
        let url = self.config.endpoint(&format!("chats/{}/read", chat_id));
        self.execute(self.client.post(url)).await?;
        Ok(())
    }
}

/// Pull a human-readable `detail` out of an error body
fn error_detail(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("detail")? {
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// The persistent push-event connection
///
/// Yields [`NewMessageEvent`]s in delivery order. The stream ends when the
/// server closes the connection; no reconnect is attempted.
pub struct EventStream {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl EventStream {
    /// Wait for the next `new_message` event
    ///
    /// Returns `Ok(None)` once the connection is closed. Frames for other
    /// events, and frames that fail to decode, are skipped.
    pub async fn next_event(&mut self) -> Result<Option<NewMessageEvent>> {
        while let Some(frame) = self.ws.next().await {
            let frame = frame.map_err(|e| Error::Stream(format!("Read failed: {}", e)))?;

            let text = match frame {
                tungstenite::Message::Text(text) => text,
                tungstenite::Message::Close(reason) => {
                    info!("Event stream closed by server: {:?}", reason);
                    return Ok(None);
                }
                // Ping/pong is answered by tungstenite; binary frames are not part of the protocol
                _ => continue,
            };

            match PushFrame::from_json(&text).and_then(PushFrame::into_event) {
                Ok(PushEvent::NewMessage(event)) => {
                    debug!("Push: new message {} in chat {}", event.message.id, event.chat_id);
                    return Ok(Some(event));
                }
                Ok(PushEvent::Other(name)) => {
                    debug!("Ignoring push event '{}'", name);
                }
                Err(e) => {
                    warn!("Skipping undecodable push frame: {}", e);
                }
            }
        }

        Ok(None)
    }

    /// Close the connection
    pub async fn close(mut self) -> Result<()> {
        info!("Closing event stream");
        match self.ws.close(None).await {
            Ok(()) | Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(Error::Stream(format!("Close failed: {}", e))),
        }
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}
