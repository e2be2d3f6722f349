//! Discord channel integration using Gateway WebSocket
//!
//! Messages are received over the Discord Gateway and replies are sent via
//! the REST API, as JSON or as multipart when files are attached.

use crate::base::{ChannelError, ChannelHandler, Result};
use crate::common::{create_http_client, retry_after};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cortana_core::bus::{Author, InboundMessage, OutboundEvent, OutboundMessage, ReferencedMessage};
use cortana_core::config::DiscordConfig;
use futures::{SinkExt, StreamExt};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tokio_tungstenite::tungstenite::Message as WsMessage;

const CHANNEL_NAME: &str = "discord";
const MAX_SEND_ATTEMPTS: usize = 3;
const TYPING_INTERVAL: Duration = Duration::from_secs(8);
/// Typing refreshes before the indicator gives up on its own
const TYPING_MAX_REFRESHES: u32 = 15;

/// Discord Gateway message opcodes
#[derive(Debug, Clone, Copy, PartialEq)]
#[repr(u8)]
enum GatewayOp {
    Dispatch = 0,
    Heartbeat = 1,
    Identify = 2,
    Reconnect = 7,
    InvalidSession = 9,
    Hello = 10,
    HeartbeatAck = 11,
}

impl GatewayOp {
    fn from_u8(op: u8) -> Option<Self> {
        match op {
            0 => Some(GatewayOp::Dispatch),
            1 => Some(GatewayOp::Heartbeat),
            2 => Some(GatewayOp::Identify),
            7 => Some(GatewayOp::Reconnect),
            9 => Some(GatewayOp::InvalidSession),
            10 => Some(GatewayOp::Hello),
            11 => Some(GatewayOp::HeartbeatAck),
            _ => None,
        }
    }
}

/// Discord Gateway payload
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewayPayload {
    op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    d: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    t: Option<String>,
}

/// What the read loop should do after a gateway payload
#[derive(Debug, PartialEq)]
enum GatewayAction {
    Continue,
    Reconnect,
}

/// Discord user object
#[derive(Debug, Clone, Deserialize)]
struct DiscordUser {
    id: String,
    username: String,
    #[serde(default)]
    bot: bool,
}

/// Discord message
#[derive(Debug, Clone, Deserialize)]
struct DiscordMessage {
    id: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    content: String,
    author: DiscordUser,
    #[serde(default)]
    mentions: Vec<DiscordUser>,
    #[serde(default)]
    referenced_message: Option<Box<DiscordMessage>>,
    #[serde(default)]
    guild_id: Option<String>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl DiscordMessage {
    /// Convert to a bus message as seen by the bot `bot_id`
    fn into_inbound(self, bot_id: &str) -> InboundMessage {
        let author = Author {
            id: self.author.id,
            name: self.author.username,
            is_bot: self.author.bot,
        };

        let mut msg = InboundMessage::new(CHANNEL_NAME, self.id, self.channel_id, author, self.content)
            .with_bot_id(bot_id);
        if self.guild_id.is_none() {
            msg = msg.direct();
        }
        for user in self.mentions {
            msg = msg.with_mention(user.id);
        }
        if let Some(replied) = self.referenced_message {
            msg = msg.with_reference(ReferencedMessage {
                message_id: replied.id,
                author_id: replied.author.id,
                content: replied.content,
            });
        }
        if let Some(ts) = self.timestamp {
            msg.timestamp = ts;
        }
        msg
    }
}

/// Discord channel handler
pub struct DiscordHandler {
    config: DiscordConfig,
    /// Running state (shared across tasks)
    running: Arc<AtomicBool>,
    /// Inbound message sender
    inbound_tx: Option<mpsc::UnboundedSender<InboundMessage>>,
    /// HTTP client
    http: reqwest::Client,
    /// Sequence number for heartbeats
    seq: Arc<Mutex<Option<u64>>>,
    /// User id of the bot, known after READY
    bot_id: Arc<Mutex<Option<String>>>,
    /// Typing indicator tasks by triggering message id
    typing_tasks: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
    /// Heartbeat task of the current connection
    heartbeat: Arc<Mutex<Option<JoinHandle<()>>>>,
    /// Shutdown signal sender
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl DiscordHandler {
    /// Create a new Discord handler from config
    pub fn new(config: &DiscordConfig) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            running: Arc::new(AtomicBool::new(false)),
            inbound_tx: None,
            http: create_http_client()?,
            seq: Arc::new(Mutex::new(None)),
            bot_id: Arc::new(Mutex::new(None)),
            typing_tasks: Arc::new(Mutex::new(HashMap::new())),
            heartbeat: Arc::new(Mutex::new(None)),
            shutdown_tx: None,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    /// Handle incoming Discord message
    async fn handle_message_create(&self, payload: serde_json::Value) -> Result<()> {
        let msg: DiscordMessage = serde_json::from_value(payload)
            .map_err(|e| ChannelError::Error(format!("Failed to parse message: {}", e)))?;

        let bot_id = self.bot_id.lock().await.clone().unwrap_or_default();
        let inbound = msg.into_inbound(&bot_id);
        tracing::debug!(
            "Discord message {} from {} in {}",
            inbound.message_id,
            inbound.author.name,
            inbound.chat_id
        );

        if let Some(tx) = &self.inbound_tx {
            tx.send(inbound)
                .map_err(|e| ChannelError::SendError(e.to_string()))?;
        }

        Ok(())
    }

    /// Start a typing indicator for `message_id`, refreshed until stopped
    /// or until `TYPING_MAX_REFRESHES` have been sent
    async fn start_typing(&self, chat_id: &str, message_id: String) {
        self.stop_typing(&message_id).await;

        let handle = spawn_typing_loop(
            self.http.clone(),
            self.api_url(&format!("/channels/{}/typing", chat_id)),
            self.config.token.clone(),
            TYPING_INTERVAL,
            TYPING_MAX_REFRESHES,
        );

        let mut tasks = self.typing_tasks.lock().await;
        tasks.retain(|_, task| !task.is_finished());
        tasks.insert(message_id, handle);
    }

    /// Stop the typing indicator started for `message_id`
    async fn stop_typing(&self, message_id: &str) {
        let mut tasks = self.typing_tasks.lock().await;
        if let Some(handle) = tasks.remove(message_id) {
            handle.abort();
        }
    }

    /// JSON body of a create-message request
    fn message_payload(message: &OutboundMessage) -> serde_json::Value {
        let mut payload = serde_json::json!({
            "content": message.content
        });

        if let Some(reply_to) = message.reply_to.as_deref().filter(|id| !id.is_empty()) {
            payload["message_reference"] = serde_json::json!({
                "message_id": reply_to,
                "fail_if_not_exists": false
            });
            payload["allowed_mentions"] = serde_json::json!({
                "replied_user": false
            });
        }

        if !message.attachments.is_empty() {
            payload["attachments"] = message
                .attachments
                .iter()
                .enumerate()
                .map(|(i, a)| serde_json::json!({ "id": i, "filename": a.filename }))
                .collect();
        }

        payload
    }

    /// Multipart body with `payload_json` and one `files[n]` part per attachment
    fn multipart_form(message: &OutboundMessage, payload: &serde_json::Value) -> Result<Form> {
        let mut form = Form::new().text("payload_json", payload.to_string());
        for (i, attachment) in message.attachments.iter().enumerate() {
            let part = Part::bytes(attachment.bytes.clone())
                .file_name(attachment.filename.clone())
                .mime_str(&attachment.mime_type)
                .map_err(|e| ChannelError::Error(format!("Invalid attachment type: {}", e)))?;
            form = form.part(format!("files[{}]", i), part);
        }
        Ok(form)
    }

    async fn send_message(&self, message: OutboundMessage) -> Result<()> {
        if let Some(reply_to) = message.reply_to.as_deref() {
            self.stop_typing(reply_to).await;
        }

        if message.is_empty() {
            tracing::warn!("Skipping empty message to {}", message.chat_id);
            return Ok(());
        }

        let url = self.api_url(&format!("/channels/{}/messages", message.chat_id));
        let payload = Self::message_payload(&message);

        // Only rate limits are retried; any other failure is final
        for _ in 0..MAX_SEND_ATTEMPTS {
            let request = self
                .http
                .post(&url)
                .header("Authorization", format!("Bot {}", self.config.token));
            let request = if message.attachments.is_empty() {
                request.json(&payload)
            } else {
                request.multipart(Self::multipart_form(&message, &payload)?)
            };

            let response = request
                .send()
                .await
                .map_err(|e| ChannelError::ApiError(format!("Request failed: {}", e)))?;

            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after(response.headers());
                tracing::warn!("Discord rate limited, retrying in {:?}", wait);
                tokio::time::sleep(wait).await;
                continue;
            }

            if status.is_success() {
                return Ok(());
            }

            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ChannelError::ApiError(format!(
                "Discord API error: {} - {}",
                status, error_text
            )));
        }

        Err(ChannelError::ApiError(format!(
            "Discord rate limit persisted after {} attempts",
            MAX_SEND_ATTEMPTS
        )))
    }

    /// Clone for async task
    fn clone_for_task(&self) -> Self {
        Self {
            config: self.config.clone(),
            running: Arc::clone(&self.running),
            inbound_tx: self.inbound_tx.clone(),
            http: self.http.clone(),
            seq: Arc::clone(&self.seq),
            bot_id: Arc::clone(&self.bot_id),
            typing_tasks: Arc::clone(&self.typing_tasks),
            heartbeat: Arc::clone(&self.heartbeat),
            shutdown_tx: None,
        }
    }

    async fn stop_heartbeat(&self) {
        if let Some(handle) = self.heartbeat.lock().await.take() {
            handle.abort();
        }
    }

    /// Run the gateway connection
    async fn run_gateway(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let mut reconnect_delay = 5;

        loop {
            // Check shutdown
            if shutdown_rx.try_recv().is_ok() {
                break;
            }

            tracing::info!("Connecting to Discord gateway...");

            // Connect
            match tokio_tungstenite::connect_async(&self.config.gateway_url).await {
                Ok((ws_stream, _)) => {
                    tracing::info!("Connected to Discord gateway");
                    reconnect_delay = 5; // Reset delay

                    let (mut write, mut read) = ws_stream.split();

                    // Heartbeats and identify go through the writer task
                    let (tx, mut rx) = mpsc::channel::<String>(32);

                    let writer_handle = tokio::spawn(async move {
                        while let Some(msg) = rx.recv().await {
                            if let Err(e) = write.send(WsMessage::Text(msg)).await {
                                tracing::warn!("WebSocket write failed: {}", e);
                                break;
                            }
                        }
                    });

                    // Main read loop
                    loop {
                        tokio::select! {
                            _ = shutdown_rx.recv() => {
                                tracing::info!("Shutdown signal received");
                                self.running.store(false, Ordering::SeqCst);
                                break;
                            }
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(WsMessage::Text(text))) => {
                                        match self.handle_gateway_message(&text, &tx).await {
                                            Ok(GatewayAction::Continue) => {}
                                            Ok(GatewayAction::Reconnect) => break,
                                            Err(e) => {
                                                tracing::error!("Error handling gateway message: {}", e);
                                            }
                                        }
                                    }
                                    Some(Ok(WsMessage::Close(frame))) => {
                                        tracing::warn!("Discord WebSocket closed: {:?}", frame);
                                        break;
                                    }
                                    Some(Err(e)) => {
                                        tracing::error!("Discord WebSocket error: {}", e);
                                        break;
                                    }
                                    None => {
                                        tracing::warn!("Discord WebSocket stream ended");
                                        break;
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }

                    self.stop_heartbeat().await;
                    writer_handle.abort();
                }
                Err(e) => {
                    tracing::warn!("Discord connection failed: {}", e);
                }
            }

            // Check running state
            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            tracing::info!("Reconnecting to Discord in {} seconds...", reconnect_delay);
            tokio::time::sleep(Duration::from_secs(reconnect_delay)).await;
            reconnect_delay = (reconnect_delay * 2).min(60);
        }

        Ok(())
    }

    async fn handle_gateway_message(
        &self,
        text: &str,
        tx: &mpsc::Sender<String>,
    ) -> Result<GatewayAction> {
        let payload: GatewayPayload = serde_json::from_str(text)
            .map_err(|e| ChannelError::Error(format!("Failed to parse payload: {}", e)))?;

        // Update sequence
        if let Some(s) = payload.s {
            *self.seq.lock().await = Some(s);
        }

        match GatewayOp::from_u8(payload.op) {
            Some(GatewayOp::Hello) => {
                let interval_ms = payload
                    .d
                    .as_ref()
                    .and_then(|d| d.get("heartbeat_interval"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(45000);

                let tx_hb = tx.clone();
                let seq_hb = self.seq.clone();
                let handle = tokio::spawn(async move {
                    let mut ticker = interval(Duration::from_millis(interval_ms));
                    ticker.tick().await;

                    loop {
                        ticker.tick().await;
                        let seq = *seq_hb.lock().await;
                        let heartbeat = serde_json::json!({
                            "op": GatewayOp::Heartbeat as u8,
                            "d": seq
                        });
                        if tx_hb.send(heartbeat.to_string()).await.is_err() {
                            break;
                        }
                    }
                });
                self.stop_heartbeat().await;
                *self.heartbeat.lock().await = Some(handle);

                let identify = serde_json::json!({
                    "op": GatewayOp::Identify as u8,
                    "d": {
                        "token": self.config.token,
                        "intents": self.config.intents,
                        "properties": {
                            "os": std::env::consts::OS,
                            "browser": "cortana",
                            "device": "cortana"
                        }
                    }
                });
                tx.send(identify.to_string())
                    .await
                    .map_err(|e| ChannelError::Error(e.to_string()))?;
            }
            Some(GatewayOp::Dispatch) => match payload.t.as_deref() {
                Some("MESSAGE_CREATE") => {
                    if let Some(d) = payload.d {
                        self.handle_message_create(d).await?;
                    }
                }
                Some("READY") => {
                    let user = payload.d.as_ref().and_then(|d| d.get("user"));
                    let id = user.and_then(|u| u.get("id")).and_then(|v| v.as_str());
                    let name = user
                        .and_then(|u| u.get("username"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    if let Some(id) = id {
                        *self.bot_id.lock().await = Some(id.to_string());
                    }
                    tracing::info!("Discord gateway READY, logged in as {}", name);
                }
                _ => {}
            },
            Some(GatewayOp::Heartbeat) => {
                let seq = *self.seq.lock().await;
                let heartbeat = serde_json::json!({ "op": GatewayOp::Heartbeat as u8, "d": seq });
                tx.send(heartbeat.to_string())
                    .await
                    .map_err(|e| ChannelError::Error(e.to_string()))?;
            }
            Some(GatewayOp::Reconnect) => {
                tracing::info!("Discord requested reconnect");
                return Ok(GatewayAction::Reconnect);
            }
            Some(GatewayOp::InvalidSession) => {
                tracing::warn!("Discord invalid session");
                return Ok(GatewayAction::Reconnect);
            }
            Some(GatewayOp::HeartbeatAck) => {
                tracing::trace!("Heartbeat acknowledged");
            }
            _ => {}
        }
        Ok(GatewayAction::Continue)
    }
}

/// Post a typing indicator every `every`, `refreshes` times at most
fn spawn_typing_loop(
    http: reqwest::Client,
    url: String,
    token: String,
    every: Duration,
    refreshes: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        for _ in 0..refreshes {
            ticker.tick().await;
            if let Err(e) = http
                .post(&url)
                .header("Authorization", format!("Bot {}", token))
                .send()
                .await
            {
                tracing::debug!("Typing indicator failed: {}", e);
            }
        }
    })
}

#[async_trait]
impl ChannelHandler for DiscordHandler {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn start(&mut self) -> Result<()> {
        if self.config.token.is_empty() {
            return Err(ChannelError::NotConfigured(
                "Discord token not configured".to_string(),
            ));
        }

        if self.is_running() {
            return Ok(());
        }

        tracing::info!("Starting Discord bot...");
        self.running.store(true, Ordering::SeqCst);

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let handler = self.clone_for_task();
        tokio::spawn(async move {
            if let Err(e) = handler.run_gateway(shutdown_rx).await {
                tracing::error!("Discord gateway task failed: {}", e);
            }
        });

        tracing::info!("Discord bot started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        tracing::info!("Stopping Discord bot...");
        self.running.store(false, Ordering::SeqCst);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }

        // Stop typing indicators
        let mut tasks = self.typing_tasks.lock().await;
        for (_, handle) in tasks.drain() {
            handle.abort();
        }

        tracing::info!("Discord bot stopped");
        Ok(())
    }

    async fn send(&self, event: OutboundEvent) -> Result<()> {
        match event {
            OutboundEvent::Typing {
                chat_id,
                message_id,
                ..
            } => {
                self.start_typing(&chat_id, message_id).await;
                Ok(())
            }
            OutboundEvent::StopTyping { message_id, .. } => {
                self.stop_typing(&message_id).await;
                Ok(())
            }
            OutboundEvent::Message(message) => self.send_message(message).await,
        }
    }

    fn set_inbound_sender(&mut self, tx: mpsc::UnboundedSender<InboundMessage>) {
        self.inbound_tx = Some(tx);
    }
}
