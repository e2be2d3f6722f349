//! Message router: classification, history and replies

use cortana_core::bus::{InboundMessage, MessageBus, OutboundEvent, OutboundMessage};
use cortana_core::config::BotConfig;
use cortana_core::history::{render_history, HistoryItem, HistoryStore};
use cortana_core::utils::preview;
use cortana_providers::{ConversationModel, ImagePipeline, ProviderError};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::commands::{format_credits, help_text, Command};

pub const IMAGE_FAILED: &str = "Failed to generate image.";
pub const CREDITS_FAILED: &str = "Failed to fetch credits info from OpenRouter.";
pub const HISTORY_CLEARED: &str = "Conversation history cleared.";
pub const UNKNOWN_COMMAND: &str = "Unknown command";

/// Router errors
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Model request failed: {0}")]
    Model(#[from] ProviderError),

    #[error("Bus error: {0}")]
    Bus(#[from] cortana_core::Error),
}

/// How an inbound message is handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Authored by a bot
    Ignored,
    Command(Command),
    /// Direct message; carries the prompt
    Direct(String),
    /// Reply to one of the bot's messages; carries the prompt
    ReplyToBot(String),
    /// The bot was mentioned; carries the prompt
    Mention(String),
    /// Recorded in history, not answered
    NoMatch,
}

/// Routes inbound chat messages to commands or persona replies
pub struct MessageRouter {
    bus: MessageBus,
    history: HistoryStore,
    model: Arc<dyn ConversationModel>,
    images: Arc<ImagePipeline>,
    prefix: String,
    persona_name: String,
    record_replies: bool,
}

impl MessageRouter {
    pub fn new(
        bus: MessageBus,
        history: HistoryStore,
        model: Arc<dyn ConversationModel>,
        images: Arc<ImagePipeline>,
        bot: &BotConfig,
        persona_name: impl Into<String>,
    ) -> Self {
        Self {
            bus,
            history,
            model,
            images,
            prefix: bot.command_prefix.clone(),
            persona_name: persona_name.into(),
            record_replies: bot.record_replies,
        }
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Classify a message, first matching rule wins
    pub fn classify(&self, msg: &InboundMessage) -> Route {
        if msg.author.is_bot {
            return Route::Ignored;
        }

        let text = msg.content.trim();
        if let Some(command) = Command::parse(text, &self.prefix) {
            return Route::Command(command);
        }

        if msg.is_direct {
            return Route::Direct(text.to_string());
        }

        let bot_id = msg.bot_id.as_str();
        if bot_id.is_empty() {
            return Route::NoMatch;
        }

        if let Some(reference) = msg.reference.as_ref().filter(|r| r.author_id == bot_id) {
            return Route::ReplyToBot(format!(
                "the user replied to your message: {} and this is the message they sent you: {}",
                reference.content, text
            ));
        }

        let mention = mention_pattern(bot_id);
        let mentioned = msg.mentions.iter().any(|id| id == bot_id)
            || mention.as_ref().is_some_and(|re| re.is_match(text));
        if mentioned {
            let stripped = match &mention {
                Some(re) => re.replace_all(text, "").trim().to_string(),
                None => text.to_string(),
            };
            return Route::Mention(format!(
                "you have been mentioned, this is the message the user sent you: {}",
                stripped
            ));
        }

        Route::NoMatch
    }

    /// Handle one inbound message to completion
    pub async fn handle(&self, msg: InboundMessage) -> Result<(), RouterError> {
        let route = self.classify(&msg);
        debug!(
            "Message {} in {} from {} routed as {:?}",
            msg.message_id, msg.chat_id, msg.author.name, route
        );

        let prompt = match route {
            Route::Ignored => return Ok(()),
            Route::Command(command) => return self.handle_command(&msg, command).await,
            Route::Direct(prompt) | Route::ReplyToBot(prompt) | Route::Mention(prompt) => {
                Some(prompt)
            }
            Route::NoMatch => None,
        };

        let history = self.history.append(
            &msg.chat_id,
            HistoryItem::new(msg.author.name.clone(), msg.content.trim()),
        );

        match prompt {
            Some(prompt) => self.converse(&msg, &history, &prompt).await,
            None => Ok(()),
        }
    }

    /// Persona reply, with an image when either the reply or the classifier asks for one
    async fn converse(
        &self,
        msg: &InboundMessage,
        history: &[HistoryItem],
        prompt: &str,
    ) -> Result<(), RouterError> {
        let _typing = TypingGuard::start(&self.bus, msg)?;

        let prior = &history[..history.len().saturating_sub(1)];
        let reply = self.model.reply(prior, prompt).await?;

        let intent = if self.model.classifies_intent() {
            Some(self.model.intent(prompt, &render_history(history)).await?)
        } else {
            None
        };

        let intent_description = intent
            .as_ref()
            .map(|i| i.description.trim())
            .filter(|d| !d.is_empty());
        let wants_image =
            reply.image_description().is_some() || intent.as_ref().is_some_and(|i| i.image);
        let description = reply
            .image_description()
            .or(intent_description)
            .unwrap_or(prompt);

        info!(
            "Reply for {}: wants_image={} description={:?} message={:?}",
            msg.chat_id,
            wants_image,
            preview(description, 80),
            preview(&reply.message, 80)
        );

        let outbound = if wants_image {
            match self.images.generate(description).await {
                Some(image) => OutboundMessage::reply(msg, reply.message.clone())
                    .with_attachment(image.into_attachment()),
                None => OutboundMessage::reply(msg, IMAGE_FAILED),
            }
        } else {
            OutboundMessage::reply(msg, reply.message.clone())
        };

        let sent_reply_text = outbound.content == reply.message;
        if !self.send(outbound)? {
            return Ok(());
        }

        if self.record_replies && sent_reply_text && !reply.message.trim().is_empty() {
            self.history.append(
                &msg.chat_id,
                HistoryItem::new(self.persona_name.clone(), reply.message.trim()),
            );
        }
        Ok(())
    }

    async fn handle_command(
        &self,
        msg: &InboundMessage,
        command: Command,
    ) -> Result<(), RouterError> {
        info!("Command {} from {} in {}", command.name(), msg.author.name, msg.chat_id);

        if let Some((source, prompt)) = command.image_request() {
            if prompt.is_empty() {
                let usage = format!("Usage: {}{} <prompt>", self.prefix, command.name());
                self.send(OutboundMessage::reply(msg, usage))?;
                return Ok(());
            }

            let _typing = TypingGuard::start(&self.bus, msg)?;
            let outbound = match self.images.generate_with(source, prompt).await {
                Some(image) => OutboundMessage::reply(msg, "").with_attachment(image.into_attachment()),
                None => OutboundMessage::reply(msg, IMAGE_FAILED),
            };
            self.send(outbound)?;
            return Ok(());
        }

        let text = match command {
            Command::Credits => {
                let _typing = TypingGuard::start(&self.bus, msg)?;
                match self.model.key_info().await {
                    Ok(info) => format_credits(&info),
                    Err(e) => {
                        warn!("Failed to fetch key info: {}", e);
                        CREDITS_FAILED.to_string()
                    }
                }
            }
            Command::Clear => {
                self.history.clear(&msg.chat_id);
                HISTORY_CLEARED.to_string()
            }
            Command::Help => help_text(&self.prefix),
            _ => UNKNOWN_COMMAND.to_string(),
        };

        self.send(OutboundMessage::reply(msg, text))?;
        Ok(())
    }

    /// Publish a reply; returns false when there was nothing to send
    fn send(&self, outbound: OutboundMessage) -> Result<bool, RouterError> {
        if outbound.is_empty() {
            warn!("Empty reply for {}, nothing sent", outbound.chat_id);
            return Ok(false);
        }
        self.bus.publish_outbound(outbound)?;
        Ok(true)
    }

    /// Consume inbound messages, one task per message
    pub async fn run(self: Arc<Self>) -> Result<(), RouterError> {
        let Some(mut inbound_rx) = self.bus.take_inbound_receiver().await else {
            return Err(cortana_core::Error::Channel("Inbound receiver already taken".to_string()).into());
        };

        info!("Message router started");
        while let Some(msg) = inbound_rx.recv().await {
            let router = Arc::clone(&self);
            tokio::spawn(async move {
                let message_id = msg.message_id.clone();
                if let Err(e) = router.handle(msg).await {
                    error!("Error handling message {}: {}", message_id, e);
                }
            });
        }

        info!("Message bus closed, stopping router");
        Ok(())
    }
}

/// Typing indicator for one inbound message, stopped when dropped
struct TypingGuard<'a> {
    bus: &'a MessageBus,
    msg: &'a InboundMessage,
}

impl<'a> TypingGuard<'a> {
    fn start(bus: &'a MessageBus, msg: &'a InboundMessage) -> Result<Self, RouterError> {
        bus.publish_outbound(OutboundEvent::typing_for(msg))?;
        Ok(Self { bus, msg })
    }
}

impl Drop for TypingGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.bus.publish_outbound(OutboundEvent::stop_typing_for(self.msg)) {
            debug!("Could not stop typing for {}: {}", self.msg.message_id, e);
        }
    }
}

fn mention_pattern(bot_id: &str) -> Option<Regex> {
    Regex::new(&format!("<@!?{}>", regex::escape(bot_id))).ok()
}
