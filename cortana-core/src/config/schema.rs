//! Configuration schema definitions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration for cortana
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Discord bot connection
    #[serde(default)]
    pub discord: DiscordConfig,
    /// Chat-completion endpoint (OpenRouter)
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
    /// Primary image generation (Gemini)
    #[serde(default)]
    pub gemini: GeminiConfig,
    /// Fallback image worker
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Router behavior
    #[serde(default)]
    pub bot: BotConfig,
    /// Persona data
    #[serde(default)]
    pub persona: PersonaConfig,
    /// Image proxy server
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Directory for log files
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Module-specific overrides
    #[serde(default)]
    pub overrides: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            dir: default_log_dir(),
            overrides: HashMap::new(),
        }
    }
}

/// Discord channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_discord_gateway")]
    pub gateway_url: String,
    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
    #[serde(default = "default_discord_intents")]
    pub intents: u64,
}

fn default_discord_gateway() -> String {
    "wss://gateway.discord.gg/?v=10&encoding=json".to_string()
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_discord_intents() -> u64 {
    37377 // GUILDS + GUILD_MESSAGES + DIRECT_MESSAGES + MESSAGE_CONTENT
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            gateway_url: default_discord_gateway(),
            api_base: default_discord_api_base(),
            intents: default_discord_intents(),
        }
    }
}

/// OpenRouter chat-completion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openrouter_base")]
    pub api_base: String,
    /// Model used for the persona reply
    #[serde(default = "default_reply_model")]
    pub model: String,
    /// Model used for image-intent classification; `None` disables the classifier
    #[serde(default = "default_intent_model")]
    pub intent_model: Option<String>,
}

fn default_openrouter_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_reply_model() -> String {
    "meta-llama/llama-4-maverick".to_string()
}

fn default_intent_model() -> Option<String> {
    Some("meta-llama/llama-4-scout".to_string())
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_openrouter_base(),
            model: default_reply_model(),
            intent_model: default_intent_model(),
        }
    }
}

/// Gemini image generation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_base")]
    pub api_base: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

fn default_gemini_base() -> String {
    "https://generativelanguage.googleapis.com/v1beta".to_string()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash-preview-image-generation".to_string()
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: default_gemini_base(),
            model: default_gemini_model(),
        }
    }
}

/// Fallback image worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Base URL, e.g. `https://images.example.workers.dev/generate`
    #[serde(default)]
    pub endpoint: String,
    /// Model slug used when the primary backend fails
    #[serde(default = "default_fallback_model")]
    pub fallback_model: String,
}

fn default_fallback_model() -> String {
    "stable-diffusion-xl-lightning".to_string()
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            fallback_model: default_fallback_model(),
        }
    }
}

/// Message router configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// Maximum messages kept per channel
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Append the bot's own replies to the channel history
    #[serde(default = "default_true")]
    pub record_replies: bool,
}

fn default_command_prefix() -> String {
    "!".to_string()
}

fn default_history_limit() -> usize {
    30
}

fn default_true() -> bool {
    true
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            history_limit: default_history_limit(),
            record_replies: true,
        }
    }
}

/// Persona data; unset prompts fall back to the built-in persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_name")]
    pub name: String,
    /// System prompt template; `{message}` is replaced by the latest prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// System prompt for the image-intent classifier
    #[serde(default)]
    pub intent_prompt: Option<String>,
    /// Reference image sent along with primary image generation
    #[serde(default)]
    pub reference_image_url: Option<String>,
}

fn default_persona_name() -> String {
    "Cortana".to_string()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: default_persona_name(),
            system_prompt: None,
            intent_prompt: None,
            reference_image_url: None,
        }
    }
}

/// Image proxy server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_proxy_bind")]
    pub bind: String,
    /// Cloudflare account id
    #[serde(default)]
    pub account_id: String,
    /// Cloudflare API token with Workers AI access
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_proxy_api_base")]
    pub api_base: String,
}

fn default_proxy_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_proxy_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: default_proxy_bind(),
            account_id: String::new(),
            api_token: String::new(),
            api_base: default_proxy_api_base(),
        }
    }
}
