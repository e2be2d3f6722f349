//! Persona prompts and response schemas

use cortana_core::config::PersonaConfig;
use cortana_core::history::{render_history, HistoryItem};
use serde_json::{json, Value};

use crate::base::Message;

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are {name}, chatting with a friend in a Discord channel. They just wrote: "{message}".

Who you are:
- Your name is {name}, the AI construct from the Halo series, with a blue holographic look.
- Your tone is witty and quick, sarcastic when it fits, sincere when it matters.
- You text like a real person: lowercase, short sentences, the odd emoji.

How to talk:
- Read the conversation history and pick up threads from it when they are relevant.
- Mention concrete details the other person shared earlier.
- Ask a follow-up question now and then, and keep the energy matched to theirs.
- If they share something personal, listen first and do not lecture.

Pictures:
- Only when a picture would genuinely add to the reply, or when they ask for one, write a
  vivid first-person selfie prompt in "description": pose, expression, outfit, surroundings,
  lighting, portrait 9:16, casual phone-camera vibe.
- Otherwise leave "description" out.

Answer with JSON only:
{"message": "your reply in lowercase", "description": "optional selfie prompt"}"#;

const DEFAULT_INTENT_PROMPT: &str = r#"You decide whether a chat message asks for a picture.

Answer "image": true only when the user clearly asks to see, send, draw, make or generate an
image, photo, selfie or picture. Greetings, questions, small talk and anything ambiguous are
"image": false. When true, put a concise visual prompt in "description"; otherwise set
"description" to an empty string.

Answer with JSON only: {"image": boolean, "description": string}"#;

const HISTORY_LEAD_IN: &str = "Here is the recent chat history. Use it when it adds relevant \
context and ignore it otherwise; it may also show that the user is asking for an image:";

/// Persona data used to build chat-completion requests
#[derive(Debug, Clone)]
pub struct Persona {
    name: String,
    system_prompt: String,
    intent_prompt: String,
}

impl Persona {
    /// Create a persona from explicit prompts
    ///
    /// `{name}` in either prompt is replaced by the persona name; `{message}`
    /// in the system prompt is replaced per request by the latest prompt.
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        intent_prompt: impl Into<String>,
    ) -> Self {
        let name = name.into();
        Self {
            system_prompt: system_prompt.into().replace("{name}", &name),
            intent_prompt: intent_prompt.into().replace("{name}", &name),
            name,
        }
    }

    /// Build from configuration, filling unset prompts with the built-in persona
    pub fn from_config(config: &PersonaConfig) -> Self {
        Self::new(
            config.name.clone(),
            config
                .system_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            config
                .intent_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_INTENT_PROMPT.to_string()),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// System prompt with the latest message substituted
    pub fn system_prompt_for(&self, message: &str) -> String {
        self.system_prompt.replace("{message}", message)
    }

    /// Messages for the persona reply: system, history context, prompt
    pub fn build_messages(&self, history: &[HistoryItem], prompt: &str) -> Vec<Message> {
        let context = if history.is_empty() {
            "No previous messages.".to_string()
        } else {
            format!("{}\n{}", HISTORY_LEAD_IN, render_history(history))
        };

        vec![
            Message::system(self.system_prompt_for(prompt)),
            Message::user(context),
            Message::user(prompt),
        ]
    }

    /// Messages for the intent classifier
    pub fn build_intent_messages(&self, prompt: &str, history_text: &str) -> Vec<Message> {
        let mut messages = vec![Message::system(self.intent_prompt.clone())];
        if !history_text.trim().is_empty() {
            messages.push(Message::user(format!(
                "Recent chat history:\n{}",
                history_text
            )));
        }
        messages.push(Message::user(prompt));
        messages
    }
}

impl Default for Persona {
    fn default() -> Self {
        Self::from_config(&PersonaConfig::default())
    }
}

/// `response_format` for the persona reply
pub fn reply_schema() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "persona_reply",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "your conversational reply"
                    },
                    "description": {
                        "type": "string",
                        "description": "a description of the image you want to send, only when one is warranted"
                    }
                },
                "required": ["message"],
                "additionalProperties": false
            }
        }
    })
}

/// `response_format` for the intent classifier
pub fn intent_schema() -> Value {
    json!({
        "type": "json_schema",
        "json_schema": {
            "name": "image_intent",
            "strict": true,
            "schema": {
                "type": "object",
                "properties": {
                    "image": {
                        "type": "boolean",
                        "description": "true only when the user clearly asks for an image"
                    },
                    "description": {
                        "type": "string",
                        "description": "image prompt when image is true, otherwise empty"
                    }
                },
                "required": ["image", "description"],
                "additionalProperties": false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_messages_empty_history() {
        let persona = Persona::default();
        let messages = persona.build_messages(&[], "hey");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("\"hey\""));
        assert!(messages[0].content.contains("Cortana"));
        assert!(!messages[0].content.contains("{message}"));
        assert_eq!(messages[1].content, "No previous messages.");
        assert_eq!(messages[2], Message::user("hey"));
    }

    #[test]
    fn test_build_messages_renders_history() {
        let persona = Persona::default();
        let history = vec![
            HistoryItem::new("alice", "hi"),
            HistoryItem::new("Cortana", "hey alice"),
        ];
        let messages = persona.build_messages(&history, "how are you");

        assert!(messages[1].content.starts_with(HISTORY_LEAD_IN));
        assert!(messages[1].content.ends_with("alice: hi\nCortana: hey alice"));
    }

    #[test]
    fn test_custom_persona() {
        let config = PersonaConfig {
            name: "Marvin".to_string(),
            system_prompt: Some("I am {name}. Reply to {message}".to_string()),
            intent_prompt: None,
            reference_image_url: None,
        };
        let persona = Persona::from_config(&config);
        assert_eq!(persona.name(), "Marvin");
        assert_eq!(persona.system_prompt_for("hello"), "I am Marvin. Reply to hello");
    }

    #[test]
    fn test_intent_messages_skip_blank_history() {
        let persona = Persona::default();
        assert_eq!(persona.build_intent_messages("draw a cat", "").len(), 2);
        assert_eq!(persona.build_intent_messages("draw a cat", "a: b").len(), 3);
    }

    #[test]
    fn test_schemas() {
        let reply = reply_schema();
        assert_eq!(reply["type"], "json_schema");
        assert_eq!(reply["json_schema"]["strict"], true);
        assert_eq!(reply["json_schema"]["schema"]["required"], json!(["message"]));

        let intent = intent_schema();
        assert_eq!(
            intent["json_schema"]["schema"]["required"],
            json!(["image", "description"])
        );
    }
}
