//! `!` command parsing

use cortana_providers::{ImageSource, KeyInfo, WorkerModel};

/// A prefixed chat command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Show OpenRouter key usage
    Credits,
    /// Generate with the primary backend
    Generate(String),
    /// Generate with SDXL Lightning on the worker
    GenerateSd(String),
    /// Generate with Dreamshaper 8 LCM on the worker
    GenerateDs(String),
    /// Reset the channel history
    Clear,
    Help,
    Unknown(String),
}

impl Command {
    /// Parse `content` if it starts with `prefix`
    ///
    /// The command word is case-insensitive; everything after it, trimmed,
    /// is the argument string.
    pub fn parse(content: &str, prefix: &str) -> Option<Self> {
        let rest = content.trim().strip_prefix(prefix)?;
        let (word, args) = match rest.split_once(' ') {
            Some((word, args)) => (word, args.trim()),
            None => (rest, ""),
        };

        let command = match word.to_lowercase().as_str() {
            "credits" => Self::Credits,
            "generate" => Self::Generate(args.to_string()),
            "generate-sd" => Self::GenerateSd(args.to_string()),
            "generate-ds" => Self::GenerateDs(args.to_string()),
            "clear" => Self::Clear,
            "help" => Self::Help,
            _ => Self::Unknown(word.to_string()),
        };
        Some(command)
    }

    /// Command word as typed after the prefix
    pub fn name(&self) -> &str {
        match self {
            Self::Credits => "credits",
            Self::Generate(_) => "generate",
            Self::GenerateSd(_) => "generate-sd",
            Self::GenerateDs(_) => "generate-ds",
            Self::Clear => "clear",
            Self::Help => "help",
            Self::Unknown(word) => word,
        }
    }

    /// Backend and prompt for the image commands
    pub fn image_request(&self) -> Option<(ImageSource, &str)> {
        match self {
            Self::Generate(prompt) => Some((ImageSource::Primary, prompt.as_str())),
            Self::GenerateSd(prompt) => Some((
                ImageSource::Worker(WorkerModel::StableDiffusionXlLightning),
                prompt.as_str(),
            )),
            Self::GenerateDs(prompt) => {
                Some((ImageSource::Worker(WorkerModel::Dreamshaper8Lcm), prompt.as_str()))
            }
            _ => None,
        }
    }
}

/// Reply text for the `credits` command
pub fn format_credits(info: &KeyInfo) -> String {
    let credits = match (info.remaining(), info.limit) {
        (Some(remaining), Some(limit)) => format!("{} left out of {}", remaining, limit),
        _ => "Unlimited".to_string(),
    };
    format!(
        "**Key label:** {}\n**Free tier:** {}\n**Credits:** {}",
        info.label,
        if info.is_free_tier { "Yes" } else { "No" },
        credits
    )
}

/// Reply text for the `help` command
pub fn help_text(prefix: &str) -> String {
    [
        "**Commands**".to_string(),
        format!("`{prefix}credits` show OpenRouter key usage"),
        format!("`{prefix}generate <prompt>` generate an image with Gemini"),
        format!("`{prefix}generate-sd <prompt>` generate with Stable Diffusion XL Lightning"),
        format!("`{prefix}generate-ds <prompt>` generate with Dreamshaper 8 LCM"),
        format!("`{prefix}clear` forget this channel's conversation"),
        format!("`{prefix}help` show this message"),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("!credits", "!"), Some(Command::Credits));
        assert_eq!(Command::parse("  !CLEAR  ", "!"), Some(Command::Clear));
        assert_eq!(
            Command::parse("!generate a red   fox ", "!"),
            Some(Command::Generate("a red   fox".to_string()))
        );
        assert_eq!(
            Command::parse("!Generate-SD castle", "!"),
            Some(Command::GenerateSd("castle".to_string()))
        );
        assert_eq!(
            Command::parse("!generate-ds", "!"),
            Some(Command::GenerateDs(String::new()))
        );
        assert_eq!(
            Command::parse("!dance now", "!"),
            Some(Command::Unknown("dance".to_string()))
        );
        assert_eq!(Command::parse("hello !clear", "!"), None);
    }

    #[test]
    fn test_empty_prompt_after_trim() {
        assert_eq!(
            Command::parse("!generate ", "!"),
            Some(Command::Generate(String::new()))
        );
    }

    #[test]
    fn test_image_request() {
        let cmd = Command::GenerateDs("x".to_string());
        assert_eq!(
            cmd.image_request(),
            Some((ImageSource::Worker(WorkerModel::Dreamshaper8Lcm), "x"))
        );
        assert_eq!(Command::Clear.image_request(), None);
        assert_eq!(cmd.name(), "generate-ds");
    }

    #[test]
    fn test_format_credits() {
        let info = KeyInfo {
            label: "main".to_string(),
            usage: 0.5,
            limit: Some(5.0),
            is_free_tier: false,
        };
        assert_eq!(
            format_credits(&info),
            "**Key label:** main\n**Free tier:** No\n**Credits:** 4.5 left out of 5"
        );

        let unlimited = KeyInfo {
            limit: None,
            is_free_tier: true,
            ..info
        };
        assert!(format_credits(&unlimited).ends_with("**Free tier:** Yes\n**Credits:** Unlimited"));
    }
}
