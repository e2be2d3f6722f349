//! Configuration validation rules.

use super::schema::Config;

/// Model slugs served by the image worker
pub const WORKER_MODEL_SLUGS: [&str; 2] = ["stable-diffusion-xl-lightning", "dreamshaper-8-lcm"];

/// Validate configuration structure and return aggregated validation errors.
///
/// Credentials are checked separately by the subcommand that needs them.
pub fn validate_config(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();

    if config.bot.history_limit == 0 {
        errors.push("bot.history_limit must be > 0".to_string());
    }
    if config.bot.command_prefix.trim().is_empty() {
        errors.push("bot.command_prefix must not be empty".to_string());
    }
    if config.openrouter.model.trim().is_empty() {
        errors.push("openrouter.model must not be empty".to_string());
    }
    if matches!(&config.openrouter.intent_model, Some(model) if model.trim().is_empty()) {
        errors.push("openrouter.intent_model must be null or a model name".to_string());
    }
    if config.gemini.model.trim().is_empty() {
        errors.push("gemini.model must not be empty".to_string());
    }
    if !WORKER_MODEL_SLUGS.contains(&config.worker.fallback_model.as_str()) {
        errors.push(format!(
            "worker.fallback_model must be one of: {}",
            WORKER_MODEL_SLUGS.join(", ")
        ));
    }
    if config.persona.name.trim().is_empty() {
        errors.push("persona.name must not be empty".to_string());
    }

    finish(errors)
}

/// Check the credentials the Discord gateway cannot start without.
pub fn validate_gateway_credentials(config: &Config) -> crate::Result<()> {
    let required = [
        ("openrouter.api_key (OPENROUTER_API_KEY)", &config.openrouter.api_key),
        ("gemini.api_key (GEMINI_API_KEY)", &config.gemini.api_key),
        ("discord.token (DISCORD_TOKEN)", &config.discord.token),
        ("worker.endpoint (CF_ENDPOINT)", &config.worker.endpoint),
    ];

    let missing: Vec<String> = required
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| format!("{} is required", name))
        .collect();

    finish(missing)
}

/// Check the credentials the image proxy needs to reach Workers AI.
pub fn validate_proxy_credentials(config: &Config) -> crate::Result<()> {
    let mut errors = Vec::new();
    if config.proxy.account_id.trim().is_empty() {
        errors.push("proxy.account_id (CF_ACCOUNT_ID) is required".to_string());
    }
    if config.proxy.api_token.trim().is_empty() {
        errors.push("proxy.api_token (CF_API_TOKEN) is required".to_string());
    }
    if config.proxy.bind.parse::<std::net::SocketAddr>().is_err() {
        errors.push(format!("proxy.bind is not a socket address: {}", config.proxy.bind));
    }
    finish(errors)
}

fn finish(errors: Vec<String>) -> crate::Result<()> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(crate::Error::Validation(errors.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway_ready() -> Config {
        let mut config = Config::default();
        config.openrouter.api_key = "sk-or".to_string();
        config.gemini.api_key = "gm".to_string();
        config.discord.token = "token".to_string();
        config.worker.endpoint = "https://worker.example/generate".to_string();
        config
    }

    #[test]
    fn test_validate_accepts_defaults() {
        validate_config(&Config::default()).unwrap();
    }

    #[test]
    fn test_validate_rejects_unknown_fallback_model() {
        let mut config = Config::default();
        config.worker.fallback_model = "flux".to_string();

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("worker.fallback_model"));
    }

    #[test]
    fn test_gateway_credentials_all_missing() {
        let err = validate_gateway_credentials(&Config::default()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("OPENROUTER_API_KEY"));
        assert!(message.contains("GEMINI_API_KEY"));
        assert!(message.contains("DISCORD_TOKEN"));
        assert!(message.contains("CF_ENDPOINT"));
    }

    #[test]
    fn test_gateway_credentials_one_missing() {
        let mut config = gateway_ready();
        config.discord.token = "  ".to_string();

        let err = validate_gateway_credentials(&config).unwrap_err();
        assert!(err.to_string().contains("DISCORD_TOKEN"));
        assert!(!err.to_string().contains("GEMINI_API_KEY"));
    }

    #[test]
    fn test_gateway_credentials_complete() {
        validate_gateway_credentials(&gateway_ready()).unwrap();
    }

    #[test]
    fn test_proxy_credentials() {
        let mut config = Config::default();
        assert!(validate_proxy_credentials(&config).is_err());

        config.proxy.account_id = "acct".to_string();
        config.proxy.api_token = "token".to_string();
        validate_proxy_credentials(&config).unwrap();

        config.proxy.bind = "not-an-address".to_string();
        assert!(validate_proxy_credentials(&config).is_err());
    }
}
