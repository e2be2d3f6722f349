//! CLI entry point for cortana

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use cortana_agent::commands::format_credits;
use cortana_agent::MessageRouter;
use cortana_channels::{ChannelHandler, DiscordHandler};
use cortana_core::bus::MessageBus;
use cortana_core::config::{
    validate_gateway_credentials, validate_proxy_credentials, Config, ConfigLoader,
};
use cortana_core::logging::init_logging;
use cortana_core::HistoryStore;
use cortana_providers::{
    ConversationModel, GeminiImageClient, ImageBackend, ImagePipeline, ImageSource,
    OpenRouterClient, WorkerImageClient, WorkerModel,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cortana")]
#[command(about = "Discord persona bot with image generation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to Discord and answer messages
    Gateway,
    /// Serve the image proxy in front of Workers AI
    Proxy {
        /// Listen address, overrides proxy.bind
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Show the loaded configuration
    Status,
    /// Generate one image and write it to disk
    Generate {
        /// Image prompt
        #[arg(short, long)]
        prompt: String,
        /// Backend to use
        #[arg(short, long, value_enum, default_value_t = Backend::Gemini)]
        backend: Backend,
        /// Output file, defaults to the backend's filename
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Show OpenRouter key usage
    Credits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    Gemini,
    Sd,
    Ds,
}

impl Backend {
    fn source(self) -> ImageSource {
        match self {
            Backend::Gemini => ImageSource::Primary,
            Backend::Sd => ImageSource::Worker(WorkerModel::StableDiffusionXlLightning),
            Backend::Ds => ImageSource::Worker(WorkerModel::Dreamshaper8Lcm),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };
    let config = config_loader.load()?;

    // Flushes the log file on drop
    let _log_guard = init_logging(&config.logging);

    match cli.command {
        Commands::Gateway => {
            info!("Starting gateway");
            run_gateway(config).await?;
        }
        Commands::Proxy { bind } => {
            info!("Starting image proxy");
            run_proxy(config, bind).await?;
        }
        Commands::Status => run_status(&config_loader, &config),
        Commands::Generate {
            prompt,
            backend,
            out,
        } => {
            info!("Generating image with {:?}", backend);
            run_generate(&config, &prompt, backend, out).await?;
        }
        Commands::Credits => run_credits(&config).await?,
    }

    Ok(())
}

/// Gemini as primary, one worker client per diffusion model
fn build_image_pipeline(config: &Config) -> Result<ImagePipeline> {
    let fallback = WorkerModel::from_slug(&config.worker.fallback_model)
        .ok_or_else(|| anyhow!("Unknown worker model: {}", config.worker.fallback_model))?;

    let primary: Arc<dyn ImageBackend> = Arc::new(GeminiImageClient::from_config(config));
    let mut pipeline = ImagePipeline::new(primary, fallback);
    for model in WorkerModel::all() {
        let worker = WorkerImageClient::new(config.worker.endpoint.clone(), model);
        pipeline = pipeline.with_worker(model, Arc::new(worker));
    }
    Ok(pipeline)
}

/// Run the Discord gateway until Ctrl+C
async fn run_gateway(config: Config) -> Result<()> {
    validate_gateway_credentials(&config)?;

    println!("{}", style("Starting cortana gateway...").bold().cyan());

    let bus = MessageBus::new();
    let model: Arc<dyn ConversationModel> = Arc::new(OpenRouterClient::from_config(&config));
    let images = Arc::new(build_image_pipeline(&config)?);
    let router = Arc::new(MessageRouter::new(
        bus.clone(),
        HistoryStore::new(config.bot.history_limit),
        model,
        images,
        &config.bot,
        config.persona.name.clone(),
    ));

    let mut discord = DiscordHandler::new(&config.discord)?;
    discord.set_inbound_sender(bus.inbound_sender());
    discord.start().await?;
    let discord = Arc::new(RwLock::new(discord));

    let sender = Arc::clone(&discord);
    bus.subscribe_outbound("discord", move |event| {
        let sender = Arc::clone(&sender);
        async move {
            if let Err(e) = sender.read().await.send(event).await {
                error!("Failed to deliver to Discord: {}", e);
            }
        }
    })
    .await;

    let dispatch_bus = bus.clone();
    let dispatch_handle = tokio::spawn(async move {
        dispatch_bus.dispatch_outbound_loop().await;
    });

    let router_handle = tokio::spawn(async move {
        if let Err(e) = router.run().await {
            error!("Message router stopped: {}", e);
        }
    });

    println!(
        "{} as {}. Press Ctrl+C to stop.",
        style("Connected").green(),
        style(&config.persona.name).bold()
    );

    tokio::signal::ctrl_c().await?;

    println!("\n{}", style("Shutting down...").yellow());
    if let Err(e) = discord.write().await.stop().await {
        error!("Error stopping Discord: {}", e);
    }
    bus.stop().await;
    router_handle.abort();
    dispatch_handle.abort();

    Ok(())
}

/// Serve the image proxy until Ctrl+C
async fn run_proxy(mut config: Config, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.proxy.bind = bind;
    }
    validate_proxy_credentials(&config)?;

    println!(
        "{} on http://{}",
        style("Starting image proxy").bold().cyan(),
        config.proxy.bind
    );

    cortana_proxy::run_server(&config.proxy, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
    })
    .await?;

    println!("{}", style("Image proxy stopped").yellow());
    Ok(())
}

fn configured(value: &str) -> console::StyledObject<&'static str> {
    if value.trim().is_empty() {
        style("not configured").red()
    } else {
        style("configured").green()
    }
}

/// Print a summary of the loaded configuration
fn run_status(loader: &ConfigLoader, config: &Config) {
    println!("{}", style("Cortana Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config file: {}", loader.config_path().display());
    println!("  Persona: {}", config.persona.name);
    println!("  Command prefix: {}", config.bot.command_prefix);
    println!("  History limit: {} per channel", config.bot.history_limit);
    println!();

    println!("{}", style("Models:").bold());
    println!("  Reply: {}", config.openrouter.model);
    match &config.openrouter.intent_model {
        Some(model) => println!("  Image intent: {}", model),
        None => println!("  Image intent: {}", style("disabled").dim()),
    }
    println!("  Primary image: {}", config.gemini.model);
    println!("  Fallback image: {}", config.worker.fallback_model);
    println!();

    println!("{}", style("Credentials:").bold());
    for (name, value) in [
        ("Discord token", &config.discord.token),
        ("OpenRouter key", &config.openrouter.api_key),
        ("Gemini key", &config.gemini.api_key),
        ("Worker endpoint", &config.worker.endpoint),
        ("Cloudflare account", &config.proxy.account_id),
        ("Cloudflare token", &config.proxy.api_token),
    ] {
        println!("  {}: {}", name, configured(value));
    }
    println!();

    println!("{}", style("Image proxy:").bold());
    println!("  Bind: {}", config.proxy.bind);
}

/// Generate one image from the command line
async fn run_generate(
    config: &Config,
    prompt: &str,
    backend: Backend,
    out: Option<PathBuf>,
) -> Result<()> {
    match backend {
        Backend::Gemini if config.gemini.api_key.trim().is_empty() => {
            bail!("gemini.api_key (GEMINI_API_KEY) is required")
        }
        Backend::Sd | Backend::Ds if config.worker.endpoint.trim().is_empty() => {
            bail!("worker.endpoint (CF_ENDPOINT) is required")
        }
        _ => {}
    }

    let pipeline = build_image_pipeline(config)?;
    let image = pipeline
        .generate_with(backend.source(), prompt)
        .await
        .ok_or_else(|| anyhow!("Failed to generate image."))?;

    let path = out.unwrap_or_else(|| PathBuf::from(&image.filename));
    tokio::fs::write(&path, &image.bytes).await?;

    println!(
        "{} {} ({} bytes)",
        style("Saved").green(),
        path.display(),
        image.bytes.len()
    );
    Ok(())
}

/// Print OpenRouter key usage
async fn run_credits(config: &Config) -> Result<()> {
    if config.openrouter.api_key.trim().is_empty() {
        bail!("openrouter.api_key (OPENROUTER_API_KEY) is required");
    }

    let client = OpenRouterClient::from_config(config);
    let info = client.key_info().await?;
    println!("{}", format_credits(&info).replace("**", ""));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_generate() {
        let cli = Cli::try_parse_from([
            "cortana", "generate", "--prompt", "a castle", "--backend", "ds", "-o", "out.png",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate {
                prompt,
                backend,
                out,
            } => {
                assert_eq!(prompt, "a castle");
                assert_eq!(backend, Backend::Ds);
                assert_eq!(out, Some(PathBuf::from("out.png")));
            }
            _ => panic!("expected generate"),
        }
    }

    #[test]
    fn test_generate_defaults_to_gemini() {
        let cli = Cli::try_parse_from(["cortana", "generate", "-p", "x"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Generate {
                backend: Backend::Gemini,
                out: None,
                ..
            }
        ));
    }

    #[test]
    fn test_global_config_dir() {
        let cli = Cli::try_parse_from(["cortana", "proxy", "--bind", "0.0.0.0:9000", "-c", "/tmp/c"])
            .unwrap();
        assert_eq!(cli.config_dir, Some(PathBuf::from("/tmp/c")));
        assert!(matches!(
            cli.command,
            Commands::Proxy { bind: Some(ref b) } if b == "0.0.0.0:9000"
        ));
    }

    #[test]
    fn test_backend_sources() {
        assert_eq!(Backend::Gemini.source(), ImageSource::Primary);
        assert_eq!(
            Backend::Sd.source(),
            ImageSource::Worker(WorkerModel::StableDiffusionXlLightning)
        );
        assert_eq!(
            Backend::Ds.source(),
            ImageSource::Worker(WorkerModel::Dreamshaper8Lcm)
        );
    }

    #[test]
    fn test_pipeline_rejects_unknown_fallback() {
        let mut config = Config::default();
        config.worker.fallback_model = "flux".to_string();
        assert!(build_image_pipeline(&config).is_err());

        let config = Config::default();
        let pipeline = build_image_pipeline(&config).unwrap();
        assert_eq!(pipeline.fallback(), WorkerModel::StableDiffusionXlLightning);
    }

    #[tokio::test]
    async fn test_generate_requires_credentials() {
        let config = Config::default();
        let err = run_generate(&config, "x", Backend::Sd, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("CF_ENDPOINT"));
    }
}
