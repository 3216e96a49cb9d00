pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

use clap::{Parser, Subcommand};
use config::{DetectorConfig, EscalationPolicy};
use services::credentials::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "ai-detector", version, about = "Classify images as AI-generated or human-made")]
pub struct Cli {
    /// Config file (defaults to <config dir>/ai-detector/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// ONNX model to load instead of the configured one
    #[arg(long, global = true)]
    pub model: Option<PathBuf>,

    #[arg(long, global = true)]
    pub threshold: Option<f32>,

    #[arg(long, global = true, value_enum)]
    pub policy: Option<EscalationPolicy>,

    /// API key for the remote classifier; overrides the stored one
    #[arg(long, global = true, env = "AI_DETECTOR_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hover each URL and print the resulting badge
    Classify {
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Store the remote classifier API key
    SetKey { key: String },
    /// Print the effective configuration
    ShowConfig,
}

pub fn init_tracing() {
    let default_filter = if cfg!(debug_assertions) {
        "info,ai_detector_lib=debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn effective_config(cli: &Cli) -> error::Result<DetectorConfig> {
    let mut config = DetectorConfig::load(cli.config.as_deref())?;
    if let Some(model) = &cli.model {
        config.model.path = model.clone();
    }
    if let Some(threshold) = cli.threshold {
        config.threshold = threshold;
    }
    if let Some(policy) = cli.policy {
        config.escalation = policy;
    }
    config.validate()?;
    Ok(config)
}

async fn dispatch(cli: Cli) -> error::Result<()> {
    let config = effective_config(&cli)?;
    let file_store = FileCredentialStore::new(config.credentials_path());

    match cli.command {
        Command::Classify { urls } => {
            let credentials: Arc<dyn CredentialStore> = match &cli.api_key {
                Some(key) => Arc::new(MemoryCredentialStore::new(Some(key))),
                None => Arc::new(file_store),
            };
            let reports = commands::classify::classify_urls(config, credentials, urls).await?;
            commands::classify::print_reports(&reports);
        }
        Command::SetKey { key } => {
            commands::credentials::set_key(&file_store, &key)?;
            println!("Saved to {}", file_store.path().display());
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml()?);
        }
    }
    Ok(())
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(dispatch(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "ai-detector failed");
            ExitCode::FAILURE
        }
    }
}
