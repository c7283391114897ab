use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::config::Config;
use chatrelay::interaction::{FileInteractionLogger, FileLabelStore, LABELS_FILE};
use chatrelay::llm::{OpenAIBackendFactory, ProviderRegistry, RegistryError};
use chatrelay::server::{self, AppState};
use chatrelay::session::{SessionRegistry, spawn_reaper};
use chatrelay::stream::ChatStreamEngine;
use chatrelay::terminal::TerminalApp;

#[derive(Parser, Debug)]
#[command(name = "chatrelay", version, about = "Multi-backend chat relay")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "chatrelay.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the WebSocket relay and label API
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Chat in the terminal
    Chat {
        /// Provider id to start with
        #[arg(long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();

    let default_level = match cli.command {
        Command::Serve { .. } => "info",
        Command::Chat { .. } => "warn",
    };
    init_tracing(default_level);

    let config = Config::load(&cli.config)
        .await
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let factory = Arc::new(OpenAIBackendFactory::new(reqwest::Client::new()));
    let providers = match ProviderRegistry::from_env(
        config.provider_table(),
        &config.default_provider,
        factory,
    ) {
        Ok(registry) => Arc::new(registry),
        Err(RegistryError::NoProviders { env_vars }) => {
            eprintln!("No provider has an API key. Set at least one of:");
            for var in env_vars {
                eprintln!("  {var}");
            }
            std::process::exit(1);
        }
    };
    let engine = ChatStreamEngine::new(config.stream.settings());

    match cli.command {
        Command::Serve { host, port } => serve(config, providers, engine, host, port).await,
        Command::Chat { provider } => {
            let mut app = TerminalApp::new(providers, engine, &config.system_prompt);
            if let Some(id) = provider {
                app.switch_provider(&id)
                    .with_context(|| format!("selecting provider '{id}'"))?;
            }
            app.run().await?;
            Ok(())
        }
    }
}

async fn serve(
    config: Config,
    providers: Arc<ProviderRegistry>,
    engine: ChatStreamEngine,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("invalid listen address {host}:{port}"))?;

    let labels = FileLabelStore::load(config.log_dir.join(LABELS_FILE), &config.labels).await;
    let sessions = SessionRegistry::new(
        providers.clone(),
        config.system_prompt.as_str(),
        config.sessions.settings(),
    );
    let reaper = spawn_reaper(sessions.clone(), config.sessions.reap_interval());

    let available: Vec<&str> = providers.available().map(|p| p.config.id.as_str()).collect();
    info!(
        providers = ?available,
        default = %providers.default_provider().config.id,
        "Providers resolved"
    );

    let state = AppState {
        sessions,
        engine,
        labels: Arc::new(labels),
        interactions: Arc::new(FileInteractionLogger::spawn(config.log_dir.clone())),
    };
    let app = server::build_app(state, config.server.request_timeout_seconds);

    let result = server::serve(app, addr).await;
    reaper.abort();
    result.context("server error")
}

fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
