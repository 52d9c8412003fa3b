use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use spotify_now_playing as lib;
use lib::announce::{Announcement, NowPlayingService};
use lib::api::now_playing::NowPlayingClient;
use lib::api::token::TokenManager;
use lib::api::{http_client, TrackSource};
use lib::command::{CommandHandler, Publisher};
use lib::config::Config;
use lib::credentials::{CredentialStore, FileCredentialStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "spotify-now-playing", version)]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the current track once and print the announcement
    Np,
    /// Poll the player and print each new track until Ctrl-C
    Watch,
    /// Read chat lines from stdin and answer the configured triggers
    Chat {
        /// Channel to answer in (defaults to the configured channel)
        #[arg(long)]
        channel: Option<String>,
    },
    /// Link the Spotify account and store the refresh token (interactive)
    Auth,
    /// Validate config file and exit
    ConfigValidate,
}

/// Prints announcements instead of sending them to a chat network.
struct StdoutPublisher;

#[async_trait::async_trait]
impl Publisher for StdoutPublisher {
    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        println!("[{}] {}", channel, message);
        Ok(())
    }
}

fn init_logging(cfg: &Config) -> Option<WorkerGuard> {
    // log -> tracing bridge for the HTTP layer, which logs through `log`.
    let _ = LogTracer::init();

    // Honor RUST_LOG if set, otherwise default to info.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let (file_layer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "spotify-now-playing.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(non_blocking)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer);

    tracing_subscriber_global::set_global_default(subscriber)
        .expect("failed to set global tracing subscriber");
    guard
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    if let Some(p) = &cli.config {
        return Config::from_path(p).with_context(|| format!("loading config from {}", p.display()));
    }
    match lib::config::default_config_path().filter(|p| p.exists()) {
        Some(p) => Config::from_path(&p).with_context(|| format!("loading config from {}", p.display())),
        None => Ok(Config::default()),
    }
}

fn build_service(cfg: &Config) -> Result<Arc<NowPlayingService>> {
    let store = Arc::new(FileCredentialStore::new(
        &cfg.credentials_path,
        cfg.refresh_token_cache_path.clone(),
    ));
    let credentials = store.load().with_context(|| {
        format!(
            "loading Spotify credentials from {}",
            cfg.credentials_path.display()
        )
    })?;
    let endpoints = cfg.endpoints();
    let client = http_client(cfg.request_timeout())?;
    let tokens = TokenManager::new(client.clone(), &endpoints, credentials)
        .with_safety_margin(cfg.token_safety_margin())
        .with_store(store);
    let source: Arc<dyn TrackSource> = Arc::new(NowPlayingClient::new(client, &endpoints, tokens));
    Ok(Arc::new(NowPlayingService::new(source, cfg.backoff())))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(&cli)?;
    let _guard = init_logging(&cfg);

    match cli.command {
        Commands::ConfigValidate => {
            // resolve_config already parsed and validated it
            println!("OK");
        }
        Commands::Auth => {
            lib::api::auth::run_spotify_auth(&cfg).await?;
        }
        Commands::Np => {
            let service = build_service(&cfg)?;
            match service.poll().await {
                Ok(Announcement::New(track)) => {
                    println!("{}", lib::format::format_announcement(&track))
                }
                Ok(Announcement::AlreadyAnnounced(_)) | Ok(Announcement::Superseded) => {
                    println!("No new track.")
                }
                Ok(Announcement::NothingPlaying) => println!("No track currently playing."),
                Err(e) if e.needs_operator() => {
                    eprintln!("{}", e);
                    std::process::exit(2);
                }
                Err(e) => {
                    eprintln!("Couldn't get current track: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Watch => {
            let service = build_service(&cfg)?;
            let shutdown = async {
                let _ = tokio::signal::ctrl_c().await;
            };
            lib::poller::run_poller(
                service,
                Arc::new(StdoutPublisher),
                cfg.channel.clone(),
                cfg.poll_interval(),
                shutdown,
            )
            .await;
        }
        Commands::Chat { channel } => {
            let service = build_service(&cfg)?;
            let channel = channel.unwrap_or_else(|| cfg.channel.clone());
            let handler = Arc::new(CommandHandler::new(
                service,
                Arc::new(StdoutPublisher),
                cfg.triggers.clone(),
            ));
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut tasks = JoinSet::new();
            while let Some(line) = lines.next_line().await? {
                // Each participant's command runs concurrently, as it would on a real chat network.
                let handler = handler.clone();
                let channel = channel.clone();
                tasks.spawn(async move {
                    if let Err(e) = handler.handle(&channel, &line).await {
                        tracing::warn!("command failed: {:#}", e);
                    }
                });
                // reap finished commands so a long session stays bounded
                while tasks.try_join_next().is_some() {}
            }
            while tasks.join_next().await.is_some() {}
        }
    }
    Ok(())
}
