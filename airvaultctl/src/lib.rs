pub mod orchestrator;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use airvault_core::{load_airvault_config, AirvaultConfig, TrackStore};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] airvault_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store error: {0}")]
    Store(#[from] airvault_core::StoreError),
    #[error("upstream error: {0}")]
    Upstream(#[from] airvault_core::UpstreamError),
    #[error("supervisor error: {0}")]
    Supervisor(#[from] airvault_core::SupervisorError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Airvault stream capture control interface", long_about = None)]
pub struct Cli {
    /// Path to the main airvault.toml
    #[arg(long, default_value = "configs/airvault.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the capture pipeline until interrupted
    Run(RunArgs),
    /// Show a summary of configuration and archived tracks
    Status,
    /// Operations on archived tracks
    #[command(subcommand)]
    Tracks(TrackCommands),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Channel to tune immediately instead of waiting for a trigger
    #[arg(long)]
    pub channel: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum TrackCommands {
    /// List archived songs and episodes
    List(TrackListArgs),
}

#[derive(Args, Debug)]
pub struct TrackListArgs {
    /// Filter by channel id
    #[arg(long)]
    pub channel: Option<String>,
    /// Maximum records per kind
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

pub fn run(cli: Cli) -> Result<()> {
    init_logging();
    let config = load_airvault_config(&cli.config)?;

    match &cli.command {
        Commands::Run(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(orchestrator::run(config, args.channel.clone()))?;
        }
        Commands::Status => {
            let status = gather_status(&config)?;
            render(&status, cli.format, |s| s.display())?;
        }
        Commands::Tracks(TrackCommands::List(args)) => {
            let listing = track_list(&config, args)?;
            render(&listing, cli.format, |l| l.display())?;
        }
    }
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn render<T, F>(value: &T, format: OutputFormat, text: F) -> Result<()>
where
    T: Serialize,
    F: Fn(&T) -> String,
{
    match format {
        OutputFormat::Text => {
            println!("{}", text(value));
            Ok(())
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
            Ok(())
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub node_name: String,
    pub environment: String,
    pub upstream: String,
    pub stream_dir: String,
    pub archive_dir: String,
    pub processed_dir: String,
    pub songs: usize,
    pub episodes: usize,
    pub generated_at: String,
}

impl StatusReport {
    fn display(&self) -> String {
        format!(
            "node: {} ({})\nupstream: {}\nstreams: {}\narchive: {}\nprocessed: {}\ntracks: {} songs, {} episodes",
            self.node_name,
            self.environment,
            self.upstream,
            self.stream_dir,
            self.archive_dir,
            self.processed_dir,
            self.songs,
            self.episodes,
        )
    }
}

fn open_store(config: &AirvaultConfig) -> Result<Option<TrackStore>> {
    let path = config.processed_dir().join("tracks.db");
    if !path.exists() {
        return Ok(None);
    }
    let store = TrackStore::builder().path(path).read_only(true).build()?;
    Ok(Some(store))
}

pub fn gather_status(config: &AirvaultConfig) -> Result<StatusReport> {
    let (songs, episodes) = match open_store(config)? {
        Some(store) => (
            store.list_songs(None)?.len(),
            store.list_episodes(None)?.len(),
        ),
        None => (0, 0),
    };
    Ok(StatusReport {
        node_name: config.system.node_name.clone(),
        environment: config.system.environment.clone(),
        upstream: format!(
            "http://{}:{}",
            config.upstream.client_host(),
            config.upstream.port
        ),
        stream_dir: config.stream_dir().display().to_string(),
        archive_dir: config.archive_dir().display().to_string(),
        processed_dir: config.processed_dir().display().to_string(),
        songs,
        episodes,
        generated_at: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct TrackRow {
    pub guid: String,
    pub kind: String,
    pub title: String,
    pub credit: String,
    pub channel: String,
    pub air_time: String,
    pub file_path: String,
}

#[derive(Debug, Serialize)]
pub struct TrackListing {
    pub rows: Vec<TrackRow>,
}

impl TrackListing {
    fn display(&self) -> String {
        if self.rows.is_empty() {
            return "no tracks archived".to_string();
        }
        self.rows
            .iter()
            .map(|row| {
                format!(
                    "[{}] {} — {} ({}, {})",
                    row.kind, row.title, row.credit, row.channel, row.air_time
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn track_list(config: &AirvaultConfig, args: &TrackListArgs) -> Result<TrackListing> {
    let Some(store) = open_store(config)? else {
        return Ok(TrackListing { rows: Vec::new() });
    };
    let channel = args.channel.as_deref();
    let mut rows = Vec::new();

    for song in store.list_songs(channel)?.into_iter().take(args.limit) {
        rows.push(TrackRow {
            guid: song.guid,
            kind: "song".to_string(),
            title: song.title,
            credit: song.artist,
            channel: song.channel,
            air_time: song.air_time.to_rfc3339(),
            file_path: song.file_path,
        });
    }
    for episode in store.list_episodes(channel)?.into_iter().take(args.limit) {
        rows.push(TrackRow {
            guid: episode.guid,
            kind: "episode".to_string(),
            title: episode.title,
            credit: episode.show.unwrap_or_default(),
            channel: episode.channel,
            air_time: episode.air_time.to_rfc3339(),
            file_path: episode.file_path,
        });
    }
    Ok(TrackListing { rows })
}
