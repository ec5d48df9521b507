use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use linewatch::config::{CliOverrides, LinewatchConfig};
use linewatch::logging::{self, LogFormat};
use linewatch::{Identity, LineType};

mod cmd;

#[derive(Parser)]
#[command(name = "linewatch")]
#[command(version, about = "Live production-line boards for the factory floor")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Backend base URL. Overrides linewatch.toml and LINEWATCH_BACKEND_URL.
    #[arg(long, global = true)]
    pub backend_url: Option<String>,

    /// Realtime WebSocket URL. Overrides linewatch.toml and LINEWATCH_WS_URL.
    #[arg(long, global = true)]
    pub ws_url: Option<String>,

    /// Fallback polling interval in seconds while the socket is down
    #[arg(long, global = true)]
    pub fallback_interval: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show a live board for one display
    Watch {
        /// `line:CODE`, `line:FACTORY/CODE`, `team:F/L/T`, `center:F/L`, `factory:F`, or a bare line code
        #[arg(value_parser = cmd::parse_identity)]
        identity: Identity,

        /// Position index on a multi-line board
        #[arg(long)]
        index: Option<u32>,

        /// Use the slower idle polling interval
        #[arg(long)]
        idle: bool,
    },
    /// Fetch one snapshot and print it as JSON
    Fetch {
        #[arg(value_parser = cmd::parse_identity)]
        identity: Identity,

        #[arg(long)]
        index: Option<u32>,
    },
    /// List production lines
    Lines {
        #[arg(long = "type", value_enum)]
        line_type: Option<LineTypeArg>,
    },
    /// Check backend health
    Health,
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate configuration and report problems
    Validate,
}

#[derive(ValueEnum, Clone, Copy)]
pub enum LineTypeArg {
    Htm,
    Cd,
}

impl From<LineTypeArg> for LineType {
    fn from(arg: LineTypeArg) -> Self {
        match arg {
            LineTypeArg::Htm => LineType::Htm,
            LineTypeArg::Cd => LineType::Cd,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    logging::init(format, cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let overrides = CliOverrides {
        backend_url: cli.backend_url.clone(),
        ws_url: cli.ws_url.clone(),
        fallback_interval_secs: cli.fallback_interval,
    };
    let config = LinewatchConfig::load(&project_dir)
        .context("Failed to load configuration")?
        .with_overrides(&overrides);

    match &cli.command {
        Commands::Watch {
            identity,
            index,
            idle,
        } => cmd::cmd_watch(&config, cmd::with_index(identity.clone(), *index), *idle).await?,
        Commands::Fetch { identity, index } => {
            cmd::cmd_fetch(&config, cmd::with_index(identity.clone(), *index)).await?
        }
        Commands::Lines { line_type } => cmd::cmd_lines(&config, line_type.map(Into::into)).await?,
        Commands::Health => cmd::cmd_health(&config).await?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
