mod commands;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use campuscal_core::config::CampusCalConfig;
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::Context;

#[derive(Parser)]
#[command(name = "campuscal")]
#[command(about = "Show school portal calendars with recurring events expanded")]
struct Cli {
    /// Use this config file instead of ~/.config/campuscal/config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the calendars in the calendar directory
    Calendars,
    /// Show upcoming events, grouped by day
    Events {
        /// Only show these calendars (repeatable)
        #[arg(short, long)]
        calendar: Vec<String>,

        /// Show events from this date (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        from: Option<String>,

        /// Show events until this date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Print occurrences as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a month grid
    Month {
        #[arg(long)]
        year: Option<i32>,

        #[arg(long)]
        month: Option<u32>,

        /// Only show these calendars (repeatable)
        #[arg(short, long)]
        calendar: Vec<String>,
    },
    /// Expand a single template file without a calendar directory
    Preview {
        /// Path to a template JSON file
        file: PathBuf,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },
    /// Keep showing events and reprint whenever a calendar changes
    Watch {
        #[arg(short, long)]
        calendar: Vec<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => CampusCalConfig::load_from(path)?,
        None => CampusCalConfig::load()?,
    };

    init_logging(&config.log_level);

    let tz = display_zone(&config);
    tracing::debug!(tz = %tz, calendar_dir = %config.data_path().display(), "Configuration loaded");

    let ctx = Context::new(config, tz);

    match cli.command {
        Commands::Calendars => commands::calendars::run(&ctx),
        Commands::Events {
            calendar,
            from,
            to,
            json,
        } => commands::events::run(&ctx, &calendar, from.as_deref(), to.as_deref(), json).await,
        Commands::Month {
            year,
            month,
            calendar,
        } => commands::month::run(&ctx, year, month, &calendar).await,
        Commands::Preview { file, from, to } => {
            commands::preview::run(&ctx, &file, from.as_deref(), to.as_deref())
        }
        Commands::Watch { calendar, from, to } => {
            commands::watch::run(&ctx, &calendar, from.as_deref(), to.as_deref()).await
        }
    }
}

/// RUST_LOG wins over the configured level.
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn display_zone(config: &CampusCalConfig) -> Tz {
    config
        .time_zone
        .or_else(|| {
            iana_time_zone::get_timezone()
                .ok()
                .and_then(|name| name.parse::<Tz>().ok())
        })
        .unwrap_or(Tz::UTC)
}
