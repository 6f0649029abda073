use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use relaylog::config::Config;
use relaylog::context::LogContext;
use relaylog::encoder::Arg;
use relaylog::file::RotatingFileSink;
use relaylog::logging::init_tracing;
use relaylog::record::{Level, Marker};
use relaylog::relay::AsyncRelay;
use relaylog::sink::{ConsoleSink, Sink};

#[derive(Parser)]
#[command(
    name = "relaylog-pipe",
    about = "Copy stdin lines into rotating log files through the async relay"
)]
struct Cli {
    /// Logger name recorded on every line.
    #[arg(long, default_value = "stdin")]
    logger: String,
    /// Level assigned to every line; defaults to RELAYLOG_LEVEL.
    #[arg(long)]
    level: Option<String>,
    /// Marker attached to every line.
    #[arg(long)]
    marker: Option<String>,
    /// Log directory (overrides RELAYLOG_DIRECTORY).
    #[arg(long)]
    directory: Option<PathBuf>,
    /// Write to stdout/stderr instead of rotating files.
    #[arg(long)]
    console: bool,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = Config::from_env().context("Failed to load configuration")?;
    if let Some(directory) = cli.directory {
        config.directory = directory;
    }
    let level = match cli.level.as_deref() {
        Some(raw) => raw
            .parse::<Level>()
            .map_err(|()| anyhow!("unknown level: {raw}"))?,
        None => config.level,
    };

    let inner: Arc<dyn Sink> = if cli.console {
        Arc::new(ConsoleSink::new())
    } else {
        Arc::new(RotatingFileSink::new(
            config.file_sink_config(),
            Arc::new(config.naming()),
        ))
    };
    let relay = Arc::new(
        AsyncRelay::new(inner, config.relay_config()).context("Failed to build relay")?,
    );
    let context = LogContext::init(relay.clone() as Arc<dyn Sink>, level.min(config.level))
        .context("Failed to start logging pipeline")?;
    let marker = cli.marker.as_deref().map(Marker::new);

    let mut refused = 0u64;
    for line in io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if !context.log(&cli.logger, level, marker.as_ref(), "{}", &[Arg::display(&line)]) {
            refused += 1;
        }
    }
    context.shutdown();

    let snapshot = relay.metrics();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    if refused > 0 {
        eprintln!("{refused} lines were not recorded");
    }
    Ok(())
}
