use anyhow::Context;
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing::info;

use scangate::commands;
use scangate::config;
use scangate::scanner::create_transport;

#[derive(Parser, Debug)]
#[command(name = "scangate")]
#[command(about = "An asynchronous content-inspection gateway shim for mail transport pipelines", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (TOML/JSON/YAML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Filter the spool directory through the scanner (default)
    Run,
    /// Check configuration and scanner reachability
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration first so logging can honor it.
    let config = match &args.config {
        Some(path) => config::load_from_path(path)
            .await
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => config::load_from_env_or_file()
            .await
            .context("failed to load configuration")?,
    };

    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("scangate={log_level}").parse().unwrap());

    let _guard = match &config.logging.file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("scangate.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    };

    let transport = create_transport(&config.scanner);

    match args.command.unwrap_or(Command::Run) {
        Command::Check => commands::run_check(config, transport).await?,
        Command::Run => {
            info!("Starting scangate");
            info!("Scanner command: {}", config.scanner.command);
            info!("Spool directory: {}", config.gateway.spool_dir.display());
            commands::run_filter(config, transport).await?;
        }
    }

    Ok(())
}
