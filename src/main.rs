//! Keel - push-to-deploy build and release orchestrator
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use keel::cli::commands::{self, Settings};
use keel::cli::{Cli, Commands};
use keel::config::{ConfigManager, PathOverrides, ResolvedPaths};
use keel::error::KeelResult;
use keel::events::{AuditLog, EventSink, Fanout, TracingSink};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging: 0 = warn, 1 = info, 2+ = debug; `KEEL_LOG` wins
fn init_logging(verbose: u8, format: &str) {
    let filter = EnvFilter::try_from_env("KEEL_LOG").unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("keel=warn"),
        1 => EnvFilter::new("keel=info"),
        _ => EnvFilter::new("keel=debug"),
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if format == "json" {
        builder.json().init();
    } else {
        builder.with_target(false).without_time().init();
    }
}

async fn run() -> KeelResult<()> {
    let cli = Cli::parse();

    // Init command doesn't need config loading
    if let Commands::Init(args) = cli.command {
        init_logging(cli.verbose, "text");
        return commands::init(args).await;
    }

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };
    let config = config_manager.load().await?;
    init_logging(cli.verbose, &config.general.log_format);
    debug!("Using config {}", config_manager.path().display());

    let overrides = PathOverrides {
        plugin: cli.paths.plugin,
        builds_path: cli.paths.builds_path,
        db_path: cli.paths.db_path,
        repo_path: cli.paths.repo_path,
    };
    let paths = ResolvedPaths::resolve(&overrides, &config)?;

    let events: Arc<dyn EventSink> = if config.general.audit_log {
        let audit_path = config
            .general
            .audit_log_path
            .clone()
            .unwrap_or_else(ConfigManager::audit_log_path);
        debug!("Audit log at {}", audit_path.display());
        Arc::new(
            Fanout::new()
                .with(Arc::new(TracingSink))
                .with(Arc::new(AuditLog::new(audit_path))),
        )
    } else {
        Arc::new(TracingSink)
    };

    let settings = Settings {
        config,
        paths,
        events,
    };

    // Dispatch to command
    match cli.command {
        Commands::Init(_) => unreachable!("Init handled above"),
        Commands::Build(args) => commands::build(args, &settings).await,
        Commands::Release(args) => commands::release(args, &settings).await,
        Commands::Install(args) => commands::install(args, &settings).await,
        Commands::Status(args) => commands::status(args, &settings).await,
        Commands::Cache(args) => commands::cache(args, &settings).await,
    }
}
