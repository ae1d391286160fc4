// volboot/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use colored::Colorize;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;
use volboot_common::config::Config;
use volboot_common::error::Result;

mod cli;
mod frontend;

use cli::CliArgs;

const LOG_ENV_VAR: &str = "VOLBOOT_LOG";
const LOG_FILE_NAME: &str = "volboot.log";

fn init_stderr_logging(env_filter: EnvFilter) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .without_time()
        .try_init();
}

/// Logs to stderr, plus a daily rolling file on the volume when the command
/// works on the volume and its log directory can be created.
fn init_logging(config: Option<&Config>, verbose: u8, file_logging: bool) {
    let level_filter = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var(LOG_ENV_VAR)
        .from_env_lossy();

    let Some(config) = config.filter(|_| file_logging) else {
        init_stderr_logging(env_filter);
        return;
    };

    let log_dir = config.logs_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {} (logging to stderr only)",
            "Warning:".yellow().bold(),
            log_dir.display(),
            e
        );
        init_stderr_logging(env_filter);
        return;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_NAME);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
    let stderr_writer = std::io::stderr.with_max_level(max_log_level);
    let file_writer = non_blocking_appender.with_max_level(max_log_level);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr_writer.and(file_writer))
        .with_ansi(true)
        .without_time()
        .try_init();

    // Flushes on drop; the process exits without unwinding main.
    Box::leak(Box::new(guard));

    debug!(
        "Writing logs to: {}/{}",
        log_dir.display(),
        LOG_FILE_NAME
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let config = match Config::load(cli_args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(None, cli_args.verbose, false);
            error!("Configuration error: {:#}", e);
            eprintln!("{}: {:#}", "Error".red().bold(), e);
            process::exit(2);
        }
    };

    init_logging(
        Some(&config),
        cli_args.verbose,
        cli_args.command.works_on_volume(),
    );

    if let Err(e) = cli_args.command.run(&config).await {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}
