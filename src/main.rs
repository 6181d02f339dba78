use clap::Parser;
use clap::error::ErrorKind;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;
mod commands;
mod config;
mod trace;

use cli::{Cli, Commands, DIE_EXIT_CODE, USAGE_EXIT_CODE};
use config::{Config, LogLevel, TraceSinkKind};
use trace::TraceSession;

fn setup_logging(log_level: &LogLevel) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spoor")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("spoor.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    // RUST_LOG env var takes precedence, otherwise use config log_level
    let mut builder = env_logger::Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        // Let env_logger parse RUST_LOG
        builder.parse_default_env();
    } else {
        // Use log level from config
        builder.filter_level(log_level.filter());
    }

    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    info!(
        "Log level: {} (from {})",
        log_level.as_filter(),
        if std::env::var("RUST_LOG").is_ok() { "RUST_LOG env" } else { "config" }
    );
    Ok(())
}

fn run(command: Commands, config: &Config, session: &TraceSession) -> Result<i32> {
    match command {
        Commands::Return { code } => Ok(code),
        Commands::Exit { code } => {
            // The explicit exit route terminates here rather than returning.
            let code = session.finish(code);
            std::process::exit(code);
        }
        Commands::Error { messages } => commands::error::run(session, &messages),
        Commands::Child { argv } => commands::child::run(session, &argv, config),
        Commands::Exec { argv } => commands::exec::run(session, &argv),
        Commands::Data { values } => commands::data::run(session, &values),
        Commands::Bug { messages, escalate } => commands::bug::run(session, &messages, escalate),
        Commands::FatalBug { message } => commands::bug::run_fatal(session, &message),
        Commands::Timer {
            count,
            delay_ms,
            threads,
            id,
        } => commands::timer::run(session, count, delay_ms, threads, &id),
        Commands::Counter { values, threads, id } => commands::counter::run(session, &values, threads, &id),
        Commands::Show { last, filter } => commands::show::run(last, filter.as_deref(), config),
        Commands::Completions { shell } => commands::completions::run(shell),
    }
}

fn main() {
    // Parse CLI arguments first; a usage error has its own exit status.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => USAGE_EXIT_CODE,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    };

    // Load configuration (before logging, so log messages in Config::load are silent)
    let mut config = match Config::load(cli.config.as_ref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("spoor: {err:#}");
            std::process::exit(DIE_EXIT_CODE);
        }
    };

    // --verbose mirrors the event stream to stderr regardless of config.
    if cli.verbose && !config.trace.sinks.contains(&TraceSinkKind::Stderr) {
        config.trace.enabled = true;
        config.trace.sinks.push(TraceSinkKind::Stderr);
    }

    // Setup logging with log level from config (or RUST_LOG env var)
    if let Err(err) = setup_logging(&config.log_level) {
        eprintln!("spoor: {err:#}");
        std::process::exit(DIE_EXIT_CODE);
    }

    info!("Starting spoor with config from: {:?}", cli.config);

    let argv: Vec<String> = std::env::args().collect();
    let inherited_sid = std::env::var(trace::SID_ENV_VAR).ok();
    let session = TraceSession::bootstrap(&config.trace, argv, inherited_sid);
    session.set_command_name(cli.command.name());

    let code = match run(cli.command, &config, &session) {
        Ok(code) => code,
        Err(err) => {
            session.error(&format!("{err:#}"));
            log::error!("Command failed: {err:#}");
            eprintln!("spoor: {err:#}");
            DIE_EXIT_CODE
        }
    };

    // Every exit route funnels through finish for its exit/atexit pair.
    let code = session.finish(code);
    std::process::exit(code);
}
