//! Paper bootstrap: orchestrator entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load bootstrap settings
//!   3. Resolve effective log level (CLI `-v` flags > env > settings)
//!   4. Init logger once
//!   5. Install signal-driven shutdown hooks
//!   6. Run the bootstrap sequence (auxiliary services, then the primary)
//!   7. Run remaining shutdown hooks on the way out

use std::process::ExitCode;

use tracing::info;

use paper_bootstrap::{
    artifact::{ArtifactCache, HttpFetcher},
    bootstrap::{BootstrapOutcome, Sequencer},
    config,
    error::AppError,
    logger,
    primary::{CommandEntry, StartupOptions},
    shutdown::{HostRuntime, SignalRuntime},
    supervisor::{ProcessSupervisor, process::CommandLauncher},
};

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, AppError> {
    // Load .env if present; ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let settings = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(settings.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        cache_dir = %settings.cache_dir.display(),
        readiness_grace_secs = settings.readiness_grace.as_secs(),
        effective_log_level = %effective_log_level,
        "settings loaded"
    );

    let runtime = SignalRuntime::install()?;

    // Registered first so the primary is asked to stop before its helpers.
    let mut primary = CommandEntry::new();
    runtime.register(primary.shutdown_hook())?;

    let fetcher = HttpFetcher::new().map_err(|e| AppError::Config(format!("http client: {e}")))?;
    let mut sequencer = Sequencer::new(
        &settings,
        ArtifactCache::new(Box::new(fetcher)),
        ProcessSupervisor::new(Box::new(CommandLauncher)),
    );

    let outcome = sequencer.run(&runtime, &mut primary, args.startup);
    runtime.run_exit_hooks();

    Ok(match outcome {
        BootstrapOutcome::Delegated => ExitCode::SUCCESS,
        BootstrapOutcome::Failed(_) => ExitCode::FAILURE,
    })
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
    startup: StartupOptions,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;
    let mut startup = Vec::new();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            startup.extend(iter.by_ref());
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: paper-bootstrap [OPTIONS] -- <PROGRAM> [ARGS...]");
                println!();
                println!("Starts the auxiliary services, then runs PROGRAM with ARGS unchanged.");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to settings file (default: {})", config::DEFAULT_CONFIG_PATH);
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            other => {
                eprintln!("error: unexpected argument '{other}' (primary arguments go after `--`)");
                std::process::exit(1);
            }
        }
    }

    //   -v      → warn
    //   -vv     → info
    //   -vvv    → debug
    //   -vvvv+  → trace
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path, startup: StartupOptions::new(startup) }
}
