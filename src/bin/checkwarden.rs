//! checkwarden processor daemon
//!
//! Runs one processor against a redis store until the queue drains (when
//! `exit_on_queue_empty` is set) or the store fails. Exits 0 on a controlled
//! stop and 1 on error, leaving restarts to the supervisor.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use checkwarden::processor::{BurstLock, Processor, Stores};
use checkwarden::storage::RedisStore;
use checkwarden::{ProcessorConfig, RunOutcome, WardenResult};

/// Command line options
struct Args {
    /// TOML configuration file
    config: Option<PathBuf>,
    /// Redis connection URL
    redis_url: String,
    /// Lock file shared by processors on this host
    lock_file: Option<PathBuf>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: None,
            redis_url: "redis://127.0.0.1:6379/0".to_string(),
            lock_file: None,
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    parsed.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--redis" | "-r" => {
                if i + 1 < args.len() {
                    parsed.redis_url.clone_from(&args[i + 1]);
                    i += 2;
                } else {
                    eprintln!("error: --redis requires a value");
                    std::process::exit(1);
                }
            }
            "--lock-file" | "-l" => {
                if i + 1 < args.len() {
                    parsed.lock_file = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --lock-file requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("checkwarden - monitoring event processor");
                println!();
                println!("USAGE:");
                println!("    checkwarden [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <FILE>       TOML configuration file [default: built-in defaults]");
                println!("    -r, --redis <URL>         Redis URL [default: redis://127.0.0.1:6379/0]");
                println!("    -l, --lock-file <PATH>    Share the burst lock with other processes via PATH");
                println!("    -h, --help                Print help information");
                println!();
                println!("Log verbosity is controlled with RUST_LOG [default: info].");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    parsed
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(env_filter).finish();

    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("global logger initialization failed: {error}");
    }
}

fn run(args: &Args) -> WardenResult<RunOutcome> {
    let config = match &args.config {
        Some(path) => ProcessorConfig::load(path)?,
        None => ProcessorConfig::default(),
    };

    let store = Arc::new(RedisStore::connect(&args.redis_url)?);
    let mut processor = Processor::new(config, Stores::shared(store))?;
    if let Some(path) = &args.lock_file {
        info!(path = %path.display(), "using lock file");
        processor = processor.with_lock(BurstLock::file(path));
    }

    processor.run()
}

fn main() -> ExitCode {
    let args = parse_args();
    init_logging();

    match run(&args) {
        Ok(outcome) => {
            info!(?outcome, "checkwarden stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, retryable = e.is_retryable(), "checkwarden failed");
            ExitCode::FAILURE
        }
    }
}
