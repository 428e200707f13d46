//! undolog CLI
//!
//! Command-line tools for persistent regions managed by undolog.
//!
//! # Commands
//!
//! - `init` - Create a region file and install a transaction header
//! - `recover` - Roll back every interrupted transaction
//! - `inspect` - Display header and handle state without recovering
//! - `verify` - Check handle records and live log entries

mod commands;

use clap::{Parser, Subcommand};
use commands::EngineArgs;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::EnvFilter;
use undolog_core::{CoreError, DEFAULT_MAGIC};

/// undolog command-line region tools.
#[derive(Parser)]
#[command(name = "undolog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the region file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a region file and install a transaction header
    Init {
        /// Region size in bytes
        #[arg(short, long, default_value_t = 64 << 20)]
        size: u64,

        /// Replace an existing region file
        #[arg(short, long)]
        force: bool,

        #[command(flatten)]
        engine: EngineArgs,
    },

    /// Roll back every interrupted transaction
    Recover {
        #[command(flatten)]
        engine: EngineArgs,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Display header and handle state without recovering
    Inspect {
        /// Show per-handle log details
        #[arg(long)]
        handles: bool,

        /// Transaction header validity marker
        #[arg(long, default_value_t = DEFAULT_MAGIC)]
        magic: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Check handle records and live log entries
    Verify {
        /// Transaction header validity marker
        #[arg(long, default_value_t = DEFAULT_MAGIC)]
        magic: u64,
    },

    /// Show version information
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) if is_fatal(e.as_ref()) => {
            error!(error = %e, "region failed an integrity check; refusing to continue");
            ExitCode::from(2)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Init {
            size,
            force,
            engine,
        } => {
            let path = cli.path.ok_or("Region path required for init")?;
            commands::init::run(&path, size, force, &engine)?;
        }
        Commands::Recover { engine, format } => {
            let path = cli.path.ok_or("Region path required for recover")?;
            commands::recover::run(&path, &engine, &format)?;
        }
        Commands::Inspect {
            handles,
            magic,
            format,
        } => {
            let path = cli.path.ok_or("Region path required for inspect")?;
            commands::inspect::run(&path, magic, handles, &format)?;
        }
        Commands::Verify { magic } => {
            let path = cli.path.ok_or("Region path required for verify")?;
            commands::verify::run(&path, magic)?;
        }
        Commands::Version => {
            println!("undolog CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("undolog core v{}", undolog_core::VERSION);
        }
    }

    Ok(())
}

fn is_fatal(e: &(dyn std::error::Error + 'static)) -> bool {
    e.downcast_ref::<CoreError>().is_some_and(CoreError::is_fatal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn integrity_failures_are_fatal() {
        let fatal: Box<dyn std::error::Error> = Box::new(CoreError::integrity("bad header"));
        let other: Box<dyn std::error::Error> = Box::new(CoreError::validation("bad arg"));
        assert!(is_fatal(fatal.as_ref()));
        assert!(!is_fatal(other.as_ref()));
    }

    #[test]
    fn init_flags_parse() {
        let cli = Cli::parse_from([
            "undolog",
            "--path",
            "region.pmem",
            "init",
            "--size",
            "1048576",
            "--pool-size",
            "8",
        ]);
        match cli.command {
            Commands::Init { size, engine, .. } => {
                assert_eq!(size, 1 << 20);
                assert_eq!(engine.pool_size, 8);
                assert_eq!(engine.log_capacity, undolog_core::DEFAULT_LOG_CAPACITY);
            }
            _ => panic!("expected init"),
        }
    }
}
