//! hubload CLI - Command-line tool for uploading programs to robot hubs.
//!
//! ## Features
//!
//! - Upload a compiled program over Bluetooth LE and start it
//! - Stop or restart the program already on the hub
//! - List nearby hubs
//! - Interactive hub name prompt
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use hubload::CancelToken;
use log::{debug, warn};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations and colors should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

mod commands;
mod config;
mod hub;

use commands::completions::cmd_completions;
use commands::run::{cmd_run, cmd_start, cmd_stop};
use commands::scan::cmd_scan;
use config::Config;

/// hubload - Upload programs to robot hubs over Bluetooth LE.
///
/// Environment variables:
///   HUBLOAD_NAME              - Default hub name (prefix match)
///   HUBLOAD_SCAN_TIMEOUT      - Scan window in seconds (default: 5)
///   HUBLOAD_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "hubload")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Hub name to connect to (advertised names starting with this match).
    #[arg(short, long, global = true, env = "HUBLOAD_NAME")]
    name: Option<String>,

    /// How long to scan for the hub, in seconds.
    #[arg(long, global = true, value_name = "SECS", env = "HUBLOAD_SCAN_TIMEOUT")]
    scan_timeout: Option<u64>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "HUBLOAD_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a compiled program to the hub and start it.
    Run {
        /// Path to the compiled program image.
        program: PathBuf,
    },

    /// Stop the program running on the hub.
    Stop,

    /// Start the program already loaded on the hub.
    Start,

    /// List hubs advertising nearby.
    Scan {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        shell: Shell,
    },
}

/// CLI failures that map to a specific exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid invocation or missing input.
    #[error("{0}")]
    Usage(String),
    /// No hub matched the requested name.
    #[error("{0}")]
    NotFound(String),
    /// Interrupted by the user.
    #[error("{0}")]
    Cancelled(String),
    /// The hub session failed.
    #[error("{0}")]
    Upload(String),
    /// Failure already shown in the progress output.
    #[error("exit code {0}")]
    Reported(u8),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::NotFound(_) => 3,
            Self::Cancelled(_) => 130,
            Self::Upload(_) => 1,
            Self::Reported(code) => *code,
        }
    }
}

/// Map an error to the process exit code.
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CliError>()
        .map_or(1, CliError::exit_code)
}

/// Install a Ctrl-C handler that cancels `token`.
fn install_interrupt_handler(token: &CancelToken) {
    let token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        warn!("Failed to install Ctrl-C handler: {e}");
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "hubload v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if !matches!(err.downcast_ref::<CliError>(), Some(CliError::Reported(_))) {
                eprintln!("{} {err:#}", style("Error:").red().bold());
            }
            ExitCode::from(exit_code(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let cancel = CancelToken::new();

    match &cli.command {
        Commands::Run { program } => {
            install_interrupt_handler(&cancel);
            cmd_run(cli, &config, program, &cancel)
        },
        Commands::Stop => {
            install_interrupt_handler(&cancel);
            cmd_stop(cli, &config, &cancel)
        },
        Commands::Start => {
            install_interrupt_handler(&cancel);
            cmd_start(cli, &config, &cancel)
        },
        Commands::Scan { json } => cmd_scan(cli, &config, *json),
        Commands::Completions { shell } => {
            cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    // ---- clap validation ----

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_run() {
        let cli = Cli::try_parse_from(["hubload", "run", "main.mpy", "--name", "Technic"]).unwrap();
        assert_eq!(cli.name.as_deref(), Some("Technic"));
        if let Commands::Run { program } = cli.command {
            assert_eq!(program.to_str().unwrap(), "main.mpy");
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_cli_parse_run_requires_program() {
        assert!(Cli::try_parse_from(["hubload", "run"]).is_err());
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::try_parse_from([
            "hubload",
            "-vv",
            "--non-interactive",
            "--scan-timeout",
            "9",
            "--config",
            "custom.toml",
            "stop",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.non_interactive);
        assert_eq!(cli.scan_timeout, Some(9));
        assert_eq!(cli.config_path.unwrap().to_str().unwrap(), "custom.toml");
        assert!(matches!(cli.command, Commands::Stop));
    }

    #[test]
    fn test_cli_parse_short_name() {
        let cli = Cli::try_parse_from(["hubload", "-n", "City", "start"]).unwrap();
        assert_eq!(cli.name.as_deref(), Some("City"));
        assert!(matches!(cli.command, Commands::Start));
    }

    #[test]
    fn test_cli_parse_scan_json() {
        let cli = Cli::try_parse_from(["hubload", "scan", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Scan { json: true }));
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["hubload", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_cli_rejects_bad_scan_timeout() {
        assert!(Cli::try_parse_from(["hubload", "--scan-timeout", "soon", "scan"]).is_err());
    }

    // ---- exit codes ----

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::NotFound("x".into()).into()), 3);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code(&CliError::Upload("x".into()).into()), 1);
        assert_eq!(exit_code(&CliError::Reported(3).into()), 3);
        assert_eq!(exit_code(&anyhow::anyhow!("other")), 1);
    }
}
