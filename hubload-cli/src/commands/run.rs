//! Run, stop, and start command implementations.

use anyhow::{Context, Result};
use console::style;
use hubload::{BleTransport, CancelToken, Outcome, SessionController, SessionReport, UploadSession};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;
use std::fs;
use std::path::Path;

use crate::config::Config;
use crate::hub::{HubOptions, resolve_hub_name};
use crate::{Cli, CliError, use_fancy_output};

/// Run command implementation: upload `program` and start it.
pub(crate) fn cmd_run(cli: &Cli, config: &Config, program: &Path, cancel: &CancelToken) -> Result<()> {
    check_program_path(program)?;

    let image = fs::read(program)
        .with_context(|| format!("failed to read program {}", program.display()))?;
    debug!("Read {} bytes from {}", image.len(), program.display());

    let name = resolve_hub_name(&hub_options(cli), config)?;
    let mut controller = open_controller(cli, config, cancel)?;

    let pb = progress_bar(cli);
    print_line(cli, &pb, &program_line(program, image.len()));
    let mut session = UploadSession::new(&name, &image);
    let report = controller.run_upload(
        &mut session,
        &mut |line| print_line(cli, &pb, line),
        &mut |sent, total| {
            if pb.is_hidden() && !cli.quiet && use_fancy_output() {
                pb.set_draw_target(ProgressDrawTarget::stderr());
            }
            pb.set_length(total as u64);
            pb.set_position(sent as u64);
        },
    );
    pb.finish_and_clear();

    finish(cli, report)
}

/// Stop command implementation.
pub(crate) fn cmd_stop(cli: &Cli, config: &Config, cancel: &CancelToken) -> Result<()> {
    let name = resolve_hub_name(&hub_options(cli), config)?;
    let mut controller = open_controller(cli, config, cancel)?;

    let pb = ProgressBar::hidden();
    let report = controller.stop_program(&name, &mut |line| print_line(cli, &pb, line));
    finish(cli, report)
}

/// Start command implementation.
pub(crate) fn cmd_start(cli: &Cli, config: &Config, cancel: &CancelToken) -> Result<()> {
    let name = resolve_hub_name(&hub_options(cli), config)?;
    let mut controller = open_controller(cli, config, cancel)?;

    let pb = ProgressBar::hidden();
    let report = controller.start_program(&name, &mut |line| print_line(cli, &pb, line));
    finish(cli, report)
}

/// Reject paths that are not compiled program images.
fn check_program_path(program: &Path) -> Result<()> {
    let is_source = program
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("py"));
    if is_source {
        return Err(CliError::Usage(format!(
            "{} is Python source; compile it to a program image (e.g. with mpy-cross) and upload that",
            program.display()
        ))
        .into());
    }
    Ok(())
}

/// Progress line announcing the program file.
fn program_line(program: &Path, len: usize) -> String {
    format!("Found program {} ({len} bytes)", program.display())
}

fn hub_options(cli: &Cli) -> HubOptions {
    HubOptions {
        name: cli.name.clone(),
        non_interactive: cli.non_interactive,
    }
}

pub(crate) fn open_controller(
    cli: &Cli,
    config: &Config,
    cancel: &CancelToken,
) -> Result<SessionController<BleTransport>> {
    let transport = BleTransport::new().context("failed to open Bluetooth adapter")?;
    Ok(SessionController::new(transport)
        .with_config(config.session_config(cli.scan_timeout))
        .with_cancel(cancel.clone()))
}

fn progress_bar(cli: &Cli) -> ProgressBar {
    let pb = ProgressBar::hidden();
    if !cli.quiet && use_fancy_output() {
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}",
                )
                .unwrap()
                .progress_chars("#>-"),
        );
    }
    pb
}

/// Print one progress line above the bar.
fn print_line(cli: &Cli, pb: &ProgressBar, line: &str) {
    if cli.quiet {
        return;
    }
    pb.suspend(|| eprintln!("{}", styled_line(line)));
}

fn styled_line(line: &str) -> String {
    if let Some(rest) = line.strip_prefix("Error:") {
        format!("{}{rest}", style("Error:").red().bold())
    } else if line.starts_with("Program ") {
        style(line).green().bold().to_string()
    } else if line == "Cancelled" {
        style(line).yellow().to_string()
    } else {
        line.to_string()
    }
}

/// Turn a session report into the command result.
///
/// Unless quiet, the final progress line already described the failure.
fn finish(cli: &Cli, report: SessionReport) -> Result<()> {
    let last_line = report.log.last().cloned().unwrap_or_default();
    let err = match report.outcome {
        Outcome::Success => return Ok(()),
        Outcome::EndpointNotFound => CliError::NotFound(
            last_line
                .strip_prefix("Error: ")
                .unwrap_or(&last_line)
                .to_string(),
        ),
        Outcome::Failure(e) if e.is_cancelled() => CliError::Cancelled("cancelled".to_string()),
        Outcome::Failure(e) => CliError::Upload(e.to_string()),
    };

    if cli.quiet {
        Err(err.into())
    } else {
        Err(CliError::Reported(err.exit_code()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use hubload::Error;

    fn report(outcome: Outcome, last: &str) -> SessionReport {
        SessionReport {
            outcome,
            endpoint: None,
            bytes_sent: 0,
            log: vec![last.to_string()],
        }
    }

    fn cli(args: &[&str]) -> Cli {
        let mut full = vec!["hubload"];
        full.extend_from_slice(args);
        full.push("stop");
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_python_source_is_rejected() {
        let err = check_program_path(Path::new("main.py")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
        assert!(check_program_path(Path::new("MAIN.PY")).is_err());
    }

    #[test]
    fn test_program_images_are_accepted() {
        assert!(check_program_path(Path::new("main.mpy")).is_ok());
        assert!(check_program_path(Path::new("program.bin")).is_ok());
        assert!(check_program_path(Path::new("program")).is_ok());
    }

    #[test]
    fn test_program_line_names_file_and_size() {
        assert_eq!(
            program_line(Path::new("build/main.mpy"), 1234),
            "Found program build/main.mpy (1234 bytes)"
        );
    }

    #[test]
    fn test_finish_success() {
        assert!(finish(&cli(&[]), report(Outcome::Success, "Program started")).is_ok());
    }

    #[test]
    fn test_finish_not_found_quiet_keeps_message() {
        let err = finish(
            &cli(&["-q"]),
            report(
                Outcome::EndpointNotFound,
                "Error: no hub matching 'X' found within 5s",
            ),
        )
        .unwrap_err();
        match err.downcast_ref::<CliError>() {
            Some(CliError::NotFound(msg)) => assert!(msg.starts_with("no hub matching 'X'")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_finish_failure_already_reported() {
        let err = finish(
            &cli(&[]),
            report(
                Outcome::Failure(Error::Connection("refused".into())),
                "Error: refused",
            ),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Reported(1))
        ));
    }

    #[test]
    fn test_finish_cancelled_exit_code() {
        let err = finish(&cli(&[]), report(Outcome::Failure(Error::Cancelled), "Cancelled"))
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Reported(130))
        ));
    }

    #[test]
    fn test_styled_line_keeps_text() {
        console::set_colors_enabled(false);
        assert_eq!(styled_line("Error: boom"), "Error: boom");
        assert_eq!(styled_line("Connected"), "Connected");
        assert_eq!(styled_line("Program stopped"), "Program stopped");
    }
}
