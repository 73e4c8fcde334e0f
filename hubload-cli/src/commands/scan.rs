//! Hub listing command implementation.

use {
    crate::{Cli, commands::run::open_controller, config::Config},
    anyhow::{Context, Result},
    console::style,
    hubload::{CancelToken, Endpoint},
};

/// Scan command implementation.
pub(crate) fn cmd_scan(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let mut controller = open_controller(cli, config, &CancelToken::new())?;

    if !cli.quiet && !json {
        eprintln!(
            "{} Scanning for {}s...",
            style("🔍").cyan(),
            config
                .session_config(cli.scan_timeout)
                .scan_timeout
                .as_secs()
        );
    }

    let endpoints = controller
        .scan()
        .context("failed to scan for hubs")?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "hubs": endpoints,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if endpoints.is_empty() {
        eprintln!("{} No hubs found", style("⚠").yellow());
    } else {
        print!("{}", format_endpoints(&endpoints));
    }

    Ok(())
}

/// One line per hub: name, then the platform handle.
fn format_endpoints(endpoints: &[Endpoint]) -> String {
    let width = endpoints
        .iter()
        .map(|e| e.name.len())
        .max()
        .unwrap_or(0);
    endpoints
        .iter()
        .map(|e| format!("{:<width$}  {}\n", e.name, e.handle))
        .collect()
}
