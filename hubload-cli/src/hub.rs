//! Hub name resolution.
//!
//! The name comes from, in order:
//! - `--name` or `HUBLOAD_NAME`
//! - the `[hub] name` configuration key
//! - an interactive prompt (unless running non-interactively)

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    dialoguer::{Error as DialoguerError, Input, theme::ColorfulTheme},
    log::debug,
    std::io::IsTerminal,
};

/// Options for hub selection.
#[derive(Debug, Clone, Default)]
pub struct HubOptions {
    /// Explicit name from the command line or environment.
    pub name: Option<String>,
    /// Fail instead of prompting.
    pub non_interactive: bool,
}

/// Resolve the hub name to scan for.
pub fn resolve_hub_name(options: &HubOptions, config: &Config) -> Result<String> {
    if let Some(name) = non_empty(options.name.as_deref()) {
        debug!("Using hub name from command line: {name}");
        return Ok(name);
    }

    if let Some(name) = non_empty(config.hub.name.as_deref()) {
        debug!("Using hub name from config: {name}");
        return Ok(name);
    }

    if options.non_interactive {
        return Err(CliError::Usage(
            "no hub name given; pass --name, set HUBLOAD_NAME or add [hub] name to hubload.toml"
                .to_string(),
        )
        .into());
    }

    ensure_interactive_terminal()?;
    prompt_hub_name()
}

fn non_empty(name: Option<&str>) -> Option<String> {
    name.map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(CliError::Usage(
            "no hub name given and no terminal to prompt on; pass --name".to_string(),
        )
        .into())
    }
}

fn prompt_hub_name() -> Result<String> {
    let name: String = Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Hub name")
        .validate_with(|input: &String| -> std::result::Result<(), &str> {
            if input.trim().is_empty() {
                Err("hub name must not be empty")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .map_err(map_prompt_error)?;
    Ok(name.trim().to_string())
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("hub selection cancelled".to_string()).into()
            } else {
                CliError::Usage(format!("failed to read hub name: {io_err}")).into()
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_name(name: &str) -> Config {
        let mut config = Config::default();
        config.hub.name = Some(name.to_string());
        config
    }

    #[test]
    fn test_explicit_name_wins() {
        let options = HubOptions {
            name: Some("Technic Hub".to_string()),
            non_interactive: true,
        };
        let name = resolve_hub_name(&options, &config_with_name("City Hub")).unwrap();
        assert_eq!(name, "Technic Hub");
    }

    #[test]
    fn test_config_name_used_when_flag_absent() {
        let options = HubOptions {
            name: None,
            non_interactive: true,
        };
        let name = resolve_hub_name(&options, &config_with_name("City Hub")).unwrap();
        assert_eq!(name, "City Hub");
    }

    #[test]
    fn test_blank_name_falls_through_to_config() {
        let options = HubOptions {
            name: Some("   ".to_string()),
            non_interactive: true,
        };
        let name = resolve_hub_name(&options, &config_with_name("Prime")).unwrap();
        assert_eq!(name, "Prime");
    }

    #[test]
    fn test_non_interactive_without_name_is_usage_error() {
        let options = HubOptions {
            name: None,
            non_interactive: true,
        };
        let err = resolve_hub_name(&options, &Config::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }

    #[test]
    fn test_prompt_error_interrupted_is_cancelled() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::from(
            std::io::ErrorKind::Interrupted,
        )));
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Cancelled(_))
        ));
    }

    #[test]
    fn test_prompt_error_other_io_is_usage() {
        let err = map_prompt_error(DialoguerError::IO(std::io::Error::from(
            std::io::ErrorKind::BrokenPipe,
        )));
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Usage(_))
        ));
    }
}
