use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    clap::Subcommand,
};

use wagate_config::{
    WagateConfig,
    validate::{self, Severity},
};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors/warnings.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
    /// Print the effective configuration (file + env overrides) as TOML.
    Show,
    /// Write a documented config file with every option at its default.
    Init {
        /// Destination file.
        #[arg(long, default_value = "wagate.toml")]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config(action: ConfigAction, config_path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Check { verbose } => check(config_path, verbose),
        ConfigAction::Show => {
            let config = crate::load_effective_config(config_path)?;
            print!("{}", render_toml(&config)?);
            Ok(())
        },
        ConfigAction::Init { path, force } => {
            write_template(&path, WagateConfig::default().server.port, force)?;
            eprintln!("Wrote {}", path.display());
            Ok(())
        },
    }
}

fn render_toml(config: &WagateConfig) -> Result<String> {
    toml::to_string_pretty(config).context("failed to serialize config")
}

fn write_template(path: &Path, port: u16, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, wagate_config::default_config_template(port))
        .with_context(|| format!("failed to write {}", path.display()))
}

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

fn check(config_path: Option<&Path>, verbose: bool) -> Result<()> {
    let result = validate::validate(config_path);

    if let Some(ref path) = result.config_path {
        eprintln!("Checking {}\n", path.display());
    } else {
        eprintln!("No config file found; checking defaults.\n");
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }

        let color = match d.severity {
            Severity::Error => RED,
            Severity::Warning => YELLOW,
            Severity::Info => CYAN,
        };

        if d.path.is_empty() {
            eprintln!("  {BOLD}{color}{}{RESET} {}", d.severity, d.message);
        } else {
            eprintln!(
                "  {BOLD}{color}{}{RESET} {}: {}",
                d.severity, d.path, d.message
            );
        }
        shown += 1;
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);

    if shown > 0 {
        eprintln!();
    }

    if errors == 0 && warnings == 0 {
        eprintln!("No issues found.");
    } else {
        eprintln!("{errors} error(s), {warnings} warning(s)");
    }

    if result.has_errors() {
        std::process::exit(1);
    }

    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("wagate.toml");

        write_template(&path, 5000, false).unwrap();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("port = 5000"));

        let err = write_template(&path, 5000, false).unwrap_err();
        assert!(err.to_string().contains("already exists"));

        write_template(&path, 6000, true).unwrap();
        let loaded = wagate_config::load_config(&path).unwrap();
        assert_eq!(loaded.server.port, 6000);
    }

    #[test]
    fn show_renders_reloadable_toml() {
        let mut config = WagateConfig::default();
        config.whatsapp.client_id = "ops".into();
        let rendered = render_toml(&config).unwrap();

        let reparsed: WagateConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.whatsapp.client_id, "ops");
        assert_eq!(reparsed.server.port, config.server.port);
    }
}
