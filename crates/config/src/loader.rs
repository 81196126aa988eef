use std::path::{Path, PathBuf};

use {
    anyhow::Context,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::WagateConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["wagate.toml", "wagate.yaml", "wagate.yml", "wagate.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<WagateConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply env overrides.
///
/// Search order:
/// 1. `./wagate.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/wagate/wagate.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `WagateConfig::default()` if no config file is found or the
/// file cannot be parsed.
pub fn discover_and_load() -> WagateConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                    WagateConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            WagateConfig::default()
        },
    };
    apply_env_overrides(&mut config);
    config
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/wagate/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "wagate").map(|d| d.config_dir().to_path_buf())
}

/// Apply environment variable overrides on top of a loaded config.
///
/// `WA_CLIENT_ID` and `WA_DATA_PATH` keep their legacy names.
pub fn apply_env_overrides(config: &mut WagateConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut WagateConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("WA_CLIENT_ID").filter(|v| !v.is_empty()) {
        config.whatsapp.client_id = v;
    }
    if let Some(v) = lookup("WA_DATA_PATH").filter(|v| !v.is_empty()) {
        config.whatsapp.data_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("WAGATE_SIDECAR_URL").filter(|v| !v.is_empty()) {
        config.whatsapp.sidecar_url = v;
    }
    if let Some(v) = lookup("WAGATE_UPLOADS_DIR").filter(|v| !v.is_empty()) {
        config.attachments.dir = PathBuf::from(v);
    }
    if let Some(v) = lookup("WAGATE_BIND").filter(|v| !v.is_empty()) {
        config.server.bind = v;
    }
    if let Some(v) = lookup("WAGATE_PORT") {
        match v.parse() {
            Ok(port) => config.server.port = port,
            Err(e) => warn!(value = %v, error = %e, "ignoring invalid WAGATE_PORT"),
        }
    }
}

/// Parse raw config text, picking the format from the file extension.
pub fn parse_config(raw: &str, path: &Path) -> anyhow::Result<WagateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_supported_format() {
        let toml_cfg = parse_config("[server]\nport = 7000\n", Path::new("wagate.toml")).unwrap();
        assert_eq!(toml_cfg.server.port, 7000);

        let yaml_cfg = parse_config("server:\n  port: 7001\n", Path::new("wagate.yaml")).unwrap();
        assert_eq!(yaml_cfg.server.port, 7001);

        let json_cfg =
            parse_config(r#"{"server": {"port": 7002}}"#, Path::new("wagate.json")).unwrap();
        assert_eq!(json_cfg.server.port, 7002);
    }

    #[test]
    fn rejects_unknown_extension() {
        assert!(parse_config("", Path::new("wagate.ini")).is_err());
    }

    #[test]
    fn load_config_substitutes_env_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wagate.toml");
        std::fs::write(&path, "[whatsapp]\nclient_id = \"plain-${WAGATE_UNSET_VAR_XYZ}\"\n")
            .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.whatsapp.client_id, "plain-${WAGATE_UNSET_VAR_XYZ}");
    }

    #[test]
    fn env_overrides_apply() {
        let mut cfg = WagateConfig::default();
        apply_env_overrides_with(&mut cfg, |name| match name {
            "WA_CLIENT_ID" => Some("ops".into()),
            "WA_DATA_PATH" => Some("/var/lib/wa".into()),
            "WAGATE_PORT" => Some("8080".into()),
            _ => None,
        });
        assert_eq!(cfg.whatsapp.client_id, "ops");
        assert_eq!(cfg.whatsapp.data_path, PathBuf::from("/var/lib/wa"));
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut cfg = WagateConfig::default();
        apply_env_overrides_with(&mut cfg, |name| {
            (name == "WAGATE_PORT").then(|| "not-a-port".to_string())
        });
        assert_eq!(cfg.server.port, 5000);
    }
}
