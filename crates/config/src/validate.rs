//! Configuration validation.
//!
//! Detects unknown/misspelled fields in TOML config files, type errors, and
//! settings that parse but will not work as intended.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::schema::{ReconnectStrategy, WagateConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "value", "security"
    pub category: &'static str,
    /// Dotted path, e.g. "server.bnd"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn leaves(names: &[&'static str]) -> KnownKeys {
    KnownKeys::Struct(names.iter().map(|n| (*n, KnownKeys::Leaf)).collect())
}

fn build_schema_map() -> KnownKeys {
    let reconnect = leaves(&[
        "strategy",
        "base_delay_secs",
        "max_delay_secs",
        "jitter",
        "max_attempts",
    ]);

    let mut whatsapp: HashMap<&'static str, KnownKeys> = [
        "client_id",
        "data_path",
        "sidecar_url",
        "sidecar_dir",
        "auto_start_sidecar",
        "send_timeout_secs",
        "max_concurrent_sends",
        "qr_size",
    ]
    .into_iter()
    .map(|n| (n, KnownKeys::Leaf))
    .collect();
    whatsapp.insert("reconnect", reconnect);

    KnownKeys::Struct(HashMap::from([
        ("server", leaves(&["bind", "port", "behind_proxy"])),
        ("whatsapp", KnownKeys::Struct(whatsapp)),
        (
            "attachments",
            leaves(&["dir", "max_file_bytes", "persist_index"]),
        ),
        (
            "throttle",
            leaves(&[
                "enabled",
                "send_per_minute",
                "upload_per_minute",
                "api_per_minute",
            ]),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

/// Closest candidate within `max_distance` edits, if any.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d > 0 && *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|e| e == "toml");

    let mut result = match std::fs::read_to_string(&actual_path) {
        Ok(content) if is_toml => validate_toml_str(&crate::env_subst::substitute_env(&content)),
        Ok(_) => match crate::loader::load_config(&actual_path) {
            Ok(config) => {
                let mut diagnostics = Vec::new();
                check_semantic_warnings(&config, &mut diagnostics);
                ValidationResult {
                    diagnostics,
                    config_path: None,
                }
            },
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "type-error",
                    "",
                    format!("{e:#}"),
                )],
                config_path: None,
            },
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path);
    result
}

/// Validate a TOML string without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    match toml::from_str::<WagateConfig>(toml_str) {
        Ok(config) => check_semantic_warnings(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => {
                check_unknown_fields(child_value, child_schema, &path, diagnostics);
            },
            None => {
                let message = match suggest(key, &known_keys, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            },
        }
    }
}

fn check_semantic_warnings(config: &WagateConfig, diagnostics: &mut Vec<Diagnostic>) {
    let is_localhost = matches!(config.server.bind.as_str(), "127.0.0.1" | "localhost" | "::1");

    if !is_localhost && !config.throttle.enabled {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "throttle.enabled",
            format!(
                "throttling is disabled while binding to {}; send endpoints are open to abuse",
                config.server.bind
            ),
        ));
    }

    if config.attachments.max_file_bytes == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "attachments.max_file_bytes",
            "must be greater than 0; every upload would be rejected",
        ));
    }

    if config.whatsapp.max_concurrent_sends == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "whatsapp.max_concurrent_sends",
            "0 is treated as 1",
        ));
    }

    if config.whatsapp.send_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "whatsapp.send_timeout_secs",
            "must be greater than 0; every send would time out",
        ));
    }

    if config.whatsapp.client_id.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "whatsapp.client_id",
            "must not be empty",
        ));
    }

    let url = config.whatsapp.sidecar_url.as_str();
    if !(url.starts_with("ws://") || url.starts_with("wss://")) {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "whatsapp.sidecar_url",
            "must be a ws:// or wss:// URL",
        ));
    }

    let reconnect = &config.whatsapp.reconnect;
    if reconnect.strategy == ReconnectStrategy::Exponential
        && reconnect.base_delay_secs > reconnect.max_delay_secs
    {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "whatsapp.reconnect.max_delay_secs",
            "is smaller than base_delay_secs; every delay will be capped",
        ));
    }
    if reconnect.max_attempts == Some(0) {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "whatsapp.reconnect.max_attempts",
            "0 marks the session failed on the first disconnect",
        ));
    }
}
