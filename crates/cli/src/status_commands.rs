use std::{fmt::Write, time::Duration};

use {
    anyhow::{Context, Result},
    serde_json::Value,
};

/// Query a running gateway's `/wa/status` and print a summary.
pub async fn handle_status(base_url: &str, json: bool) -> Result<()> {
    let url = status_url(base_url);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let status: Value = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to reach {url}"))?
        .error_for_status()?
        .json()
        .await
        .context("gateway returned invalid JSON")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_summary(&status));
    }
    Ok(())
}

fn status_url(base_url: &str) -> String {
    format!("{}/wa/status", base_url.trim_end_matches('/'))
}

fn render_summary(status: &Value) -> String {
    let field = |key: &str| match status.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "-".to_string(),
        Some(other) => other.to_string(),
    };

    let mut out = String::new();
    for (label, key) in [
        ("State", "state"),
        ("Ready", "ready"),
        ("QR pending", "hasQr"),
        ("Client", "clientId"),
        ("Client state", "waState"),
        ("Reconnects", "reconnectAttempts"),
        ("Last error", "lastError"),
    ] {
        let _ = writeln!(out, "{label:<12} {}", field(key));
    }
    out
}
