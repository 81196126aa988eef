//! Default configuration template with all options documented.
//!
//! Written by `wagate config init`. Every option is present with its default
//! value so the file doubles as reference documentation.

/// Generate the default config template with a specific port.
pub fn default_config_template(port: u16) -> String {
    format!(
        r##"# wagate configuration
# ====================
# Changes require a restart to take effect.
#
# Environment variable substitution is supported: ${{ENV_VAR}}
# Example: client_id = "${{WA_CLIENT_ID}}"

# ══════════════════════════════════════════════════════════════════════════════
# SERVER
# ══════════════════════════════════════════════════════════════════════════════

[server]
bind = "127.0.0.1"          # Address to bind to ("0.0.0.0" for all interfaces)
port = {port}                 # HTTP port
behind_proxy = false        # Trust X-Forwarded-For / X-Real-IP for client IPs

# ══════════════════════════════════════════════════════════════════════════════
# WHATSAPP SESSION
# ══════════════════════════════════════════════════════════════════════════════

[whatsapp]
client_id = "sec-server"            # Session identifier (env: WA_CLIENT_ID)
data_path = ".wwebjs_auth"          # Persisted login state (env: WA_DATA_PATH)
sidecar_url = "ws://127.0.0.1:3900" # WebSocket endpoint of the WhatsApp Web sidecar
# sidecar_dir = "sidecar/whatsapp-web"  # Sidecar checkout (used with auto_start_sidecar)
auto_start_sidecar = false          # Spawn the sidecar with npm on startup
send_timeout_secs = 30              # Per-message delivery timeout
max_concurrent_sends = 4            # Sends in flight at once
qr_size = 256                       # Minimum QR PNG edge in pixels

[whatsapp.reconnect]
strategy = "fixed"                  # "fixed" or "exponential"
base_delay_secs = 5                 # Fixed delay, or first exponential delay
max_delay_secs = 300                # Exponential cap
jitter = true                       # Randomise exponential delays
# max_attempts = 10                 # Mark the session failed after N attempts

# ══════════════════════════════════════════════════════════════════════════════
# ATTACHMENTS
# ══════════════════════════════════════════════════════════════════════════════

[attachments]
dir = "uploads"                     # Storage directory (env: WAGATE_UPLOADS_DIR)
max_file_bytes = 26214400           # Per-file upload limit (25 MiB)
persist_index = true                # Keep uploads across restarts

# ══════════════════════════════════════════════════════════════════════════════
# THROTTLING (requests per minute per client IP)
# ══════════════════════════════════════════════════════════════════════════════

[throttle]
enabled = true
send_per_minute = 60                # /send, /send-files, /send-file
upload_per_minute = 30              # /upload
api_per_minute = 300                # Everything else under /wa
"##
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{schema::WagateConfig, validate::validate_toml_str},
    };

    #[test]
    fn template_parses_to_defaults() {
        let parsed: WagateConfig = toml::from_str(&default_config_template(5000)).unwrap();
        let defaults = WagateConfig::default();
        assert_eq!(parsed.server.port, defaults.server.port);
        assert_eq!(parsed.whatsapp.client_id, defaults.whatsapp.client_id);
        assert_eq!(
            parsed.attachments.max_file_bytes,
            defaults.attachments.max_file_bytes
        );
        assert_eq!(
            parsed.throttle.send_per_minute,
            defaults.throttle.send_per_minute
        );
    }

    #[test]
    fn template_validates_cleanly() {
        let result = validate_toml_str(&default_config_template(8080));
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }
}
