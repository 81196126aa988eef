/// Config schema types (server, whatsapp session, attachments, throttling).
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagateConfig {
    pub server: ServerConfig,
    pub whatsapp: WhatsAppConfig,
    pub attachments: AttachmentsConfig,
    pub throttle: ThrottleConfig,
}

/// Gateway server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    /// Port to listen on. Defaults to 5000.
    pub port: u16,
    /// Trust `X-Forwarded-For` style headers when resolving client IPs.
    pub behind_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 5000,
            behind_proxy: false,
        }
    }
}

/// WhatsApp Web session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Client identifier passed to the sidecar; selects the auth profile.
    pub client_id: String,
    /// Directory where the sidecar keeps its auth state.
    pub data_path: PathBuf,
    /// WebSocket URL of the WhatsApp Web sidecar.
    pub sidecar_url: String,
    /// Directory containing the sidecar (`package.json`). Searched for when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sidecar_dir: Option<PathBuf>,
    /// Spawn and supervise the sidecar process.
    pub auto_start_sidecar: bool,
    /// Upper bound for a single send round trip.
    pub send_timeout_secs: u64,
    /// Maximum number of sends in flight at once.
    pub max_concurrent_sends: usize,
    /// Minimum edge length of the rendered QR image, in pixels.
    pub qr_size: u32,
    pub reconnect: ReconnectConfig,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            client_id: "sec-server".into(),
            data_path: PathBuf::from(".wwebjs_auth"),
            sidecar_url: "ws://127.0.0.1:3900".into(),
            sidecar_dir: None,
            auto_start_sidecar: false,
            send_timeout_secs: 30,
            max_concurrent_sends: 4,
            qr_size: 256,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Reconnect delay strategy.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconnectStrategy {
    /// Wait `base_delay_secs` between every attempt.
    #[default]
    Fixed,
    /// Double the delay per attempt up to `max_delay_secs`.
    Exponential,
}

/// Reconnect policy applied after the session disconnects.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub strategy: ReconnectStrategy,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Randomize exponential delays (full jitter).
    pub jitter: bool,
    /// Give up and mark the session failed after this many consecutive attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            strategy: ReconnectStrategy::Fixed,
            base_delay_secs: 5,
            max_delay_secs: 300,
            jitter: true,
            max_attempts: None,
        }
    }
}

/// Attachment storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentsConfig {
    /// Directory holding uploaded files.
    pub dir: PathBuf,
    /// Largest accepted upload, in bytes.
    pub max_file_bytes: usize,
    /// Keep the metadata index on disk so uploads survive restarts.
    pub persist_index: bool,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("uploads"),
            max_file_bytes: 25 * 1024 * 1024,
            persist_index: true,
        }
    }
}

/// Per-client request throttling. Limits are requests per minute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub send_per_minute: usize,
    pub upload_per_minute: usize,
    pub api_per_minute: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            send_per_minute: 60,
            upload_per_minute: 30,
            api_per_minute: 300,
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_service() {
        let cfg = WagateConfig::default();
        assert_eq!(cfg.server.port, 5000);
        assert_eq!(cfg.whatsapp.client_id, "sec-server");
        assert_eq!(cfg.whatsapp.data_path, PathBuf::from(".wwebjs_auth"));
        assert_eq!(cfg.whatsapp.reconnect.strategy, ReconnectStrategy::Fixed);
        assert_eq!(cfg.whatsapp.reconnect.base_delay_secs, 5);
        assert_eq!(cfg.whatsapp.qr_size, 256);
        assert_eq!(cfg.attachments.dir, PathBuf::from("uploads"));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: WagateConfig = toml::from_str(
            r#"
            [whatsapp.reconnect]
            strategy = "exponential"
            max_attempts = 8

            [attachments]
            persist_index = false
            "#,
        )
        .unwrap();
        assert_eq!(
            cfg.whatsapp.reconnect.strategy,
            ReconnectStrategy::Exponential
        );
        assert_eq!(cfg.whatsapp.reconnect.max_attempts, Some(8));
        assert_eq!(cfg.whatsapp.reconnect.max_delay_secs, 300);
        assert!(!cfg.attachments.persist_index);
        assert_eq!(cfg.attachments.max_file_bytes, 25 * 1024 * 1024);
        assert_eq!(cfg.server.bind, "127.0.0.1");
    }
}
