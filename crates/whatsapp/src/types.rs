use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the single WhatsApp Web session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Initializing,
    AwaitingChallenge,
    Authenticated,
    Ready,
    Failed,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::AwaitingChallenge => "awaiting_challenge",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Failed => "failed",
            Self::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by a [`SessionDriver`](crate::driver::SessionDriver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new QR challenge string to be scanned.
    Challenge(String),
    Authenticated,
    Ready,
    AuthFailure(Option<String>),
    Disconnected(String),
    Error(String),
    Loading { percent: u8 },
    /// Raw client state reported by WhatsApp Web (`CONNECTED`, `CONFLICT`,
    /// `UNPAIRED`, ...). Informational only.
    StateChanged(String),
}

/// Point-in-time view of the session, taken under a single lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub ready: bool,
    pub has_challenge: bool,
    pub last_error: Option<String>,
    pub reconnect_attempts: u32,
    pub loading_percent: Option<u8>,
    pub wa_state: Option<String>,
}

/// A file handed to the driver as a document message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// What the driver is asked to deliver to a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundPayload {
    Text(String),
    Media { file: MediaFile, caption: String },
}

impl OutboundPayload {
    pub fn caption(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Media { caption, .. } => Some(caption),
        }
    }
}
