use {async_trait::async_trait, tokio::sync::mpsc};

use crate::{
    error::Result,
    types::{OutboundPayload, SessionEvent},
};

/// Stream of lifecycle events for one connection. Closing it counts as a
/// disconnect.
pub type EventStream = mpsc::Receiver<SessionEvent>;

/// The automation layer that actually talks to WhatsApp Web.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Start (or restart) the underlying client.
    async fn connect(&self) -> Result<EventStream>;

    /// Deliver one message to `chat_id` and wait for the acknowledgment.
    async fn send_message(&self, chat_id: &str, payload: OutboundPayload) -> Result<()>;

    /// Log out and tear down the client.
    async fn terminate(&self) -> Result<()>;
}
