use std::error::Error as StdError;

use crate::types::ConnectionState;

/// Crate-wide result type for session and dispatch operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The session is not in the `ready` state.
    #[error("WhatsApp not ready (state: {state})")]
    NotReady { state: ConnectionState },

    /// Destination normalizes to an empty digit string.
    #[error("invalid destination: {destination:?}")]
    DestinationInvalid { destination: String },

    #[error("at least one attachment id is required")]
    EmptyAttachmentList,

    #[error("File with ID {id} not found")]
    AttachmentNotFound { id: String },

    /// The driver rejected the send, failed, or did not answer in time.
    #[error("delivery failed: {message}")]
    Delivery { message: String },

    /// No challenge is currently pending.
    #[error("QR not available")]
    NotAvailable,

    #[error(transparent)]
    Storage(#[from] wagate_attachments::Error),

    #[error("failed to render QR code: {message}")]
    Render { message: String },

    /// Wrapped failure from the automation driver.
    #[error("driver error: {context}: {source}")]
    Driver {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn not_ready(state: ConnectionState) -> Self {
        Self::NotReady { state }
    }

    #[must_use]
    pub fn destination_invalid(destination: impl Into<String>) -> Self {
        Self::DestinationInvalid {
            destination: destination.into(),
        }
    }

    #[must_use]
    pub fn attachment_not_found(id: impl Into<String>) -> Self {
        Self::AttachmentNotFound { id: id.into() }
    }

    #[must_use]
    pub fn delivery(message: impl std::fmt::Display) -> Self {
        Self::Delivery {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn render(message: impl std::fmt::Display) -> Self {
        Self::Render {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn driver(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Driver {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
