//! Turns send requests into ordered calls against the live session.

use std::sync::Arc;

use {
    tracing::{debug, info},
    wagate_attachments::AttachmentStore,
};

use crate::{
    destination,
    error::{Error, Result},
    session::SessionManager,
    types::MediaFile,
};

pub struct DispatchService {
    session: Arc<SessionManager>,
    store: Arc<AttachmentStore>,
}

impl DispatchService {
    pub fn new(session: Arc<SessionManager>, store: Arc<AttachmentStore>) -> Self {
        Self { session, store }
    }

    pub async fn dispatch_text(&self, destination: &str, message: &str) -> Result<()> {
        self.session.send_text(destination, message).await?;
        info!(destination, "text message sent");
        Ok(())
    }

    /// Send stored attachments in order, the caption going on the first one
    /// only. Returns the original names of the files that were sent.
    ///
    /// A missing id aborts the remaining sends; files already delivered stay
    /// delivered.
    pub async fn dispatch_attachments(
        &self,
        destination: &str,
        ids: &[String],
        caption: &str,
    ) -> Result<Vec<String>> {
        if ids.is_empty() {
            return Err(Error::EmptyAttachmentList);
        }
        self.session.ensure_ready()?;
        destination::normalize(destination)?;

        let mut sent = Vec::with_capacity(ids.len());
        for (index, id) in ids.iter().enumerate() {
            let (attachment, bytes) = self.store.read(id).await.map_err(|e| match e {
                wagate_attachments::Error::NotFound { id } => Error::attachment_not_found(id),
                other => Error::Storage(other),
            })?;
            let file = MediaFile {
                bytes,
                mime_type: attachment.mime_type,
                filename: attachment.original_name.clone(),
            };
            self.session
                .send_media(destination, file, caption_for(index, caption))
                .await?;
            debug!(id, index, "attachment sent");
            sent.push(attachment.original_name);
        }

        info!(destination, count = sent.len(), "attachments sent");
        Ok(sent)
    }

    /// Send files received directly with the request, without storing them.
    pub async fn dispatch_files(
        &self,
        destination: &str,
        files: Vec<MediaFile>,
        caption: &str,
    ) -> Result<usize> {
        if files.is_empty() {
            return Err(Error::EmptyAttachmentList);
        }
        self.session.ensure_ready()?;
        destination::normalize(destination)?;

        let count = files.len();
        for (index, file) in files.into_iter().enumerate() {
            self.session
                .send_media(destination, file, caption_for(index, caption))
                .await?;
        }

        info!(destination, count, "files sent");
        Ok(count)
    }
}

fn caption_for(index: usize, caption: &str) -> &str {
    if index == 0 { caption } else { "" }
}
