use std::{path::PathBuf, sync::Arc};

use {
    wagate_attachments::AttachmentStore,
    wagate_config::WagateConfig,
    wagate_whatsapp::{DispatchService, SessionManager},
};

/// Everything the HTTP handlers need, built once at startup.
pub struct GatewayState {
    pub version: String,
    pub session: Arc<SessionManager>,
    pub dispatch: DispatchService,
    pub attachments: Arc<AttachmentStore>,
    /// Reported by `/status`.
    pub client_id: String,
    pub data_path: PathBuf,
    pub behind_proxy: bool,
    /// Per-file ceiling for direct `/send-file` uploads.
    pub max_file_bytes: usize,
}

impl GatewayState {
    pub fn new(
        session: Arc<SessionManager>,
        attachments: Arc<AttachmentStore>,
        config: &WagateConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            dispatch: DispatchService::new(Arc::clone(&session), Arc::clone(&attachments)),
            session,
            attachments,
            client_id: config.whatsapp.client_id.clone(),
            data_path: config.whatsapp.data_path.clone(),
            behind_proxy: config.server.behind_proxy,
            max_file_bytes: config.attachments.max_file_bytes,
        })
    }
}
