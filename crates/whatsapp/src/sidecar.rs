//! WebSocket link to the WhatsApp Web sidecar process.
//!
//! The sidecar owns the browser automation; this side speaks a small JSON
//! protocol over one WebSocket: `login` / `send` / `logout` out, lifecycle
//! events and `send_result` acknowledgments back.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    futures::{SinkExt, StreamExt},
    serde::{Deserialize, Serialize},
    tokio::{
        net::TcpStream,
        sync::{mpsc, oneshot},
        task::JoinHandle,
    },
    tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message},
    tracing::{debug, info, warn},
    wagate_config::WhatsAppConfig,
};

use crate::{
    driver::{EventStream, SessionDriver},
    error::{Error, Result},
    types::{OutboundPayload, SessionEvent},
};

pub const DEFAULT_SIDECAR_URL: &str = "ws://127.0.0.1:3900";

/// How long `terminate` waits for the link task to flush the logout frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingSends = Arc<Mutex<HashMap<String, oneshot::Sender<std::result::Result<(), String>>>>>;

/// Frames sent to the sidecar.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum GatewayFrame {
    Login {
        client_id: String,
        auth_dir: String,
    },
    Send {
        request_id: String,
        chat_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        media: Option<MediaFrame>,
    },
    Logout,
}

#[derive(Debug, Serialize)]
struct MediaFrame {
    mime_type: String,
    filename: String,
    /// Base64 of the file bytes.
    data: String,
    caption: String,
    as_document: bool,
}

/// Frames received from the sidecar.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SidecarFrame {
    Qr {
        qr: String,
    },
    Authenticated,
    Ready,
    AuthFailure {
        #[serde(default)]
        message: Option<String>,
    },
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    Loading {
        percent: u8,
    },
    ChangeState {
        state: String,
    },
    Error {
        error: String,
    },
    SendResult {
        request_id: String,
        success: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

struct SidecarLink {
    write_tx: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

/// [`SessionDriver`] backed by the sidecar WebSocket.
pub struct SidecarDriver {
    url: String,
    client_id: String,
    auth_dir: PathBuf,
    link: tokio::sync::Mutex<Option<SidecarLink>>,
    pending: PendingSends,
}

impl SidecarDriver {
    pub fn new(url: impl Into<String>, client_id: impl Into<String>, auth_dir: PathBuf) -> Self {
        Self {
            url: url.into(),
            client_id: client_id.into(),
            auth_dir,
            link: tokio::sync::Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &WhatsAppConfig) -> Self {
        Self::new(
            config.sidecar_url.clone(),
            config.client_id.clone(),
            config.data_path.clone(),
        )
    }

    async fn write(&self, frame: &GatewayFrame) -> Result<()> {
        let json = serde_json::to_string(frame).map_err(|e| Error::driver("encode frame", e))?;
        let link = self.link.lock().await;
        match link.as_ref() {
            Some(link) if link.write_tx.send(json).is_ok() => Ok(()),
            _ => Err(Error::delivery("sidecar not connected")),
        }
    }
}

#[async_trait]
impl SessionDriver for SidecarDriver {
    async fn connect(&self) -> Result<EventStream> {
        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::driver(format!("connect to {}", self.url), e))?;

        let (event_tx, event_rx) = mpsc::channel(64);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_link(
            ws,
            write_rx,
            event_tx,
            Arc::clone(&self.pending),
        ));

        {
            let mut link = self.link.lock().await;
            if let Some(previous) = link.replace(SidecarLink { write_tx, task }) {
                previous.task.abort();
                fail_pending(&self.pending, "sidecar link replaced");
            }
        }

        self.write(&GatewayFrame::Login {
            client_id: self.client_id.clone(),
            auth_dir: self.auth_dir.display().to_string(),
        })
        .await?;
        info!(url = %self.url, client_id = %self.client_id, "connected to WhatsApp sidecar");
        Ok(event_rx)
    }

    async fn send_message(&self, chat_id: &str, payload: OutboundPayload) -> Result<()> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let frame = match payload {
            OutboundPayload::Text(text) => GatewayFrame::Send {
                request_id: request_id.clone(),
                chat_id: chat_id.to_string(),
                text: Some(text),
                media: None,
            },
            OutboundPayload::Media { file, caption } => GatewayFrame::Send {
                request_id: request_id.clone(),
                chat_id: chat_id.to_string(),
                text: None,
                media: Some(MediaFrame {
                    mime_type: file.mime_type,
                    filename: file.filename,
                    data: BASE64.encode(&file.bytes),
                    caption,
                    as_document: true,
                }),
            },
        };

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id: &request_id,
        };

        self.write(&frame).await?;
        debug!(request_id, chat_id, "send frame written");

        match rx.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(message)) => Err(Error::delivery(message)),
            Err(_) => Err(Error::delivery(
                "sidecar connection closed before acknowledging",
            )),
        }
    }

    async fn terminate(&self) -> Result<()> {
        let Some(SidecarLink { write_tx, task }) = self.link.lock().await.take() else {
            return Ok(());
        };
        let logout =
            serde_json::to_string(&GatewayFrame::Logout).map_err(|e| Error::driver("encode frame", e))?;
        let _ = write_tx.send(logout);
        // Closing the writer makes the link task send a close frame and exit.
        drop(write_tx);
        if tokio::time::timeout(CLOSE_TIMEOUT, task).await.is_err() {
            warn!("sidecar link did not close in time");
        }
        info!("WhatsApp sidecar session terminated");
        Ok(())
    }
}

/// Removes a pending send entry when the caller stops waiting.
struct PendingGuard<'a> {
    pending: &'a PendingSends,
    request_id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(self.request_id);
    }
}

/// Pump one WebSocket connection until it ends. Emits a final
/// `Disconnected` unless the writer side was closed on purpose.
async fn run_link(
    ws: WsStream,
    mut write_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::Sender<SessionEvent>,
    pending: PendingSends,
) {
    let (mut sink, mut reader) = ws.split();

    let reason = loop {
        tokio::select! {
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = handle_frame(text.as_str(), &pending)
                        && event_tx.send(event).await.is_err()
                    {
                        debug!("session stopped listening, closing sidecar link");
                        let _ = sink.send(Message::Close(None)).await;
                        return;
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        break format!("websocket error: {e}");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break "sidecar closed the connection".to_string(),
                Some(Ok(_)) => {},
                Some(Err(e)) => break format!("websocket error: {e}"),
            },
            outgoing = write_rx.recv() => match outgoing {
                Some(json) => {
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        break format!("websocket error: {e}");
                    }
                },
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    debug!("sidecar link closed");
                    return;
                },
            },
        }
    };

    warn!(reason, "sidecar link lost");
    fail_pending(&pending, &reason);
    let _ = event_tx.send(SessionEvent::Disconnected(reason)).await;
}

/// Fail every in-flight send with `reason`.
fn fail_pending(pending: &PendingSends, reason: &str) {
    let waiters = std::mem::take(&mut *pending.lock().unwrap_or_else(|e| e.into_inner()));
    if !waiters.is_empty() {
        debug!(count = waiters.len(), reason, "failing in-flight sends");
    }
    for (_, tx) in waiters {
        let _ = tx.send(Err(reason.to_string()));
    }
}

/// Decode one text frame. Send acknowledgments are routed to their waiter;
/// everything else becomes a session event.
fn handle_frame(text: &str, pending: &PendingSends) -> Option<SessionEvent> {
    let frame: SidecarFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "ignoring unrecognized sidecar frame");
            return None;
        },
    };

    match frame {
        SidecarFrame::Qr { qr } => Some(SessionEvent::Challenge(qr)),
        SidecarFrame::Authenticated => Some(SessionEvent::Authenticated),
        SidecarFrame::Ready => Some(SessionEvent::Ready),
        SidecarFrame::AuthFailure { message } => Some(SessionEvent::AuthFailure(message)),
        SidecarFrame::Disconnected { reason } => Some(SessionEvent::Disconnected(reason)),
        SidecarFrame::Loading { percent } => Some(SessionEvent::Loading { percent }),
        SidecarFrame::ChangeState { state } => Some(SessionEvent::StateChanged(state)),
        SidecarFrame::Error { error } => Some(SessionEvent::Error(error)),
        SidecarFrame::SendResult {
            request_id,
            success,
            error,
        } => {
            let waiter = pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            match waiter {
                Some(tx) => {
                    let outcome = if success {
                        Ok(())
                    } else {
                        Err(error.unwrap_or_else(|| "send failed".into()))
                    };
                    let _ = tx.send(outcome);
                },
                None => debug!(request_id, "send result for unknown request"),
            }
            None
        },
    }
}
