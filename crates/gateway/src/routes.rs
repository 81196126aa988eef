//! Handlers for the `/wa` routes.

use {
    axum::{
        Json,
        extract::{Multipart, Path, State, rejection::JsonRejection},
        http::{StatusCode, header},
        response::{IntoResponse, Response},
    },
    chrono::{DateTime, Utc},
    serde::Serialize,
    serde_json::{Value, json},
    tracing::{info, warn},
    wagate_attachments::{Attachment, AttachmentStore},
    wagate_whatsapp::MediaFile,
};

use crate::{
    error::ApiError,
    requests::{FilesSendRequest, TextSendRequest},
    server::AppState,
};

type ApiResult<T> = Result<T, ApiError>;

/// Public view of a stored attachment.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileView {
    id: String,
    original_name: String,
    mimetype: String,
    size: u64,
    uploaded_at: DateTime<Utc>,
}

impl From<Attachment> for FileView {
    fn from(a: Attachment) -> Self {
        Self {
            id: a.id,
            original_name: a.original_name,
            mimetype: a.mime_type,
            size: a.size_bytes,
            uploaded_at: a.uploaded_at,
        }
    }
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.gateway.session.current_status();
    Json(json!({
        "ready": snapshot.ready,
        "state": snapshot.state,
        "hasQr": snapshot.has_challenge,
        "lastError": snapshot.last_error,
        "clientId": state.gateway.client_id,
        "dataPath": state.gateway.data_path.display().to_string(),
        "reconnectAttempts": snapshot.reconnect_attempts,
        "loadingPercent": snapshot.loading_percent,
        "waState": snapshot.wa_state,
    }))
}

/// `GET /qr`
pub async fn qr(State(state): State<AppState>) -> ApiResult<Response> {
    let png = state.gateway.session.current_challenge_image()?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (header::CACHE_CONTROL, "no-store"),
        ],
        png,
    )
        .into_response())
}

/// `POST /upload`: every `file` part is stored; other parts are ignored.
/// A failing part discards the parts already stored by the same request.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<Value>> {
    let store = &state.gateway.attachments;
    let mut ids = Vec::new();
    if let Err(e) = store_file_parts(store, &mut multipart, &mut ids).await {
        discard_uploads(store, &ids).await;
        return Err(e);
    }

    if ids.is_empty() {
        return Err(ApiError::bad_request("No file provided"));
    }
    Ok(Json(json!({
        "ok": true,
        "message": format!("Successfully uploaded {} file(s)", ids.len()),
        "uploadedFiles": ids,
    })))
}

async fn store_file_parts(
    store: &AttachmentStore,
    multipart: &mut Multipart,
    ids: &mut Vec<String>,
) -> ApiResult<()> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or_default().to_string();
        let mime_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        let attachment = store
            .put(bytes.to_vec(), &name, mime_type.as_deref())
            .await?;
        ids.push(attachment.id);
    }
    Ok(())
}

async fn discard_uploads(store: &AttachmentStore, ids: &[String]) {
    for id in ids {
        if let Err(e) = store.delete(id).await {
            warn!(id = %id, error = %e, "failed to discard partially uploaded file");
        }
    }
}

/// `GET /files`
pub async fn list_files(State(state): State<AppState>) -> Json<Value> {
    let files: Vec<FileView> = state
        .gateway
        .attachments
        .list()
        .into_iter()
        .map(FileView::from)
        .collect();
    Json(json!({ "files": files }))
}

/// `DELETE /files/{id}`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    state.gateway.attachments.delete(&id).await?;
    Ok(Json(json!({ "ok": true, "message": "File deleted successfully" })))
}

/// `POST /send`
pub async fn send_text(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let request = TextSendRequest::from_json(&body)?;
    state
        .gateway
        .dispatch
        .dispatch_text(&request.to, &request.message)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

/// `POST /send-files`
pub async fn send_files(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(body) = body?;
    let request = FilesSendRequest::from_json(&body)?;
    let sent = state
        .gateway
        .dispatch
        .dispatch_attachments(&request.to, &request.file_ids, &request.caption)
        .await?;
    Ok(Json(json!({
        "ok": true,
        "filesSent": sent.len(),
        "sentFiles": sent,
    })))
}

/// `POST /send-file`: multipart `to`, optional `caption` and one or more
/// `file` parts, sent directly without being stored.
pub async fn send_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let mut to = None;
    let mut caption = None;
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("to") => to = Some(field.text().await?),
            Some("caption") => caption = Some(field.text().await?),
            Some("file") => {
                let filename = field
                    .file_name()
                    .filter(|n| !n.is_empty())
                    .unwrap_or("document")
                    .to_string();
                let supplied = field.content_type().map(str::to_string);
                let bytes = field.bytes().await?;
                if bytes.len() > state.gateway.max_file_bytes {
                    return Err(wagate_attachments::Error::TooLarge {
                        size: bytes.len(),
                        limit: state.gateway.max_file_bytes,
                    }
                    .into());
                }
                files.push(MediaFile {
                    mime_type: wagate_attachments::mime::resolve(supplied.as_deref(), &filename),
                    filename,
                    bytes: bytes.to_vec(),
                });
            },
            _ => {},
        }
    }

    let to = to
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("to is required"))?;
    if files.is_empty() {
        return Err(ApiError::bad_request("file is required"));
    }
    let caption = caption.unwrap_or_default();

    let count = state
        .gateway
        .dispatch
        .dispatch_files(&to, files, &caption)
        .await?;
    info!(count, "direct files sent");
    Ok(Json(json!({ "ok": true, "filesSent": count })))
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": state.gateway.version,
            "state": state.gateway.session.state(),
        })),
    )
}
