//! JSON error responses for the HTTP surface.

use axum::{
    Json,
    extract::{multipart::MultipartError, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};

/// An error rendered as `{ "ok": false, "error": "..." }`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::warn!(status = %self.status, error = %self.message, "request failed");
        }
        (
            self.status,
            Json(serde_json::json!({ "ok": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<wagate_whatsapp::Error> for ApiError {
    fn from(err: wagate_whatsapp::Error) -> Self {
        use wagate_whatsapp::Error as E;

        let status = match &err {
            E::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
            E::DestinationInvalid { .. } | E::EmptyAttachmentList => StatusCode::BAD_REQUEST,
            E::AttachmentNotFound { .. } | E::NotAvailable => StatusCode::NOT_FOUND,
            E::Delivery { .. } => StatusCode::BAD_GATEWAY,
            E::Storage(inner) => return Self::from_storage(inner),
            E::Render { .. } | E::Driver { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<wagate_attachments::Error> for ApiError {
    fn from(err: wagate_attachments::Error) -> Self {
        Self::from_storage(&err)
    }
}

impl ApiError {
    fn from_storage(err: &wagate_attachments::Error) -> Self {
        use wagate_attachments::Error as E;

        match err {
            E::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, "File not found"),
            E::TooLarge { .. } => Self::new(StatusCode::PAYLOAD_TOO_LARGE, err.to_string()),
            E::InvalidInput { .. } => Self::bad_request(err.to_string()),
            E::StorageWrite { .. } | E::Io(_) | E::Json(_) | E::Join(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("storage error: {err}"),
            ),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::new(err.status(), err.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.status(), rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, wagate_whatsapp::ConnectionState};

    #[rstest]
    #[case(wagate_whatsapp::Error::not_ready(ConnectionState::Initializing), StatusCode::SERVICE_UNAVAILABLE)]
    #[case(wagate_whatsapp::Error::destination_invalid("abc"), StatusCode::BAD_REQUEST)]
    #[case(wagate_whatsapp::Error::EmptyAttachmentList, StatusCode::BAD_REQUEST)]
    #[case(wagate_whatsapp::Error::attachment_not_found("x"), StatusCode::NOT_FOUND)]
    #[case(wagate_whatsapp::Error::NotAvailable, StatusCode::NOT_FOUND)]
    #[case(wagate_whatsapp::Error::delivery("boom"), StatusCode::BAD_GATEWAY)]
    #[case(wagate_whatsapp::Error::render("bad"), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(
        wagate_whatsapp::Error::Storage(wagate_attachments::Error::TooLarge { size: 2, limit: 1 }),
        StatusCode::PAYLOAD_TOO_LARGE
    )]
    fn maps_session_errors_to_status(
        #[case] err: wagate_whatsapp::Error,
        #[case] expected: StatusCode,
    ) {
        assert_eq!(ApiError::from(err).status, expected);
    }

    #[test]
    fn attachment_not_found_uses_legacy_message() {
        let err = ApiError::from(wagate_attachments::Error::not_found("abc"));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "File not found");
    }
}
