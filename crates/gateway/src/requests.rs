//! Request body validation for the send endpoints.
//!
//! Bodies are taken as raw JSON so that `to` may be a string or a number and
//! every shape problem becomes a 400 with a readable message.

use serde_json::Value;

use crate::error::ApiError;

#[derive(Debug, PartialEq, Eq)]
pub struct TextSendRequest {
    pub to: String,
    pub message: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct FilesSendRequest {
    pub to: String,
    pub caption: String,
    pub file_ids: Vec<String>,
}

impl TextSendRequest {
    pub fn from_json(body: &Value) -> Result<Self, ApiError> {
        let to = destination_field(body);
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .filter(|m| !m.trim().is_empty());
        match (to, message) {
            (Some(to), Some(message)) => Ok(Self {
                to,
                message: message.to_string(),
            }),
            _ => Err(ApiError::bad_request("to and message are required")),
        }
    }
}

impl FilesSendRequest {
    pub fn from_json(body: &Value) -> Result<Self, ApiError> {
        let to = destination_field(body).ok_or_else(|| ApiError::bad_request("to is required"))?;
        let caption = caption_field(body.get("caption"))?;

        let ids = match body.get("fileIds") {
            Some(Value::Array(ids)) if !ids.is_empty() => ids,
            _ => return Err(ApiError::bad_request("fileIds array is required")),
        };
        let file_ids = ids
            .iter()
            .map(|id| match id {
                Value::String(id) if !id.is_empty() => Ok(id.clone()),
                _ => Err(ApiError::bad_request("fileIds must contain only strings")),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            to,
            caption,
            file_ids,
        })
    }
}

/// `to` as given: a non-blank string, or a number rendered as digits.
fn destination_field(body: &Value) -> Option<String> {
    match body.get("to")? {
        Value::String(to) if !to.trim().is_empty() => Some(to.clone()),
        Value::Number(to) => Some(to.to_string()),
        _ => None,
    }
}

/// Missing or `null` captions become empty.
fn caption_field(value: Option<&Value>) -> Result<String, ApiError> {
    match value {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(caption)) => Ok(caption.clone()),
        Some(_) => Err(ApiError::bad_request("caption must be a string")),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, serde_json::json};

    #[test]
    fn text_request_accepts_numeric_destination() {
        let req = TextSendRequest::from_json(&json!({"to": 15551234567u64, "message": "hi"})).unwrap();
        assert_eq!(req, TextSendRequest {
            to: "15551234567".into(),
            message: "hi".into(),
        });
    }

    #[rstest]
    #[case(json!({"message": "hi"}))]
    #[case(json!({"to": "", "message": "hi"}))]
    #[case(json!({"to": "1555", "message": ""}))]
    #[case(json!({"to": "1555", "message": 5}))]
    #[case(json!({"to": true, "message": "hi"}))]
    #[case(json!([]))]
    fn text_request_rejects_bad_shapes(#[case] body: Value) {
        let err = TextSendRequest::from_json(&body).unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "to and message are required");
    }

    #[test]
    fn files_request_defaults_caption() {
        let req =
            FilesSendRequest::from_json(&json!({"to": "+1 555", "fileIds": ["a", "b"]})).unwrap();
        assert_eq!(req.caption, "");
        assert_eq!(req.file_ids, vec!["a", "b"]);
    }

    #[rstest]
    #[case(json!({"fileIds": ["a"]}), "to is required")]
    #[case(json!({"to": "1", "fileIds": []}), "fileIds array is required")]
    #[case(json!({"to": "1", "fileIds": "a"}), "fileIds array is required")]
    #[case(json!({"to": "1", "fileIds": ["a", 2]}), "fileIds must contain only strings")]
    #[case(json!({"to": "1", "caption": 3, "fileIds": ["a"]}), "caption must be a string")]
    fn files_request_rejects_bad_shapes(#[case] body: Value, #[case] message: &str) {
        let err = FilesSendRequest::from_json(&body).unwrap_err();
        assert_eq!(err.message, message);
    }
}
