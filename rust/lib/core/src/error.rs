use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

// ── Error codes ─────────────────────────────────────────────────────
//
// Stable, machine-readable identifiers. Callers match on these, never on
// the human-readable message string.

pub mod error_code {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const FORBIDDEN: &str = "FORBIDDEN";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const SERVER_ERROR: &str = "SERVER_ERROR";
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const TOKEN_EXPIRED: &str = "TOKEN_EXPIRED";
}

/// The normalized error categories every failure is folded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    ValidationError,
    ServerError,
    NetworkError,
    TokenExpired,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => error_code::UNAUTHORIZED,
            ErrorCode::Forbidden => error_code::FORBIDDEN,
            ErrorCode::NotFound => error_code::NOT_FOUND,
            ErrorCode::ValidationError => error_code::VALIDATION_ERROR,
            ErrorCode::ServerError => error_code::SERVER_ERROR,
            ErrorCode::NetworkError => error_code::NETWORK_ERROR,
            ErrorCode::TokenExpired => error_code::TOKEN_EXPIRED,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field name → messages, as reported by the backend for rejected input.
pub type FieldErrors = BTreeMap<String, Vec<String>>;

// ── ApiError ────────────────────────────────────────────────────────

/// Client-side API error, normalized regardless of origin.
///
/// HTTP statuses, transport failures and client-side faults (storage,
/// undecodable bodies) all end up as one of these variants. Display is the
/// bare message; use [`ApiError::code`] for matching.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    /// Credentials are missing or invalid and could not be refreshed.
    #[error("{0}")]
    Unauthorized(String),

    /// Authenticated but not permitted.
    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    /// Request rejected, optionally with per-field detail.
    #[error("{message}")]
    Validation { message: String, fields: FieldErrors },

    /// 5xx, an unexpected response, or a client-side fault (`status: None`).
    #[error("{message}")]
    Server { status: Option<u16>, message: String },

    /// No response was received (connectivity, timeout).
    #[error("{0}")]
    Network(String),

    /// The refresh token itself was rejected; the session is gone.
    #[error("{0}")]
    TokenExpired(String),
}

const MESSAGE_KEYS: [&str; 4] = ["detail", "message", "error", "non_field_errors"];

impl ApiError {
    /// Stable error category.
    pub fn code(&self) -> ErrorCode {
        match self {
            ApiError::Unauthorized(_) => ErrorCode::Unauthorized,
            ApiError::Forbidden(_) => ErrorCode::Forbidden,
            ApiError::NotFound(_) => ErrorCode::NotFound,
            ApiError::Validation { .. } => ErrorCode::ValidationError,
            ApiError::Server { .. } => ErrorCode::ServerError,
            ApiError::Network(_) => ErrorCode::NetworkError,
            ApiError::TokenExpired(_) => ErrorCode::TokenExpired,
        }
    }

    /// HTTP status this error was built from, when there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized(_) => Some(401),
            ApiError::Forbidden(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::Server { status, .. } => *status,
            _ => None,
        }
    }

    /// Client-side fault with no HTTP status (storage, decode).
    pub fn internal(message: impl Into<String>) -> Self {
        ApiError::Server {
            status: None,
            message: message.into(),
        }
    }

    /// The session can no longer be used; the caller should sign in again.
    pub fn is_session_error(&self) -> bool {
        matches!(self, ApiError::Unauthorized(_) | ApiError::TokenExpired(_))
    }

    /// Worth offering a "try again" action.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Server { .. })
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::Validation { fields, .. } if !fields.is_empty() => Some(fields),
            _ => None,
        }
    }

    /// Build an error from a non-success HTTP status and its response body.
    ///
    /// Understands `{"detail": ...}`, `{"message": ...}`, `{"error": ...}`
    /// and DRF-style `{"field": ["msg", ...]}` bodies. Anything else falls
    /// back to a generic message for the status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let (message, fields) = parse_body(body);
        let or_default = |default: &str| message.clone().unwrap_or_else(|| default.to_string());

        match status {
            401 => ApiError::Unauthorized(or_default("authentication required")),
            403 => ApiError::Forbidden(or_default("permission denied")),
            404 => ApiError::NotFound(or_default("resource not found")),
            408 => ApiError::Network(or_default("request timed out")),
            400..=499 => {
                let message = message.clone().unwrap_or_else(|| summarize_fields(&fields, status));
                ApiError::Validation { message, fields }
            }
            _ => ApiError::Server {
                status: Some(status),
                message: or_default(&format!("server error ({status})")),
            },
        }
    }

    /// Human-readable text for a user-facing notification.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Unauthorized(_) => {
                "Your session is no longer valid. Please sign in again.".into()
            }
            ApiError::TokenExpired(_) => "Your session has expired. Please sign in again.".into(),
            ApiError::Forbidden(_) => "You do not have permission to perform this action.".into(),
            ApiError::NotFound(msg) => format!("Not found: {msg}"),
            ApiError::Validation { message, .. } => format!("Please review the form: {message}"),
            ApiError::Server { .. } => {
                "The server could not complete the request. Try again later.".into()
            }
            ApiError::Network(_) => {
                "Could not reach the server. Check your connection and try again.".into()
            }
        }
    }
}

fn parse_body(body: &str) -> (Option<String>, FieldErrors) {
    let mut fields = FieldErrors::new();
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(v) => v,
        Err(_) => {
            let text = body.trim();
            let message = (!text.is_empty() && text.len() <= 200 && !text.starts_with('<'))
                .then(|| text.to_string());
            return (message, fields);
        }
    };

    let obj = match value {
        serde_json::Value::Object(obj) => obj,
        serde_json::Value::String(s) => return (Some(s), fields),
        serde_json::Value::Array(items) => return (join_messages(&items), fields),
        _ => return (None, fields),
    };

    let mut message = None;
    for key in MESSAGE_KEYS {
        if message.is_none() {
            message = obj.get(key).and_then(message_of);
        }
    }

    // `{"errors": {...}}` wraps field errors in some endpoints.
    let field_source = match obj.get("errors") {
        Some(serde_json::Value::Object(inner)) => inner.clone(),
        _ => obj,
    };
    for (key, value) in field_source {
        if MESSAGE_KEYS.contains(&key.as_str()) || key == "code" || key == "status" {
            continue;
        }
        let messages = match &value {
            serde_json::Value::String(s) => vec![s.clone()],
            serde_json::Value::Array(items) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };
        if !messages.is_empty() {
            fields.insert(key, messages);
        }
    }

    (message, fields)
}

fn message_of(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Array(items) => join_messages(items),
        _ => None,
    }
}

fn join_messages(items: &[serde_json::Value]) -> Option<String> {
    let parts: Vec<&str> = items.iter().filter_map(|v| v.as_str()).collect();
    (!parts.is_empty()).then(|| parts.join(" "))
}

fn summarize_fields(fields: &FieldErrors, status: u16) -> String {
    if fields.is_empty() {
        return format!("request rejected ({status})");
    }
    fields
        .iter()
        .map(|(field, msgs)| format!("{field}: {}", msgs.join(" ")))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::from_status(401, "").code(), ErrorCode::Unauthorized);
        assert_eq!(ApiError::from_status(403, "").code(), ErrorCode::Forbidden);
        assert_eq!(ApiError::from_status(404, "").code(), ErrorCode::NotFound);
        assert_eq!(ApiError::from_status(400, "").code(), ErrorCode::ValidationError);
        assert_eq!(ApiError::from_status(422, "").code(), ErrorCode::ValidationError);
        assert_eq!(ApiError::from_status(408, "").code(), ErrorCode::NetworkError);
        assert_eq!(ApiError::from_status(500, "").code(), ErrorCode::ServerError);
        assert_eq!(ApiError::from_status(503, "").status(), Some(503));
    }

    #[test]
    fn error_codes_are_stable_strings() {
        assert_eq!(ErrorCode::Unauthorized.as_str(), "UNAUTHORIZED");
        assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
        assert_eq!(ErrorCode::TokenExpired.to_string(), "TOKEN_EXPIRED");
        assert_eq!(
            serde_json::to_string(&ErrorCode::NetworkError).unwrap(),
            "\"NETWORK_ERROR\""
        );
    }

    #[test]
    fn detail_message_is_extracted() {
        let err = ApiError::from_status(404, r#"{"detail": "Customer 7 not found."}"#);
        assert_eq!(err.to_string(), "Customer 7 not found.");

        let err = ApiError::from_status(500, r#"{"message": "db down"}"#);
        assert_eq!(err.to_string(), "db down");
    }

    #[test]
    fn drf_field_errors_become_validation_fields() {
        let body = r#"{"name": ["This field is required."], "email": "Enter a valid email."}"#;
        let err = ApiError::from_status(400, body);
        let fields = err.field_errors().unwrap();
        assert_eq!(fields["name"], vec!["This field is required.".to_string()]);
        assert_eq!(fields["email"], vec!["Enter a valid email.".to_string()]);
        assert_eq!(
            err.to_string(),
            "email: Enter a valid email.; name: This field is required."
        );
    }

    #[test]
    fn wrapped_errors_object_and_non_field_errors() {
        let body = r#"{
            "non_field_errors": ["Duplicate code."],
            "errors": {"code": ["taken"], "tax_id": ["bad"]}
        }"#;
        let err = ApiError::from_status(400, body);
        assert_eq!(err.to_string(), "Duplicate code.");
        // "code" is reserved for machine codes, so only tax_id survives.
        let fields = err.field_errors().unwrap();
        assert_eq!(fields.len(), 1);
        assert!(fields.contains_key("tax_id"));
    }

    #[test]
    fn html_bodies_are_not_used_as_messages() {
        let err = ApiError::from_status(502, "<html><body>Bad Gateway</body></html>");
        assert_eq!(err.to_string(), "server error (502)");
        let err = ApiError::from_status(503, "upstream unavailable");
        assert_eq!(err.to_string(), "upstream unavailable");
    }

    #[test]
    fn classification_helpers() {
        assert!(ApiError::TokenExpired("x".into()).is_session_error());
        assert!(ApiError::Unauthorized("x".into()).is_session_error());
        assert!(!ApiError::Forbidden("x".into()).is_session_error());
        assert!(ApiError::Network("x".into()).is_transient());
        assert!(ApiError::internal("disk").is_transient());
        assert_eq!(ApiError::internal("disk").status(), None);
        assert!(ApiError::Network("offline".into()).user_message().contains("try again"));
    }
}
