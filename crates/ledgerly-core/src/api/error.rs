use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Invalid request: {}", truncate_body(.0))]
    BadRequest(String),

    #[error("Unauthorized - session may be missing or expired")]
    Unauthorized(String),

    #[error("Access denied: {}", truncate_body(.0))]
    AccessDenied(String),

    #[error("Resource not found: {}", truncate_body(.0))]
    NotFound(String),

    #[error("Session is gone - log in again")]
    Gone(String),

    #[error("Confirmation required: {}", truncate_body(.0))]
    Unprocessable(String),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Server error ({}): {}", .0, truncate_body(.1))]
    ServerError(u16, String),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request superseded by a newer request")]
    Cancelled,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Truncate a response body to avoid logging excessive data. Only the
/// `Display` text is truncated; the variants keep the full body.
fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY_LENGTH {
        body.to_string()
    } else {
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }
}

impl ApiError {
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.to_string();
        match status {
            400 => ApiError::BadRequest(body),
            401 => ApiError::Unauthorized(body),
            403 => ApiError::AccessDenied(body),
            404 => ApiError::NotFound(body),
            410 => ApiError::Gone(body),
            422 => ApiError::Unprocessable(body),
            429 => ApiError::RateLimited,
            500..=599 => ApiError::ServerError(status, body),
            _ => ApiError::InvalidResponse(format!("Status {}: {}", status, truncate_body(&body))),
        }
    }

    /// The HTTP status this error was built from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::BadRequest(_) => Some(400),
            ApiError::Unauthorized(_) => Some(401),
            ApiError::AccessDenied(_) => Some(403),
            ApiError::NotFound(_) => Some(404),
            ApiError::Gone(_) => Some(410),
            ApiError::Unprocessable(_) => Some(422),
            ApiError::RateLimited => Some(429),
            ApiError::ServerError(status, _) => Some(*status),
            ApiError::NetworkError(e) => e.status().map(|s| s.as_u16()),
            ApiError::Transport(_) | ApiError::Cancelled | ApiError::InvalidResponse(_) => None,
        }
    }

    /// The response body carried by status errors.
    pub fn body(&self) -> Option<&str> {
        match self {
            ApiError::BadRequest(b)
            | ApiError::Unauthorized(b)
            | ApiError::AccessDenied(b)
            | ApiError::NotFound(b)
            | ApiError::Gone(b)
            | ApiError::Unprocessable(b)
            | ApiError::ServerError(_, b) => Some(b),
            _ => None,
        }
    }
}

/// HTTP status of an error if it is (or wraps) an [`ApiError`].
pub fn status_of(err: &anyhow::Error) -> Option<u16> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ApiError>())
        .and_then(ApiError::status)
}
