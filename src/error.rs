use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwitchyardError>;

#[derive(Debug, Error)]
pub enum SwitchyardError {
    #[error("Unknown handler option: {name}")]
    UnknownOption { name: String },

    #[error("Invalid value for option '{name}': {message}")]
    InvalidOption { name: String, message: String },

    #[error("Invalid predicate '{expression}': {message}")]
    InvalidPredicate { expression: String, message: String },

    #[error("Invalid route path '{path}': {message}")]
    InvalidPath { path: String, message: String },

    #[error("No {what} registered, required by {required_by}")]
    MissingCollaborator { what: String, required_by: String },

    #[error("Template '{name}' could not be loaded: {message}")]
    Template { name: String, message: String },

    #[error("Malformed request entity: {0}")]
    MalformedEntity(String),

    #[error("Request entity exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("No route for {method} {path}")]
    NotFound { method: String, path: String },

    #[error("Invalid header '{name}': {message}")]
    InvalidHeader { name: String, message: String },

    #[error("More than one result returned")]
    MultipleResults,

    #[error("Transaction failed: {0}")]
    Transaction(String),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Channel outbound queue full ({capacity} frames)")]
    ChannelFull { capacity: usize },

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("Invalid setting '{name}': {message}")]
    Settings { name: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SwitchyardError {
    pub fn invalid_option(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOption {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn missing(what: impl Into<String>, required_by: impl Into<String>) -> Self {
        Self::MissingCollaborator {
            what: what.into(),
            required_by: required_by.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SwitchyardError::MalformedEntity(_) => StatusCode::BAD_REQUEST,
            SwitchyardError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SwitchyardError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for SwitchyardError {
    fn into_response(self) -> Response {
        error_body(self.status_code(), self.to_string())
    }
}

/// Maps an error escaping a composed handler to the response the client sees.
///
/// Framework errors keep their own status; anything raised by user code is a
/// 500 whose body hides the error text.
pub fn error_response(error: &anyhow::Error) -> Response {
    match error.downcast_ref::<SwitchyardError>() {
        Some(err) if err.status_code().is_client_error() => {
            error_body(err.status_code(), err.to_string())
        }
        _ => error_body(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Server Error".to_string(),
        ),
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(json!({
            "statusCode": status.as_u16(),
            "message": message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}
