use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the external completion service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("completion quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("invalid completion credentials: {0}")]
    InvalidCredentials(String),
    #[error("completion timed out after {0}s")]
    Timeout(u64),
    #[error("completion failed: {0}")]
    Other(String),
}

/// Failures of the message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing table predates the lead-record columns.
    #[error("lead columns are missing from the conversations table")]
    MissingLeadColumns,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("conversation {0} not found")]
    NotFound(String),
    #[error("conversation {0} has no messages")]
    EmptyHistory(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("could not parse analysis response")]
    AnalysisParse { raw: String },
    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ChatError>;

/// Failures while bringing the server up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Human-readable; the widget shows it as is.
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::Validation(_) | ChatError::NotFound(_) | ChatError::EmptyHistory(_) => {
                StatusCode::BAD_REQUEST
            }
            ChatError::Upstream(UpstreamError::QuotaExceeded(_)) => StatusCode::TOO_MANY_REQUESTS,
            ChatError::Upstream(UpstreamError::InvalidCredentials(_)) => StatusCode::UNAUTHORIZED,
            ChatError::Upstream(_)
            | ChatError::AnalysisParse { .. }
            | ChatError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ChatError::Validation(_) => "validation_error",
            ChatError::NotFound(_) => "not_found",
            ChatError::EmptyHistory(_) => "empty_history",
            ChatError::Upstream(UpstreamError::QuotaExceeded(_)) => "quota_exceeded",
            ChatError::Upstream(UpstreamError::InvalidCredentials(_)) => "invalid_credentials",
            ChatError::Upstream(UpstreamError::Timeout(_)) => "upstream_timeout",
            ChatError::Upstream(UpstreamError::Other(_)) => "upstream_error",
            ChatError::AnalysisParse { .. } => "analysis_parse_error",
            ChatError::Persistence(_) => "persistence_error",
        }
    }

    /// Short text shown to the widget user.
    pub fn public_message(&self) -> String {
        match self {
            ChatError::Validation(msg) => msg.clone(),
            ChatError::NotFound(_) | ChatError::EmptyHistory(_) => {
                "No messages found in conversation.".to_string()
            }
            ChatError::Upstream(UpstreamError::QuotaExceeded(_)) => {
                "OpenAI API quota exceeded. Please check your API key and billing.".to_string()
            }
            ChatError::Upstream(UpstreamError::InvalidCredentials(_)) => {
                "Invalid OpenAI API key. Please check your environment variables.".to_string()
            }
            ChatError::Upstream(UpstreamError::Timeout(_)) => {
                "The AI service took too long to respond. Please try again.".to_string()
            }
            ChatError::Upstream(UpstreamError::Other(_)) => {
                "An error occurred while processing your request.".to_string()
            }
            ChatError::AnalysisParse { .. } => "Failed to parse analysis response".to_string(),
            ChatError::Persistence(_) => "A database error occurred.".to_string(),
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            ChatError::AnalysisParse { raw } => Some(raw.clone()),
            ChatError::Upstream(err) => Some(err.to_string()),
            ChatError::Persistence(err) => Some(err.to_string()),
            _ => None,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.code(), "request rejected");
        }
        let body = ErrorBody {
            error: self.public_message(),
            code: self.code(),
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}
