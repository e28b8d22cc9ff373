use chrono::NaiveDate;
use serde::Serialize;

use crate::model::Timestamp;
use crate::resolver::ResolveError;

/// Machine-readable error class returned alongside every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    Conflict,
    NotFound,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::Conflict => "CONFLICT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    pub fn http_status(self) -> u16 {
        match self {
            ErrorCode::ValidationError => 400,
            ErrorCode::Conflict => 409,
            ErrorCode::NotFound => 404,
            ErrorCode::InternalError => 500,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("quota already exists for {0}")]
    QuotaExists(NaiveDate),
    #[error("manager report for {date} was already submitted")]
    AlreadyReported {
        date: NaiveDate,
        reported_by: Option<String>,
        reported_at: Option<Timestamp>,
    },
    #[error("{what} not found: {key}")]
    NotFound { what: &'static str, key: String },
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
    #[error("document store error: {0}")]
    Store(String),
}

impl EngineError {
    pub(crate) fn not_found(what: &'static str, key: impl std::fmt::Display) -> Self {
        EngineError::NotFound {
            what,
            key: key.to_string(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::Validation(_) | EngineError::LimitExceeded(_) => ErrorCode::ValidationError,
            EngineError::QuotaExists(_) | EngineError::AlreadyReported { .. } => ErrorCode::Conflict,
            EngineError::NotFound { .. } => ErrorCode::NotFound,
            EngineError::Timeout(_) | EngineError::WalError(_) | EngineError::Store(_) => {
                ErrorCode::InternalError
            }
        }
    }
}

impl From<ResolveError> for EngineError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::TooManyIds(_) => EngineError::LimitExceeded("too many ids in one lookup"),
            ResolveError::Store(msg) => EngineError::Store(msg),
        }
    }
}
