use serde::Serialize;

use crate::limits::MAX_BULK_ITEMS;

use super::{EngineError, ErrorCode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BulkItemError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkItemResult {
    /// What the caller sent to address the item (quota id, or employee@date).
    pub key: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<BulkItemError>,
}

/// Outcome of a non-transactional batch. Items never roll each other back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSummary {
    pub success_count: usize,
    pub error_count: usize,
    pub results: Vec<BulkItemResult>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkStatus {
    AllSucceeded,
    Partial,
    AllFailed,
}

impl BulkStatus {
    pub fn http_status(self) -> u16 {
        match self {
            BulkStatus::AllSucceeded => 200,
            BulkStatus::Partial => 207,
            BulkStatus::AllFailed => 400,
        }
    }
}

impl BulkSummary {
    /// Reject empty or oversized batches before any item is attempted.
    pub(super) fn check_batch(len: usize) -> Result<(), EngineError> {
        if len == 0 {
            return Err(EngineError::Validation("batch is empty".into()));
        }
        if len > MAX_BULK_ITEMS {
            return Err(EngineError::LimitExceeded("too many items in batch"));
        }
        Ok(())
    }

    pub(super) fn record<T>(&mut self, key: String, outcome: Result<T, EngineError>) {
        let error = match outcome {
            Ok(_) => {
                self.success_count += 1;
                None
            }
            Err(e) => {
                self.error_count += 1;
                Some(BulkItemError {
                    code: e.code(),
                    message: e.to_string(),
                })
            }
        };
        self.results.push(BulkItemResult {
            key,
            success: error.is_none(),
            error,
        });
    }

    pub fn status(&self) -> BulkStatus {
        match (self.success_count, self.error_count) {
            (_, 0) => BulkStatus::AllSucceeded,
            (0, _) => BulkStatus::AllFailed,
            _ => BulkStatus::Partial,
        }
    }
}
