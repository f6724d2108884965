use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookkeepingError {
    /// The store could not be reached or rejected the operation. Retryable.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(anyhow::Error),

    #[error("Insufficient quantity on lot {lot_id}: requested {requested}, remaining {remaining}")]
    InsufficientQuantity {
        lot_id: String,
        requested: i64,
        remaining: i64,
    },

    #[error("Return exceeds original on {reference}: requested {requested}, returnable {headroom}")]
    ReturnExceedsOriginal {
        reference: String,
        requested: i64,
        headroom: i64,
    },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Return has no product quantity and no reasoned service")]
    EmptyReturn,

    #[error("Original not found: {0}")]
    OriginalNotFound(String),

    /// A multi-step write stopped after earlier steps were applied.
    #[error("Partial write in {operation}: step '{step}' failed: {cause}")]
    PartialWrite {
        operation: &'static str,
        step: &'static str,
        cause: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Lot not found: {0}")]
    LotNotFound(String),

    #[error("Lot {0} is inactive")]
    LotInactive(String),

    #[error("Lot {lot_id} is still referenced by {references} record(s)")]
    LotReferenced { lot_id: String, references: u64 },

    #[error("Lot {lot_id} does not appear on document {original}")]
    LotNotOnOriginal { lot_id: String, original: String },

    #[error("Document {document_id} has {returns} return(s) against it")]
    DocumentReferenced { document_id: String, returns: u64 },

    #[error("Cannot {action} a return in state {from}")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl BookkeepingError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            BookkeepingError::StorageUnavailable(_) => "storage_unavailable",
            BookkeepingError::InsufficientQuantity { .. } => "insufficient_quantity",
            BookkeepingError::ReturnExceedsOriginal { .. } => "return_exceeds_original",
            BookkeepingError::InvalidQuantity(_) => "invalid_quantity",
            BookkeepingError::EmptyReturn => "empty_return",
            BookkeepingError::OriginalNotFound(_) => "original_not_found",
            BookkeepingError::PartialWrite { .. } => "partial_write",
            BookkeepingError::NotFound(_) => "not_found",
            BookkeepingError::LotNotFound(_) => "lot_not_found",
            BookkeepingError::LotInactive(_) => "lot_inactive",
            BookkeepingError::LotReferenced { .. } => "lot_referenced",
            BookkeepingError::LotNotOnOriginal { .. } => "lot_not_on_original",
            BookkeepingError::DocumentReferenced { .. } => "document_referenced",
            BookkeepingError::InvalidTransition { .. } => "invalid_transition",
            BookkeepingError::Conflict(_) => "conflict",
            BookkeepingError::BadRequest(_) => "bad_request",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, BookkeepingError::StorageUnavailable(_))
    }

    /// Report that `step` of `operation` failed after earlier writes landed.
    pub fn partial_write(
        operation: &'static str,
        step: &'static str,
        cause: impl std::fmt::Display,
    ) -> Self {
        let cause = cause.to_string();
        tracing::error!(operation, step, cause = %cause, "Multi-step write left incomplete");
        metrics::counter!("partial_writes_total", "operation" => operation).increment(1);
        BookkeepingError::PartialWrite {
            operation,
            step,
            cause,
        }
    }

    /// Escalate to `PartialWrite` when earlier steps already wrote.
    pub fn after_progress(
        self,
        progressed: bool,
        operation: &'static str,
        step: &'static str,
    ) -> Self {
        if progressed {
            Self::partial_write(operation, step, self)
        } else {
            self
        }
    }
}

const DUPLICATE_KEY: i32 = 11000;

/// Message of the first duplicate key error carried by `kind`. Batch
/// inserts report theirs as `BulkWrite`, single inserts as `Write`.
fn duplicate_key_message(kind: &mongodb::error::ErrorKind) -> Option<String> {
    use mongodb::error::{ErrorKind, WriteFailure};

    match kind {
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY =>
        {
            Some(write_error.message.clone())
        }
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()?
            .iter()
            .find(|write_error| write_error.code == DUPLICATE_KEY)
            .map(|write_error| write_error.message.clone()),
        _ => None,
    }
}

impl From<mongodb::error::Error> for BookkeepingError {
    fn from(err: mongodb::error::Error) -> Self {
        match duplicate_key_message(&err.kind) {
            Some(message) => BookkeepingError::Conflict(message),
            None => BookkeepingError::StorageUnavailable(anyhow::Error::new(err)),
        }
    }
}

impl From<BookkeepingError> for AppError {
    fn from(err: BookkeepingError) -> Self {
        let message = err.to_string();
        match err {
            BookkeepingError::StorageUnavailable(e) => AppError::ServiceUnavailable(e),
            BookkeepingError::InsufficientQuantity { .. }
            | BookkeepingError::ReturnExceedsOriginal { .. }
            | BookkeepingError::LotInactive(_)
            | BookkeepingError::LotReferenced { .. }
            | BookkeepingError::DocumentReferenced { .. }
            | BookkeepingError::InvalidTransition { .. }
            | BookkeepingError::Conflict(_) => AppError::Conflict(anyhow::anyhow!(message)),
            BookkeepingError::InvalidQuantity(_)
            | BookkeepingError::EmptyReturn
            | BookkeepingError::LotNotOnOriginal { .. }
            | BookkeepingError::BadRequest(_) => AppError::BadRequest(anyhow::anyhow!(message)),
            BookkeepingError::OriginalNotFound(_)
            | BookkeepingError::NotFound(_)
            | BookkeepingError::LotNotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            BookkeepingError::PartialWrite { .. } => {
                AppError::InternalError(anyhow::anyhow!(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_domain_errors_map_to_http_status() {
        let cases = vec![
            (
                BookkeepingError::StorageUnavailable(anyhow::anyhow!("down")),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                BookkeepingError::InsufficientQuantity {
                    lot_id: "l".into(),
                    requested: 5,
                    remaining: 1,
                },
                StatusCode::CONFLICT,
            ),
            (BookkeepingError::EmptyReturn, StatusCode::BAD_REQUEST),
            (
                BookkeepingError::OriginalNotFound("SELL250101".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                BookkeepingError::PartialWrite {
                    operation: "create_child",
                    step: "link_parent",
                    cause: "timeout".into(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).status(), status);
        }
    }

    fn bulk_failure(codes: &[i32]) -> mongodb::error::ErrorKind {
        use mongodb::bson::{doc, from_document, Bson};

        let write_errors: Vec<Bson> = codes
            .iter()
            .enumerate()
            .map(|(index, code)| {
                Bson::Document(doc! {
                    "index": index as i32,
                    "code": *code,
                    "errmsg": format!("E{} on line {}", code, index),
                })
            })
            .collect();
        let failure = from_document(doc! { "writeErrors": write_errors })
            .expect("bulk write failure should deserialize");
        mongodb::error::ErrorKind::BulkWrite(failure)
    }

    #[test]
    fn test_duplicate_key_in_batch_insert_is_conflict() {
        let kind = bulk_failure(&[11000]);
        assert_eq!(duplicate_key_message(&kind).as_deref(), Some("E11000 on line 0"));

        let err = BookkeepingError::from(mongodb::error::Error::from(kind));
        assert!(matches!(err, BookkeepingError::Conflict(_)));
        assert_eq!(AppError::from(err).status(), StatusCode::CONFLICT);

        // The duplicate need not be the first failed row.
        let kind = bulk_failure(&[121, 11000]);
        assert_eq!(duplicate_key_message(&kind).as_deref(), Some("E11000 on line 1"));
    }

    #[test]
    fn test_other_batch_failures_stay_unavailable() {
        let err = BookkeepingError::from(mongodb::error::Error::from(bulk_failure(&[121])));
        assert!(matches!(err, BookkeepingError::StorageUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_partial_write_names_step() {
        let err = BookkeepingError::PartialWrite {
            operation: "delete_project_cascade",
            step: "delete_task",
            cause: "timeout".into(),
        };
        assert!(err.to_string().contains("delete_task"));
        assert!(!err.is_retryable());
    }
}
