use crate::domain::deal::Stage;
use crate::domain::document::DocumentStatus;
use crate::domain::ids::{DealId, DocumentId, PaymentId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DealError {
    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },
    #[error("Transition to {target} blocked: {}", .unmet.join("; "))]
    StageTransitionBlocked { target: Stage, unmet: Vec<String> },
    #[error("Release of payment {payment} blocked: {condition}")]
    ReleaseConditionNotMet {
        payment: PaymentId,
        condition: String,
    },
    #[error("Earnout period {period} of deal {deal} cannot resolve before period {pending}")]
    OutOfOrderResolution {
        deal: DealId,
        period: u32,
        pending: u32,
    },
    #[error("{entity} {id} is already resolved")]
    AlreadyResolved { entity: &'static str, id: String },
    #[error("Document {document} is {actual}, expected {expected}")]
    InvalidDocumentState {
        document: DocumentId,
        actual: DocumentStatus,
        expected: DocumentStatus,
    },
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("{entity} {id} was modified concurrently")]
    ConcurrentModification { entity: &'static str, id: String },
    #[error("Deal {deal} is in stage {actual}, expected {expected}")]
    WrongStage {
        deal: DealId,
        actual: Stage,
        expected: Stage,
    },
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
    #[error("Internal error: {0}")]
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

impl DealError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn conflict(entity: &'static str, id: impl ToString) -> Self {
        Self::ConcurrentModification {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DealError>;
