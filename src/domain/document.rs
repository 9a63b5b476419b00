use super::ids::{DealId, DocumentId, PartyId};
use crate::error::DealError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Loi,
    Nda,
    Spa,
    DueDiligence,
    Financials,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Draft,
    PendingSignature,
    Signed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentStatus::Draft => "DRAFT",
            DocumentStatus::PendingSignature => "PENDING_SIGNATURE",
            DocumentStatus::Signed => "SIGNED",
        })
    }
}

/// Signature metadata for a deal document. Document bytes live elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub deal_id: DealId,
    pub doc_type: DocumentType,
    pub title: String,
    pub status: DocumentStatus,
    pub uploaded_by: PartyId,
    pub created_at: DateTime<Utc>,
    pub signature_requested_at: Option<DateTime<Utc>>,
    pub signed_by: Option<PartyId>,
    pub signed_at: Option<DateTime<Utc>>,
}

impl DocumentRecord {
    /// DRAFT -> PENDING_SIGNATURE. Returns `false` if signature was already requested.
    pub fn request_signature(&mut self, now: DateTime<Utc>) -> Result<bool, DealError> {
        match self.status {
            DocumentStatus::Draft => {
                self.status = DocumentStatus::PendingSignature;
                self.signature_requested_at = Some(now);
                Ok(true)
            }
            DocumentStatus::PendingSignature => Ok(false),
            DocumentStatus::Signed => Err(DealError::InvalidDocumentState {
                document: self.id.clone(),
                actual: self.status,
                expected: DocumentStatus::Draft,
            }),
        }
    }

    /// PENDING_SIGNATURE -> SIGNED. A DRAFT cannot be signed directly.
    pub fn mark_signed(&mut self, signed_by: PartyId, signed_at: DateTime<Utc>) -> Result<bool, DealError> {
        match self.status {
            DocumentStatus::PendingSignature => {
                self.status = DocumentStatus::Signed;
                self.signed_by = Some(signed_by);
                self.signed_at = Some(signed_at);
                Ok(true)
            }
            DocumentStatus::Signed => Ok(false),
            DocumentStatus::Draft => Err(DealError::InvalidDocumentState {
                document: self.id.clone(),
                actual: self.status,
                expected: DocumentStatus::PendingSignature,
            }),
        }
    }
}
