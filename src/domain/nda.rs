use super::ids::{ListingId, NdaRequestId, PartyId};
use crate::error::DealError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NdaStatus {
    Pending,
    Approved,
    Rejected,
}

impl fmt::Display for NdaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NdaStatus::Pending => "pending",
            NdaStatus::Approved => "approved",
            NdaStatus::Rejected => "rejected",
        })
    }
}

/// A buyer's request to sign the seller's NDA for a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NdaRequest {
    pub id: NdaRequestId,
    pub listing_id: ListingId,
    pub buyer_id: PartyId,
    pub seller_id: PartyId,
    pub status: NdaStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<PartyId>,
    pub version: u64,
}

impl NdaRequest {
    pub fn is_approved(&self) -> bool {
        self.status == NdaStatus::Approved
    }

    pub fn covers(&self, listing: &ListingId, buyer: &PartyId) -> bool {
        &self.listing_id == listing && &self.buyer_id == buyer
    }

    /// Moves a pending request to `outcome`. A request resolves exactly once.
    pub fn resolve(&mut self, outcome: NdaStatus, actor: PartyId, now: DateTime<Utc>) -> Result<(), DealError> {
        if outcome == NdaStatus::Pending {
            return Err(DealError::invalid_transition("nda", self.status, outcome));
        }
        if self.status != NdaStatus::Pending {
            return Err(DealError::AlreadyResolved {
                entity: "nda request",
                id: self.id.to_string(),
            });
        }
        self.status = outcome;
        self.resolved_at = Some(now);
        self.resolved_by = Some(actor);
        Ok(())
    }
}
