use super::ids::{ActivityId, DealId, ListingId, PartyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Partition an activity belongs to. NDA traffic precedes any deal, so it is
/// filed under the listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum ActivityScope {
    Deal(DealId),
    Listing(ListingId),
}

impl ActivityScope {
    /// Stable key used by stores to partition entries.
    pub fn key(&self) -> String {
        match self {
            ActivityScope::Deal(id) => format!("deal:{id}"),
            ActivityScope::Listing(id) => format!("listing:{id}"),
        }
    }
}

impl fmt::Display for ActivityScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    NdaRequested,
    NdaApproved,
    NdaRejected,
    DealOpened,
    DealDeleted,
    StageChanged,
    MilestoneAdded,
    MilestoneCompleted,
    DocumentUploaded,
    SignatureRequested,
    DocumentSigned,
    SpaDesignated,
    PaymentCreated,
    PaymentEscrowed,
    PaymentReleased,
    PaymentRefunded,
    PaymentWaived,
    RefundReviewFlagged,
    EarnoutScheduled,
    EarnoutResolved,
    DisputeRaised,
    DisputeResolved,
}

/// Append-only audit entry. Only successful transitions are recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub scope: ActivityScope,
    pub activity_type: ActivityType,
    pub title: String,
    pub description: String,
    pub actor_id: PartyId,
    pub created_at: DateTime<Utc>,
}

impl Activity {
    pub fn deal_id(&self) -> Option<&DealId> {
        match &self.scope {
            ActivityScope::Deal(id) => Some(id),
            ActivityScope::Listing(_) => None,
        }
    }
}
