use super::ids::{DealId, DisputeId, DocumentId, ListingId, PartyId};
use super::money::Amount;
use crate::error::DealError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle stage of a deal.
///
/// Forward path: `LoiSigned -> DdInProgress -> SpaNegotiation -> Closing -> Completed`.
/// `Closing -> SpaNegotiation` is the only back-edge. `Cancelled` is reachable
/// from every non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    LoiSigned,
    DdInProgress,
    SpaNegotiation,
    Closing,
    Completed,
    Cancelled,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::LoiSigned,
        Stage::DdInProgress,
        Stage::SpaNegotiation,
        Stage::Closing,
        Stage::Completed,
        Stage::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Cancelled)
    }

    /// Stages directly reachable from `self`.
    pub fn successors(self) -> &'static [Stage] {
        match self {
            Stage::LoiSigned => &[Stage::DdInProgress, Stage::Cancelled],
            Stage::DdInProgress => &[Stage::SpaNegotiation, Stage::Cancelled],
            Stage::SpaNegotiation => &[Stage::Closing, Stage::Cancelled],
            Stage::Closing => &[Stage::Completed, Stage::SpaNegotiation, Stage::Cancelled],
            Stage::Completed | Stage::Cancelled => &[],
        }
    }

    pub fn can_transition_to(self, target: Stage) -> bool {
        self.successors().contains(&target)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::LoiSigned => "LOI_SIGNED",
            Stage::DdInProgress => "DD_IN_PROGRESS",
            Stage::SpaNegotiation => "SPA_NEGOTIATION",
            Stage::Closing => "CLOSING",
            Stage::Completed => "COMPLETED",
            Stage::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = DealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DealError::invalid_transition("deal", "?", s))
    }
}

/// How an earnout period converts a KPI figure into a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarnoutPolicy {
    /// `max * clamp(actual / target, 0, 1)`
    #[default]
    Proportional,
    /// Full cap when the target is met, nothing otherwise.
    AllOrNothing,
}

fn default_escrow_period_months() -> u32 {
    12
}

/// Contractual terms configured per deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealTerms {
    /// Holding period applied to ESCROW holdbacks, counted from their due date.
    #[serde(default = "default_escrow_period_months")]
    pub escrow_period_months: u32,
    #[serde(default)]
    pub earnout_policy: EarnoutPolicy,
    /// When set, DEPOSIT and MAIN_PAYMENT releases wait for a completed
    /// closing-confirmation milestone.
    #[serde(default)]
    pub require_closing_confirmation: bool,
}

impl Default for DealTerms {
    fn default() -> Self {
        Self {
            escrow_period_months: default_escrow_period_months(),
            earnout_policy: EarnoutPolicy::default(),
            require_closing_confirmation: false,
        }
    }
}

/// A claim raised by either party; an open dispute freezes escrow releases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub id: DisputeId,
    pub reason: String,
    pub raised_by: PartyId,
    pub raised_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Dispute {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// An M&A transaction between a buyer and a seller for one listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub id: DealId,
    pub listing_id: ListingId,
    pub buyer_id: PartyId,
    pub seller_id: PartyId,
    pub stage: Stage,
    /// Stage left by the most recent transition.
    #[serde(default)]
    pub previous_stage: Option<Stage>,
    pub agreed_price: Amount,
    pub closing_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub notes: String,
    pub terms: DealTerms,
    /// Explicitly designated SPA; when unset the latest SPA-typed document is used.
    pub spa_document: Option<DocumentId>,
    pub disputes: Vec<Dispute>,
    /// Optimistic concurrency token, bumped by the store on every write.
    pub version: u64,
}

impl Deal {
    pub fn has_open_dispute(&self) -> bool {
        self.disputes.iter().any(Dispute::is_open)
    }

    /// Records a new dispute. Raising an id that already exists is a no-op.
    pub fn raise_dispute(
        &mut self,
        id: DisputeId,
        reason: String,
        raised_by: PartyId,
        now: DateTime<Utc>,
    ) -> Result<bool, DealError> {
        if self.stage.is_terminal() {
            return Err(DealError::invalid_transition(
                "deal",
                self.stage,
                "DISPUTED",
            ));
        }
        if self.disputes.iter().any(|d| d.id == id) {
            return Ok(false);
        }
        if reason.trim().is_empty() {
            return Err(DealError::ValidationError(
                "Dispute reason is required".to_string(),
            ));
        }
        self.disputes.push(Dispute {
            id,
            reason,
            raised_by,
            raised_at: now,
            resolved_at: None,
        });
        Ok(true)
    }

    /// Closes an open dispute. Returns `false` when it was already resolved.
    pub fn resolve_dispute(&mut self, id: &DisputeId, now: DateTime<Utc>) -> Result<bool, DealError> {
        let dispute = self
            .disputes
            .iter_mut()
            .find(|d| &d.id == id)
            .ok_or_else(|| DealError::not_found("dispute", id))?;
        if dispute.resolved_at.is_some() {
            return Ok(false);
        }
        dispute.resolved_at = Some(now);
        Ok(true)
    }
}
