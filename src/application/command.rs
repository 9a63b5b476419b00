use crate::domain::deal::{DealTerms, Stage};
use crate::domain::document::DocumentType;
use crate::domain::earnout::PeriodTarget;
use crate::domain::ids::{
    DealId, DisputeId, DocumentId, ListingId, MilestoneId, NdaRequestId, PartyId, PaymentId,
};
use crate::domain::milestone::MilestoneKind;
use crate::domain::money::Amount;
use crate::domain::payment::PaymentType;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One mutation request, as replayed from a command script.
///
/// Every command carries its own timestamp; the engine never reads the clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    RequestNda {
        id: NdaRequestId,
        listing: ListingId,
        buyer: PartyId,
        seller: PartyId,
        at: DateTime<Utc>,
    },
    ApproveNda {
        id: NdaRequestId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    RejectNda {
        id: NdaRequestId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    OpenDeal {
        id: DealId,
        listing: ListingId,
        buyer: PartyId,
        seller: PartyId,
        agreed_price: Amount,
        #[serde(default)]
        notes: String,
        #[serde(default)]
        terms: DealTerms,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    AddMilestone {
        id: MilestoneId,
        deal: DealId,
        title: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        due_date: Option<DateTime<Utc>>,
        assigned_to: PartyId,
        #[serde(default)]
        required_for: Option<Stage>,
        #[serde(default)]
        kind: MilestoneKind,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    CompleteMilestone {
        id: MilestoneId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    UploadDocument {
        id: DocumentId,
        deal: DealId,
        doc_type: DocumentType,
        title: String,
        uploaded_by: PartyId,
        at: DateTime<Utc>,
    },
    RequestSignature {
        id: DocumentId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    MarkSigned {
        id: DocumentId,
        signed_by: PartyId,
        at: DateTime<Utc>,
    },
    DesignateSpa {
        deal: DealId,
        document: DocumentId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    Transition {
        deal: DealId,
        to: Stage,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    CreatePayment {
        id: PaymentId,
        deal: DealId,
        payment_type: PaymentType,
        amount: Amount,
        #[serde(default)]
        due_date: Option<DateTime<Utc>>,
        #[serde(default)]
        earnout_period: Option<u32>,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    MarkEscrowed {
        id: PaymentId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    Release {
        id: PaymentId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    Refund {
        id: PaymentId,
        reason: String,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    Waive {
        id: PaymentId,
        reason: String,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    ScheduleEarnout {
        deal: DealId,
        periods: Vec<PeriodTarget>,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    ResolvePeriod {
        deal: DealId,
        period: u32,
        kpi_actual: Decimal,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    RaiseDispute {
        deal: DealId,
        id: DisputeId,
        reason: String,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    ResolveDispute {
        deal: DealId,
        id: DisputeId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
    DeleteDeal {
        deal: DealId,
        actor: PartyId,
        at: DateTime<Utc>,
    },
}

impl Command {
    /// The `op` tag, for log lines.
    pub fn op(&self) -> &'static str {
        match self {
            Command::RequestNda { .. } => "request_nda",
            Command::ApproveNda { .. } => "approve_nda",
            Command::RejectNda { .. } => "reject_nda",
            Command::OpenDeal { .. } => "open_deal",
            Command::AddMilestone { .. } => "add_milestone",
            Command::CompleteMilestone { .. } => "complete_milestone",
            Command::UploadDocument { .. } => "upload_document",
            Command::RequestSignature { .. } => "request_signature",
            Command::MarkSigned { .. } => "mark_signed",
            Command::DesignateSpa { .. } => "designate_spa",
            Command::Transition { .. } => "transition",
            Command::CreatePayment { .. } => "create_payment",
            Command::MarkEscrowed { .. } => "mark_escrowed",
            Command::Release { .. } => "release",
            Command::Refund { .. } => "refund",
            Command::Waive { .. } => "waive",
            Command::ScheduleEarnout { .. } => "schedule_earnout",
            Command::ResolvePeriod { .. } => "resolve_period",
            Command::RaiseDispute { .. } => "raise_dispute",
            Command::ResolveDispute { .. } => "resolve_dispute",
            Command::DeleteDeal { .. } => "delete_deal",
        }
    }
}
