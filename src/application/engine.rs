use super::activity_log::{ActivityLog, Entry};
use super::command::Command;
use super::documents::{DocumentLedger, NewDocument};
use super::earnout::EarnoutCalculator;
use super::milestones::{MilestoneTracker, NewMilestone};
use super::nda_gate::{NdaGate, NewNdaRequest};
use super::payments::{NewPayment, PaymentLedger, PaymentSummary};
use super::stages::StageMachine;
use crate::domain::activity::{Activity, ActivityType};
use crate::domain::deal::{Deal, DealTerms, Stage};
use crate::domain::document::DocumentRecord;
use crate::domain::earnout::EarnoutSchedule;
use crate::domain::ids::{DealId, DisputeId, ListingId, PartyId};
use crate::domain::milestone::Milestone;
use crate::domain::money::Amount;
use crate::domain::payment::Payment;
use crate::domain::ports::Repositories;
use crate::error::{DealError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Input for [`DealEngine::open_deal`].
#[derive(Debug, Clone)]
pub struct NewDeal {
    pub id: DealId,
    pub listing_id: ListingId,
    pub buyer_id: PartyId,
    pub seller_id: PartyId,
    pub agreed_price: Amount,
    pub notes: String,
    pub terms: DealTerms,
}

/// Everything known about one deal, for detail views and reporting.
#[derive(Debug, Clone, Serialize)]
pub struct DealSnapshot {
    pub deal: Deal,
    pub milestones: Vec<Milestone>,
    pub documents: Vec<DocumentRecord>,
    pub payments: Vec<Payment>,
    pub earnout: Option<EarnoutSchedule>,
    pub payment_summary: PaymentSummary,
    pub activities: Vec<Activity>,
}

/// One line of the per-deal summary report.
#[derive(Debug, Clone, PartialEq)]
pub struct DealReport {
    pub deal_id: DealId,
    pub stage: Stage,
    pub agreed_price: Amount,
    pub payments: PaymentSummary,
    pub milestones_done: usize,
    pub milestones_total: usize,
}

/// The main entry point of the transaction lifecycle core.
///
/// `DealEngine` wires every service to one set of stores and adds the
/// deal-level operations (opening, deletion, disputes) and read projections.
/// All time comes from the caller.
#[derive(Clone)]
pub struct DealEngine {
    repos: Repositories,
    ndas: NdaGate,
    documents: DocumentLedger,
    milestones: MilestoneTracker,
    stages: StageMachine,
    payments: PaymentLedger,
    earnout: EarnoutCalculator,
    log: ActivityLog,
}

impl DealEngine {
    pub fn new(repos: Repositories) -> Self {
        Self {
            ndas: NdaGate::new(&repos),
            documents: DocumentLedger::new(&repos),
            milestones: MilestoneTracker::new(&repos),
            stages: StageMachine::new(&repos),
            payments: PaymentLedger::new(&repos),
            earnout: EarnoutCalculator::new(&repos),
            log: ActivityLog::new(repos.activities.clone()),
            repos,
        }
    }

    pub fn ndas(&self) -> &NdaGate {
        &self.ndas
    }

    pub fn documents(&self) -> &DocumentLedger {
        &self.documents
    }

    pub fn milestones(&self) -> &MilestoneTracker {
        &self.milestones
    }

    pub fn stages(&self) -> &StageMachine {
        &self.stages
    }

    pub fn payments(&self) -> &PaymentLedger {
        &self.payments
    }

    pub fn earnout(&self) -> &EarnoutCalculator {
        &self.earnout
    }

    pub fn activity_log(&self) -> &ActivityLog {
        &self.log
    }

    /// Creates a deal at LOI_SIGNED. The buyer needs an approved NDA with this
    /// seller for the listing. Retrying with the same id returns the stored deal.
    pub async fn open_deal(&self, new: NewDeal, actor: &PartyId, now: DateTime<Utc>) -> Result<Deal> {
        if let Some(existing) = self.repos.deals.get(&new.id).await? {
            if existing.listing_id != new.listing_id
                || existing.buyer_id != new.buyer_id
                || existing.seller_id != new.seller_id
            {
                return Err(DealError::ValidationError(format!(
                    "deal {} already exists for other parties",
                    new.id
                )));
            }
            return Ok(existing);
        }
        if new.buyer_id == new.seller_id {
            return Err(DealError::ValidationError(
                "Buyer and seller must differ".to_string(),
            ));
        }
        if !self
            .ndas
            .is_approved_between(&new.listing_id, &new.buyer_id, &new.seller_id)
            .await?
        {
            warn!(deal_id = %new.id, listing_id = %new.listing_id, buyer_id = %new.buyer_id, "Deal creation blocked by NDA gate");
            return Err(DealError::StageTransitionBlocked {
                target: Stage::LoiSigned,
                unmet: vec![format!(
                    "buyer {} has no approved NDA with seller {} for listing {}",
                    new.buyer_id, new.seller_id, new.listing_id
                )],
            });
        }

        let deal = Deal {
            id: new.id,
            listing_id: new.listing_id,
            buyer_id: new.buyer_id,
            seller_id: new.seller_id,
            stage: Stage::LoiSigned,
            previous_stage: None,
            agreed_price: new.agreed_price,
            closing_date: None,
            created_at: now,
            notes: new.notes,
            terms: new.terms,
            spa_document: None,
            disputes: Vec::new(),
            version: 0,
        };
        self.repos.deals.insert(deal.clone()).await?;

        self.log
            .record_for_deal(
                &deal.id,
                Entry::new(ActivityType::DealOpened, "Deal opened")
                    .with_description(format!("LOI signed at {}", deal.agreed_price)),
                actor,
                now,
            )
            .await?;
        info!(deal_id = %deal.id, listing_id = %deal.listing_id, price = %deal.agreed_price, "Deal opened");
        Ok(deal)
    }

    /// Removes a deal and the rows it owns. Refused once the deal is COMPLETED
    /// or any of its payments holds or has moved funds. The activity trail is kept.
    pub async fn delete_deal(&self, deal_id: &DealId, actor: &PartyId, now: DateTime<Utc>) -> Result<()> {
        let deal = self.deal(deal_id).await?;
        if deal.stage == Stage::Completed {
            return Err(DealError::invalid_transition("deal", deal.stage, "DELETED"));
        }
        if let Some(funded) = self.repos.payments.remove_unfunded_for_deal(deal_id).await? {
            warn!(deal_id = %deal_id, payment_id = %funded.id, "Deletion refused, payment holds funds");
            return Err(DealError::ValidationError(format!(
                "deal {deal_id} cannot be deleted: payment {} is {}",
                funded.id, funded.status
            )));
        }
        self.repos.milestones.remove_for_deal(deal_id).await?;
        self.repos.documents.remove_for_deal(deal_id).await?;
        self.repos.earnouts.remove(deal_id).await?;
        self.repos.deals.remove(deal_id).await?;

        self.log
            .record_for_deal(
                deal_id,
                Entry::new(ActivityType::DealDeleted, "Deal deleted")
                    .with_description(format!("Deleted at stage {}", deal.stage)),
                actor,
                now,
            )
            .await?;
        info!(deal_id = %deal_id, actor = %actor, "Deal deleted");
        Ok(())
    }

    /// Records a dispute against the deal. Escrow releases wait until it is resolved.
    pub async fn raise_dispute(
        &self,
        deal_id: &DealId,
        dispute_id: DisputeId,
        reason: String,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Deal> {
        let mut deal = self.deal(deal_id).await?;
        let expected = deal.version;
        if !deal.raise_dispute(dispute_id.clone(), reason.clone(), actor.clone(), now)? {
            return Ok(deal);
        }
        let deal = self.repos.deals.compare_and_swap(deal, expected).await?;

        self.log
            .record_for_deal(
                deal_id,
                Entry::new(ActivityType::DisputeRaised, "Dispute raised").with_description(reason),
                actor,
                now,
            )
            .await?;
        warn!(deal_id = %deal_id, dispute_id = %dispute_id, actor = %actor, "Dispute raised");
        Ok(deal)
    }

    pub async fn resolve_dispute(
        &self,
        deal_id: &DealId,
        dispute_id: &DisputeId,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Deal> {
        let mut deal = self.deal(deal_id).await?;
        let expected = deal.version;
        if !deal.resolve_dispute(dispute_id, now)? {
            return Ok(deal);
        }
        let deal = self.repos.deals.compare_and_swap(deal, expected).await?;

        self.log
            .record_for_deal(
                deal_id,
                Entry::new(ActivityType::DisputeResolved, "Dispute resolved")
                    .with_description(format!("Dispute {dispute_id} closed")),
                actor,
                now,
            )
            .await?;
        info!(deal_id = %deal_id, dispute_id = %dispute_id, actor = %actor, "Dispute resolved");
        Ok(deal)
    }

    pub async fn snapshot(&self, deal_id: &DealId) -> Result<DealSnapshot> {
        let deal = self.deal(deal_id).await?;
        Ok(DealSnapshot {
            milestones: self.milestones.for_deal(deal_id).await?,
            documents: self.documents.for_deal(deal_id).await?,
            payments: self.payments.for_deal(deal_id).await?,
            earnout: self.repos.earnouts.get(deal_id).await?,
            payment_summary: self.payments.summary(deal_id).await?,
            activities: self.log.for_deal(deal_id).await?,
            deal,
        })
    }

    /// Deals grouped by stage, for pipeline boards.
    pub async fn pipeline(&self) -> Result<BTreeMap<Stage, Vec<Deal>>> {
        let mut board: BTreeMap<Stage, Vec<Deal>> = BTreeMap::new();
        for deal in self.repos.deals.get_all().await? {
            board.entry(deal.stage).or_default().push(deal);
        }
        Ok(board)
    }

    /// One summary line per deal, ordered by deal id.
    pub async fn reports(&self) -> Result<Vec<DealReport>> {
        let mut reports = Vec::new();
        for deal in self.repos.deals.get_all().await? {
            let milestones = self.milestones.for_deal(&deal.id).await?;
            reports.push(DealReport {
                payments: self.payments.summary(&deal.id).await?,
                milestones_done: milestones.iter().filter(|m| m.completed).count(),
                milestones_total: milestones.len(),
                stage: deal.stage,
                agreed_price: deal.agreed_price,
                deal_id: deal.id,
            });
        }
        Ok(reports)
    }

    /// Applies one scripted command.
    pub async fn execute(&self, command: Command) -> Result<()> {
        match command {
            Command::RequestNda {
                id,
                listing,
                buyer,
                seller,
                at,
            } => {
                let request = NewNdaRequest {
                    id,
                    listing_id: listing,
                    buyer_id: buyer,
                    seller_id: seller,
                };
                self.ndas.request_access(request, at).await?;
            }
            Command::ApproveNda { id, actor, at } => {
                self.ndas.approve(&id, &actor, at).await?;
            }
            Command::RejectNda { id, actor, at } => {
                self.ndas.reject(&id, &actor, at).await?;
            }
            Command::OpenDeal {
                id,
                listing,
                buyer,
                seller,
                agreed_price,
                notes,
                terms,
                actor,
                at,
            } => {
                let new = NewDeal {
                    id,
                    listing_id: listing,
                    buyer_id: buyer,
                    seller_id: seller,
                    agreed_price,
                    notes,
                    terms,
                };
                self.open_deal(new, &actor, at).await?;
            }
            Command::AddMilestone {
                id,
                deal,
                title,
                description,
                due_date,
                assigned_to,
                required_for,
                kind,
                actor,
                at,
            } => {
                let new = NewMilestone {
                    id,
                    deal_id: deal,
                    title,
                    description,
                    due_date,
                    assigned_to,
                    required_for,
                    kind,
                };
                self.milestones.add_milestone(new, &actor, at).await?;
            }
            Command::CompleteMilestone { id, actor, at } => {
                self.milestones.complete_milestone(&id, &actor, at).await?;
            }
            Command::UploadDocument {
                id,
                deal,
                doc_type,
                title,
                uploaded_by,
                at,
            } => {
                let new = NewDocument {
                    id,
                    deal_id: deal,
                    doc_type,
                    title,
                    uploaded_by,
                };
                self.documents.record_upload(new, at).await?;
            }
            Command::RequestSignature { id, actor, at } => {
                self.documents.request_signature(&id, &actor, at).await?;
            }
            Command::MarkSigned { id, signed_by, at } => {
                self.documents.mark_signed(&id, &signed_by, at).await?;
            }
            Command::DesignateSpa {
                deal,
                document,
                actor,
                at,
            } => {
                self.documents.designate_spa(&deal, &document, &actor, at).await?;
            }
            Command::Transition {
                deal,
                to,
                actor,
                at,
            } => {
                self.stages.transition(&deal, to, &actor, at).await?;
            }
            Command::CreatePayment {
                id,
                deal,
                payment_type,
                amount,
                due_date,
                earnout_period,
                actor,
                at,
            } => {
                let new = NewPayment {
                    id,
                    deal_id: deal,
                    payment_type,
                    amount,
                    due_date,
                    earnout_period,
                };
                self.payments.create_payment(new, &actor, at).await?;
            }
            Command::MarkEscrowed { id, actor, at } => {
                self.payments.mark_escrowed(&id, &actor, at).await?;
            }
            Command::Release { id, actor, at } => {
                self.payments.release(&id, &actor, at).await?;
            }
            Command::Refund {
                id,
                reason,
                actor,
                at,
            } => {
                self.payments.refund(&id, &reason, &actor, at).await?;
            }
            Command::Waive {
                id,
                reason,
                actor,
                at,
            } => {
                self.payments.waive(&id, &reason, &actor, at).await?;
            }
            Command::ScheduleEarnout {
                deal,
                periods,
                actor,
                at,
            } => {
                self.earnout.schedule(&deal, periods, &actor, at).await?;
            }
            Command::ResolvePeriod {
                deal,
                period,
                kpi_actual,
                actor,
                at,
            } => {
                self.earnout
                    .resolve_period(&deal, period, kpi_actual, &actor, at)
                    .await?;
            }
            Command::RaiseDispute {
                deal,
                id,
                reason,
                actor,
                at,
            } => {
                self.raise_dispute(&deal, id, reason, &actor, at).await?;
            }
            Command::ResolveDispute {
                deal,
                id,
                actor,
                at,
            } => {
                self.resolve_dispute(&deal, &id, &actor, at).await?;
            }
            Command::DeleteDeal { deal, actor, at } => {
                self.delete_deal(&deal, &actor, at).await?;
            }
        }
        Ok(())
    }

    async fn deal(&self, id: &DealId) -> Result<Deal> {
        self.repos
            .deals
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("deal", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::{NdaRequestId, PaymentId};
    use crate::domain::money::Balance;
    use crate::domain::payment::PaymentType;
    use crate::infrastructure::in_memory;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, 9, 0, 0).unwrap()
    }

    fn new_deal(id: &str) -> NewDeal {
        NewDeal {
            id: DealId::new(id),
            listing_id: ListingId::new("listing-1"),
            buyer_id: PartyId::new("buyer"),
            seller_id: PartyId::new("seller"),
            agreed_price: Amount::new(dec!(12000000)).unwrap(),
            notes: String::new(),
            terms: DealTerms::default(),
        }
    }

    async fn engine_with_nda() -> DealEngine {
        let engine = DealEngine::new(in_memory::repositories());
        let seller = PartyId::new("seller");
        let request = engine
            .ndas()
            .request_access(
                NewNdaRequest {
                    id: NdaRequestId::new("nda-1"),
                    listing_id: ListingId::new("listing-1"),
                    buyer_id: PartyId::new("buyer"),
                    seller_id: seller.clone(),
                },
                at(1),
            )
            .await
            .unwrap();
        engine.ndas().approve(&request.id, &seller, at(1)).await.unwrap();
        engine
    }

    #[tokio::test]
    async fn test_open_deal_requires_nda() {
        let engine = DealEngine::new(in_memory::repositories());
        let err = engine
            .open_deal(new_deal("deal-1"), &PartyId::new("seller"), at(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DealError::StageTransitionBlocked { target: Stage::LoiSigned, .. }));
        assert!(engine.pipeline().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_open_deal_is_retry_safe() {
        let engine = engine_with_nda().await;
        let seller = PartyId::new("seller");
        let first = engine.open_deal(new_deal("deal-1"), &seller, at(2)).await.unwrap();
        let retry = engine.open_deal(new_deal("deal-1"), &seller, at(3)).await.unwrap();
        assert_eq!(first, retry);
        assert_eq!(first.stage, Stage::LoiSigned);

        let opened = engine
            .activity_log()
            .for_deal(&first.id)
            .await
            .unwrap()
            .iter()
            .filter(|a| a.activity_type == ActivityType::DealOpened)
            .count();
        assert_eq!(opened, 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_activity_trail() {
        let engine = engine_with_nda().await;
        let seller = PartyId::new("seller");
        let deal = engine.open_deal(new_deal("deal-1"), &seller, at(2)).await.unwrap();

        engine.delete_deal(&deal.id, &seller, at(3)).await.unwrap();
        assert!(matches!(
            engine.snapshot(&deal.id).await,
            Err(DealError::NotFound { .. })
        ));
        let trail = engine.activity_log().for_deal(&deal.id).await.unwrap();
        let kinds: Vec<ActivityType> = trail.iter().map(|a| a.activity_type).collect();
        assert_eq!(kinds, vec![ActivityType::DealOpened, ActivityType::DealDeleted]);
    }

    #[tokio::test]
    async fn test_delete_refused_after_funds_moved() {
        let engine = engine_with_nda().await;
        let seller = PartyId::new("seller");
        let deal = engine.open_deal(new_deal("deal-1"), &seller, at(2)).await.unwrap();
        let fee = engine
            .payments()
            .create_payment(
                NewPayment {
                    id: PaymentId::new("fee"),
                    deal_id: deal.id.clone(),
                    payment_type: PaymentType::Fee,
                    amount: Amount::new(dec!(30000)).unwrap(),
                    due_date: None,
                    earnout_period: None,
                },
                &seller,
                at(2),
            )
            .await
            .unwrap();
        engine.payments().mark_escrowed(&fee.id, &seller, at(3)).await.unwrap();

        let err = engine.delete_deal(&deal.id, &seller, at(4)).await.unwrap_err();
        assert!(matches!(err, DealError::ValidationError(_)));
        assert!(engine.snapshot(&deal.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_dispute_lifecycle() {
        let engine = engine_with_nda().await;
        let buyer = PartyId::new("buyer");
        let deal = engine.open_deal(new_deal("deal-1"), &buyer, at(2)).await.unwrap();
        let dispute = DisputeId::new("dispute-1");

        let raised = engine
            .raise_dispute(&deal.id, dispute.clone(), "inventory count".to_string(), &buyer, at(3))
            .await
            .unwrap();
        assert!(raised.has_open_dispute());
        assert_eq!(raised.version, 1);

        let resolved = engine.resolve_dispute(&deal.id, &dispute, &buyer, at(4)).await.unwrap();
        assert!(!resolved.has_open_dispute());
        let again = engine.resolve_dispute(&deal.id, &dispute, &buyer, at(5)).await.unwrap();
        assert_eq!(again.version, resolved.version);
    }

    #[tokio::test]
    async fn test_execute_and_report() {
        let engine = engine_with_nda().await;
        let seller = PartyId::new("seller");
        engine
            .execute(Command::OpenDeal {
                id: DealId::new("deal-1"),
                listing: ListingId::new("listing-1"),
                buyer: PartyId::new("buyer"),
                seller: seller.clone(),
                agreed_price: Amount::new(dec!(12000000)).unwrap(),
                notes: "Family-owned bakery chain".to_string(),
                terms: DealTerms::default(),
                actor: seller.clone(),
                at: at(2),
            })
            .await
            .unwrap();
        engine
            .execute(Command::Transition {
                deal: DealId::new("deal-1"),
                to: Stage::DdInProgress,
                actor: seller.clone(),
                at: at(3),
            })
            .await
            .unwrap();
        engine
            .execute(Command::CreatePayment {
                id: PaymentId::new("fee"),
                deal: DealId::new("deal-1"),
                payment_type: PaymentType::Fee,
                amount: Amount::new(dec!(20000)).unwrap(),
                due_date: None,
                earnout_period: None,
                actor: seller.clone(),
                at: at(3),
            })
            .await
            .unwrap();

        let reports = engine.reports().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].stage, Stage::DdInProgress);
        assert_eq!(reports[0].payments.pending, Balance::new(dec!(20000)));

        let board = engine.pipeline().await.unwrap();
        assert_eq!(board[&Stage::DdInProgress].len(), 1);
    }
}
