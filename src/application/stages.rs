use super::activity_log::{ActivityLog, Entry};
use super::documents::DocumentLedger;
use super::milestones::MilestoneTracker;
use super::nda_gate::NdaGate;
use super::payments::PaymentLedger;
use crate::domain::activity::ActivityType;
use crate::domain::deal::{Deal, Stage};
use crate::domain::document::DocumentStatus;
use crate::domain::ids::{DealId, PartyId, PaymentId};
use crate::domain::ports::{DealStoreRef, Repositories};
use crate::error::{DealError, Result};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Result of a successful [`StageMachine::transition`].
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub deal: Deal,
    /// Payments flagged for refund evaluation by a cancellation.
    pub flagged_for_refund: Vec<PaymentId>,
}

/// Enforces the deal lifecycle DAG and the preconditions of each edge.
#[derive(Clone)]
pub struct StageMachine {
    deals: DealStoreRef,
    ndas: NdaGate,
    milestones: MilestoneTracker,
    documents: DocumentLedger,
    payments: PaymentLedger,
    log: ActivityLog,
}

impl StageMachine {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            deals: repos.deals.clone(),
            ndas: NdaGate::new(repos),
            milestones: MilestoneTracker::new(repos),
            documents: DocumentLedger::new(repos),
            payments: PaymentLedger::new(repos),
            log: ActivityLog::new(repos.activities.clone()),
        }
    }

    /// Moves a deal to `target`.
    ///
    /// Every dependent row is re-read here, and the stage is written with a CAS
    /// on the deal version. Calling again once the deal is at `target` finishes
    /// whatever an earlier attempt left undone after its CAS: the refund sweep
    /// of a cancellation and the `StageChanged` entry.
    pub async fn transition(
        &self,
        deal_id: &DealId,
        target: Stage,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let deal = self.deal(deal_id).await?;
        if deal.stage == target {
            return self.complete_pending(deal, actor, now).await;
        }
        if !deal.stage.can_transition_to(target) {
            warn!(deal_id = %deal_id, from = %deal.stage, to = %target, "Transition rejected");
            return Err(DealError::invalid_transition("deal", deal.stage, target));
        }

        let unmet = self.unmet_preconditions(&deal, target).await?;
        if !unmet.is_empty() {
            warn!(deal_id = %deal_id, to = %target, unmet = unmet.len(), "Transition blocked");
            return Err(DealError::StageTransitionBlocked { target, unmet });
        }

        let from = deal.stage;
        let expected = deal.version;
        let mut next = deal;
        next.previous_stage = Some(from);
        next.stage = target;
        if target == Stage::Completed && next.closing_date.is_none() {
            next.closing_date = Some(now);
        }
        let deal = self.deals.compare_and_swap(next, expected).await?;

        let flagged_for_refund = self.sweep_if_cancelled(&deal, actor, now).await?;
        self.record_stage_change(&deal.id, from, target, actor, now).await?;
        info!(deal_id = %deal_id, actor = %actor, from = %from, to = %target, "Deal stage changed");
        Ok(TransitionOutcome {
            deal,
            flagged_for_refund,
        })
    }

    async fn complete_pending(
        &self,
        deal: Deal,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let flagged_for_refund = self.sweep_if_cancelled(&deal, actor, now).await?;
        if let Some(from) = deal.previous_stage
            && !self.stage_change_recorded(&deal.id, deal.stage).await?
        {
            warn!(deal_id = %deal.id, to = %deal.stage, "Recording stage change left out by an earlier attempt");
            self.record_stage_change(&deal.id, from, deal.stage, actor, now).await?;
        }
        Ok(TransitionOutcome {
            deal,
            flagged_for_refund,
        })
    }

    async fn sweep_if_cancelled(
        &self,
        deal: &Deal,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentId>> {
        if deal.stage == Stage::Cancelled {
            self.payments.flag_open_for_refund(&deal.id, actor, now).await
        } else {
            Ok(Vec::new())
        }
    }

    /// True when the newest `StageChanged` entry of the deal names `stage`.
    async fn stage_change_recorded(&self, deal_id: &DealId, stage: Stage) -> Result<bool> {
        let title = stage_change_title(stage);
        Ok(self
            .log
            .for_deal(deal_id)
            .await?
            .iter()
            .rev()
            .find(|a| a.activity_type == ActivityType::StageChanged)
            .is_some_and(|a| a.title == title))
    }

    async fn record_stage_change(
        &self,
        deal_id: &DealId,
        from: Stage,
        target: Stage,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.log
            .record_for_deal(
                deal_id,
                Entry::new(ActivityType::StageChanged, stage_change_title(target))
                    .with_description(format!("{from} -> {target}")),
                actor,
                now,
            )
            .await?;
        Ok(())
    }

    /// Every unmet precondition of moving `deal` to `target`, in a stable order.
    /// Edge validity is not checked here.
    pub async fn unmet_preconditions(&self, deal: &Deal, target: Stage) -> Result<Vec<String>> {
        let mut unmet = Vec::new();
        if target == Stage::Cancelled {
            return Ok(unmet);
        }

        if target == Stage::DdInProgress
            && !self.ndas.is_approved(&deal.listing_id, &deal.buyer_id).await?
        {
            unmet.push(format!(
                "buyer NDA for listing {} not approved",
                deal.listing_id
            ));
        }

        if target > deal.stage {
            for milestone in self.milestones.outstanding_through(&deal.id, target).await? {
                unmet.push(format!("milestone '{}' incomplete", milestone.title));
            }
        }

        if target == Stage::Closing {
            match self.documents.designated_spa(deal).await? {
                None => unmet.push("no SPA document recorded".to_string()),
                Some(spa) if spa.status != DocumentStatus::Signed => {
                    unmet.push("SPA document not signed".to_string());
                }
                Some(_) => {}
            }
        }

        if target == Stage::Completed {
            for payment in self.payments.for_deal(&deal.id).await? {
                if !payment.settles_completion() {
                    unmet.push(format!(
                        "{} payment {} is {}, not released or waived",
                        payment.payment_type, payment.id, payment.status
                    ));
                }
            }
        }
        Ok(unmet)
    }

    async fn deal(&self, id: &DealId) -> Result<Deal> {
        self.deals
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("deal", id))
    }
}

fn stage_change_title(stage: Stage) -> String {
    format!("Stage changed to {stage}")
}
