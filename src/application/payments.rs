use super::activity_log::{ActivityLog, Entry};
use super::earnout::EarnoutCalculator;
use super::milestones::MilestoneTracker;
use crate::domain::activity::ActivityType;
use crate::domain::deal::{Deal, Stage};
use crate::domain::ids::{DealId, PartyId, PaymentId};
use crate::domain::money::{Amount, Balance};
use crate::domain::payment::{release_condition, Payment, PaymentStatus, PaymentType, ReleaseContext};
use crate::domain::ports::{DealStoreRef, EarnoutStoreRef, PaymentStoreRef, Repositories};
use crate::error::{DealError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Attempts per payment when a cancellation sweep loses a CAS race.
const MAX_FLAG_ATTEMPTS: usize = 5;

/// Input for [`PaymentLedger::create_payment`].
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub id: PaymentId,
    pub deal_id: DealId,
    pub payment_type: PaymentType,
    pub amount: Amount,
    pub due_date: Option<DateTime<Utc>>,
    /// Required for EARN_OUT, rejected otherwise.
    pub earnout_period: Option<u32>,
}

/// Per-item result of a bulk operation.
#[derive(Debug)]
pub struct BulkOutcome {
    pub payment_id: PaymentId,
    pub result: Result<Payment>,
}

/// Totals of a deal's payments per status. Released EARN_OUT payments count
/// their resolved amount, not the cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PaymentSummary {
    pub pending: Balance,
    pub escrowed: Balance,
    pub released: Balance,
    pub refunded: Balance,
}

/// Independent lifecycle of each staged payment.
#[derive(Clone)]
pub struct PaymentLedger {
    deals: DealStoreRef,
    payments: PaymentStoreRef,
    earnouts: EarnoutStoreRef,
    milestones: MilestoneTracker,
    earnout: EarnoutCalculator,
    log: ActivityLog,
}

impl PaymentLedger {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            deals: repos.deals.clone(),
            payments: repos.payments.clone(),
            earnouts: repos.earnouts.clone(),
            milestones: MilestoneTracker::new(repos),
            earnout: EarnoutCalculator::new(repos),
            log: ActivityLog::new(repos.activities.clone()),
        }
    }

    /// Schedules a payment. Only allowed at CLOSING, except FEE which may be
    /// created at any time. Retrying with the same id returns the stored payment.
    pub async fn create_payment(&self, new: NewPayment, actor: &PartyId, now: DateTime<Utc>) -> Result<Payment> {
        if let Some(existing) = self.payments.get(&new.id).await? {
            if existing.deal_id != new.deal_id {
                return Err(DealError::ValidationError(format!(
                    "payment {} belongs to deal {}",
                    existing.id, existing.deal_id
                )));
            }
            return Ok(existing);
        }

        let deal = self.deal(&new.deal_id).await?;
        if new.payment_type != PaymentType::Fee && deal.stage != Stage::Closing {
            return Err(DealError::WrongStage {
                deal: deal.id,
                actual: deal.stage,
                expected: Stage::Closing,
            });
        }
        self.check_earnout_link(&new).await?;

        let payment = Payment {
            id: new.id,
            deal_id: new.deal_id,
            payment_type: new.payment_type,
            amount: new.amount,
            status: PaymentStatus::Pending,
            due_date: new.due_date,
            paid_at: None,
            released_at: None,
            refunded_at: None,
            refund_reason: None,
            resolved_amount: None,
            earnout_period: new.earnout_period,
            waived: false,
            waiver_reason: None,
            refund_review: false,
            created_at: now,
            version: 0,
        };
        self.payments.insert(payment.clone()).await?;

        self.log
            .record_for_deal(
                &payment.deal_id,
                Entry::new(
                    ActivityType::PaymentCreated,
                    format!("{} payment scheduled", payment.payment_type),
                )
                .with_description(format!("{} due {}", payment.amount, due_label(payment.due_date))),
                actor,
                now,
            )
            .await?;
        info!(payment_id = %payment.id, deal_id = %payment.deal_id, kind = %payment.payment_type, amount = %payment.amount, "Payment created");
        Ok(payment)
    }

    async fn check_earnout_link(&self, new: &NewPayment) -> Result<()> {
        match (new.payment_type, new.earnout_period) {
            (PaymentType::EarnOut, Some(index)) => {
                let schedule = self.earnout.schedule_for(&new.deal_id).await?;
                let period = schedule
                    .period(index)
                    .ok_or_else(|| DealError::not_found("earnout period", index))?;
                if new.amount > period.max_amount {
                    return Err(DealError::ValidationError(format!(
                        "EARN_OUT payment {} exceeds the cap {} of period {index}",
                        new.amount, period.max_amount
                    )));
                }
                let taken = self.payments.for_deal(&new.deal_id).await?.into_iter().any(|p| {
                    p.payment_type == PaymentType::EarnOut && p.earnout_period == Some(index)
                });
                if taken {
                    return Err(DealError::ValidationError(format!(
                        "earnout period {index} already has a payment"
                    )));
                }
                Ok(())
            }
            (PaymentType::EarnOut, None) => Err(DealError::ValidationError(
                "EARN_OUT payment must reference an earnout period".to_string(),
            )),
            (_, Some(_)) => Err(DealError::ValidationError(format!(
                "{} payment cannot reference an earnout period",
                new.payment_type
            ))),
            (_, None) => Ok(()),
        }
    }

    /// PENDING -> ESCROWED, confirmed by the payment provider.
    pub async fn mark_escrowed(&self, id: &PaymentId, actor: &PartyId, now: DateTime<Utc>) -> Result<Payment> {
        let mut payment = self.get(id).await?;
        let expected = payment.version;
        if !payment.mark_escrowed(now)? {
            return Ok(payment);
        }
        let payment = self.payments.compare_and_swap(payment, expected).await?;

        self.log
            .record_for_deal(
                &payment.deal_id,
                Entry::new(
                    ActivityType::PaymentEscrowed,
                    format!("{} payment received in escrow", payment.payment_type),
                )
                .with_description(payment.amount.to_string()),
                actor,
                now,
            )
            .await?;
        info!(payment_id = %id, actor = %actor, "Payment escrowed");
        Ok(payment)
    }

    /// ESCROWED -> RELEASED once the type-specific condition holds. Releasing a
    /// released payment returns it unchanged.
    pub async fn release(&self, id: &PaymentId, actor: &PartyId, now: DateTime<Utc>) -> Result<Payment> {
        let mut payment = self.get(id).await?;
        match payment.status {
            PaymentStatus::Released => return Ok(payment),
            PaymentStatus::Escrowed => {}
            other => {
                return Err(DealError::invalid_transition("payment", other, PaymentStatus::Released));
            }
        }

        let deal = self.deal(&payment.deal_id).await?;
        let closing_confirmed = if deal.terms.require_closing_confirmation {
            self.milestones.closing_confirmed(&deal.id).await?
        } else {
            false
        };
        let earnout_resolution = match (payment.payment_type, payment.earnout_period) {
            (PaymentType::EarnOut, Some(index)) => self
                .earnouts
                .get(&deal.id)
                .await?
                .and_then(|s| s.period(index).and_then(|p| p.resolved_amount)),
            _ => None,
        };
        let ctx = ReleaseContext {
            deal: &deal,
            now,
            closing_confirmed,
            earnout_resolution,
        };
        if let Some(condition) = release_condition(&payment, &ctx) {
            warn!(payment_id = %id, condition = %condition, "Payment release blocked");
            return Err(DealError::ReleaseConditionNotMet {
                payment: id.clone(),
                condition,
            });
        }

        let expected = payment.version;
        let payment = match (payment.payment_type, payment.earnout_period) {
            (PaymentType::EarnOut, Some(index)) => {
                let amount = self.earnout.lock_payout(&deal.id, index).await?;
                payment.release(Some(amount), now)?;
                match self.payments.compare_and_swap(payment, expected).await {
                    Ok(stored) => stored,
                    Err(err) => {
                        if let Err(unlock_err) = self.earnout.unlock_payout(&deal.id, index).await {
                            warn!(deal_id = %deal.id, period = index, error = %unlock_err, "Failed to unlock earnout period");
                        }
                        return Err(err);
                    }
                }
            }
            _ => {
                payment.release(None, now)?;
                self.payments.compare_and_swap(payment, expected).await?
            }
        };

        let released = payment.settled_amount();
        self.log
            .record_for_deal(
                &payment.deal_id,
                Entry::new(
                    ActivityType::PaymentReleased,
                    format!("{} payment released", payment.payment_type),
                )
                .with_description(released.to_string()),
                actor,
                now,
            )
            .await?;
        info!(payment_id = %id, actor = %actor, amount = %released, "Payment released");
        Ok(payment)
    }

    /// PENDING | ESCROWED -> REFUNDED. The reason is mandatory and lands in the log.
    pub async fn refund(&self, id: &PaymentId, reason: &str, actor: &PartyId, now: DateTime<Utc>) -> Result<Payment> {
        let mut payment = self.get(id).await?;
        let expected = payment.version;
        if !payment.refund(reason, now)? {
            return Ok(payment);
        }
        let payment = self.payments.compare_and_swap(payment, expected).await?;

        self.log
            .record_for_deal(
                &payment.deal_id,
                Entry::new(
                    ActivityType::PaymentRefunded,
                    format!("{} payment refunded", payment.payment_type),
                )
                .with_description(reason),
                actor,
                now,
            )
            .await?;
        info!(payment_id = %id, actor = %actor, reason = reason, "Payment refunded");
        Ok(payment)
    }

    /// Excuses a PENDING or REFUNDED payment from the COMPLETED requirement.
    pub async fn waive(&self, id: &PaymentId, reason: &str, actor: &PartyId, now: DateTime<Utc>) -> Result<Payment> {
        let mut payment = self.get(id).await?;
        let expected = payment.version;
        if !payment.waive(reason)? {
            return Ok(payment);
        }
        let payment = self.payments.compare_and_swap(payment, expected).await?;

        self.log
            .record_for_deal(
                &payment.deal_id,
                Entry::new(
                    ActivityType::PaymentWaived,
                    format!("{} payment waived", payment.payment_type),
                )
                .with_description(reason),
                actor,
                now,
            )
            .await?;
        info!(payment_id = %id, actor = %actor, "Payment waived");
        Ok(payment)
    }

    pub async fn escrow_many(&self, ids: &[PaymentId], actor: &PartyId, now: DateTime<Utc>) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.mark_escrowed(id, actor, now).await;
            outcomes.push(BulkOutcome {
                payment_id: id.clone(),
                result,
            });
        }
        outcomes
    }

    pub async fn release_many(&self, ids: &[PaymentId], actor: &PartyId, now: DateTime<Utc>) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.release(id, actor, now).await;
            outcomes.push(BulkOutcome {
                payment_id: id.clone(),
                result,
            });
        }
        outcomes
    }

    pub async fn refund_many(
        &self,
        ids: &[PaymentId],
        reason: &str,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Vec<BulkOutcome> {
        let mut outcomes = Vec::with_capacity(ids.len());
        for id in ids {
            let result = self.refund(id, reason, actor, now).await;
            outcomes.push(BulkOutcome {
                payment_id: id.clone(),
                result,
            });
        }
        outcomes
    }

    /// Flags every open payment of a cancelled deal for refund evaluation.
    /// Statuses are left as they are; payments released in the meantime are skipped.
    pub(crate) async fn flag_open_for_refund(
        &self,
        deal: &DealId,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<Vec<PaymentId>> {
        let mut flagged = Vec::new();
        for candidate in self.payments.for_deal(deal).await? {
            if candidate.status.is_terminal() {
                continue;
            }
            if self.flag_one(&candidate.id).await? {
                self.log
                    .record_for_deal(
                        deal,
                        Entry::new(
                            ActivityType::RefundReviewFlagged,
                            format!("{} payment flagged for refund review", candidate.payment_type),
                        )
                        .with_description(candidate.amount.to_string()),
                        actor,
                        now,
                    )
                    .await?;
                flagged.push(candidate.id);
            }
        }
        Ok(flagged)
    }

    async fn flag_one(&self, id: &PaymentId) -> Result<bool> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut payment = self.get(id).await?;
            let expected = payment.version;
            if !payment.flag_for_refund_review() {
                return Ok(false);
            }
            match self.payments.compare_and_swap(payment, expected).await {
                Ok(_) => return Ok(true),
                Err(DealError::ConcurrentModification { .. }) if attempt < MAX_FLAG_ATTEMPTS => {
                    warn!(payment_id = %id, attempt, "Refund flag lost a race, retrying");
                }
                Err(err) => return Err(err),
            }
        }
    }

    pub async fn summary(&self, deal: &DealId) -> Result<PaymentSummary> {
        let mut summary = PaymentSummary::default();
        for payment in self.payments.for_deal(deal).await? {
            let bucket = match payment.status {
                PaymentStatus::Pending => &mut summary.pending,
                PaymentStatus::Escrowed => &mut summary.escrowed,
                PaymentStatus::Released => &mut summary.released,
                PaymentStatus::Refunded => &mut summary.refunded,
            };
            *bucket = bucket.checked_add(payment.settled_amount())?;
        }
        Ok(summary)
    }

    pub async fn get(&self, id: &PaymentId) -> Result<Payment> {
        self.payments
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("payment", id))
    }

    pub async fn for_deal(&self, deal: &DealId) -> Result<Vec<Payment>> {
        self.payments.for_deal(deal).await
    }

    async fn deal(&self, id: &DealId) -> Result<Deal> {
        self.deals
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("deal", id))
    }
}

fn due_label(due: Option<DateTime<Utc>>) -> String {
    due.map_or_else(|| "on closing".to_string(), |d| d.format("%Y-%m-%d").to_string())
}
