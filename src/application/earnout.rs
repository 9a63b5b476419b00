use super::activity_log::{ActivityLog, Entry};
use crate::domain::activity::ActivityType;
use crate::domain::deal::Deal;
use crate::domain::earnout::{EarnoutPeriod, EarnoutSchedule, PeriodTarget};
use crate::domain::ids::{DealId, PartyId};
use crate::domain::payment::{PaymentStatus, PaymentType};
use crate::domain::ports::{DealStoreRef, EarnoutStoreRef, PaymentStoreRef, Repositories};
use crate::error::{DealError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Computes conditional deferred payments against KPI targets.
///
/// Resolution only records figures. Paying out is a separate, human-confirmed
/// `release` on the linked EARN_OUT payment, because KPI figures may be
/// disputed and corrected until then.
#[derive(Clone)]
pub struct EarnoutCalculator {
    deals: DealStoreRef,
    earnouts: EarnoutStoreRef,
    payments: PaymentStoreRef,
    log: ActivityLog,
}

impl EarnoutCalculator {
    pub fn new(repos: &Repositories) -> Self {
        Self {
            deals: repos.deals.clone(),
            earnouts: repos.earnouts.clone(),
            payments: repos.payments.clone(),
            log: ActivityLog::new(repos.activities.clone()),
        }
    }

    /// Defines the deal's earnout periods. Retrying with identical targets
    /// returns the stored schedule.
    pub async fn schedule(
        &self,
        deal_id: &DealId,
        targets: Vec<PeriodTarget>,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<EarnoutSchedule> {
        let deal = self.deal(deal_id).await?;
        if let Some(existing) = self.earnouts.get(deal_id).await? {
            if existing.matches_targets(&targets) {
                return Ok(existing);
            }
            return Err(DealError::ValidationError(format!(
                "deal {deal_id} already has a different earnout schedule"
            )));
        }
        if deal.stage.is_terminal() {
            return Err(DealError::invalid_transition("deal", deal.stage, "EARNOUT_SCHEDULED"));
        }

        let schedule = EarnoutSchedule::new(deal_id.clone(), targets)?;
        self.earnouts.insert(schedule.clone()).await?;

        let cap: Decimal = schedule.periods.iter().map(|p| p.max_amount.value()).sum();
        self.log
            .record_for_deal(
                deal_id,
                Entry::new(ActivityType::EarnoutScheduled, "Earnout scheduled").with_description(
                    format!(
                        "{} periods, {:?} policy, up to {}",
                        schedule.periods.len(),
                        deal.terms.earnout_policy,
                        cap.normalize()
                    ),
                ),
                actor,
                now,
            )
            .await?;
        info!(deal_id = %deal_id, periods = schedule.periods.len(), "Earnout scheduled");
        Ok(schedule)
    }

    /// Records the KPI outcome of one period and computes its payout under the
    /// deal's policy.
    ///
    /// Fails with `OutOfOrderResolution` while an earlier period is unresolved.
    /// A resolved period may be corrected until its linked payment is released.
    pub async fn resolve_period(
        &self,
        deal_id: &DealId,
        period_index: u32,
        kpi_actual: Decimal,
        actor: &PartyId,
        now: DateTime<Utc>,
    ) -> Result<EarnoutPeriod> {
        let deal = self.deal(deal_id).await?;
        let mut schedule = self.schedule_for(deal_id).await?;
        let expected = schedule.version;

        let previous = schedule
            .period(period_index)
            .ok_or_else(|| DealError::not_found("earnout period", period_index))?
            .clone();
        if previous.is_resolved() {
            if previous.kpi_actual == Some(kpi_actual) {
                return Ok(previous);
            }
            if self.payout_released(deal_id, period_index).await? {
                return Err(DealError::AlreadyResolved {
                    entity: "earnout period",
                    id: format!("{deal_id}#{period_index}"),
                });
            }
        }

        let resolved = match schedule.resolve(period_index, kpi_actual, deal.terms.earnout_policy, now) {
            Ok(period) => period.clone(),
            Err(err) => {
                warn!(deal_id = %deal_id, period = period_index, error = %err, "Earnout resolution rejected");
                return Err(err);
            }
        };
        self.earnouts.compare_and_swap(schedule, expected).await?;

        let resolved_amount = resolved.resolved_amount.unwrap_or_default();
        let title = if previous.is_resolved() {
            format!("Earnout period {period_index} corrected")
        } else {
            format!("Earnout period {period_index} resolved")
        };
        self.log
            .record_for_deal(
                deal_id,
                Entry::new(ActivityType::EarnoutResolved, title).with_description(format!(
                    "KPI {} against target {}: {} of {}",
                    kpi_actual.normalize(),
                    resolved.kpi_target.normalize(),
                    resolved_amount.normalize(),
                    resolved.max_amount
                )),
                actor,
                now,
            )
            .await?;
        info!(deal_id = %deal_id, period = period_index, amount = %resolved_amount, "Earnout period resolved");
        Ok(resolved)
    }

    /// Freezes the period's figures ahead of a payout and returns the amount.
    pub(crate) async fn lock_payout(&self, deal_id: &DealId, period_index: u32) -> Result<Decimal> {
        let mut schedule = self.schedule_for(deal_id).await?;
        let expected = schedule.version;
        let amount = schedule.lock_payout(period_index)?;
        self.earnouts.compare_and_swap(schedule, expected).await?;
        Ok(amount)
    }

    /// Undoes [`lock_payout`](Self::lock_payout) after a payout failed to persist.
    pub(crate) async fn unlock_payout(&self, deal_id: &DealId, period_index: u32) -> Result<()> {
        let mut schedule = self.schedule_for(deal_id).await?;
        let expected = schedule.version;
        schedule.unlock_payout(period_index);
        self.earnouts.compare_and_swap(schedule, expected).await?;
        Ok(())
    }

    pub async fn schedule_for(&self, deal_id: &DealId) -> Result<EarnoutSchedule> {
        self.earnouts
            .get(deal_id)
            .await?
            .ok_or_else(|| DealError::not_found("earnout schedule", deal_id))
    }

    async fn payout_released(&self, deal_id: &DealId, period_index: u32) -> Result<bool> {
        Ok(self.payments.for_deal(deal_id).await?.iter().any(|p| {
            p.payment_type == PaymentType::EarnOut
                && p.earnout_period == Some(period_index)
                && p.status == PaymentStatus::Released
        }))
    }

    async fn deal(&self, id: &DealId) -> Result<Deal> {
        self.deals
            .get(id)
            .await?
            .ok_or_else(|| DealError::not_found("deal", id))
    }
}
