use super::deal::EarnoutPolicy;
use super::ids::DealId;
use super::money::Amount;
use crate::error::DealError;
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Target and cap for one earnout period, as negotiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodTarget {
    pub period_index: u32,
    pub kpi_target: Decimal,
    pub max_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnoutPeriod {
    pub period_index: u32,
    pub kpi_target: Decimal,
    pub kpi_actual: Option<Decimal>,
    pub max_amount: Amount,
    pub resolved_amount: Option<Decimal>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set while the linked payment is being released; figures are frozen from then on.
    pub payout_locked: bool,
}

impl EarnoutPeriod {
    pub fn is_resolved(&self) -> bool {
        self.resolved_amount.is_some()
    }
}

/// Deferred, KPI-conditional part of the purchase price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarnoutSchedule {
    pub deal_id: DealId,
    /// Sorted by `period_index`.
    pub periods: Vec<EarnoutPeriod>,
    pub version: u64,
}

impl EarnoutSchedule {
    pub fn new(deal_id: DealId, mut targets: Vec<PeriodTarget>) -> Result<Self, DealError> {
        if targets.is_empty() {
            return Err(DealError::ValidationError(
                "Earnout schedule needs at least one period".to_string(),
            ));
        }
        targets.sort_by_key(|t| t.period_index);
        if targets
            .windows(2)
            .any(|pair| pair[0].period_index == pair[1].period_index)
        {
            return Err(DealError::ValidationError(
                "Earnout period indices must be unique".to_string(),
            ));
        }
        if let Some(bad) = targets.iter().find(|t| t.kpi_target <= Decimal::ZERO) {
            return Err(DealError::ValidationError(format!(
                "KPI target of period {} must be positive",
                bad.period_index
            )));
        }

        let periods = targets
            .into_iter()
            .map(|t| EarnoutPeriod {
                period_index: t.period_index,
                kpi_target: t.kpi_target,
                kpi_actual: None,
                max_amount: t.max_amount,
                resolved_amount: None,
                resolved_at: None,
                payout_locked: false,
            })
            .collect();

        Ok(Self {
            deal_id,
            periods,
            version: 0,
        })
    }

    pub fn period(&self, index: u32) -> Option<&EarnoutPeriod> {
        self.periods.iter().find(|p| p.period_index == index)
    }

    /// Freezes a resolved period ahead of its payout and returns the amount to pay.
    pub fn lock_payout(&mut self, index: u32) -> Result<Decimal, DealError> {
        let period = self
            .periods
            .iter_mut()
            .find(|p| p.period_index == index)
            .ok_or_else(|| DealError::not_found("earnout period", index))?;
        let amount = period.resolved_amount.ok_or_else(|| {
            DealError::ValidationError(format!("earnout period {index} is not resolved"))
        })?;
        period.payout_locked = true;
        Ok(amount)
    }

    pub fn unlock_payout(&mut self, index: u32) {
        if let Some(period) = self.periods.iter_mut().find(|p| p.period_index == index) {
            period.payout_locked = false;
        }
    }

    /// Whether this schedule was built from exactly these targets (ignoring resolutions).
    pub fn matches_targets(&self, targets: &[PeriodTarget]) -> bool {
        let mut sorted = targets.to_vec();
        sorted.sort_by_key(|t| t.period_index);
        sorted.len() == self.periods.len()
            && sorted.iter().zip(&self.periods).all(|(t, p)| {
                t.period_index == p.period_index
                    && t.kpi_target == p.kpi_target
                    && t.max_amount == p.max_amount
            })
    }

    /// Records `kpi_actual` for a period and computes its payout under `policy`.
    ///
    /// Every earlier period must already be resolved. Re-resolving a period
    /// overwrites its figures; callers guard that against released payments.
    pub fn resolve(
        &mut self,
        index: u32,
        kpi_actual: Decimal,
        policy: EarnoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<&EarnoutPeriod, DealError> {
        if let Some(pending) = self
            .periods
            .iter()
            .take_while(|p| p.period_index < index)
            .find(|p| !p.is_resolved())
        {
            return Err(DealError::OutOfOrderResolution {
                deal: self.deal_id.clone(),
                period: index,
                pending: pending.period_index,
            });
        }

        let period = self
            .periods
            .iter_mut()
            .find(|p| p.period_index == index)
            .ok_or_else(|| DealError::not_found("earnout period", index))?;
        if period.payout_locked {
            return Err(DealError::AlreadyResolved {
                entity: "earnout period",
                id: format!("{}#{index}", self.deal_id),
            });
        }

        period.kpi_actual = Some(kpi_actual);
        period.resolved_amount = Some(payout(
            policy,
            period.kpi_target,
            kpi_actual,
            period.max_amount,
        ));
        period.resolved_at = Some(now);
        Ok(period)
    }
}

/// Payout for one period. Never exceeds `max_amount` and never goes negative.
pub fn payout(policy: EarnoutPolicy, kpi_target: Decimal, kpi_actual: Decimal, max_amount: Amount) -> Decimal {
    let max = max_amount.value();
    match policy {
        EarnoutPolicy::Proportional => {
            // Targets are positive, so an overflowing quotient is far outside [0, 1].
            let ratio = match kpi_actual.checked_div(kpi_target) {
                Some(ratio) => ratio.clamp(Decimal::ZERO, Decimal::ONE),
                None if kpi_actual.is_sign_negative() => Decimal::ZERO,
                None => Decimal::ONE,
            };
            (max * ratio)
                .round_dp_with_strategy(2, RoundingStrategy::ToZero)
                .min(max)
        }
        EarnoutPolicy::AllOrNothing => {
            if kpi_actual >= kpi_target {
                max
            } else {
                Decimal::ZERO
            }
        }
    }
}
