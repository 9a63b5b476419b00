use super::deal::{Deal, Stage};
use super::ids::{DealId, PaymentId};
use super::money::{Amount, Balance};
use crate::error::DealError;
use chrono::{DateTime, Months, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    Deposit,
    MainPayment,
    Escrow,
    EarnOut,
    Fee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Escrowed,
    Released,
    Refunded,
}

impl PaymentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Released | PaymentStatus::Refunded)
    }
}

impl fmt::Display for PaymentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentType::Deposit => "DEPOSIT",
            PaymentType::MainPayment => "MAIN_PAYMENT",
            PaymentType::Escrow => "ESCROW",
            PaymentType::EarnOut => "EARN_OUT",
            PaymentType::Fee => "FEE",
        })
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Escrowed => "ESCROWED",
            PaymentStatus::Released => "RELEASED",
            PaymentStatus::Refunded => "REFUNDED",
        })
    }
}

/// One staged payment of a deal, tracked independently of every other payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub deal_id: DealId,
    pub payment_type: PaymentType,
    /// Scheduled amount. For EARN_OUT this is the period cap.
    pub amount: Amount,
    pub status: PaymentStatus,
    pub due_date: Option<DateTime<Utc>>,
    pub paid_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    /// EARN_OUT only: the amount actually released after period resolution.
    pub resolved_amount: Option<Decimal>,
    /// EARN_OUT only: index of the linked earnout period.
    pub earnout_period: Option<u32>,
    pub waived: bool,
    pub waiver_reason: Option<String>,
    /// Set when the deal was cancelled while this payment was still open.
    pub refund_review: bool,
    pub created_at: DateTime<Utc>,
    pub version: u64,
}

/// Facts a release decision depends on, gathered by the caller in one read.
#[derive(Debug, Clone)]
pub struct ReleaseContext<'a> {
    pub deal: &'a Deal,
    pub now: DateTime<Utc>,
    pub closing_confirmed: bool,
    /// Resolved amount of the linked earnout period, if resolved.
    pub earnout_resolution: Option<Decimal>,
}

impl Payment {
    /// Funds actually moved (or to be moved) by this payment.
    pub fn settled_amount(&self) -> Balance {
        match self.resolved_amount {
            Some(resolved) => Balance::new(resolved),
            None => self.amount.into(),
        }
    }

    /// Money sits in escrow or has already moved.
    pub fn holds_funds(&self) -> bool {
        matches!(self.status, PaymentStatus::Escrowed | PaymentStatus::Released)
    }

    /// Whether this payment no longer blocks deal completion.
    pub fn settles_completion(&self) -> bool {
        self.payment_type == PaymentType::EarnOut
            || self.status == PaymentStatus::Released
            || self.waived
    }

    /// PENDING -> ESCROWED. Returns `false` on a retried confirmation.
    pub fn mark_escrowed(&mut self, now: DateTime<Utc>) -> Result<bool, DealError> {
        match self.status {
            PaymentStatus::Pending => {
                self.status = PaymentStatus::Escrowed;
                self.paid_at = Some(now);
                Ok(true)
            }
            PaymentStatus::Escrowed => Ok(false),
            other => Err(DealError::invalid_transition(
                "payment",
                other,
                PaymentStatus::Escrowed,
            )),
        }
    }

    /// ESCROWED -> RELEASED. Preconditions are checked by [`release_condition`].
    pub fn release(&mut self, resolved_amount: Option<Decimal>, now: DateTime<Utc>) -> Result<bool, DealError> {
        match self.status {
            PaymentStatus::Escrowed => {
                self.status = PaymentStatus::Released;
                self.released_at = Some(now);
                if self.payment_type == PaymentType::EarnOut {
                    self.resolved_amount = resolved_amount;
                }
                Ok(true)
            }
            PaymentStatus::Released => Ok(false),
            other => Err(DealError::invalid_transition(
                "payment",
                other,
                PaymentStatus::Released,
            )),
        }
    }

    /// PENDING | ESCROWED -> REFUNDED.
    pub fn refund(&mut self, reason: &str, now: DateTime<Utc>) -> Result<bool, DealError> {
        if reason.trim().is_empty() {
            return Err(DealError::ValidationError(
                "Refund reason is required".to_string(),
            ));
        }
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Escrowed => {
                self.status = PaymentStatus::Refunded;
                self.refunded_at = Some(now);
                self.refund_reason = Some(reason.to_string());
                Ok(true)
            }
            PaymentStatus::Refunded => Ok(false),
            PaymentStatus::Released => Err(DealError::invalid_transition(
                "payment",
                PaymentStatus::Released,
                PaymentStatus::Refunded,
            )),
        }
    }

    /// Excuses a PENDING or REFUNDED payment from the completion requirement.
    pub fn waive(&mut self, reason: &str) -> Result<bool, DealError> {
        if reason.trim().is_empty() {
            return Err(DealError::ValidationError(
                "Waiver reason is required".to_string(),
            ));
        }
        if self.payment_type == PaymentType::EarnOut {
            return Err(DealError::ValidationError(
                "EARN_OUT payments are settled by period resolution, not waived".to_string(),
            ));
        }
        if self.waived {
            return Ok(false);
        }
        match self.status {
            PaymentStatus::Pending | PaymentStatus::Refunded => {
                self.waived = true;
                self.waiver_reason = Some(reason.to_string());
                Ok(true)
            }
            other => Err(DealError::invalid_transition("payment", other, "WAIVED")),
        }
    }

    /// Flags an open payment for refund evaluation. Terminal payments are left alone.
    pub fn flag_for_refund_review(&mut self) -> bool {
        if self.status.is_terminal() || self.refund_review {
            return false;
        }
        self.refund_review = true;
        true
    }
}

/// Returns the unmet release condition, or `None` when `payment` may be released.
pub fn release_condition(payment: &Payment, ctx: &ReleaseContext<'_>) -> Option<String> {
    if ctx.deal.stage == Stage::Cancelled {
        return Some("deal cancelled; payment is held for refund evaluation".to_string());
    }
    match payment.payment_type {
        PaymentType::Escrow => {
            let Some(start) = payment.due_date.or(ctx.deal.closing_date) else {
                return Some("escrow holdback has no due date".to_string());
            };
            let months = ctx.deal.terms.escrow_period_months;
            let Some(unlock) = start.checked_add_months(Months::new(months)) else {
                return Some("escrow period overflows the calendar".to_string());
            };
            if ctx.now < unlock {
                return Some(format!(
                    "escrow period of {months} months runs until {}",
                    unlock.format("%Y-%m-%d")
                ));
            }
            if ctx.deal.has_open_dispute() {
                return Some("unresolved dispute recorded on the deal".to_string());
            }
            None
        }
        PaymentType::EarnOut => match ctx.earnout_resolution {
            Some(_) => None,
            None => Some(format!(
                "earnout period {} is not resolved",
                payment
                    .earnout_period
                    .map_or_else(|| "?".to_string(), |p| p.to_string())
            )),
        },
        PaymentType::Deposit | PaymentType::MainPayment => {
            if ctx.deal.terms.require_closing_confirmation && !ctx.closing_confirmed {
                Some("closing confirmation milestone not completed".to_string())
            } else {
                None
            }
        }
        PaymentType::Fee => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::deal::DealTerms;
    use crate::domain::ids::{DisputeId, ListingId, PartyId};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(year: i32, month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()
    }

    fn deal(escrow_months: u32) -> Deal {
        Deal {
            id: DealId::new("deal-1"),
            listing_id: ListingId::new("listing-1"),
            buyer_id: PartyId::new("buyer"),
            seller_id: PartyId::new("seller"),
            stage: Stage::Closing,
            previous_stage: None,
            agreed_price: Amount::new(dec!(50000000)).unwrap(),
            closing_date: None,
            created_at: at(2024, 1),
            notes: String::new(),
            terms: DealTerms {
                escrow_period_months: escrow_months,
                ..DealTerms::default()
            },
            spa_document: None,
            disputes: Vec::new(),
            version: 0,
        }
    }

    fn payment(payment_type: PaymentType) -> Payment {
        Payment {
            id: PaymentId::new("pay-1"),
            deal_id: DealId::new("deal-1"),
            payment_type,
            amount: Amount::new(dec!(10000000)).unwrap(),
            status: PaymentStatus::Escrowed,
            due_date: Some(at(2024, 1)),
            paid_at: Some(at(2024, 1)),
            released_at: None,
            refunded_at: None,
            refund_reason: None,
            resolved_amount: None,
            earnout_period: None,
            waived: false,
            waiver_reason: None,
            refund_review: false,
            created_at: at(2024, 1),
            version: 0,
        }
    }

    fn ctx(deal: &Deal, now: DateTime<Utc>) -> ReleaseContext<'_> {
        ReleaseContext {
            deal,
            now,
            closing_confirmed: false,
            earnout_resolution: None,
        }
    }

    #[test]
    fn test_escrow_holding_period() {
        let deal = deal(18);
        let escrow = payment(PaymentType::Escrow);
        assert!(release_condition(&escrow, &ctx(&deal, at(2024, 11))).is_some());
        assert!(release_condition(&escrow, &ctx(&deal, at(2025, 8))).is_none());
    }

    #[test]
    fn test_escrow_blocked_by_open_dispute() {
        let mut deal = deal(1);
        deal.raise_dispute(DisputeId::new("d"), "warranty".into(), PartyId::new("buyer"), at(2024, 1))
            .unwrap();
        let escrow = payment(PaymentType::Escrow);
        let unmet = release_condition(&escrow, &ctx(&deal, at(2025, 1))).unwrap();
        assert!(unmet.contains("dispute"));
    }

    #[test]
    fn test_deposit_closing_confirmation_gate() {
        let mut deal = deal(0);
        let deposit = payment(PaymentType::Deposit);
        assert!(release_condition(&deposit, &ctx(&deal, at(2024, 1))).is_none());

        deal.terms.require_closing_confirmation = true;
        assert!(release_condition(&deposit, &ctx(&deal, at(2024, 1))).is_some());

        let mut confirmed = ctx(&deal, at(2024, 1));
        confirmed.closing_confirmed = true;
        assert!(release_condition(&deposit, &confirmed).is_none());
    }

    #[test]
    fn test_earnout_requires_resolution() {
        let deal = deal(0);
        let mut earnout = payment(PaymentType::EarnOut);
        earnout.earnout_period = Some(0);
        assert_eq!(
            release_condition(&earnout, &ctx(&deal, at(2024, 1))).as_deref(),
            Some("earnout period 0 is not resolved")
        );

        let mut resolved = ctx(&deal, at(2024, 1));
        resolved.earnout_resolution = Some(dec!(250000));
        assert!(release_condition(&earnout, &resolved).is_none());

        earnout.release(Some(dec!(250000)), at(2024, 2)).unwrap();
        assert_eq!(earnout.settled_amount(), Balance::new(dec!(250000)));
    }

    #[test]
    fn test_release_is_idempotent_and_terminal() {
        let mut p = payment(PaymentType::Fee);
        assert!(p.release(None, at(2024, 2)).unwrap());
        assert!(!p.release(None, at(2024, 3)).unwrap());
        assert_eq!(p.released_at, Some(at(2024, 2)));
        assert!(p.refund("changed mind", at(2024, 3)).is_err());
    }

    #[test]
    fn test_pending_cannot_release() {
        let mut p = payment(PaymentType::Deposit);
        p.status = PaymentStatus::Pending;
        assert!(matches!(
            p.release(None, at(2024, 2)),
            Err(DealError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_refund_requires_reason() {
        let mut p = payment(PaymentType::Deposit);
        assert!(matches!(
            p.refund("", at(2024, 2)),
            Err(DealError::ValidationError(_))
        ));
        assert!(p.refund("deal fell through", at(2024, 2)).unwrap());
        assert_eq!(p.status, PaymentStatus::Refunded);
    }

    #[test]
    fn test_waive_rules() {
        let mut escrowed = payment(PaymentType::Fee);
        assert!(escrowed.waive("broker fee absorbed").is_err());

        let mut pending = payment(PaymentType::Fee);
        pending.status = PaymentStatus::Pending;
        assert!(pending.waive("broker fee absorbed").unwrap());
        assert!(pending.settles_completion());

        let mut earnout = payment(PaymentType::EarnOut);
        earnout.status = PaymentStatus::Pending;
        assert!(earnout.waive("n/a").is_err());
    }

    #[test]
    fn test_cancelled_deal_blocks_release_before_flagging() {
        let mut deal = deal(0);
        deal.stage = Stage::Cancelled;
        let deposit = payment(PaymentType::Deposit);
        assert!(!deposit.refund_review);
        let unmet = release_condition(&deposit, &ctx(&deal, at(2024, 2))).unwrap();
        assert!(unmet.contains("cancelled"));

        let fee = payment(PaymentType::Fee);
        assert!(release_condition(&fee, &ctx(&deal, at(2024, 2))).is_some());
    }

    #[test]
    fn test_refund_review_flag_skips_terminal() {
        let mut open = payment(PaymentType::Escrow);
        assert!(open.flag_for_refund_review());
        assert!(!open.flag_for_refund_review());
        assert_eq!(open.status, PaymentStatus::Escrowed);

        let mut released = payment(PaymentType::Deposit);
        released.status = PaymentStatus::Released;
        assert!(!released.flag_for_refund_review());
    }
}
