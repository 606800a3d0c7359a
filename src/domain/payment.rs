use super::fees::{CardType, FeeBreakdown, ProcessorId};
use super::money::Money;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Cancelled,
    Refunded,
    /// The gateway declined the hold; the attempt is over.
    Failed,
}

impl PaymentStatus {
    /// `PENDING` and `AUTHORIZED` hold (or may hold) customer funds.
    pub fn is_active(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Authorized)
    }

    /// Single-step edges only; no state is ever skipped.
    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Authorized)
                | (Pending, Failed)
                | (Authorized, Captured)
                | (Authorized, Cancelled)
                | (Captured, Refunded)
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Authorized => "AUTHORIZED",
            PaymentStatus::Captured => "CAPTURED",
            PaymentStatus::Cancelled => "CANCELLED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One settlement attempt against a work order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub payment_number: String,
    pub work_order_id: Uuid,
    pub customer_id: String,
    pub provider_id: String,
    pub processor: ProcessorId,
    pub card_type: CardType,
    pub fees: FeeBreakdown,
    pub status: PaymentStatus,
    /// Sent with every hold request so a retried call never opens a second hold.
    pub idempotency_key: String,
    pub customer_ref: Option<String>,
    pub hold_ref: Option<String>,
    pub charge_ref: Option<String>,
    pub predecessor_id: Option<Uuid>,
    pub superseded_by: Option<Uuid>,
    pub failure_reason: Option<String>,
    pub refund_amount: Option<Money>,
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub authorized_at: Option<DateTime<Utc>>,
    pub capture_requested_at: Option<DateTime<Utc>>,
    pub captured_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Payment {
    #[allow(clippy::too_many_arguments)]
    pub fn reserve(
        id: Uuid,
        payment_number: String,
        work_order_id: Uuid,
        customer_id: String,
        provider_id: String,
        processor: ProcessorId,
        card_type: CardType,
        fees: FeeBreakdown,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payment_number,
            work_order_id,
            customer_id,
            provider_id,
            processor,
            card_type,
            fees,
            status: PaymentStatus::Pending,
            idempotency_key: format!("hold-{id}"),
            customer_ref: None,
            hold_ref: None,
            charge_ref: None,
            predecessor_id: None,
            superseded_by: None,
            failure_reason: None,
            refund_amount: None,
            refund_reason: None,
            created_at: now,
            authorized_at: None,
            capture_requested_at: None,
            captured_at: None,
            cancelled_at: None,
            refunded_at: None,
            failed_at: None,
        }
    }

    pub fn total_amount(&self) -> Money {
        self.fees.total_amount
    }

    pub fn require_status(&self, expected: PaymentStatus) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(SettlementError::Conflict(format!(
                "Payment {} is {}, expected {}",
                self.payment_number, self.status, expected
            )))
        }
    }

    pub fn transition(&mut self, next: PaymentStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SettlementError::transition("Payment", self.status, next));
        }
        match next {
            PaymentStatus::Authorized => self.authorized_at = Some(now),
            PaymentStatus::Captured => self.captured_at = Some(now),
            PaymentStatus::Cancelled => self.cancelled_at = Some(now),
            PaymentStatus::Refunded => self.refunded_at = Some(now),
            PaymentStatus::Failed => self.failed_at = Some(now),
            PaymentStatus::Pending => {}
        }
        self.status = next;
        Ok(())
    }

    /// Walks forward along the happy path until `target` is reached.
    ///
    /// Used when a confirmation arrives for a state further ahead than the local one,
    /// e.g. a capture webhook for a payment whose hold confirmation never arrived.
    /// Returns `false` when already at `target`.
    pub fn advance_to(&mut self, target: PaymentStatus, now: DateTime<Utc>) -> Result<bool> {
        if self.status == target {
            return Ok(false);
        }
        let path: &[PaymentStatus] = match (self.status, target) {
            (PaymentStatus::Pending, PaymentStatus::Captured) => {
                &[PaymentStatus::Authorized, PaymentStatus::Captured]
            }
            (PaymentStatus::Authorized, PaymentStatus::Refunded) => {
                &[PaymentStatus::Captured, PaymentStatus::Refunded]
            }
            _ => std::slice::from_ref(&target),
        };
        for &step in path {
            self.transition(step, now)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment() -> Payment {
        Payment::reserve(
            Uuid::new_v4(),
            "PAY-1".into(),
            Uuid::new_v4(),
            "c1".into(),
            "p1".into(),
            ProcessorId::Stripe,
            CardType::Credit,
            FeeBreakdown::compute(Money::new(dec!(200)), ProcessorId::Stripe, CardType::Credit)
                .unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_payment_happy_path() {
        let mut p = payment();
        assert!(p.status.is_active());
        p.transition(PaymentStatus::Authorized, Utc::now()).unwrap();
        p.transition(PaymentStatus::Captured, Utc::now()).unwrap();
        p.transition(PaymentStatus::Refunded, Utc::now()).unwrap();
        assert!(!p.status.is_active());
        assert!(p.refunded_at.is_some());
    }

    #[test]
    fn test_payment_no_skipping() {
        let mut p = payment();
        let err = p.transition(PaymentStatus::Captured, Utc::now()).unwrap_err();
        assert!(matches!(err, SettlementError::InvalidTransition { .. }));
        assert_eq!(p.status, PaymentStatus::Pending);
    }

    #[test]
    fn test_terminal_states_do_not_reenter() {
        for terminal in [PaymentStatus::Cancelled, PaymentStatus::Refunded, PaymentStatus::Failed] {
            for next in [
                PaymentStatus::Pending,
                PaymentStatus::Authorized,
                PaymentStatus::Captured,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_advance_walks_intermediate_states() {
        let mut p = payment();
        assert!(p.advance_to(PaymentStatus::Captured, Utc::now()).unwrap());
        assert_eq!(p.status, PaymentStatus::Captured);
        assert!(p.authorized_at.is_some());
        assert!(!p.advance_to(PaymentStatus::Captured, Utc::now()).unwrap());
    }

    #[test]
    fn test_advance_rejects_backwards() {
        let mut p = payment();
        p.advance_to(PaymentStatus::Captured, Utc::now()).unwrap();
        assert!(p.advance_to(PaymentStatus::Authorized, Utc::now()).is_err());
        assert!(p.advance_to(PaymentStatus::Cancelled, Utc::now()).is_err());
    }
}
