use super::fees::{CardType, ProcessorId};
use super::money::{Amount, Money};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Minimum after-photos when the customer was not present at completion.
pub const MIN_COMPLETION_PHOTOS: usize = 3;

/// Denormalized view of a customer or provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceRequestStatus {
    Open,
    QuoteAccepted,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub request_number: String,
    pub customer: Party,
    pub title: String,
    pub description: String,
    pub vehicle: String,
    pub status: ServiceRequestStatus,
    pub accepted_quote_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
}

impl ServiceRequest {
    pub fn is_closed(&self) -> bool {
        matches!(
            self.status,
            ServiceRequestStatus::Completed | ServiceRequestStatus::Cancelled
        )
    }

    pub fn accept_quote(&mut self, quote_id: Uuid) -> Result<()> {
        if self.status != ServiceRequestStatus::Open {
            return Err(SettlementError::Conflict(format!(
                "Service request {} already has an accepted quote or is closed",
                self.id
            )));
        }
        self.status = ServiceRequestStatus::QuoteAccepted;
        self.accepted_quote_id = Some(quote_id);
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<()> {
        match self.status {
            ServiceRequestStatus::Completed => Ok(()),
            ServiceRequestStatus::QuoteAccepted => {
                self.status = ServiceRequestStatus::Completed;
                self.completed_at = Some(now);
                Ok(())
            }
            other => Err(SettlementError::transition(
                "ServiceRequest",
                format!("{other:?}"),
                "Completed",
            )),
        }
    }

    pub fn cancel(&mut self, now: DateTime<Utc>, reason: Option<String>) -> Result<()> {
        match self.status {
            ServiceRequestStatus::Cancelled => Ok(()),
            ServiceRequestStatus::Completed => Err(SettlementError::transition(
                "ServiceRequest",
                "Completed",
                "Cancelled",
            )),
            _ => {
                self.status = ServiceRequestStatus::Cancelled;
                self.cancelled_at = Some(now);
                self.cancellation_reason = reason;
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteStatus {
    Pending,
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub id: Uuid,
    pub quote_number: String,
    pub service_request_id: Uuid,
    pub provider: Party,
    pub parts_cost: Money,
    pub labor_cost: Money,
    pub fees: Money,
    pub tax: Money,
    pub total: Money,
    pub valid_until: DateTime<Utc>,
    pub status: QuoteStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
}

impl Quote {
    /// Total is derived from its components. It must be positive and no larger than
    /// [`Amount::MAX`].
    pub fn priced_total(parts: Money, labor: Money, fees: Money, tax: Money) -> Result<Money> {
        if [parts, labor, fees, tax].iter().any(|m| m.value().is_sign_negative()) {
            return Err(SettlementError::Validation(
                "Quote components must not be negative".to_string(),
            ));
        }
        let total = parts
            .checked_add(labor)?
            .checked_add(fees)?
            .checked_add(tax)?
            .round2();
        if total.value() <= rust_decimal::Decimal::ZERO {
            return Err(SettlementError::Validation(
                "Quote total must be positive".to_string(),
            ));
        }
        if total.value() > Amount::MAX {
            return Err(SettlementError::Validation(format!(
                "Quote total must not exceed {}",
                Amount::MAX
            )));
        }
        Ok(total)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.valid_until
    }

    pub fn accept(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.status != QuoteStatus::Pending {
            return Err(SettlementError::transition(
                "Quote",
                format!("{:?}", self.status),
                "Accepted",
            ));
        }
        if self.is_expired(now) {
            return Err(SettlementError::Validation(format!(
                "Quote {} expired at {}",
                self.quote_number, self.valid_until
            )));
        }
        self.status = QuoteStatus::Accepted;
        self.accepted_at = Some(now);
        Ok(())
    }

    pub fn reject(&mut self) {
        if self.status == QuoteStatus::Pending {
            self.status = QuoteStatus::Rejected;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkOrderStatus {
    PendingStart,
    InProgress,
    AwaitingApproval,
    Completed,
    Disputed,
    Cancelled,
}

impl WorkOrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkOrderStatus::Completed | WorkOrderStatus::Cancelled)
    }

    pub fn can_transition_to(&self, next: WorkOrderStatus) -> bool {
        use WorkOrderStatus::*;
        matches!(
            (self, next),
            (PendingStart, InProgress)
                | (PendingStart, Cancelled)
                | (InProgress, AwaitingApproval)
                | (InProgress, Cancelled)
                | (InProgress, Disputed)
                | (AwaitingApproval, Completed)
                | (AwaitingApproval, Disputed)
                | (Completed, Disputed)
        )
    }
}

impl fmt::Display for WorkOrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkOrderStatus::PendingStart => "PENDING_START",
            WorkOrderStatus::InProgress => "IN_PROGRESS",
            WorkOrderStatus::AwaitingApproval => "AWAITING_APPROVAL",
            WorkOrderStatus::Completed => "COMPLETED",
            WorkOrderStatus::Disputed => "DISPUTED",
            WorkOrderStatus::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Customer acknowledgments captured at approval time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TermsAcceptance {
    pub service_accepted_at: DateTime<Utc>,
    pub fraud_disclaimer_accepted_at: DateTime<Utc>,
    pub cancellation_policy_accepted_at: DateTime<Utc>,
    pub signature_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub order_number: String,
    pub service_request_id: Uuid,
    pub quote_id: Uuid,
    pub customer: Party,
    pub provider: Party,
    pub processor: ProcessorId,
    pub card_type: CardType,
    pub payment_method_ref: Option<String>,
    pub original_amount: Money,
    pub final_amount: Money,
    pub additional_amount: Money,
    pub status: WorkOrderStatus,
    pub quote_accepted_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub disputed_at: Option<DateTime<Utc>>,
    pub before_photos: Vec<String>,
    pub before_photos_waived: bool,
    pub after_photos: Vec<String>,
    pub client_present: Option<bool>,
    pub completion_notes: Option<String>,
    pub dispute_reason: Option<String>,
    pub terms: Option<TermsAcceptance>,
}

impl WorkOrder {
    pub fn service_started(&self) -> bool {
        self.started_at.is_some()
    }

    /// Moves to `next`, stamping the matching timestamp. Re-entering the current
    /// status is rejected; callers decide whether that is an idempotent no-op.
    pub fn transition(&mut self, next: WorkOrderStatus, now: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SettlementError::transition("WorkOrder", self.status, next));
        }
        match next {
            WorkOrderStatus::AwaitingApproval => self.completed_at = Some(now),
            WorkOrderStatus::Completed => self.approved_at = Some(now),
            WorkOrderStatus::Cancelled => self.cancelled_at = Some(now),
            WorkOrderStatus::Disputed => self.disputed_at = Some(now),
            WorkOrderStatus::PendingStart | WorkOrderStatus::InProgress => {}
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self, photos: Vec<String>, waived: bool, now: DateTime<Utc>) -> Result<()> {
        if self.status != WorkOrderStatus::InProgress {
            return Err(SettlementError::Conflict(format!(
                "Work order {} cannot start while {}",
                self.order_number, self.status
            )));
        }
        if self.service_started() {
            return Err(SettlementError::Conflict(format!(
                "Work order {} has already started",
                self.order_number
            )));
        }
        if photos.is_empty() && !waived {
            return Err(SettlementError::Validation(
                "Before-service photos are required unless explicitly waived".to_string(),
            ));
        }
        self.before_photos = photos;
        self.before_photos_waived = waived;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        photos: Vec<String>,
        client_present: bool,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !client_present && photos.len() < MIN_COMPLETION_PHOTOS {
            return Err(SettlementError::Validation(format!(
                "At least {} completion photos are required when the customer is absent",
                MIN_COMPLETION_PHOTOS
            )));
        }
        self.transition(WorkOrderStatus::AwaitingApproval, now)?;
        self.after_photos = photos;
        self.client_present = Some(client_present);
        self.completion_notes = notes;
        Ok(())
    }

    pub fn apply_supplement(&mut self, additional: Money) {
        self.additional_amount += additional;
        self.final_amount = self.original_amount + self.additional_amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn party(id: &str) -> Party {
        Party {
            id: id.to_string(),
            name: id.to_uppercase(),
            email: None,
        }
    }

    fn work_order(status: WorkOrderStatus) -> WorkOrder {
        let now = Utc::now();
        WorkOrder {
            id: Uuid::new_v4(),
            order_number: "WO-1".into(),
            service_request_id: Uuid::new_v4(),
            quote_id: Uuid::new_v4(),
            customer: party("c1"),
            provider: party("p1"),
            processor: ProcessorId::Stripe,
            card_type: CardType::Credit,
            payment_method_ref: None,
            original_amount: Money::new(dec!(100)),
            final_amount: Money::new(dec!(100)),
            additional_amount: Money::ZERO,
            status,
            quote_accepted_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
            approved_at: None,
            cancelled_at: None,
            disputed_at: None,
            before_photos: vec![],
            before_photos_waived: false,
            after_photos: vec![],
            client_present: None,
            completion_notes: None,
            dispute_reason: None,
            terms: None,
        }
    }

    #[test]
    fn test_work_order_transitions() {
        use WorkOrderStatus::*;
        assert!(PendingStart.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(AwaitingApproval));
        assert!(AwaitingApproval.can_transition_to(Completed));
        assert!(Completed.can_transition_to(Disputed));
        assert!(!PendingStart.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(InProgress));
        assert!(!AwaitingApproval.can_transition_to(Cancelled));
    }

    #[test]
    fn test_completion_requires_photos_when_absent() {
        let mut wo = work_order(WorkOrderStatus::InProgress);
        let err = wo
            .mark_completed(vec!["a".into(), "b".into()], false, None, Utc::now())
            .unwrap_err();
        assert!(matches!(err, SettlementError::Validation(_)));
        assert_eq!(wo.status, WorkOrderStatus::InProgress);

        wo.mark_completed(
            vec!["a".into(), "b".into(), "c".into()],
            false,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(wo.status, WorkOrderStatus::AwaitingApproval);
        assert!(wo.completed_at.is_some());
    }

    #[test]
    fn test_completion_without_photos_when_present() {
        let mut wo = work_order(WorkOrderStatus::InProgress);
        wo.mark_completed(vec![], true, Some("done".into()), Utc::now())
            .unwrap();
        assert_eq!(wo.client_present, Some(true));
    }

    #[test]
    fn test_start_requires_photos_or_waiver() {
        let mut wo = work_order(WorkOrderStatus::InProgress);
        assert!(matches!(
            wo.start(vec![], false, Utc::now()),
            Err(SettlementError::Validation(_))
        ));
        wo.start(vec![], true, Utc::now()).unwrap();
        assert!(wo.service_started());
        assert!(matches!(
            wo.start(vec!["x".into()], false, Utc::now()),
            Err(SettlementError::Conflict(_))
        ));
    }

    #[test]
    fn test_supplement_increases_final_amount() {
        let mut wo = work_order(WorkOrderStatus::InProgress);
        wo.apply_supplement(Money::new(dec!(50)));
        assert_eq!(wo.final_amount, Money::new(dec!(150)));
        assert_eq!(wo.additional_amount, Money::new(dec!(50)));
        assert_eq!(wo.original_amount, Money::new(dec!(100)));
    }

    #[test]
    fn test_quote_acceptance_rules() {
        let now = Utc::now();
        let mut quote = Quote {
            id: Uuid::new_v4(),
            quote_number: "Q-1".into(),
            service_request_id: Uuid::new_v4(),
            provider: party("p1"),
            parts_cost: Money::new(dec!(80)),
            labor_cost: Money::new(dec!(100)),
            fees: Money::ZERO,
            tax: Money::new(dec!(20)),
            total: Money::new(dec!(200)),
            valid_until: now - chrono::Duration::minutes(1),
            status: QuoteStatus::Pending,
            created_at: now,
            accepted_at: None,
        };
        assert!(matches!(
            quote.accept(now),
            Err(SettlementError::Validation(_))
        ));
        quote.valid_until = now + chrono::Duration::days(1);
        quote.accept(now).unwrap();
        assert!(matches!(
            quote.accept(now),
            Err(SettlementError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_priced_total() {
        let total = Quote::priced_total(
            Money::new(dec!(80)),
            Money::new(dec!(100)),
            Money::ZERO,
            Money::new(dec!(20)),
        )
        .unwrap();
        assert_eq!(total, Money::new(dec!(200)));
        assert!(
            Quote::priced_total(Money::ZERO, Money::ZERO, Money::ZERO, Money::ZERO).is_err()
        );
    }

    #[test]
    fn test_priced_total_rejects_oversized_components() {
        let huge = Money::new(rust_decimal::Decimal::MAX);
        assert!(matches!(
            Quote::priced_total(huge, huge, Money::ZERO, Money::ZERO),
            Err(SettlementError::Validation(_))
        ));
        let half = Money::new(dec!(600000000));
        assert!(matches!(
            Quote::priced_total(half, half, Money::ZERO, Money::ZERO),
            Err(SettlementError::Validation(_))
        ));
    }
}
