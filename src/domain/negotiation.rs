//! Short-lived negotiation records attached to a work order: supplements
//! (provider asks for more money) and cancellations (customer wants out).

use super::fees::CancellationFee;
use super::money::Money;
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SUPPLEMENT_RESPONSE_HOURS: i64 = 24;
pub const PROVIDER_VALIDATION_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupplementStatus {
    Requested,
    /// Customer approved; the re-authorization is in flight.
    Approving,
    Approved,
    Rejected,
    TimedOut,
    /// Customer approved but the gateway declined the larger hold.
    HoldFailed,
}

impl SupplementStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SupplementStatus::Requested | SupplementStatus::Approving)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplementRequest {
    pub id: Uuid,
    pub supplement_number: String,
    pub work_order_id: Uuid,
    pub provider_id: String,
    pub description: String,
    pub reason: Option<String>,
    pub additional_amount: Money,
    pub status: SupplementStatus,
    pub requested_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub customer_note: Option<String>,
    pub payment_id: Option<Uuid>,
}

impl SupplementRequest {
    pub fn new(
        supplement_number: String,
        work_order_id: Uuid,
        provider_id: String,
        description: String,
        reason: Option<String>,
        additional_amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            supplement_number,
            work_order_id,
            provider_id,
            description,
            reason,
            additional_amount,
            status: SupplementStatus::Requested,
            requested_at: now,
            deadline: now + Duration::hours(SUPPLEMENT_RESPONSE_HOURS),
            responded_at: None,
            customer_note: None,
            payment_id: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SupplementStatus::Requested && now > self.deadline
    }

    pub fn resolve(&mut self, next: SupplementStatus, now: DateTime<Utc>) -> Result<()> {
        use SupplementStatus::*;
        let allowed = matches!(
            (self.status, next),
            (Requested, Approving)
                | (Requested, Rejected)
                | (Requested, TimedOut)
                | (Approving, Approved)
                | (Approving, HoldFailed)
                | (Approving, Requested)
        );
        if !allowed {
            return Err(SettlementError::transition(
                "Supplement",
                format!("{:?}", self.status),
                format!("{:?}", next),
            ));
        }
        if next != Requested {
            self.responded_at = Some(now);
        }
        self.status = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationStatus {
    PendingProviderValidation,
    Completed,
    /// Provider reported costs; an admin settles the dispute.
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationResolution {
    CancelledBeforeStart,
    ProviderConfirmedNoCosts,
    ProviderReportedCosts,
    ProviderTimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancellationRequest {
    pub id: Uuid,
    pub work_order_id: Uuid,
    pub customer_id: String,
    pub reason: Option<String>,
    pub fee: CancellationFee,
    pub status: CancellationStatus,
    pub requested_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub resolution: Option<CancellationResolution>,
    pub reported_costs: Option<Money>,
    pub provider_note: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl CancellationRequest {
    pub fn new(
        work_order_id: Uuid,
        customer_id: String,
        reason: Option<String>,
        fee: CancellationFee,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            work_order_id,
            customer_id,
            reason,
            fee,
            status: CancellationStatus::PendingProviderValidation,
            requested_at: now,
            deadline: now + Duration::hours(PROVIDER_VALIDATION_HOURS),
            resolution: None,
            reported_costs: None,
            provider_note: None,
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == CancellationStatus::PendingProviderValidation
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_open() && now > self.deadline
    }

    pub fn resolve(
        &mut self,
        resolution: CancellationResolution,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(SettlementError::Conflict(format!(
                "Cancellation request {} is already resolved",
                self.id
            )));
        }
        self.status = match resolution {
            CancellationResolution::ProviderReportedCosts => CancellationStatus::Escalated,
            _ => CancellationStatus::Completed,
        };
        self.resolution = Some(resolution);
        self.resolved_at = Some(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_supplement_deadline_and_expiry() {
        let now = Utc::now();
        let s = SupplementRequest::new(
            "SUP-1".into(),
            Uuid::new_v4(),
            "p1".into(),
            "brake pads".into(),
            None,
            Money::new(dec!(50)),
            now,
        );
        assert_eq!(s.deadline, now + Duration::hours(24));
        assert!(!s.is_expired(now + Duration::hours(24)));
        assert!(s.is_expired(now + Duration::hours(24) + Duration::seconds(1)));
    }

    #[test]
    fn test_supplement_resolution_rules() {
        let now = Utc::now();
        let mut s = SupplementRequest::new(
            "SUP-1".into(),
            Uuid::new_v4(),
            "p1".into(),
            "x".into(),
            None,
            Money::new(dec!(5)),
            now,
        );
        s.resolve(SupplementStatus::Approving, now).unwrap();
        assert!(s.status.is_open());
        assert!(s.resolve(SupplementStatus::TimedOut, now).is_err());
        s.resolve(SupplementStatus::Approved, now).unwrap();
        assert!(!s.status.is_open());
        assert!(s.resolve(SupplementStatus::Rejected, now).is_err());
    }

    #[test]
    fn test_cancellation_resolution() {
        let now = Utc::now();
        let mut c = CancellationRequest::new(
            Uuid::new_v4(),
            "c1".into(),
            None,
            CancellationFee::RequiresProviderValidation,
            now,
        );
        assert!(c.is_open());
        c.resolve(CancellationResolution::ProviderReportedCosts, now)
            .unwrap();
        assert_eq!(c.status, CancellationStatus::Escalated);
        assert!(c.resolve(CancellationResolution::ProviderTimedOut, now).is_err());
    }
}
