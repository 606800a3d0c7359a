use crate::domain::negotiation::{CancellationRequest, SupplementRequest};
use crate::domain::payment::Payment;
use crate::domain::ports::{SettlementStore, UnitOfWork};
use crate::domain::receipt::Receipt;
use crate::domain::work_order::{Quote, QuoteStatus, ServiceRequest, WorkOrder};
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Complete record set plus the invariant checks every backend shares.
#[derive(Debug, Default, Clone)]
pub(crate) struct SettlementState {
    pub service_requests: HashMap<Uuid, ServiceRequest>,
    pub quotes: HashMap<Uuid, Quote>,
    pub work_orders: HashMap<Uuid, WorkOrder>,
    pub payments: HashMap<Uuid, Payment>,
    pub supplements: HashMap<Uuid, SupplementRequest>,
    pub cancellations: HashMap<Uuid, CancellationRequest>,
    /// Keyed by payment id: at most one receipt per payment.
    pub receipts: HashMap<Uuid, Receipt>,
}

impl SettlementState {
    /// Checks the state `unit` would produce without touching `self`.
    pub fn validate(&self, unit: &UnitOfWork) -> Result<()> {
        let touched: HashSet<Uuid> = unit.payments.iter().map(|p| p.work_order_id).collect();
        for work_order_id in touched {
            let mut merged: HashMap<Uuid, &Payment> = self
                .payments
                .values()
                .filter(|p| p.work_order_id == work_order_id)
                .map(|p| (p.id, p))
                .collect();
            for p in unit.payments.iter().filter(|p| p.work_order_id == work_order_id) {
                merged.insert(p.id, p);
            }
            let active = merged.values().filter(|p| p.status.is_active()).count();
            if active > 1 {
                return Err(SettlementError::Conflict(format!(
                    "Work order {} already has an active payment",
                    work_order_id
                )));
            }
        }

        let mut seen_payments = HashSet::new();
        for receipt in &unit.receipts {
            if !seen_payments.insert(receipt.payment_id) {
                return Err(SettlementError::Conflict(format!(
                    "Duplicate receipt for payment {}",
                    receipt.payment_id
                )));
            }
            if let Some(existing) = self.receipts.get(&receipt.payment_id)
                && existing.id != receipt.id
            {
                return Err(SettlementError::Conflict(format!(
                    "Payment {} already has receipt {}",
                    receipt.payment_id, existing.receipt_number
                )));
            }
            if self
                .receipts
                .values()
                .any(|r| r.receipt_number == receipt.receipt_number && r.id != receipt.id)
            {
                return Err(SettlementError::Conflict(format!(
                    "Receipt number {} already issued",
                    receipt.receipt_number
                )));
            }
        }

        let touched: HashSet<Uuid> = unit.quotes.iter().map(|q| q.service_request_id).collect();
        for service_request_id in touched {
            let mut merged: HashMap<Uuid, &Quote> = self
                .quotes
                .values()
                .filter(|q| q.service_request_id == service_request_id)
                .map(|q| (q.id, q))
                .collect();
            for q in unit
                .quotes
                .iter()
                .filter(|q| q.service_request_id == service_request_id)
            {
                merged.insert(q.id, q);
            }
            let accepted = merged
                .values()
                .filter(|q| q.status == QuoteStatus::Accepted)
                .count();
            if accepted > 1 {
                return Err(SettlementError::Conflict(format!(
                    "Service request {} already has an accepted quote",
                    service_request_id
                )));
            }
        }

        for wo in &unit.work_orders {
            if let Some(existing) = self
                .work_orders
                .values()
                .find(|w| w.service_request_id == wo.service_request_id)
                && existing.id != wo.id
            {
                return Err(SettlementError::Conflict(format!(
                    "Service request {} already has work order {}",
                    wo.service_request_id, existing.order_number
                )));
            }
        }

        Ok(())
    }

    pub fn apply(&mut self, unit: UnitOfWork) {
        for r in unit.service_requests {
            self.service_requests.insert(r.id, r);
        }
        for r in unit.quotes {
            self.quotes.insert(r.id, r);
        }
        for r in unit.work_orders {
            self.work_orders.insert(r.id, r);
        }
        for r in unit.payments {
            self.payments.insert(r.id, r);
        }
        for r in unit.supplements {
            self.supplements.insert(r.id, r);
        }
        for r in unit.cancellations {
            self.cancellations.insert(r.id, r);
        }
        for r in unit.receipts {
            self.receipts.insert(r.payment_id, r);
        }
    }

    pub fn quotes_for_request(&self, service_request_id: Uuid) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .quotes
            .values()
            .filter(|q| q.service_request_id == service_request_id)
            .cloned()
            .collect();
        quotes.sort_by_key(|q| q.created_at);
        quotes
    }

    pub fn work_order_for_request(&self, service_request_id: Uuid) -> Option<WorkOrder> {
        self.work_orders
            .values()
            .find(|w| w.service_request_id == service_request_id)
            .cloned()
    }

    pub fn payment_by_hold_ref(&self, hold_ref: &str) -> Option<Payment> {
        self.payments
            .values()
            .find(|p| p.hold_ref.as_deref() == Some(hold_ref))
            .cloned()
    }

    pub fn payments_for_work_order(&self, work_order_id: Uuid) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .payments
            .values()
            .filter(|p| p.work_order_id == work_order_id)
            .cloned()
            .collect();
        payments.sort_by_key(|p| p.created_at);
        payments
    }

    pub fn active_payment(&self, work_order_id: Uuid) -> Option<Payment> {
        self.payments
            .values()
            .find(|p| p.work_order_id == work_order_id && p.status.is_active())
            .cloned()
    }

    pub fn open_supplement(&self, work_order_id: Uuid) -> Option<SupplementRequest> {
        self.supplements
            .values()
            .find(|s| s.work_order_id == work_order_id && s.status.is_open())
            .cloned()
    }

    pub fn open_cancellation(&self, work_order_id: Uuid) -> Option<CancellationRequest> {
        self.cancellations
            .values()
            .find(|c| c.work_order_id == work_order_id && c.is_open())
            .cloned()
    }

    pub fn receipts(&self) -> Vec<Receipt> {
        let mut receipts: Vec<Receipt> = self.receipts.values().cloned().collect();
        receipts.sort_by_key(|r| r.generated_at);
        receipts
    }

    pub fn expired_supplements(&self, now: DateTime<Utc>) -> Vec<SupplementRequest> {
        self.supplements
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect()
    }

    pub fn expired_cancellations(&self, now: DateTime<Utc>) -> Vec<CancellationRequest> {
        self.cancellations
            .values()
            .filter(|c| c.is_expired(now))
            .cloned()
            .collect()
    }
}

/// A thread-safe in-memory settlement store.
///
/// All records live behind one `RwLock`, so `commit` validates and applies a
/// unit of work under a single write guard. Ideal for tests and local runs.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    state: Arc<RwLock<SettlementState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettlementStore for InMemoryStore {
    async fn service_request(&self, id: Uuid) -> Result<Option<ServiceRequest>> {
        Ok(self.state.read().await.service_requests.get(&id).cloned())
    }

    async fn quote(&self, id: Uuid) -> Result<Option<Quote>> {
        Ok(self.state.read().await.quotes.get(&id).cloned())
    }

    async fn quotes_for_request(&self, service_request_id: Uuid) -> Result<Vec<Quote>> {
        Ok(self.state.read().await.quotes_for_request(service_request_id))
    }

    async fn work_order(&self, id: Uuid) -> Result<Option<WorkOrder>> {
        Ok(self.state.read().await.work_orders.get(&id).cloned())
    }

    async fn work_order_for_request(&self, service_request_id: Uuid) -> Result<Option<WorkOrder>> {
        Ok(self.state.read().await.work_order_for_request(service_request_id))
    }

    async fn payment(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payments.get(&id).cloned())
    }

    async fn payment_by_hold_ref(&self, hold_ref: &str) -> Result<Option<Payment>> {
        Ok(self.state.read().await.payment_by_hold_ref(hold_ref))
    }

    async fn payments_for_work_order(&self, work_order_id: Uuid) -> Result<Vec<Payment>> {
        Ok(self.state.read().await.payments_for_work_order(work_order_id))
    }

    async fn active_payment(&self, work_order_id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.read().await.active_payment(work_order_id))
    }

    async fn supplement(&self, id: Uuid) -> Result<Option<SupplementRequest>> {
        Ok(self.state.read().await.supplements.get(&id).cloned())
    }

    async fn open_supplement(&self, work_order_id: Uuid) -> Result<Option<SupplementRequest>> {
        Ok(self.state.read().await.open_supplement(work_order_id))
    }

    async fn cancellation(&self, id: Uuid) -> Result<Option<CancellationRequest>> {
        Ok(self.state.read().await.cancellations.get(&id).cloned())
    }

    async fn open_cancellation(&self, work_order_id: Uuid) -> Result<Option<CancellationRequest>> {
        Ok(self.state.read().await.open_cancellation(work_order_id))
    }

    async fn receipt_for_payment(&self, payment_id: Uuid) -> Result<Option<Receipt>> {
        Ok(self.state.read().await.receipts.get(&payment_id).cloned())
    }

    async fn receipts(&self) -> Result<Vec<Receipt>> {
        Ok(self.state.read().await.receipts())
    }

    async fn expired_supplements(&self, now: DateTime<Utc>) -> Result<Vec<SupplementRequest>> {
        Ok(self.state.read().await.expired_supplements(now))
    }

    async fn expired_cancellations(&self, now: DateTime<Utc>) -> Result<Vec<CancellationRequest>> {
        Ok(self.state.read().await.expired_cancellations(now))
    }

    async fn commit(&self, unit: UnitOfWork) -> Result<()> {
        let mut state = self.state.write().await;
        state.validate(&unit)?;
        state.apply(unit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::fees::{CardType, FeeBreakdown, ProcessorId};
    use crate::domain::money::Money;
    use crate::domain::payment::PaymentStatus;
    use crate::domain::work_order::{Party, ServiceRequestStatus};
    use rust_decimal_macros::dec;

    fn payment(work_order_id: Uuid) -> Payment {
        Payment::reserve(
            Uuid::new_v4(),
            "PAY-1".into(),
            work_order_id,
            "c1".into(),
            "p1".into(),
            ProcessorId::Stripe,
            CardType::Credit,
            FeeBreakdown::compute(Money::new(dec!(100)), ProcessorId::Stripe, CardType::Credit)
                .unwrap(),
            Utc::now(),
        )
    }

    fn service_request() -> ServiceRequest {
        ServiceRequest {
            id: Uuid::new_v4(),
            request_number: "SR-1".into(),
            customer: Party {
                id: "c1".into(),
                name: "Customer".into(),
                email: None,
            },
            title: "Brakes".into(),
            description: String::new(),
            vehicle: "2015 Civic".into(),
            status: ServiceRequestStatus::Open,
            accepted_quote_id: None,
            created_at: Utc::now(),
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        }
    }

    #[tokio::test]
    async fn test_commit_and_read_back() {
        let store = InMemoryStore::new();
        let wo_id = Uuid::new_v4();
        let p = payment(wo_id);

        store
            .commit(UnitOfWork::new().payment(p.clone()))
            .await
            .unwrap();

        assert_eq!(store.payment(p.id).await.unwrap(), Some(p.clone()));
        assert_eq!(store.active_payment(wo_id).await.unwrap(), Some(p));
        assert!(store.payment(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_second_active_payment_is_rejected() {
        let store = InMemoryStore::new();
        let wo_id = Uuid::new_v4();
        store
            .commit(UnitOfWork::new().payment(payment(wo_id)))
            .await
            .unwrap();

        let result = store.commit(UnitOfWork::new().payment(payment(wo_id))).await;
        assert!(matches!(result, Err(SettlementError::Conflict(_))));
        assert_eq!(store.payments_for_work_order(wo_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_supersede_in_one_unit_is_allowed() {
        let store = InMemoryStore::new();
        let wo_id = Uuid::new_v4();
        let mut old = payment(wo_id);
        store
            .commit(UnitOfWork::new().payment(old.clone()))
            .await
            .unwrap();

        old.transition(PaymentStatus::Authorized, Utc::now()).unwrap();
        old.transition(PaymentStatus::Cancelled, Utc::now()).unwrap();
        let successor = payment(wo_id);
        store
            .commit(UnitOfWork::new().payment(old).payment(successor.clone()))
            .await
            .unwrap();

        assert_eq!(
            store.active_payment(wo_id).await.unwrap().map(|p| p.id),
            Some(successor.id)
        );
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let store = InMemoryStore::new();
        let wo_id = Uuid::new_v4();
        store
            .commit(UnitOfWork::new().payment(payment(wo_id)))
            .await
            .unwrap();

        let sr = service_request();
        let result = store
            .commit(
                UnitOfWork::new()
                    .service_request(sr.clone())
                    .payment(payment(wo_id)),
            )
            .await;

        assert!(result.is_err());
        assert!(store.service_request(sr.id).await.unwrap().is_none());
    }
}
