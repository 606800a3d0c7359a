use super::fees::{CardType, ProcessorId};
use super::money::Money;
use super::negotiation::{
    CancellationRequest, CancellationResolution, SupplementRequest, SupplementStatus,
};
use super::payment::Payment;
use super::receipt::Receipt;
use super::work_order::{Quote, ServiceRequest, WorkOrder};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// A set of record writes applied all-or-nothing by [`SettlementStore::commit`].
#[derive(Debug, Clone, Default)]
pub struct UnitOfWork {
    pub service_requests: Vec<ServiceRequest>,
    pub quotes: Vec<Quote>,
    pub work_orders: Vec<WorkOrder>,
    pub payments: Vec<Payment>,
    pub supplements: Vec<SupplementRequest>,
    pub cancellations: Vec<CancellationRequest>,
    pub receipts: Vec<Receipt>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn service_request(mut self, record: ServiceRequest) -> Self {
        self.service_requests.push(record);
        self
    }

    pub fn quote(mut self, record: Quote) -> Self {
        self.quotes.push(record);
        self
    }

    pub fn work_order(mut self, record: WorkOrder) -> Self {
        self.work_orders.push(record);
        self
    }

    pub fn payment(mut self, record: Payment) -> Self {
        self.payments.push(record);
        self
    }

    pub fn supplement(mut self, record: SupplementRequest) -> Self {
        self.supplements.push(record);
        self
    }

    pub fn cancellation(mut self, record: CancellationRequest) -> Self {
        self.cancellations.push(record);
        self
    }

    pub fn receipt(mut self, record: Receipt) -> Self {
        self.receipts.push(record);
        self
    }
}

/// Persistence port for every settlement record.
///
/// `commit` must validate the cross-record invariants (one active payment per
/// work order, one receipt per payment, one accepted quote per service request)
/// against the state the unit would produce, and apply all writes or none.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn service_request(&self, id: Uuid) -> Result<Option<ServiceRequest>>;
    async fn quote(&self, id: Uuid) -> Result<Option<Quote>>;
    async fn quotes_for_request(&self, service_request_id: Uuid) -> Result<Vec<Quote>>;
    async fn work_order(&self, id: Uuid) -> Result<Option<WorkOrder>>;
    async fn work_order_for_request(&self, service_request_id: Uuid) -> Result<Option<WorkOrder>>;
    async fn payment(&self, id: Uuid) -> Result<Option<Payment>>;
    async fn payment_by_hold_ref(&self, hold_ref: &str) -> Result<Option<Payment>>;
    async fn payments_for_work_order(&self, work_order_id: Uuid) -> Result<Vec<Payment>>;
    /// The single `PENDING`/`AUTHORIZED` payment of a work order, if any.
    async fn active_payment(&self, work_order_id: Uuid) -> Result<Option<Payment>>;
    async fn supplement(&self, id: Uuid) -> Result<Option<SupplementRequest>>;
    async fn open_supplement(&self, work_order_id: Uuid) -> Result<Option<SupplementRequest>>;
    async fn cancellation(&self, id: Uuid) -> Result<Option<CancellationRequest>>;
    async fn open_cancellation(&self, work_order_id: Uuid) -> Result<Option<CancellationRequest>>;
    async fn receipt_for_payment(&self, payment_id: Uuid) -> Result<Option<Receipt>>;
    async fn receipts(&self) -> Result<Vec<Receipt>>;
    async fn expired_supplements(&self, now: DateTime<Utc>) -> Result<Vec<SupplementRequest>>;
    async fn expired_cancellations(&self, now: DateTime<Utc>) -> Result<Vec<CancellationRequest>>;
    async fn commit(&self, unit: UnitOfWork) -> Result<()>;
}

pub type SettlementStoreRef = Arc<dyn SettlementStore>;

/// Gateway-agnostic hold status. Adapters translate their own vocabulary into this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GatewayStatus {
    /// Created but not yet confirmed by the card network.
    Pending,
    Authorized,
    Captured,
    Voided,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerProfile {
    pub customer_id: String,
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HoldRequest {
    pub amount: Money,
    pub currency: String,
    pub customer_ref: String,
    pub method_ref: Option<String>,
    pub marketplace_fee: Money,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldResponse {
    pub hold_ref: String,
    pub status: GatewayStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureResponse {
    pub charge_ref: Option<String>,
    pub status: GatewayStatus,
    pub amount_captured: Money,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundResponse {
    pub refund_ref: String,
    pub amount: Money,
}

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Uniform contract every card processor adapter implements.
///
/// Adapters never swallow errors and never leak processor-specific statuses.
/// An adapter without credentials must fail every remote call with
/// [`GatewayError::NotConfigured`] before doing any I/O.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    fn id(&self) -> ProcessorId;
    fn display_name(&self) -> &str;
    fn is_configured(&self) -> bool;
    fn supports_card_type(&self, card_type: CardType) -> bool;

    async fn resolve_customer(&self, profile: &CustomerProfile) -> GatewayResult<String>;
    async fn create_hold(&self, request: HoldRequest) -> GatewayResult<HoldResponse>;
    async fn capture(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
    ) -> GatewayResult<CaptureResponse>;
    async fn void(&self, hold_ref: &str) -> GatewayResult<GatewayStatus>;
    async fn refund(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
        reason: Option<&str>,
    ) -> GatewayResult<RefundResponse>;
    async fn query_status(&self, hold_ref: &str) -> GatewayResult<GatewayStatus>;
}

/// Events published to the notification/chat system.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    PaymentAuthorized {
        work_order_id: Uuid,
        payment_id: Uuid,
        amount: Money,
    },
    PaymentCaptured {
        work_order_id: Uuid,
        payment_id: Uuid,
        amount: Money,
    },
    PaymentVoided {
        work_order_id: Uuid,
        payment_id: Uuid,
    },
    PaymentRefunded {
        work_order_id: Uuid,
        payment_id: Uuid,
        amount: Money,
    },
    PaymentFailed {
        work_order_id: Uuid,
        payment_id: Uuid,
        reason: String,
    },
    SupplementRequested {
        work_order_id: Uuid,
        supplement_id: Uuid,
        amount: Money,
    },
    SupplementResolved {
        work_order_id: Uuid,
        supplement_id: Uuid,
        outcome: SupplementStatus,
    },
    CancellationRequested {
        work_order_id: Uuid,
        cancellation_id: Uuid,
    },
    CancellationResolved {
        work_order_id: Uuid,
        resolution: CancellationResolution,
    },
    ServiceCompleted {
        work_order_id: Uuid,
    },
    ReceiptIssued {
        work_order_id: Uuid,
        receipt_number: String,
    },
    IssueReported {
        work_order_id: Uuid,
        reason: String,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::PaymentAuthorized { .. } => "payment_authorized",
            DomainEvent::PaymentCaptured { .. } => "payment_captured",
            DomainEvent::PaymentVoided { .. } => "payment_voided",
            DomainEvent::PaymentRefunded { .. } => "payment_refunded",
            DomainEvent::PaymentFailed { .. } => "payment_failed",
            DomainEvent::SupplementRequested { .. } => "supplement_requested",
            DomainEvent::SupplementResolved { .. } => "supplement_resolved",
            DomainEvent::CancellationRequested { .. } => "cancellation_requested",
            DomainEvent::CancellationResolved { .. } => "cancellation_resolved",
            DomainEvent::ServiceCompleted { .. } => "service_completed",
            DomainEvent::ReceiptIssued { .. } => "receipt_issued",
            DomainEvent::IssueReported { .. } => "issue_reported",
        }
    }
}

/// Fire-and-forget outlet for [`DomainEvent`]s. Errors are logged by the caller.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: DomainEvent) -> Result<()>;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}
