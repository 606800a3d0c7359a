//! The settlement state machine.
//!
//! Every operation follows the same shape: take the per-record lock, check and
//! reserve local state, release the lock, talk to the gateway, then re-take the lock
//! and commit the outcome as one [`UnitOfWork`]. No lock is held across a gateway call.

mod authorization;
mod cancellation;
mod settlement;
mod supplement;

use crate::application::commands::{
    ApprovedQuoteDetails, DEFAULT_QUOTE_VALIDITY_DAYS, FinancialSummary, NewQuote,
    NewServiceRequest,
};
use crate::application::locks::KeyedLocks;
use crate::application::receipt::{ReceiptDraft, ReceiptGenerator};
use crate::domain::fees::{CardType, ProcessorComparison, compare_processors};
use crate::domain::money::{Amount, Money};
use crate::domain::negotiation::{CancellationRequest, SupplementRequest};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{
    Clock, DomainEvent, GatewayStatus, NotificationSink, SettlementStoreRef, UnitOfWork,
};
use crate::domain::receipt::Receipt;
use crate::domain::reference_number;
use crate::domain::work_order::{
    Quote, QuoteStatus, ServiceRequest, ServiceRequestStatus, WorkOrder, WorkOrderStatus,
};
use crate::error::{GatewayError, Result, SettlementError};
use crate::infrastructure::registry::ProcessorRegistry;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "usd";

pub struct SettlementOrchestrator {
    store: SettlementStoreRef,
    processors: ProcessorRegistry,
    notifier: Arc<dyn NotificationSink>,
    clock: Arc<dyn Clock>,
    receipts: ReceiptGenerator,
    locks: KeyedLocks,
    currency: String,
}

impl SettlementOrchestrator {
    pub fn new(
        store: SettlementStoreRef,
        processors: ProcessorRegistry,
        notifier: Arc<dyn NotificationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            receipts: ReceiptGenerator::new(store.clone()),
            store,
            processors,
            notifier,
            clock,
            locks: KeyedLocks::new(),
            currency: DEFAULT_CURRENCY.to_string(),
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into().to_lowercase();
        self
    }

    pub fn store(&self) -> &SettlementStoreRef {
        &self.store
    }

    pub fn processors(&self) -> &ProcessorRegistry {
        &self.processors
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    pub fn receipts(&self) -> &ReceiptGenerator {
        &self.receipts
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // --- intake ---

    pub async fn create_service_request(&self, cmd: NewServiceRequest) -> Result<ServiceRequest> {
        if cmd.title.trim().is_empty() {
            return Err(SettlementError::Validation("Title is required".to_string()));
        }
        if cmd.customer.id.trim().is_empty() {
            return Err(SettlementError::Validation(
                "Customer id is required".to_string(),
            ));
        }
        let now = self.now();
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            request_number: reference_number("SR", now),
            customer: cmd.customer,
            title: cmd.title,
            description: cmd.description,
            vehicle: cmd.vehicle,
            status: ServiceRequestStatus::Open,
            accepted_quote_id: None,
            created_at: now,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
        };
        self.store
            .commit(UnitOfWork::new().service_request(request.clone()))
            .await?;
        info!(
            service_request_id = %request.id,
            request_number = %request.request_number,
            "service request created"
        );
        Ok(request)
    }

    pub async fn submit_quote(&self, cmd: NewQuote) -> Result<Quote> {
        let _guard = self.locks.lock(cmd.service_request_id).await;
        let request = self.load_service_request(cmd.service_request_id).await?;
        if request.status != ServiceRequestStatus::Open {
            return Err(SettlementError::Conflict(format!(
                "Service request {} is no longer accepting quotes",
                request.request_number
            )));
        }
        if cmd.provider.id == request.customer.id {
            return Err(SettlementError::Validation(
                "Customers cannot quote their own request".to_string(),
            ));
        }

        let now = self.now();
        let total = Quote::priced_total(cmd.parts_cost, cmd.labor_cost, cmd.fees, cmd.tax)?;
        let valid_until = cmd
            .valid_until
            .unwrap_or_else(|| now + Duration::days(DEFAULT_QUOTE_VALIDITY_DAYS));
        if valid_until <= now {
            return Err(SettlementError::Validation(
                "Quote validity must end in the future".to_string(),
            ));
        }
        let quote = Quote {
            id: Uuid::new_v4(),
            quote_number: reference_number("QT", now),
            service_request_id: request.id,
            provider: cmd.provider,
            parts_cost: cmd.parts_cost.round2(),
            labor_cost: cmd.labor_cost.round2(),
            fees: cmd.fees.round2(),
            tax: cmd.tax.round2(),
            total,
            valid_until,
            status: QuoteStatus::Pending,
            created_at: now,
            accepted_at: None,
        };
        self.store.commit(UnitOfWork::new().quote(quote.clone())).await?;
        info!(
            quote_id = %quote.id,
            service_request_id = %request.id,
            total = %quote.total,
            "quote submitted"
        );
        Ok(quote)
    }

    // --- queries ---

    pub fn compare_processors(
        &self,
        amount: Amount,
        card_type: CardType,
    ) -> Result<ProcessorComparison> {
        compare_processors(amount, card_type, &self.processors.ids())
    }

    pub async fn approved_quote_details(
        &self,
        work_order_id: Uuid,
        requester_id: &str,
    ) -> Result<ApprovedQuoteDetails> {
        let work_order = self.load_work_order(work_order_id).await?;
        if work_order.customer.id != requester_id && work_order.provider.id != requester_id {
            return Err(SettlementError::not_found("WorkOrder", work_order_id));
        }
        let service_request = self
            .load_service_request(work_order.service_request_id)
            .await?;
        let quote = self.load_quote(work_order.quote_id).await?;
        let payments = self.store.payments_for_work_order(work_order.id).await?;
        let open_supplement = self.store.open_supplement(work_order.id).await?;
        let open_cancellation = self.store.open_cancellation(work_order.id).await?;

        let sum = |pred: fn(&Payment) -> bool| -> Money {
            payments.iter().filter(|p| pred(p)).map(Payment::total_amount).sum()
        };
        let financial = FinancialSummary {
            original_amount: work_order.original_amount,
            additional_amount: work_order.additional_amount,
            final_amount: work_order.final_amount,
            total_authorized: sum(|p| p.status == PaymentStatus::Authorized),
            total_captured: sum(|p| {
                matches!(p.status, PaymentStatus::Captured | PaymentStatus::Refunded)
            }),
            total_refunded: payments.iter().filter_map(|p| p.refund_amount).sum(),
            hold_active: payments
                .iter()
                .any(|p| p.status == PaymentStatus::Authorized),
        };

        Ok(ApprovedQuoteDetails {
            work_order,
            service_request,
            quote,
            payments,
            open_supplement,
            open_cancellation,
            financial,
        })
    }

    pub async fn receipt_for_payment(&self, payment_id: Uuid) -> Result<Receipt> {
        self.receipts.for_payment(payment_id).await
    }

    /// Expires overdue supplement and cancellation windows. Returns how many of
    /// each were resolved.
    pub async fn sweep_expired(&self) -> Result<(usize, usize)> {
        let now = self.now();
        let mut supplements = 0;
        for supplement in self.store.expired_supplements(now).await? {
            match self.expire_supplement(supplement.id).await {
                Ok(true) => supplements += 1,
                Ok(false) => {}
                Err(e) => {
                    error!(supplement_id = %supplement.id, error = %e, "supplement expiry failed")
                }
            }
        }
        let mut cancellations = 0;
        for cancellation in self.store.expired_cancellations(now).await? {
            match self.expire_cancellation(cancellation.id).await {
                Ok(true) => cancellations += 1,
                Ok(false) => {}
                Err(e) => error!(
                    cancellation_id = %cancellation.id,
                    error = %e,
                    "cancellation expiry failed"
                ),
            }
        }
        self.locks.prune();
        Ok((supplements, cancellations))
    }

    // --- shared state application ---

    /// Applies a gateway-observed status to a payment. The caller must hold the
    /// work order lock and pass a freshly loaded payment.
    ///
    /// Reaching a state the payment is already in is a no-op apart from persisting
    /// any gateway references set on `payment`.
    pub(crate) async fn apply_gateway_status(
        &self,
        mut payment: Payment,
        observed: GatewayStatus,
    ) -> Result<Payment> {
        let now = self.now();
        let mut work_order = self.load_work_order(payment.work_order_id).await?;
        let mut unit = UnitOfWork::new();
        let mut events = Vec::new();

        match observed {
            GatewayStatus::Pending => {}
            GatewayStatus::Authorized => {
                if payment.status == PaymentStatus::Pending {
                    payment.transition(PaymentStatus::Authorized, now)?;
                    if work_order.status == WorkOrderStatus::PendingStart {
                        work_order.transition(WorkOrderStatus::InProgress, now)?;
                        unit = unit.work_order(work_order.clone());
                    }
                    events.push(DomainEvent::PaymentAuthorized {
                        work_order_id: work_order.id,
                        payment_id: payment.id,
                        amount: payment.total_amount(),
                    });
                }
            }
            GatewayStatus::Captured => {
                if payment.status.is_active() {
                    payment.advance_to(PaymentStatus::Captured, now)?;
                    events.push(DomainEvent::PaymentCaptured {
                        work_order_id: work_order.id,
                        payment_id: payment.id,
                        amount: payment.total_amount(),
                    });
                }
                if matches!(payment.status, PaymentStatus::Captured | PaymentStatus::Refunded) {
                    let (settled, mut extra) = self
                        .settle_captured(&payment, &mut work_order, now)
                        .await?;
                    unit.service_requests.extend(settled.service_requests);
                    unit.work_orders.extend(settled.work_orders);
                    unit.receipts.extend(settled.receipts);
                    events.append(&mut extra);
                } else {
                    warn!(
                        payment_id = %payment.id,
                        status = %payment.status,
                        "capture reported for a payment that cannot be captured"
                    );
                }
            }
            GatewayStatus::Voided => match payment.status {
                PaymentStatus::Authorized => {
                    payment.transition(PaymentStatus::Cancelled, now)?;
                    events.push(DomainEvent::PaymentVoided {
                        work_order_id: work_order.id,
                        payment_id: payment.id,
                    });
                }
                PaymentStatus::Pending => {
                    let reason = "Hold cancelled before confirmation".to_string();
                    payment.failure_reason = Some(reason.clone());
                    payment.transition(PaymentStatus::Failed, now)?;
                    events.push(DomainEvent::PaymentFailed {
                        work_order_id: work_order.id,
                        payment_id: payment.id,
                        reason,
                    });
                }
                _ => {}
            },
            GatewayStatus::Failed => match payment.status {
                PaymentStatus::Pending => {
                    let reason = "Hold declined by the gateway".to_string();
                    payment.failure_reason = Some(reason.clone());
                    payment.transition(PaymentStatus::Failed, now)?;
                    events.push(DomainEvent::PaymentFailed {
                        work_order_id: work_order.id,
                        payment_id: payment.id,
                        reason,
                    });
                }
                PaymentStatus::Authorized => {
                    events.push(DomainEvent::PaymentFailed {
                        work_order_id: work_order.id,
                        payment_id: payment.id,
                        reason: "Capture failed at the gateway".to_string(),
                    });
                }
                _ => {}
            },
        }

        unit = unit.payment(payment.clone());
        self.store.commit(unit).await?;
        info!(
            payment_id = %payment.id,
            observed = ?observed,
            status = %payment.status,
            "gateway status applied"
        );
        for event in events {
            self.notify(event).await;
        }
        Ok(payment)
    }

    /// Completes the work order and request for a captured payment and drafts its
    /// receipt, when the customer has approved.
    async fn settle_captured(
        &self,
        payment: &Payment,
        work_order: &mut WorkOrder,
        now: DateTime<Utc>,
    ) -> Result<(UnitOfWork, Vec<DomainEvent>)> {
        let mut unit = UnitOfWork::new();
        let mut events = Vec::new();
        if work_order.terms.is_none() {
            error!(
                work_order_id = %work_order.id,
                payment_id = %payment.id,
                status = %work_order.status,
                "payment captured without customer approval; manual review required"
            );
            return Ok((unit, events));
        }

        let mut request = self
            .load_service_request(work_order.service_request_id)
            .await?;
        if work_order.status == WorkOrderStatus::AwaitingApproval {
            work_order.transition(WorkOrderStatus::Completed, now)?;
            request.complete(now)?;
            unit = unit
                .work_order(work_order.clone())
                .service_request(request.clone());
        }

        if matches!(
            work_order.status,
            WorkOrderStatus::Completed | WorkOrderStatus::Disputed
        ) && let ReceiptDraft::New(receipt) = self
            .receipts
            .draft(payment, work_order, &request, now)
            .await?
        {
            events.push(DomainEvent::ReceiptIssued {
                work_order_id: work_order.id,
                receipt_number: receipt.receipt_number.clone(),
            });
            unit = unit.receipt(receipt);
        }
        Ok((unit, events))
    }

    // --- helpers ---

    async fn notify(&self, event: DomainEvent) {
        let name = event.name();
        if let Err(e) = self.notifier.publish(event).await {
            warn!(event = name, error = %e, "notification failed");
        }
    }

    /// The single place where adapter failures become caller-facing errors.
    fn gateway_failure(&self, operation: &str, err: GatewayError) -> SettlementError {
        match err {
            GatewayError::NotConfigured(processor) => {
                SettlementError::ProcessorNotConfigured(processor)
            }
            GatewayError::AlreadyRefunded => {
                SettlementError::Conflict("Charge was already refunded".to_string())
            }
            GatewayError::Rejected { code, message } => {
                warn!(operation, %code, %message, "gateway rejected request");
                SettlementError::GatewayRejected {
                    reason: format!("{message} ({code})"),
                }
            }
            ambiguous => {
                warn!(operation, error = %ambiguous, "gateway outcome unknown");
                SettlementError::GatewayPending
            }
        }
    }

    async fn load_service_request(&self, id: Uuid) -> Result<ServiceRequest> {
        self.store
            .service_request(id)
            .await?
            .ok_or_else(|| SettlementError::not_found("ServiceRequest", id))
    }

    async fn load_quote(&self, id: Uuid) -> Result<Quote> {
        self.store
            .quote(id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Quote", id))
    }

    async fn load_work_order(&self, id: Uuid) -> Result<WorkOrder> {
        self.store
            .work_order(id)
            .await?
            .ok_or_else(|| SettlementError::not_found("WorkOrder", id))
    }

    async fn load_payment(&self, id: Uuid) -> Result<Payment> {
        self.store
            .payment(id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Payment", id))
    }

    async fn load_supplement(&self, id: Uuid) -> Result<SupplementRequest> {
        self.store
            .supplement(id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Supplement", id))
    }

    async fn load_cancellation(&self, id: Uuid) -> Result<CancellationRequest> {
        self.store
            .cancellation(id)
            .await?
            .ok_or_else(|| SettlementError::not_found("CancellationRequest", id))
    }
}

/// Records another party's work order look like missing ones.
fn ensure_customer(work_order: &WorkOrder, customer_id: &str) -> Result<()> {
    if work_order.customer.id == customer_id {
        Ok(())
    } else {
        Err(SettlementError::not_found("WorkOrder", work_order.id))
    }
}

fn ensure_provider(work_order: &WorkOrder, provider_id: &str) -> Result<()> {
    if work_order.provider.id == provider_id {
        Ok(())
    } else {
        Err(SettlementError::not_found("WorkOrder", work_order.id))
    }
}
