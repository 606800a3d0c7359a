use super::{SettlementOrchestrator, ensure_customer, ensure_provider};
use crate::application::commands::{
    ApproveService, CompleteService, RefundPayment, ReportIssue, Settlement,
};
use crate::domain::fees::refund_window_open;
use crate::domain::money::Money;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{DomainEvent, GatewayStatus, UnitOfWork};
use crate::domain::work_order::{TermsAcceptance, WorkOrder, WorkOrderStatus};
use crate::error::{GatewayError, Result, SettlementError};
use tracing::{info, warn};
use uuid::Uuid;

impl SettlementOrchestrator {
    pub async fn complete_service(&self, cmd: CompleteService) -> Result<WorkOrder> {
        let _guard = self.locks.lock(cmd.work_order_id).await;
        let mut work_order = self.load_work_order(cmd.work_order_id).await?;
        ensure_provider(&work_order, &cmd.provider_id)?;
        if let Some(open) = self.store.open_supplement(work_order.id).await? {
            return Err(SettlementError::Conflict(format!(
                "Supplement {} must be answered before completion",
                open.supplement_number
            )));
        }
        if self.store.open_cancellation(work_order.id).await?.is_some() {
            return Err(SettlementError::Conflict(format!(
                "Work order {} has a pending cancellation",
                work_order.order_number
            )));
        }
        work_order.mark_completed(cmd.photos, cmd.client_present, cmd.notes, self.now())?;
        self.store
            .commit(UnitOfWork::new().work_order(work_order.clone()))
            .await?;
        info!(work_order_id = %work_order.id, "service completed, awaiting approval");
        self.notify(DomainEvent::ServiceCompleted {
            work_order_id: work_order.id,
        })
        .await;
        Ok(work_order)
    }

    /// Customer approval: records the accepted terms, captures the hold for the
    /// current final amount and settles payment, work order, request and receipt
    /// together.
    ///
    /// A retried call after an unknown capture outcome asks the gateway first, so
    /// the customer is never charged twice.
    pub async fn approve_service(&self, cmd: ApproveService) -> Result<Settlement> {
        if !(cmd.accept_service_terms
            && cmd.accept_fraud_disclaimer
            && cmd.accept_cancellation_policy)
        {
            return Err(SettlementError::Validation(
                "Service terms, fraud disclaimer and cancellation policy must all be accepted"
                    .to_string(),
            ));
        }
        if cmd.signature_name.trim().is_empty() {
            return Err(SettlementError::Validation("Signature is required".to_string()));
        }

        let (payment, retried) = {
            let _guard = self.locks.lock(cmd.work_order_id).await;
            let mut work_order = self.load_work_order(cmd.work_order_id).await?;
            ensure_customer(&work_order, &cmd.customer_id)?;
            if work_order.status == WorkOrderStatus::Completed {
                return self.existing_settlement(&work_order).await;
            }
            if work_order.status != WorkOrderStatus::AwaitingApproval {
                return Err(SettlementError::Conflict(format!(
                    "Work order {} is {}, expected AWAITING_APPROVAL",
                    work_order.order_number, work_order.status
                )));
            }
            if self.store.open_supplement(work_order.id).await?.is_some()
                || self.store.open_cancellation(work_order.id).await?.is_some()
            {
                return Err(SettlementError::Conflict(format!(
                    "Work order {} has an open negotiation",
                    work_order.order_number
                )));
            }
            let mut payment = self
                .store
                .active_payment(work_order.id)
                .await?
                .ok_or_else(|| {
                    SettlementError::Conflict(format!(
                        "Work order {} has no active hold",
                        work_order.order_number
                    ))
                })?;
            payment.require_status(PaymentStatus::Authorized)?;

            let now = self.now();
            let retried = payment.capture_requested_at.is_some();
            if work_order.terms.is_none() {
                work_order.terms = Some(TermsAcceptance {
                    service_accepted_at: now,
                    fraud_disclaimer_accepted_at: now,
                    cancellation_policy_accepted_at: now,
                    signature_name: cmd.signature_name.trim().to_string(),
                });
            }
            payment.capture_requested_at.get_or_insert(now);
            self.store
                .commit(
                    UnitOfWork::new()
                        .work_order(work_order)
                        .payment(payment.clone()),
                )
                .await?;
            (payment, retried)
        };

        let processor = self.processors.get(payment.processor)?;
        let hold_ref = payment.hold_ref.clone().ok_or_else(|| {
            SettlementError::Internal(format!("Payment {} has no hold reference", payment.id))
        })?;

        let already_captured = retried
            && processor
                .query_status(&hold_ref)
                .await
                .map_err(|e| self.gateway_failure("query_status", e))?
                == GatewayStatus::Captured;

        let mut charge_ref = None;
        if !already_captured {
            match processor.capture(&hold_ref, Some(payment.total_amount())).await {
                Ok(response) if response.status == GatewayStatus::Captured => {
                    charge_ref = response.charge_ref;
                }
                Ok(response) => {
                    warn!(
                        payment_id = %payment.id,
                        status = ?response.status,
                        "capture not confirmed"
                    );
                    return Err(SettlementError::GatewayPending);
                }
                Err(e) if e.is_ambiguous() => {
                    warn!(
                        payment_id = %payment.id,
                        error = %e,
                        "capture outcome unknown, checking status"
                    );
                    match processor.query_status(&hold_ref).await {
                        Ok(GatewayStatus::Captured) => {}
                        _ => return Err(SettlementError::GatewayPending),
                    }
                }
                Err(GatewayError::Rejected { code, message }) => {
                    let reason = format!("{message} ({code})");
                    warn!(payment_id = %payment.id, %reason, "capture declined");
                    self.notify(DomainEvent::PaymentFailed {
                        work_order_id: payment.work_order_id,
                        payment_id: payment.id,
                        reason: reason.clone(),
                    })
                    .await;
                    return Err(SettlementError::GatewayRejected { reason });
                }
                Err(e) => return Err(self.gateway_failure("capture", e)),
            }
        }

        let payment = {
            let _guard = self.locks.lock(payment.work_order_id).await;
            let mut current = self.load_payment(payment.id).await?;
            if charge_ref.is_some() {
                current.charge_ref = charge_ref;
            }
            self.apply_gateway_status(current, GatewayStatus::Captured)
                .await?
        };
        let receipt = self.receipts.for_payment(payment.id).await?;
        info!(
            payment_id = %payment.id,
            receipt_number = %receipt.receipt_number,
            amount = %payment.total_amount(),
            "payment settled"
        );
        Ok(Settlement { payment, receipt })
    }

    async fn existing_settlement(&self, work_order: &WorkOrder) -> Result<Settlement> {
        let payment = self
            .store
            .payments_for_work_order(work_order.id)
            .await?
            .into_iter()
            .find(|p| matches!(p.status, PaymentStatus::Captured | PaymentStatus::Refunded))
            .ok_or_else(|| {
                SettlementError::Internal(format!(
                    "Completed work order {} has no captured payment",
                    work_order.order_number
                ))
            })?;
        let receipt = self.receipts.issue(payment.id, self.now()).await?;
        Ok(Settlement { payment, receipt })
    }

    /// Full refund of a captured payment inside the refund window. The receipt is
    /// left untouched.
    pub async fn refund_payment(&self, cmd: RefundPayment) -> Result<Payment> {
        let work_order_id = self.load_payment(cmd.payment_id).await?.work_order_id;
        let payment = {
            let _guard = self.locks.lock(work_order_id).await;
            let payment = self.load_payment(cmd.payment_id).await?;
            if payment.customer_id != cmd.requested_by && payment.provider_id != cmd.requested_by {
                return Err(SettlementError::not_found("Payment", cmd.payment_id));
            }
            if payment.status == PaymentStatus::Refunded {
                return Ok(payment);
            }
            payment.require_status(PaymentStatus::Captured)?;
            let captured_at = payment.captured_at.ok_or_else(|| {
                SettlementError::Internal(format!("Payment {} has no capture time", payment.id))
            })?;
            if !refund_window_open(captured_at, self.now()) {
                return Err(SettlementError::RefundWindowExpired);
            }
            payment
        };

        let processor = self.processors.get(payment.processor)?;
        let hold_ref = payment.hold_ref.clone().unwrap_or_default();
        let amount = match processor
            .refund(&hold_ref, Some(payment.total_amount()), cmd.reason.as_deref())
            .await
        {
            Ok(response) => response.amount,
            Err(GatewayError::AlreadyRefunded) => payment.total_amount(),
            Err(e) => return Err(self.gateway_failure("refund", e)),
        };

        let _guard = self.locks.lock(work_order_id).await;
        let mut payment = self.load_payment(cmd.payment_id).await?;
        if payment.status == PaymentStatus::Refunded {
            return Ok(payment);
        }
        payment.transition(PaymentStatus::Refunded, self.now())?;
        payment.refund_amount = Some(amount);
        payment.refund_reason = cmd.reason;
        self.store
            .commit(UnitOfWork::new().payment(payment.clone()))
            .await?;
        info!(payment_id = %payment.id, %amount, "payment refunded");
        self.notify(DomainEvent::PaymentRefunded {
            work_order_id,
            payment_id: payment.id,
            amount,
        })
        .await;
        Ok(payment)
    }

    /// Refund issued outside this service (gateway dashboard, chargeback loss).
    pub async fn record_external_refund(
        &self,
        payment_id: Uuid,
        amount: Option<Money>,
    ) -> Result<Payment> {
        let work_order_id = self.load_payment(payment_id).await?.work_order_id;
        let _guard = self.locks.lock(work_order_id).await;
        let mut payment = self.load_payment(payment_id).await?;
        if !payment.advance_to(PaymentStatus::Refunded, self.now())? {
            return Ok(payment);
        }
        let amount = amount.unwrap_or_else(|| payment.total_amount());
        payment.refund_amount = Some(amount);
        payment.refund_reason = Some("Refunded at the gateway".to_string());
        self.store
            .commit(UnitOfWork::new().payment(payment.clone()))
            .await?;
        info!(%payment_id, %amount, "external refund recorded");
        self.notify(DomainEvent::PaymentRefunded {
            work_order_id,
            payment_id,
            amount,
        })
        .await;
        Ok(payment)
    }

    pub async fn report_issue(&self, cmd: ReportIssue) -> Result<WorkOrder> {
        if cmd.reason.trim().is_empty() {
            return Err(SettlementError::Validation(
                "Describe the issue being reported".to_string(),
            ));
        }
        let _guard = self.locks.lock(cmd.work_order_id).await;
        let work_order = self.load_work_order(cmd.work_order_id).await?;
        ensure_customer(&work_order, &cmd.customer_id)?;
        self.dispute(work_order, cmd.reason).await
    }

    /// Moves a work order to DISPUTED, e.g. after a chargeback. Already disputed
    /// orders are returned unchanged.
    pub async fn open_dispute(&self, work_order_id: Uuid, reason: String) -> Result<WorkOrder> {
        let _guard = self.locks.lock(work_order_id).await;
        let work_order = self.load_work_order(work_order_id).await?;
        self.dispute(work_order, reason).await
    }

    async fn dispute(&self, mut work_order: WorkOrder, reason: String) -> Result<WorkOrder> {
        if work_order.status == WorkOrderStatus::Disputed {
            return Ok(work_order);
        }
        work_order.transition(WorkOrderStatus::Disputed, self.now())?;
        work_order.dispute_reason = Some(reason.clone());
        self.store
            .commit(UnitOfWork::new().work_order(work_order.clone()))
            .await?;
        warn!(work_order_id = %work_order.id, %reason, "work order disputed");
        self.notify(DomainEvent::IssueReported {
            work_order_id: work_order.id,
            reason,
        })
        .await;
        Ok(work_order)
    }
}
