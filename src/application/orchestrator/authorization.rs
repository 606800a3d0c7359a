use super::{SettlementOrchestrator, ensure_provider};
use crate::application::commands::{ApproveQuote, ApprovedHold, StartService};
use crate::domain::fees::FeeBreakdown;
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{
    CustomerProfile, DomainEvent, GatewayResult, GatewayStatus, HoldRequest, HoldResponse,
    PaymentProcessor, UnitOfWork,
};
use crate::domain::reference_number;
use crate::domain::work_order::{WorkOrder, WorkOrderStatus};
use crate::error::{GatewayError, Result, SettlementError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::{info, warn};
use uuid::Uuid;

enum Reservation {
    /// The hold is already in place; nothing left to do.
    Settled(WorkOrder, Payment),
    /// A PENDING payment that still needs its gateway hold.
    Ready(WorkOrder, Payment),
}

impl SettlementOrchestrator {
    /// Accepts a quote and places the pre-authorization hold for its total.
    ///
    /// Safe to retry: a repeated call resumes the existing PENDING payment with the
    /// same idempotency key, so the gateway never sees a second hold.
    pub async fn approve_quote(&self, cmd: ApproveQuote) -> Result<ApprovedHold> {
        let requested = self.processors.select(cmd.processor, cmd.card_type)?;
        if !requested.is_configured() {
            return Err(SettlementError::Validation(format!(
                "Payment processor {} is not available",
                cmd.processor
            )));
        }
        let quote = self.load_quote(cmd.quote_id).await?;

        let reservation = {
            let _guard = self.locks.lock(quote.service_request_id).await;
            self.reserve_payment(&cmd, quote.service_request_id).await?
        };
        let (work_order, payment) = match reservation {
            Reservation::Settled(work_order, payment) => {
                return Ok(ApprovedHold::from_records(&work_order, &payment));
            }
            Reservation::Ready(work_order, payment) => (work_order, payment),
        };

        let processor = self.processors.get(payment.processor)?;
        let payment = self.place_hold(processor.as_ref(), &work_order, payment).await?;
        let work_order = self.load_work_order(work_order.id).await?;
        Ok(ApprovedHold::from_records(&work_order, &payment))
    }

    async fn reserve_payment(
        &self,
        cmd: &ApproveQuote,
        service_request_id: Uuid,
    ) -> Result<Reservation> {
        let now = self.now();
        let mut request = self.load_service_request(service_request_id).await?;
        if request.customer.id != cmd.customer_id {
            return Err(SettlementError::not_found("Quote", cmd.quote_id));
        }

        if let Some(mut work_order) = self.store.work_order_for_request(request.id).await? {
            if work_order.quote_id != cmd.quote_id {
                return Err(SettlementError::Conflict(format!(
                    "Service request {} already has an accepted quote",
                    request.request_number
                )));
            }
            if let Some(active) = self.store.active_payment(work_order.id).await? {
                return Ok(match active.status {
                    PaymentStatus::Authorized => Reservation::Settled(work_order, active),
                    _ => Reservation::Ready(work_order, active),
                });
            }
            if work_order.status != WorkOrderStatus::PendingStart {
                return Err(SettlementError::Conflict(format!(
                    "Work order {} is {}",
                    work_order.order_number, work_order.status
                )));
            }
            // Previous attempt was declined: start a fresh one on the requested card.
            work_order.processor = cmd.processor;
            work_order.card_type = cmd.card_type;
            work_order.payment_method_ref = cmd.payment_method_ref.clone();
            let payment = self.reserve(&work_order, now)?;
            self.store
                .commit(
                    UnitOfWork::new()
                        .work_order(work_order.clone())
                        .payment(payment.clone()),
                )
                .await?;
            info!(
                work_order_id = %work_order.id,
                payment_id = %payment.id,
                "payment re-reserved after failed attempt"
            );
            return Ok(Reservation::Ready(work_order, payment));
        }

        let mut quote = self.load_quote(cmd.quote_id).await?;
        quote.accept(now)?;
        request.accept_quote(quote.id)?;
        let mut unit = UnitOfWork::new();
        for mut sibling in self.store.quotes_for_request(request.id).await? {
            if sibling.id != quote.id {
                sibling.reject();
                unit = unit.quote(sibling);
            }
        }

        let work_order = WorkOrder {
            id: Uuid::new_v4(),
            order_number: reference_number("WO", now),
            service_request_id: request.id,
            quote_id: quote.id,
            customer: request.customer.clone(),
            provider: quote.provider.clone(),
            processor: cmd.processor,
            card_type: cmd.card_type,
            payment_method_ref: cmd.payment_method_ref.clone(),
            original_amount: quote.total,
            final_amount: quote.total,
            additional_amount: Default::default(),
            status: WorkOrderStatus::PendingStart,
            quote_accepted_at: now,
            created_at: now,
            started_at: None,
            completed_at: None,
            approved_at: None,
            cancelled_at: None,
            disputed_at: None,
            before_photos: Vec::new(),
            before_photos_waived: false,
            after_photos: Vec::new(),
            client_present: None,
            completion_notes: None,
            dispute_reason: None,
            terms: None,
        };
        let payment = self.reserve(&work_order, now)?;

        self.store
            .commit(
                unit.quote(quote)
                    .service_request(request)
                    .work_order(work_order.clone())
                    .payment(payment.clone()),
            )
            .await?;
        info!(
            work_order_id = %work_order.id,
            payment_id = %payment.id,
            total = %payment.total_amount(),
            "quote accepted, payment reserved"
        );
        Ok(Reservation::Ready(work_order, payment))
    }

    fn reserve(&self, work_order: &WorkOrder, now: DateTime<Utc>) -> Result<Payment> {
        let breakdown = FeeBreakdown::compute(
            work_order.final_amount,
            work_order.processor,
            work_order.card_type,
        )?;
        Ok(Payment::reserve(
            Uuid::new_v4(),
            reference_number("PAY", now),
            work_order.id,
            work_order.customer.id.clone(),
            work_order.provider.id.clone(),
            work_order.processor,
            work_order.card_type,
            breakdown,
            now,
        ))
    }

    /// Creates the gateway hold for a reserved payment and records the outcome.
    pub(super) async fn place_hold(
        &self,
        processor: &dyn PaymentProcessor,
        work_order: &WorkOrder,
        payment: Payment,
    ) -> Result<Payment> {
        let customer_ref = self.customer_ref(processor, work_order, &payment).await?;
        let request = self.hold_request(work_order, &payment, customer_ref.clone());
        match self.request_hold(processor, request).await {
            Ok(hold) => self.record_hold(payment.id, hold, customer_ref).await,
            Err(GatewayError::Rejected { code, message }) => {
                let reason = format!("{message} ({code})");
                self.mark_failed(payment.id, reason.clone()).await?;
                Err(SettlementError::GatewayRejected { reason })
            }
            Err(e) => Err(self.gateway_failure("create_hold", e)),
        }
    }

    pub(super) async fn customer_ref(
        &self,
        processor: &dyn PaymentProcessor,
        work_order: &WorkOrder,
        payment: &Payment,
    ) -> Result<String> {
        if let Some(existing) = &payment.customer_ref {
            return Ok(existing.clone());
        }
        let profile = CustomerProfile {
            customer_id: work_order.customer.id.clone(),
            name: work_order.customer.name.clone(),
            email: work_order.customer.email.clone(),
        };
        processor
            .resolve_customer(&profile)
            .await
            .map_err(|e| self.gateway_failure("resolve_customer", e))
    }

    pub(super) fn hold_request(
        &self,
        work_order: &WorkOrder,
        payment: &Payment,
        customer_ref: String,
    ) -> HoldRequest {
        let metadata = BTreeMap::from([
            ("payment_id".to_string(), payment.id.to_string()),
            ("work_order_id".to_string(), work_order.id.to_string()),
            ("order_number".to_string(), work_order.order_number.clone()),
        ]);
        HoldRequest {
            amount: payment.total_amount(),
            currency: self.currency.clone(),
            customer_ref,
            method_ref: work_order.payment_method_ref.clone(),
            marketplace_fee: payment.fees.platform_fee,
            description: format!("Work order {}", work_order.order_number),
            metadata,
            idempotency_key: payment.idempotency_key.clone(),
        }
    }

    /// One retry with the same idempotency key when the first outcome is unknown.
    pub(super) async fn request_hold(
        &self,
        processor: &dyn PaymentProcessor,
        request: HoldRequest,
    ) -> GatewayResult<HoldResponse> {
        match processor.create_hold(request.clone()).await {
            Err(e) if e.is_ambiguous() => {
                warn!(
                    idempotency_key = %request.idempotency_key,
                    error = %e,
                    "hold outcome unknown, retrying with the same key"
                );
                processor.create_hold(request).await
            }
            other => other,
        }
    }

    async fn record_hold(
        &self,
        payment_id: Uuid,
        hold: HoldResponse,
        customer_ref: String,
    ) -> Result<Payment> {
        let work_order_id = self.load_payment(payment_id).await?.work_order_id;
        let _guard = self.locks.lock(work_order_id).await;
        let mut payment = self.load_payment(payment_id).await?;
        payment.hold_ref = Some(hold.hold_ref);
        payment.customer_ref = Some(customer_ref);
        self.apply_gateway_status(payment, hold.status).await
    }

    async fn mark_failed(&self, payment_id: Uuid, reason: String) -> Result<()> {
        let work_order_id = self.load_payment(payment_id).await?.work_order_id;
        let _guard = self.locks.lock(work_order_id).await;
        let mut payment = self.load_payment(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            return Ok(());
        }
        payment.failure_reason = Some(reason.clone());
        payment.transition(PaymentStatus::Failed, self.now())?;
        self.store.commit(UnitOfWork::new().payment(payment)).await?;
        warn!(%payment_id, %reason, "hold declined");
        self.notify(DomainEvent::PaymentFailed {
            work_order_id,
            payment_id,
            reason,
        })
        .await;
        Ok(())
    }

    /// Queries the gateway for the payment's hold and applies what it reports.
    /// A PENDING payment whose hold never came back is re-driven with its original
    /// idempotency key.
    pub async fn reconcile_payment(&self, payment_id: Uuid) -> Result<Payment> {
        let payment = self.load_payment(payment_id).await?;
        let processor = self.processors.get(payment.processor)?;
        let Some(hold_ref) = payment.hold_ref.clone() else {
            if payment.status == PaymentStatus::Pending {
                let work_order = self.load_work_order(payment.work_order_id).await?;
                return self.place_hold(processor.as_ref(), &work_order, payment).await;
            }
            return Ok(payment);
        };

        let observed = processor
            .query_status(&hold_ref)
            .await
            .map_err(|e| self.gateway_failure("query_status", e))?;
        let _guard = self.locks.lock(payment.work_order_id).await;
        let payment = self.load_payment(payment_id).await?;
        self.apply_gateway_status(payment, observed).await
    }

    /// Applies a status reported asynchronously by the gateway. Replays of a state
    /// already reached change nothing.
    pub async fn apply_observed_status(
        &self,
        payment_id: Uuid,
        observed: GatewayStatus,
        hold_ref: Option<String>,
    ) -> Result<Payment> {
        let work_order_id = self.load_payment(payment_id).await?.work_order_id;
        let _guard = self.locks.lock(work_order_id).await;
        let mut payment = self.load_payment(payment_id).await?;
        if payment.hold_ref.is_none() {
            payment.hold_ref = hold_ref;
        }
        self.apply_gateway_status(payment, observed).await
    }

    /// Provider checks in: before-photos (or a waiver) and `started_at`.
    pub async fn start_service(&self, cmd: StartService) -> Result<WorkOrder> {
        let _guard = self.locks.lock(cmd.work_order_id).await;
        let mut work_order = self.load_work_order(cmd.work_order_id).await?;
        ensure_provider(&work_order, &cmd.provider_id)?;
        if let Some(open) = self.store.open_cancellation(work_order.id).await? {
            return Err(SettlementError::Conflict(format!(
                "Cancellation {} is pending for work order {}",
                open.id, work_order.order_number
            )));
        }
        work_order.start(cmd.photos, cmd.waive_photos, self.now())?;
        self.store
            .commit(UnitOfWork::new().work_order(work_order.clone()))
            .await?;
        info!(work_order_id = %work_order.id, "service started");
        Ok(work_order)
    }
}
