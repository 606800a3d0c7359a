use super::{SettlementOrchestrator, ensure_customer, ensure_provider};
use crate::application::commands::{ProposeSupplement, RespondSupplement, SupplementOutcome};
use crate::domain::fees::FeeBreakdown;
use crate::domain::negotiation::{SupplementRequest, SupplementStatus};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{DomainEvent, GatewayStatus, PaymentProcessor, UnitOfWork};
use crate::domain::reference_number;
use crate::domain::work_order::{WorkOrder, WorkOrderStatus};
use crate::error::{GatewayError, Result, SettlementError};
use tracing::{info, warn};
use uuid::Uuid;

impl SettlementOrchestrator {
    pub async fn request_supplement(&self, cmd: ProposeSupplement) -> Result<SupplementRequest> {
        let _guard = self.locks.lock(cmd.work_order_id).await;
        let work_order = self.load_work_order(cmd.work_order_id).await?;
        ensure_provider(&work_order, &cmd.provider_id)?;
        if work_order.status != WorkOrderStatus::InProgress {
            return Err(SettlementError::Conflict(format!(
                "Supplements can only be requested while work is in progress (work order is {})",
                work_order.status
            )));
        }
        if cmd.description.trim().is_empty() {
            return Err(SettlementError::Validation(
                "Supplement description is required".to_string(),
            ));
        }
        if let Some(open) = self.store.open_supplement(work_order.id).await? {
            return Err(SettlementError::Conflict(format!(
                "Supplement {} is still awaiting a response",
                open.supplement_number
            )));
        }
        if self.store.open_cancellation(work_order.id).await?.is_some() {
            return Err(SettlementError::Conflict(format!(
                "Work order {} has a pending cancellation",
                work_order.order_number
            )));
        }
        self.authorized_payment(&work_order).await?;

        let now = self.now();
        let supplement = SupplementRequest::new(
            reference_number("SUP", now),
            work_order.id,
            cmd.provider_id,
            cmd.description,
            cmd.reason,
            cmd.additional_amount.money(),
            now,
        );
        self.store
            .commit(UnitOfWork::new().supplement(supplement.clone()))
            .await?;
        info!(
            work_order_id = %work_order.id,
            supplement_id = %supplement.id,
            amount = %supplement.additional_amount,
            "supplement requested"
        );
        self.notify(DomainEvent::SupplementRequested {
            work_order_id: work_order.id,
            supplement_id: supplement.id,
            amount: supplement.additional_amount,
        })
        .await;
        Ok(supplement)
    }

    /// Customer answer to a supplement.
    ///
    /// Approval re-authorizes the full new total as a successor payment: the new
    /// hold is placed first, then the old one is voided, and both payments, the work
    /// order and the supplement are committed together. If anything before that
    /// commit fails the work order keeps its original hold and amount.
    pub async fn respond_supplement(&self, cmd: RespondSupplement) -> Result<SupplementOutcome> {
        let work_order_id = self.load_supplement(cmd.supplement_id).await?.work_order_id;
        let guard = self.locks.lock(work_order_id).await;
        let mut supplement = self.load_supplement(cmd.supplement_id).await?;
        let work_order = self.load_work_order(work_order_id).await?;
        ensure_customer(&work_order, &cmd.customer_id)?;
        let now = self.now();

        if supplement.is_expired(now) {
            supplement.resolve(SupplementStatus::TimedOut, now)?;
            self.store
                .commit(UnitOfWork::new().supplement(supplement.clone()))
                .await?;
            self.notify_supplement(&supplement).await;
            return Err(SettlementError::Conflict(format!(
                "Supplement {} expired at {}; the original amount stands",
                supplement.supplement_number, supplement.deadline
            )));
        }
        if supplement.status != SupplementStatus::Requested {
            return Err(SettlementError::Conflict(format!(
                "Supplement {} is {:?}",
                supplement.supplement_number, supplement.status
            )));
        }

        supplement.customer_note = cmd.note;
        if !cmd.approved {
            supplement.resolve(SupplementStatus::Rejected, now)?;
            self.store
                .commit(UnitOfWork::new().supplement(supplement.clone()))
                .await?;
            info!(supplement_id = %supplement.id, "supplement rejected");
            self.notify_supplement(&supplement).await;
            let current = self.store.active_payment(work_order.id).await?;
            return Ok(outcome(&supplement, &work_order, current.as_ref()));
        }

        if work_order.status != WorkOrderStatus::InProgress {
            return Err(SettlementError::Conflict(format!(
                "Work order {} is {}",
                work_order.order_number, work_order.status
            )));
        }
        let current = self.authorized_payment(&work_order).await?;
        let breakdown = FeeBreakdown::compute(
            work_order.final_amount.checked_add(supplement.additional_amount)?,
            current.processor,
            current.card_type,
        )?;
        let replacement_id = supplement.payment_id.unwrap_or_else(Uuid::new_v4);
        supplement.payment_id = Some(replacement_id);
        supplement.resolve(SupplementStatus::Approving, now)?;
        self.store
            .commit(UnitOfWork::new().supplement(supplement.clone()))
            .await?;
        drop(guard);

        let processor = self.processors.get(current.processor)?;
        let mut replacement = Payment::reserve(
            replacement_id,
            reference_number("PAY", now),
            work_order.id,
            current.customer_id.clone(),
            current.provider_id.clone(),
            current.processor,
            current.card_type,
            breakdown,
            now,
        );
        replacement.predecessor_id = Some(current.id);

        let customer_ref = match self
            .customer_ref(processor.as_ref(), &work_order, &current)
            .await
        {
            Ok(customer_ref) => customer_ref,
            Err(e) => {
                self.reopen_supplement(supplement.id, false).await?;
                return Err(e);
            }
        };
        replacement.customer_ref = Some(customer_ref.clone());
        let request = self.hold_request(&work_order, &replacement, customer_ref);
        let hold = match self.request_hold(processor.as_ref(), request).await {
            Ok(hold) if hold.status == GatewayStatus::Authorized => hold,
            Ok(hold) => {
                warn!(
                    supplement_id = %supplement.id,
                    hold_ref = %hold.hold_ref,
                    status = ?hold.status,
                    "re-authorization not confirmed, releasing it"
                );
                self.release_quietly(processor.as_ref(), &hold.hold_ref).await;
                self.reopen_supplement(supplement.id, true).await?;
                return Err(SettlementError::GatewayPending);
            }
            Err(GatewayError::Rejected { code, message }) => {
                let reason = format!("{message} ({code})");
                self.fail_supplement_hold(supplement.id, &reason).await?;
                return Err(SettlementError::GatewayRejected { reason });
            }
            Err(e) => {
                self.reopen_supplement(supplement.id, false).await?;
                return Err(self.gateway_failure("create_hold", e));
            }
        };

        let old_hold_ref = current.hold_ref.clone().unwrap_or_default();
        if let Err(e) = self.void_hold(processor.as_ref(), &old_hold_ref).await {
            warn!(
                supplement_id = %supplement.id,
                error = %e,
                "could not release the original hold; keeping it"
            );
            self.release_quietly(processor.as_ref(), &hold.hold_ref).await;
            self.reopen_supplement(supplement.id, true).await?;
            return Err(self.gateway_failure("void", e));
        }

        let _guard = self.locks.lock(work_order_id).await;
        let now = self.now();
        let mut supplement = self.load_supplement(supplement.id).await?;
        let mut work_order = self.load_work_order(work_order_id).await?;
        let mut previous = self.load_payment(current.id).await?;
        if previous.status != PaymentStatus::Cancelled {
            previous.transition(PaymentStatus::Cancelled, now)?;
        }
        previous.superseded_by = Some(replacement.id);
        replacement.hold_ref = Some(hold.hold_ref);
        replacement.transition(PaymentStatus::Authorized, now)?;
        work_order.apply_supplement(supplement.additional_amount);
        supplement.resolve(SupplementStatus::Approved, now)?;

        self.store
            .commit(
                UnitOfWork::new()
                    .payment(previous.clone())
                    .payment(replacement.clone())
                    .work_order(work_order.clone())
                    .supplement(supplement.clone()),
            )
            .await?;
        info!(
            work_order_id = %work_order.id,
            supplement_id = %supplement.id,
            previous_payment_id = %previous.id,
            payment_id = %replacement.id,
            final_amount = %work_order.final_amount,
            "supplement approved, hold re-authorized"
        );
        self.notify(DomainEvent::PaymentVoided {
            work_order_id: work_order.id,
            payment_id: previous.id,
        })
        .await;
        self.notify(DomainEvent::PaymentAuthorized {
            work_order_id: work_order.id,
            payment_id: replacement.id,
            amount: replacement.total_amount(),
        })
        .await;
        self.notify_supplement(&supplement).await;
        Ok(outcome(&supplement, &work_order, Some(&replacement)))
    }

    /// Times out an unanswered supplement; the original amount stands.
    pub async fn expire_supplement(&self, supplement_id: Uuid) -> Result<bool> {
        let work_order_id = self.load_supplement(supplement_id).await?.work_order_id;
        let _guard = self.locks.lock(work_order_id).await;
        let mut supplement = self.load_supplement(supplement_id).await?;
        if !supplement.is_expired(self.now()) {
            return Ok(false);
        }
        supplement.resolve(SupplementStatus::TimedOut, self.now())?;
        self.store
            .commit(UnitOfWork::new().supplement(supplement.clone()))
            .await?;
        info!(supplement_id = %supplement.id, "supplement timed out");
        self.notify_supplement(&supplement).await;
        Ok(true)
    }

    async fn authorized_payment(&self, work_order: &WorkOrder) -> Result<Payment> {
        match self.store.active_payment(work_order.id).await? {
            Some(payment) if payment.status == PaymentStatus::Authorized => Ok(payment),
            Some(payment) => Err(SettlementError::Conflict(format!(
                "Payment {} is {}, expected AUTHORIZED",
                payment.payment_number, payment.status
            ))),
            None => Err(SettlementError::Conflict(format!(
                "Work order {} has no active hold",
                work_order.order_number
            ))),
        }
    }

    /// Returns an approving supplement to REQUESTED so the customer can try again.
    /// `fresh_hold` drops the replacement id, so the retry opens a new hold instead of
    /// replaying one that was already released.
    async fn reopen_supplement(&self, supplement_id: Uuid, fresh_hold: bool) -> Result<()> {
        let work_order_id = self.load_supplement(supplement_id).await?.work_order_id;
        let _guard = self.locks.lock(work_order_id).await;
        let mut supplement = self.load_supplement(supplement_id).await?;
        if supplement.status != SupplementStatus::Approving {
            return Ok(());
        }
        supplement.resolve(SupplementStatus::Requested, self.now())?;
        if fresh_hold {
            supplement.payment_id = None;
        }
        self.store
            .commit(UnitOfWork::new().supplement(supplement))
            .await
    }

    async fn fail_supplement_hold(&self, supplement_id: Uuid, reason: &str) -> Result<()> {
        let work_order_id = self.load_supplement(supplement_id).await?.work_order_id;
        let _guard = self.locks.lock(work_order_id).await;
        let mut supplement = self.load_supplement(supplement_id).await?;
        if supplement.status != SupplementStatus::Approving {
            return Ok(());
        }
        supplement.resolve(SupplementStatus::HoldFailed, self.now())?;
        self.store
            .commit(UnitOfWork::new().supplement(supplement.clone()))
            .await?;
        warn!(%supplement_id, reason, "supplement hold declined, original amount stands");
        self.notify_supplement(&supplement).await;
        Ok(())
    }

    /// Voids a hold, confirming through a status query when the outcome is unknown.
    pub(super) async fn void_hold(
        &self,
        processor: &dyn PaymentProcessor,
        hold_ref: &str,
    ) -> std::result::Result<(), GatewayError> {
        match processor.void(hold_ref).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_ambiguous() => match processor.query_status(hold_ref).await? {
                GatewayStatus::Voided => Ok(()),
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    async fn release_quietly(&self, processor: &dyn PaymentProcessor, hold_ref: &str) {
        if let Err(e) = self.void_hold(processor, hold_ref).await {
            warn!(%hold_ref, error = %e, "orphaned hold needs manual release");
        }
    }

    async fn notify_supplement(&self, supplement: &SupplementRequest) {
        self.notify(DomainEvent::SupplementResolved {
            work_order_id: supplement.work_order_id,
            supplement_id: supplement.id,
            outcome: supplement.status,
        })
        .await;
    }
}

fn outcome(
    supplement: &SupplementRequest,
    work_order: &WorkOrder,
    payment: Option<&Payment>,
) -> SupplementOutcome {
    SupplementOutcome {
        supplement_id: supplement.id,
        status: supplement.status,
        final_amount: work_order.final_amount,
        payment_id: payment.map(|p| p.id),
        breakdown: payment.map(|p| p.fees),
    }
}
