use super::{SettlementOrchestrator, ensure_customer, ensure_provider};
use crate::application::commands::{CancellationOutcome, RequestCancellation, ValidateCancellation};
use crate::domain::fees::{CancellationFee, cancellation_fee};
use crate::domain::negotiation::{CancellationRequest, CancellationResolution, SupplementStatus};
use crate::domain::payment::PaymentStatus;
use crate::domain::ports::{DomainEvent, UnitOfWork};
use crate::domain::work_order::WorkOrderStatus;
use crate::error::{Result, SettlementError};
use tracing::info;
use uuid::Uuid;

impl SettlementOrchestrator {
    /// Customer asks to cancel.
    ///
    /// Before the service starts the hold is released immediately and the fee tier is
    /// recorded on the cancellation. Once started, the provider has to confirm
    /// whether costs were incurred.
    pub async fn request_cancellation(
        &self,
        cmd: RequestCancellation,
    ) -> Result<CancellationOutcome> {
        let guard = self.locks.lock(cmd.work_order_id).await;
        let work_order = self.load_work_order(cmd.work_order_id).await?;
        ensure_customer(&work_order, &cmd.customer_id)?;

        if let Some(open) = self.store.open_cancellation(work_order.id).await? {
            return match open.fee {
                CancellationFee::RequiresProviderValidation => {
                    Ok(CancellationOutcome::PendingProviderValidation {
                        cancellation_id: open.id,
                        deadline: open.deadline,
                    })
                }
                CancellationFee::Fixed { .. } => {
                    drop(guard);
                    self.release_and_cancel(open.id, CancellationResolution::CancelledBeforeStart)
                        .await
                }
            };
        }
        if !matches!(
            work_order.status,
            WorkOrderStatus::PendingStart | WorkOrderStatus::InProgress
        ) {
            return Err(SettlementError::Conflict(format!(
                "Work order {} is {} and can no longer be cancelled",
                work_order.order_number, work_order.status
            )));
        }
        if let Some(supplement) = self.store.open_supplement(work_order.id).await?
            && supplement.status == SupplementStatus::Approving
        {
            return Err(SettlementError::Conflict(format!(
                "Supplement {} is being authorized",
                supplement.supplement_number
            )));
        }

        let now = self.now();
        let fee = cancellation_fee(
            work_order.final_amount,
            Some(work_order.quote_accepted_at),
            work_order.service_started(),
            now,
        );
        let cancellation =
            CancellationRequest::new(work_order.id, cmd.customer_id, cmd.reason, fee, now);
        self.store
            .commit(UnitOfWork::new().cancellation(cancellation.clone()))
            .await?;
        info!(
            work_order_id = %work_order.id,
            cancellation_id = %cancellation.id,
            fee = ?fee,
            "cancellation requested"
        );
        self.notify(DomainEvent::CancellationRequested {
            work_order_id: work_order.id,
            cancellation_id: cancellation.id,
        })
        .await;

        match fee {
            CancellationFee::RequiresProviderValidation => {
                Ok(CancellationOutcome::PendingProviderValidation {
                    cancellation_id: cancellation.id,
                    deadline: cancellation.deadline,
                })
            }
            CancellationFee::Fixed { .. } => {
                drop(guard);
                self.release_and_cancel(
                    cancellation.id,
                    CancellationResolution::CancelledBeforeStart,
                )
                .await
            }
        }
    }

    /// Provider answer for a started service. Reported costs escalate to a dispute;
    /// otherwise the hold is released and the order cancelled.
    pub async fn validate_cancellation(
        &self,
        cmd: ValidateCancellation,
    ) -> Result<CancellationOutcome> {
        let work_order_id = self.load_cancellation(cmd.cancellation_id).await?.work_order_id;
        let guard = self.locks.lock(work_order_id).await;
        let mut cancellation = self.load_cancellation(cmd.cancellation_id).await?;
        let mut work_order = self.load_work_order(work_order_id).await?;
        ensure_provider(&work_order, &cmd.provider_id)?;
        if !cancellation.is_open() {
            return Err(SettlementError::Conflict(format!(
                "Cancellation {} is already resolved",
                cancellation.id
            )));
        }
        if cancellation.fee != CancellationFee::RequiresProviderValidation {
            return Err(SettlementError::Conflict(format!(
                "Cancellation {} does not need provider validation",
                cancellation.id
            )));
        }

        let now = self.now();
        cancellation.provider_note = cmd.note;
        if !cmd.has_incurred_costs {
            self.store
                .commit(UnitOfWork::new().cancellation(cancellation.clone()))
                .await?;
            drop(guard);
            return self
                .release_and_cancel(
                    cancellation.id,
                    CancellationResolution::ProviderConfirmedNoCosts,
                )
                .await;
        }

        cancellation.reported_costs = cmd.reported_costs.map(|c| c.money());
        cancellation.resolve(CancellationResolution::ProviderReportedCosts, now)?;
        let reason = match cancellation.reported_costs {
            Some(costs) => format!("Provider reported {costs} in costs on cancellation"),
            None => "Provider reported costs on cancellation".to_string(),
        };
        work_order.transition(WorkOrderStatus::Disputed, now)?;
        work_order.dispute_reason = Some(reason.clone());
        self.store
            .commit(
                UnitOfWork::new()
                    .cancellation(cancellation.clone())
                    .work_order(work_order.clone()),
            )
            .await?;
        info!(
            work_order_id = %work_order.id,
            cancellation_id = %cancellation.id,
            "cancellation escalated for admin review"
        );
        self.notify(DomainEvent::CancellationResolved {
            work_order_id: work_order.id,
            resolution: CancellationResolution::ProviderReportedCosts,
        })
        .await;
        self.notify(DomainEvent::IssueReported {
            work_order_id: work_order.id,
            reason,
        })
        .await;
        Ok(CancellationOutcome::Escalated {
            cancellation_id: cancellation.id,
        })
    }

    /// Provider never answered: treated as no costs, the hold is released.
    pub async fn expire_cancellation(&self, cancellation_id: Uuid) -> Result<bool> {
        let cancellation = self.load_cancellation(cancellation_id).await?;
        if !cancellation.is_expired(self.now()) {
            return Ok(false);
        }
        let resolution = match cancellation.fee {
            CancellationFee::Fixed { .. } => CancellationResolution::CancelledBeforeStart,
            CancellationFee::RequiresProviderValidation => CancellationResolution::ProviderTimedOut,
        };
        self.release_and_cancel(cancellation_id, resolution).await?;
        Ok(true)
    }

    /// Voids the active hold (no lock held), then cancels the payment, work order and
    /// service request and resolves the cancellation in one unit.
    async fn release_and_cancel(
        &self,
        cancellation_id: Uuid,
        resolution: CancellationResolution,
    ) -> Result<CancellationOutcome> {
        let work_order_id = self.load_cancellation(cancellation_id).await?.work_order_id;
        let active = {
            let _guard = self.locks.lock(work_order_id).await;
            self.store.active_payment(work_order_id).await?
        };

        let mut released = None;
        if let Some(payment) = &active {
            let Some(hold_ref) = payment.hold_ref.as_deref() else {
                return Err(SettlementError::GatewayPending);
            };
            let processor = self.processors.get(payment.processor)?;
            self.void_hold(processor.as_ref(), hold_ref)
                .await
                .map_err(|e| self.gateway_failure("void", e))?;
            released = Some(payment.id);
        }

        let _guard = self.locks.lock(work_order_id).await;
        let now = self.now();
        let mut cancellation = self.load_cancellation(cancellation_id).await?;
        if !cancellation.is_open() {
            return Ok(CancellationOutcome::Cancelled {
                cancellation_id,
                fee: cancellation.fee,
                holds_released: 0,
            });
        }
        let mut work_order = self.load_work_order(work_order_id).await?;
        let mut request = self
            .load_service_request(work_order.service_request_id)
            .await?;
        let mut unit = UnitOfWork::new();
        let mut events = Vec::new();

        if let Some(payment_id) = released {
            let mut payment = self.load_payment(payment_id).await?;
            match payment.status {
                PaymentStatus::Authorized => {
                    payment.transition(PaymentStatus::Cancelled, now)?;
                    events.push(DomainEvent::PaymentVoided {
                        work_order_id,
                        payment_id,
                    });
                }
                PaymentStatus::Pending => {
                    payment.failure_reason = Some("Hold released on cancellation".to_string());
                    payment.transition(PaymentStatus::Failed, now)?;
                }
                _ => {}
            }
            unit = unit.payment(payment);
        }
        if work_order.status != WorkOrderStatus::Cancelled {
            work_order.transition(WorkOrderStatus::Cancelled, now)?;
        }
        request.cancel(now, cancellation.reason.clone())?;
        if let Some(mut supplement) = self.store.open_supplement(work_order_id).await?
            && supplement.status == SupplementStatus::Requested
        {
            supplement.resolve(SupplementStatus::Rejected, now)?;
            unit = unit.supplement(supplement);
        }
        cancellation.resolve(resolution, now)?;

        self.store
            .commit(
                unit.work_order(work_order.clone())
                    .service_request(request)
                    .cancellation(cancellation.clone()),
            )
            .await?;
        let holds_released = usize::from(released.is_some());
        info!(
            %work_order_id,
            %cancellation_id,
            resolution = ?resolution,
            holds_released,
            "work order cancelled"
        );
        for event in events {
            self.notify(event).await;
        }
        self.notify(DomainEvent::CancellationResolved {
            work_order_id,
            resolution,
        })
        .await;

        Ok(CancellationOutcome::Cancelled {
            cancellation_id,
            fee: cancellation.fee,
            holds_released,
        })
    }
}
