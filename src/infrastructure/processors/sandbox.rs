use crate::domain::fees::{CardType, ProcessorId};
use crate::domain::money::Money;
use crate::domain::ports::{
    CaptureResponse, CustomerProfile, GatewayResult, GatewayStatus, HoldRequest, HoldResponse,
    PaymentProcessor, RefundResponse,
};
use crate::error::GatewayError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxOp {
    CreateHold,
    Capture,
    Void,
    Refund,
    QueryStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SandboxFault {
    Reject { code: String, message: String },
    /// Times out without touching the hold.
    Timeout,
    /// Applies the operation, then times out, so the caller cannot know it succeeded.
    TimeoutAfterApply,
    Unavailable,
}

impl SandboxFault {
    pub fn decline() -> Self {
        SandboxFault::Reject {
            code: "card_declined".to_string(),
            message: "Your card was declined.".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SandboxHold {
    pub hold_ref: String,
    pub amount: Money,
    pub status: GatewayStatus,
    pub captured: Option<Money>,
    pub refunded: Option<Money>,
    pub metadata: Vec<(String, String)>,
}

#[derive(Default)]
struct SandboxState {
    holds: HashMap<String, SandboxHold>,
    by_idempotency_key: HashMap<String, String>,
    customers: HashMap<String, String>,
    faults: HashMap<SandboxOp, Vec<SandboxFault>>,
    calls: HashMap<SandboxOp, usize>,
}

/// In-process gateway simulation.
///
/// Backs mock mode and the test suites. Honours idempotency keys like the real
/// gateway and supports one-shot fault injection per operation.
pub struct SandboxProcessor {
    id: ProcessorId,
    display_name: String,
    confirmation: Mutex<GatewayStatus>,
    state: Mutex<SandboxState>,
}

impl SandboxProcessor {
    pub fn new(id: ProcessorId) -> Self {
        Self {
            id,
            display_name: format!("{} (sandbox)", id),
            confirmation: Mutex::new(GatewayStatus::Authorized),
            state: Mutex::new(SandboxState::default()),
        }
    }

    /// Status new holds report: `Authorized` (default) or `Pending` to force
    /// confirmation through a status query or webhook.
    pub async fn set_hold_confirmation(&self, status: GatewayStatus) {
        *self.confirmation.lock().await = status;
    }

    /// Queues a fault for the next call of `op`.
    pub async fn fail_next(&self, op: SandboxOp, fault: SandboxFault) {
        self.state
            .lock()
            .await
            .faults
            .entry(op)
            .or_default()
            .push(fault);
    }

    pub async fn calls(&self, op: SandboxOp) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn hold(&self, hold_ref: &str) -> Option<SandboxHold> {
        self.state.lock().await.holds.get(hold_ref).cloned()
    }

    pub async fn holds(&self) -> Vec<SandboxHold> {
        self.state.lock().await.holds.values().cloned().collect()
    }

    /// Simulates the card network confirming a pending hold.
    pub async fn confirm_hold(&self, hold_ref: &str) -> bool {
        let mut state = self.state.lock().await;
        match state.holds.get_mut(hold_ref) {
            Some(hold) if hold.status == GatewayStatus::Pending => {
                hold.status = GatewayStatus::Authorized;
                true
            }
            _ => false,
        }
    }

    fn prefix(&self) -> &'static str {
        match self.id {
            ProcessorId::Stripe => "pi_sbx",
            ProcessorId::Chase => "chs_sbx",
        }
    }
}

fn take_fault(state: &mut SandboxState, op: SandboxOp) -> Option<SandboxFault> {
    *state.calls.entry(op).or_default() += 1;
    let queue = state.faults.get_mut(&op)?;
    if queue.is_empty() {
        None
    } else {
        Some(queue.remove(0))
    }
}

/// Faults that prevent the operation from running at all.
fn fail_before(fault: &Option<SandboxFault>) -> Option<GatewayError> {
    match fault {
        Some(SandboxFault::Reject { code, message }) => Some(GatewayError::Rejected {
            code: code.clone(),
            message: message.clone(),
        }),
        Some(SandboxFault::Timeout) => Some(GatewayError::Timeout),
        Some(SandboxFault::Unavailable) => {
            Some(GatewayError::Unavailable("sandbox unavailable".to_string()))
        }
        Some(SandboxFault::TimeoutAfterApply) | None => None,
    }
}

fn finish<T>(fault: &Option<SandboxFault>, value: T) -> GatewayResult<T> {
    if matches!(fault, Some(SandboxFault::TimeoutAfterApply)) {
        Err(GatewayError::Timeout)
    } else {
        Ok(value)
    }
}

fn unexpected_state(hold: &SandboxHold, action: &str) -> GatewayError {
    GatewayError::Rejected {
        code: "payment_intent_unexpected_state".to_string(),
        message: format!("Cannot {} hold {} in status {:?}", action, hold.hold_ref, hold.status),
    }
}

fn missing(hold_ref: &str) -> GatewayError {
    GatewayError::Rejected {
        code: "resource_missing".to_string(),
        message: format!("No such hold: {}", hold_ref),
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    fn id(&self) -> ProcessorId {
        self.id
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn is_configured(&self) -> bool {
        true
    }

    fn supports_card_type(&self, _card_type: CardType) -> bool {
        true
    }

    async fn resolve_customer(&self, profile: &CustomerProfile) -> GatewayResult<String> {
        let mut state = self.state.lock().await;
        let prefix = self.prefix();
        Ok(state
            .customers
            .entry(profile.customer_id.clone())
            .or_insert_with(|| format!("cus_{}_{}", prefix, Uuid::new_v4().simple()))
            .clone())
    }

    async fn create_hold(&self, request: HoldRequest) -> GatewayResult<HoldResponse> {
        let confirmation = *self.confirmation.lock().await;
        let mut state = self.state.lock().await;
        let fault = take_fault(&mut state, SandboxOp::CreateHold);
        if let Some(err) = fail_before(&fault) {
            return Err(err);
        }

        if let Some(existing) = state.by_idempotency_key.get(&request.idempotency_key).cloned()
            && let Some(hold) = state.holds.get(&existing)
        {
            debug!(hold_ref = %existing, "sandbox replayed idempotent hold");
            return finish(
                &fault,
                HoldResponse {
                    hold_ref: existing,
                    status: hold.status,
                },
            );
        }

        let hold_ref = format!("{}_{}", self.prefix(), Uuid::new_v4().simple());
        state.holds.insert(
            hold_ref.clone(),
            SandboxHold {
                hold_ref: hold_ref.clone(),
                amount: request.amount,
                status: confirmation,
                captured: None,
                refunded: None,
                metadata: request.metadata.into_iter().collect(),
            },
        );
        state
            .by_idempotency_key
            .insert(request.idempotency_key, hold_ref.clone());
        finish(
            &fault,
            HoldResponse {
                hold_ref,
                status: confirmation,
            },
        )
    }

    async fn capture(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
    ) -> GatewayResult<CaptureResponse> {
        let mut state = self.state.lock().await;
        let fault = take_fault(&mut state, SandboxOp::Capture);
        if let Some(err) = fail_before(&fault) {
            return Err(err);
        }
        let hold = state.holds.get_mut(hold_ref).ok_or_else(|| missing(hold_ref))?;
        if hold.status != GatewayStatus::Authorized {
            return Err(unexpected_state(hold, "capture"));
        }
        let amount = amount.unwrap_or(hold.amount);
        if amount > hold.amount {
            return Err(GatewayError::Rejected {
                code: "amount_too_large".to_string(),
                message: format!("Capture {} exceeds held {}", amount, hold.amount),
            });
        }
        hold.status = GatewayStatus::Captured;
        hold.captured = Some(amount);
        finish(
            &fault,
            CaptureResponse {
                charge_ref: Some(format!("ch_sbx_{}", Uuid::new_v4().simple())),
                status: GatewayStatus::Captured,
                amount_captured: amount,
            },
        )
    }

    async fn void(&self, hold_ref: &str) -> GatewayResult<GatewayStatus> {
        let mut state = self.state.lock().await;
        let fault = take_fault(&mut state, SandboxOp::Void);
        if let Some(err) = fail_before(&fault) {
            return Err(err);
        }
        let hold = state.holds.get_mut(hold_ref).ok_or_else(|| missing(hold_ref))?;
        match hold.status {
            GatewayStatus::Pending | GatewayStatus::Authorized | GatewayStatus::Voided => {
                hold.status = GatewayStatus::Voided;
                finish(&fault, GatewayStatus::Voided)
            }
            _ => Err(unexpected_state(hold, "void")),
        }
    }

    async fn refund(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
        _reason: Option<&str>,
    ) -> GatewayResult<RefundResponse> {
        let mut state = self.state.lock().await;
        let fault = take_fault(&mut state, SandboxOp::Refund);
        if let Some(err) = fail_before(&fault) {
            return Err(err);
        }
        let hold = state.holds.get_mut(hold_ref).ok_or_else(|| missing(hold_ref))?;
        let captured = match (hold.status, hold.captured) {
            (GatewayStatus::Captured, Some(captured)) => captured,
            _ => return Err(unexpected_state(hold, "refund")),
        };
        if hold.refunded.is_some() {
            return Err(GatewayError::AlreadyRefunded);
        }
        let amount = amount.unwrap_or(captured);
        hold.refunded = Some(amount);
        finish(
            &fault,
            RefundResponse {
                refund_ref: format!("re_sbx_{}", Uuid::new_v4().simple()),
                amount,
            },
        )
    }

    async fn query_status(&self, hold_ref: &str) -> GatewayResult<GatewayStatus> {
        let mut state = self.state.lock().await;
        let fault = take_fault(&mut state, SandboxOp::QueryStatus);
        if let Some(err) = fail_before(&fault) {
            return Err(err);
        }
        let hold = state.holds.get(hold_ref).ok_or_else(|| missing(hold_ref))?;
        finish(&fault, hold.status)
    }
}
