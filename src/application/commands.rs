//! Inputs and outputs of the orchestrator operations. Shared with the HTTP layer,
//! so field names follow the JSON API (camelCase).

use crate::domain::fees::{CancellationFee, CardType, FeeBreakdown, ProcessorId};
use crate::domain::money::{Amount, Money};
use crate::domain::negotiation::{CancellationRequest, SupplementRequest, SupplementStatus};
use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::receipt::Receipt;
use crate::domain::work_order::{Party, Quote, ServiceRequest, WorkOrder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_QUOTE_VALIDITY_DAYS: i64 = 15;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewServiceRequest {
    pub customer: Party,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub vehicle: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuote {
    pub service_request_id: Uuid,
    pub provider: Party,
    pub parts_cost: Money,
    pub labor_cost: Money,
    #[serde(default)]
    pub fees: Money,
    #[serde(default)]
    pub tax: Money,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveQuote {
    pub quote_id: Uuid,
    pub customer_id: String,
    #[serde(default = "default_processor")]
    pub processor: ProcessorId,
    #[serde(default)]
    pub card_type: CardType,
    #[serde(default)]
    pub payment_method_ref: Option<String>,
}

fn default_processor() -> ProcessorId {
    ProcessorId::Stripe
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedHold {
    pub work_order_id: Uuid,
    pub order_number: String,
    pub payment_id: Uuid,
    pub payment_status: PaymentStatus,
    pub processor: ProcessorId,
    pub breakdown: FeeBreakdown,
}

impl ApprovedHold {
    pub fn from_records(work_order: &WorkOrder, payment: &Payment) -> Self {
        Self {
            work_order_id: work_order.id,
            order_number: work_order.order_number.clone(),
            payment_id: payment.id,
            payment_status: payment.status,
            processor: payment.processor,
            breakdown: payment.fees,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartService {
    pub work_order_id: Uuid,
    pub provider_id: String,
    #[serde(default)]
    pub photos: Vec<String>,
    #[serde(default)]
    pub waive_photos: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeSupplement {
    pub work_order_id: Uuid,
    pub provider_id: String,
    pub description: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub additional_amount: Amount,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RespondSupplement {
    pub supplement_id: Uuid,
    pub customer_id: String,
    pub approved: bool,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplementOutcome {
    pub supplement_id: Uuid,
    pub status: SupplementStatus,
    pub final_amount: Money,
    /// Payment holding funds once the outcome is applied.
    pub payment_id: Option<Uuid>,
    pub breakdown: Option<FeeBreakdown>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestCancellation {
    pub work_order_id: Uuid,
    pub customer_id: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationOutcome {
    #[serde(rename_all = "camelCase")]
    Cancelled {
        cancellation_id: Uuid,
        fee: CancellationFee,
        holds_released: usize,
    },
    #[serde(rename_all = "camelCase")]
    PendingProviderValidation {
        cancellation_id: Uuid,
        deadline: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    Escalated { cancellation_id: Uuid },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateCancellation {
    pub cancellation_id: Uuid,
    pub provider_id: String,
    pub has_incurred_costs: bool,
    #[serde(default)]
    pub reported_costs: Option<Amount>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteService {
    pub work_order_id: Uuid,
    pub provider_id: String,
    #[serde(default)]
    pub photos: Vec<String>,
    pub client_present: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveService {
    pub work_order_id: Uuid,
    pub customer_id: String,
    pub accept_service_terms: bool,
    pub accept_fraud_disclaimer: bool,
    pub accept_cancellation_policy: bool,
    pub signature_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub payment: Payment,
    pub receipt: Receipt,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundPayment {
    pub payment_id: Uuid,
    pub requested_by: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportIssue {
    pub work_order_id: Uuid,
    pub customer_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub original_amount: Money,
    pub additional_amount: Money,
    pub final_amount: Money,
    pub total_authorized: Money,
    pub total_captured: Money,
    pub total_refunded: Money,
    pub hold_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedQuoteDetails {
    pub work_order: WorkOrder,
    pub service_request: ServiceRequest,
    pub quote: Quote,
    pub payments: Vec<Payment>,
    pub open_supplement: Option<SupplementRequest>,
    pub open_cancellation: Option<CancellationRequest>,
    pub financial: FinancialSummary,
}
