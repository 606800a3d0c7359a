use super::fees::ProcessorId;
use super::money::Money;
use super::payment::Payment;
use super::work_order::{ServiceRequest, TermsAcceptance, WorkOrder};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable settlement record. Everything a dispute investigation needs is
/// copied in, so later refunds or edits to the source records never change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: Uuid,
    pub receipt_number: String,
    pub payment_id: Uuid,
    pub payment_number: String,
    pub work_order_id: Uuid,
    pub order_number: String,
    pub customer_name: String,
    pub provider_name: String,
    pub service_description: String,
    pub vehicle_description: String,
    pub original_amount: Money,
    pub supplements_total: Money,
    pub subtotal: Money,
    pub platform_fee: Money,
    pub processing_fee: Money,
    pub total_amount: Money,
    pub provider_amount: Money,
    pub processor: ProcessorId,
    pub payment_method: String,
    pub terms: TermsAcceptance,
    pub captured_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

impl Receipt {
    /// Snapshot of a captured payment and its context.
    pub fn snapshot(
        receipt_number: String,
        payment: &Payment,
        work_order: &WorkOrder,
        service_request: &ServiceRequest,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let captured_at = payment.captured_at.ok_or_else(|| {
            SettlementError::Conflict(format!(
                "Payment {} has not been captured",
                payment.payment_number
            ))
        })?;
        let terms = work_order.terms.clone().ok_or_else(|| {
            SettlementError::Conflict(format!(
                "Work order {} has no accepted terms",
                work_order.order_number
            ))
        })?;
        let service_description = if service_request.description.is_empty() {
            service_request.title.clone()
        } else {
            format!("{}: {}", service_request.title, service_request.description)
        };

        Ok(Self {
            id: Uuid::new_v4(),
            receipt_number,
            payment_id: payment.id,
            payment_number: payment.payment_number.clone(),
            work_order_id: work_order.id,
            order_number: work_order.order_number.clone(),
            customer_name: work_order.customer.name.clone(),
            provider_name: work_order.provider.name.clone(),
            service_description,
            vehicle_description: service_request.vehicle.clone(),
            original_amount: work_order.original_amount,
            supplements_total: payment.fees.subtotal - work_order.original_amount,
            subtotal: payment.fees.subtotal,
            platform_fee: payment.fees.platform_fee,
            processing_fee: payment.fees.processing_fee,
            total_amount: payment.fees.total_amount,
            provider_amount: payment.fees.provider_amount,
            processor: payment.processor,
            payment_method: format!("{} card via {}", payment.card_type, payment.processor),
            terms,
            captured_at,
            generated_at: now,
        })
    }
}
