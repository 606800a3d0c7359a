use crate::domain::payment::{Payment, PaymentStatus};
use crate::domain::ports::{SettlementStoreRef, UnitOfWork};
use crate::domain::receipt::Receipt;
use crate::domain::reference_number;
use crate::domain::work_order::{ServiceRequest, WorkOrder};
use crate::error::{Result, SettlementError};
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

/// Issues exactly one immutable receipt per captured payment.
#[derive(Clone)]
pub struct ReceiptGenerator {
    store: SettlementStoreRef,
}

/// Either the receipt already on file or a new one still to be committed.
#[derive(Debug, Clone, PartialEq)]
pub enum ReceiptDraft {
    Existing(Receipt),
    New(Receipt),
}

impl ReceiptDraft {
    pub fn receipt(&self) -> &Receipt {
        match self {
            ReceiptDraft::Existing(r) | ReceiptDraft::New(r) => r,
        }
    }

    pub fn into_receipt(self) -> Receipt {
        match self {
            ReceiptDraft::Existing(r) | ReceiptDraft::New(r) => r,
        }
    }
}

impl ReceiptGenerator {
    pub fn new(store: SettlementStoreRef) -> Self {
        Self { store }
    }

    /// Builds the receipt for a captured payment without persisting it, so the
    /// caller can commit it in the same unit as the capture.
    pub async fn draft(
        &self,
        payment: &Payment,
        work_order: &WorkOrder,
        service_request: &ServiceRequest,
        now: DateTime<Utc>,
    ) -> Result<ReceiptDraft> {
        if let Some(existing) = self.store.receipt_for_payment(payment.id).await? {
            return Ok(ReceiptDraft::Existing(existing));
        }
        if payment.status != PaymentStatus::Captured && payment.status != PaymentStatus::Refunded {
            return Err(SettlementError::Conflict(format!(
                "Payment {} is {}; receipts are only issued after capture",
                payment.payment_number, payment.status
            )));
        }
        let receipt = Receipt::snapshot(
            reference_number("RCT", now),
            payment,
            work_order,
            service_request,
            now,
        )?;
        Ok(ReceiptDraft::New(receipt))
    }

    /// Standalone issue for a payment already captured. Returns the existing
    /// receipt on repeat calls.
    pub async fn issue(&self, payment_id: Uuid, now: DateTime<Utc>) -> Result<Receipt> {
        let payment = self
            .store
            .payment(payment_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Payment", payment_id))?;
        let work_order = self
            .store
            .work_order(payment.work_order_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("WorkOrder", payment.work_order_id))?;
        let service_request = self
            .store
            .service_request(work_order.service_request_id)
            .await?
            .ok_or_else(|| {
                SettlementError::not_found("ServiceRequest", work_order.service_request_id)
            })?;

        match self.draft(&payment, &work_order, &service_request, now).await? {
            ReceiptDraft::Existing(receipt) => Ok(receipt),
            ReceiptDraft::New(receipt) => {
                self.store
                    .commit(UnitOfWork::new().receipt(receipt.clone()))
                    .await?;
                info!(
                    receipt_number = %receipt.receipt_number,
                    payment_id = %payment.id,
                    "receipt issued"
                );
                Ok(receipt)
            }
        }
    }

    pub async fn for_payment(&self, payment_id: Uuid) -> Result<Receipt> {
        self.store
            .receipt_for_payment(payment_id)
            .await?
            .ok_or_else(|| SettlementError::not_found("Receipt", payment_id))
    }
}
