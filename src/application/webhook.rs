//! Signed gateway event intake.
//!
//! The signature is checked against the raw body before anything is parsed. Parsed
//! events are routed through a lookup table of handlers and always acknowledged;
//! handler failures are logged for manual remediation instead of being bounced back
//! to the gateway.

use crate::application::orchestrator::SettlementOrchestrator;
use crate::domain::money::Money;
use crate::domain::payment::Payment;
use crate::domain::ports::GatewayStatus;
use crate::error::{Result, SettlementError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "Gateway-Signature";
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: EventObject,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventObject {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Set on charge and dispute objects.
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub amount_refunded: Option<i64>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    pub event_id: String,
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(
        &self,
        orchestrator: &SettlementOrchestrator,
        event: &GatewayEvent,
    ) -> Result<()>;
}

/// Finds the payment an event refers to: metadata first, then the hold reference.
async fn find_payment(
    orchestrator: &SettlementOrchestrator,
    object: &EventObject,
) -> Result<Payment> {
    if let Some(id) = object.metadata.get("payment_id")
        && let Ok(id) = Uuid::parse_str(id)
        && let Some(payment) = orchestrator.store().payment(id).await?
    {
        return Ok(payment);
    }
    let hold_ref = object.payment_intent.as_deref().unwrap_or(&object.id);
    orchestrator
        .store()
        .payment_by_hold_ref(hold_ref)
        .await?
        .ok_or_else(|| SettlementError::not_found("Payment", hold_ref))
}

/// Hold-level events map one-to-one onto a gateway status.
struct StatusHandler(GatewayStatus);

#[async_trait]
impl EventHandler for StatusHandler {
    async fn handle(
        &self,
        orchestrator: &SettlementOrchestrator,
        event: &GatewayEvent,
    ) -> Result<()> {
        let object = &event.data.object;
        let payment = find_payment(orchestrator, object).await?;
        if self.0 == GatewayStatus::Failed
            && let Some(message) = object
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.as_deref())
        {
            warn!(payment_id = %payment.id, %message, "gateway reported payment failure");
        }
        orchestrator
            .apply_observed_status(payment.id, self.0, Some(object.id.clone()))
            .await?;
        Ok(())
    }
}

struct ChargeRefunded;

#[async_trait]
impl EventHandler for ChargeRefunded {
    async fn handle(
        &self,
        orchestrator: &SettlementOrchestrator,
        event: &GatewayEvent,
    ) -> Result<()> {
        let object = &event.data.object;
        let payment = find_payment(orchestrator, object).await?;
        let amount = object.amount_refunded.map(Money::from_minor_units);
        orchestrator.record_external_refund(payment.id, amount).await?;
        Ok(())
    }
}

struct DisputeOpened;

#[async_trait]
impl EventHandler for DisputeOpened {
    async fn handle(
        &self,
        orchestrator: &SettlementOrchestrator,
        event: &GatewayEvent,
    ) -> Result<()> {
        let object = &event.data.object;
        let payment = find_payment(orchestrator, object).await?;
        let reason = format!(
            "Chargeback opened: {}",
            object.reason.as_deref().unwrap_or("unspecified")
        );
        orchestrator.open_dispute(payment.work_order_id, reason).await?;
        Ok(())
    }
}

pub fn default_handlers() -> HashMap<&'static str, Arc<dyn EventHandler>> {
    let mut handlers: HashMap<&'static str, Arc<dyn EventHandler>> = HashMap::new();
    handlers.insert(
        "payment_intent.amount_capturable_updated",
        Arc::new(StatusHandler(GatewayStatus::Authorized)),
    );
    handlers.insert(
        "payment_intent.succeeded",
        Arc::new(StatusHandler(GatewayStatus::Captured)),
    );
    handlers.insert(
        "payment_intent.canceled",
        Arc::new(StatusHandler(GatewayStatus::Voided)),
    );
    handlers.insert(
        "payment_intent.payment_failed",
        Arc::new(StatusHandler(GatewayStatus::Failed)),
    );
    handlers.insert("charge.refunded", Arc::new(ChargeRefunded));
    handlers.insert("charge.dispute.created", Arc::new(DisputeOpened));
    handlers
}

pub struct WebhookReconciler {
    orchestrator: Arc<SettlementOrchestrator>,
    secret: String,
    tolerance: Duration,
    handlers: HashMap<&'static str, Arc<dyn EventHandler>>,
}

impl WebhookReconciler {
    pub fn new(orchestrator: Arc<SettlementOrchestrator>, secret: impl Into<String>) -> Self {
        Self {
            orchestrator,
            secret: secret.into(),
            tolerance: DEFAULT_TOLERANCE,
            handlers: default_handlers(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_handler(
        mut self,
        event_type: &'static str,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    /// Verifies, parses and applies one delivery.
    pub async fn handle(&self, signature: Option<&str>, payload: &[u8]) -> Result<WebhookAck> {
        let Some(signature) = signature else {
            warn!("webhook without signature rejected, possible tampering");
            return Err(SettlementError::WebhookVerification(
                "missing signature header".to_string(),
            ));
        };
        if let Err(e) = self.verify(signature, payload, self.orchestrator.now()) {
            warn!(error = %e, "webhook signature rejected, possible tampering");
            return Err(e);
        }

        let event: GatewayEvent = serde_json::from_slice(payload)
            .map_err(|e| SettlementError::Validation(format!("Malformed event payload: {e}")))?;

        let Some(handler) = self.handlers.get(event.kind.as_str()) else {
            info!(event_id = %event.id, event_type = %event.kind, "webhook event ignored");
            return Ok(WebhookAck {
                received: true,
                event_id: event.id,
                handled: false,
                error: None,
            });
        };

        match handler.handle(&self.orchestrator, &event).await {
            Ok(()) => {
                info!(event_id = %event.id, event_type = %event.kind, "webhook event applied");
                Ok(WebhookAck {
                    received: true,
                    event_id: event.id,
                    handled: true,
                    error: None,
                })
            }
            Err(e) => {
                error!(
                    event_id = %event.id,
                    event_type = %event.kind,
                    error = %e,
                    "webhook processing failed; manual remediation required"
                );
                Ok(WebhookAck {
                    received: true,
                    event_id: event.id,
                    handled: false,
                    error: Some(e.to_string()),
                })
            }
        }
    }

    /// Checks a `t=<unix>,v1=<hex>` header against the raw payload.
    pub fn verify(&self, header: &str, payload: &[u8], now: DateTime<Utc>) -> Result<()> {
        let mut timestamp = None;
        let mut signatures = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
                Some(("v1", value)) => signatures.push(value.to_string()),
                _ => {}
            }
        }
        let timestamp = timestamp.ok_or_else(|| {
            SettlementError::WebhookVerification("missing or invalid timestamp".to_string())
        })?;
        if signatures.is_empty() {
            return Err(SettlementError::WebhookVerification(
                "missing v1 signature".to_string(),
            ));
        }
        let age = (now.timestamp() - timestamp).unsigned_abs();
        if age > self.tolerance.as_secs() {
            return Err(SettlementError::WebhookVerification(format!(
                "timestamp outside tolerance ({age}s)"
            )));
        }

        for candidate in signatures {
            let Ok(expected) = hex::decode(&candidate) else {
                continue;
            };
            if mac(&self.secret, timestamp, payload)?
                .verify_slice(&expected)
                .is_ok()
            {
                return Ok(());
            }
        }
        Err(SettlementError::WebhookVerification(
            "signature mismatch".to_string(),
        ))
    }
}

fn mac(secret: &str, timestamp: i64, payload: &[u8]) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SettlementError::Internal(format!("invalid webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Builds a signature header the way the gateway does. Used by tests and local tooling.
pub fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let signature = hex::encode(mac(secret, timestamp, payload)?.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={signature}"))
}
