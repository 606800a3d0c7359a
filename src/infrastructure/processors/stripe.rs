use super::{http_client, status_error, transport_error, DEFAULT_GATEWAY_TIMEOUT};
use crate::domain::fees::{CardType, ProcessorId};
use crate::domain::money::Money;
use crate::domain::ports::{
    CaptureResponse, CustomerProfile, GatewayResult, GatewayStatus, HoldRequest, HoldResponse,
    PaymentProcessor, RefundResponse,
};
use crate::error::GatewayError;
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for StripeConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            api_base: STRIPE_API_BASE.to_string(),
            timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    amount_received: Option<i64>,
    #[serde(default)]
    latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CustomerList {
    data: Vec<Customer>,
}

#[derive(Debug, Deserialize)]
struct Refund {
    id: String,
    amount: i64,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
}

/// Translates PaymentIntent statuses into the normalized vocabulary.
pub fn map_intent_status(status: &str) -> GatewayResult<GatewayStatus> {
    match status {
        "requires_capture" => Ok(GatewayStatus::Authorized),
        "succeeded" => Ok(GatewayStatus::Captured),
        "canceled" => Ok(GatewayStatus::Voided),
        "requires_payment_method" | "requires_confirmation" | "requires_action" | "processing" => {
            Ok(GatewayStatus::Pending)
        }
        other => Err(GatewayError::InvalidResponse(format!(
            "unknown payment intent status: {other}"
        ))),
    }
}

/// Stripe PaymentIntents with manual capture.
///
/// Without a secret key the adapter stays registered but every call fails
/// with [`GatewayError::NotConfigured`] before any network I/O.
pub struct StripeProcessor {
    config: StripeConfig,
    client: reqwest::Client,
}

impl StripeProcessor {
    pub fn new(config: StripeConfig) -> Self {
        let client = http_client(config.timeout);
        Self { config, client }
    }

    fn secret_key(&self) -> GatewayResult<&str> {
        match self.config.secret_key.as_deref() {
            Some(key) if !key.is_empty() => Ok(key),
            _ => Err(GatewayError::NotConfigured(ProcessorId::Stripe.to_string())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> GatewayResult<T> {
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()));
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        let detail = body.error;
        warn!(
            http_status = %status,
            error_type = detail.kind.as_deref().unwrap_or("unknown"),
            "stripe request failed"
        );
        Err(status_error(
            status,
            detail
                .decline_code
                .or(detail.code)
                .unwrap_or_else(|| status.as_u16().to_string()),
            detail
                .message
                .unwrap_or_else(|| "Stripe request failed".to_string()),
        ))
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
        idempotency_key: Option<&str>,
    ) -> GatewayResult<T> {
        let key = self.secret_key()?;
        let mut request = self.client.post(self.url(path)).bearer_auth(key).form(form);
        if let Some(idempotency_key) = idempotency_key {
            request = request.header("Idempotency-Key", idempotency_key);
        }
        self.send(request).await
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> GatewayResult<T> {
        let key = self.secret_key()?;
        self.send(self.client.get(self.url(path)).bearer_auth(key).query(query))
            .await
    }
}

fn minor_units(amount: Money) -> GatewayResult<String> {
    amount
        .to_minor_units()
        .map(|units| units.to_string())
        .map_err(|e| GatewayError::Rejected {
            code: "invalid_amount".to_string(),
            message: e.to_string(),
        })
}

/// Stripe reports a repeated refund as a rejection; callers only need to know
/// the charge is already back with the customer.
fn normalize_refund_error(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Rejected { code, .. } if code == "charge_already_refunded" => {
            GatewayError::AlreadyRefunded
        }
        other => other,
    }
}

fn pair(key: impl Into<String>, value: impl Into<String>) -> (String, String) {
    (key.into(), value.into())
}

#[async_trait]
impl PaymentProcessor for StripeProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::Stripe
    }

    fn display_name(&self) -> &str {
        "Stripe"
    }

    fn is_configured(&self) -> bool {
        self.secret_key().is_ok()
    }

    fn supports_card_type(&self, _card_type: CardType) -> bool {
        true
    }

    async fn resolve_customer(&self, profile: &CustomerProfile) -> GatewayResult<String> {
        if let Some(email) = profile.email.as_deref() {
            let existing: CustomerList = self
                .get("/v1/customers", &[("email", email), ("limit", "1")])
                .await?;
            if let Some(customer) = existing.data.into_iter().next() {
                return Ok(customer.id);
            }
        }
        let mut form = vec![
            pair("name", profile.name.clone()),
            pair("metadata[user_id]", profile.customer_id.clone()),
        ];
        if let Some(email) = &profile.email {
            form.push(pair("email", email.clone()));
        }
        let idempotency_key = format!("customer-{}", profile.customer_id);
        let customer: Customer = self
            .post("/v1/customers", &form, Some(&idempotency_key))
            .await?;
        Ok(customer.id)
    }

    async fn create_hold(&self, request: HoldRequest) -> GatewayResult<HoldResponse> {
        let mut form = vec![
            pair("amount", minor_units(request.amount)?),
            pair("currency", request.currency.to_lowercase()),
            pair("customer", request.customer_ref.clone()),
            pair("capture_method", "manual"),
            pair("description", request.description.clone()),
        ];
        if let Some(method) = &request.method_ref {
            form.push(pair("payment_method", method.clone()));
            form.push(pair("confirm", "true"));
            form.push(pair("off_session", "true"));
        }
        for (key, value) in &request.metadata {
            form.push(pair(format!("metadata[{key}]"), value.clone()));
        }
        form.push(pair(
            "metadata[platform_fee]",
            minor_units(request.marketplace_fee)?,
        ));

        let intent: PaymentIntent = self
            .post("/v1/payment_intents", &form, Some(&request.idempotency_key))
            .await?;
        debug!(hold_ref = %intent.id, status = %intent.status, "stripe hold created");
        Ok(HoldResponse {
            status: map_intent_status(&intent.status)?,
            hold_ref: intent.id,
        })
    }

    async fn capture(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
    ) -> GatewayResult<CaptureResponse> {
        let mut form = Vec::new();
        if let Some(amount) = amount {
            form.push(pair("amount_to_capture", minor_units(amount)?));
        }
        let idempotency_key = format!("capture-{hold_ref}");
        let intent: PaymentIntent = self
            .post(
                &format!("/v1/payment_intents/{hold_ref}/capture"),
                &form,
                Some(&idempotency_key),
            )
            .await?;
        Ok(CaptureResponse {
            status: map_intent_status(&intent.status)?,
            amount_captured: Money::from_minor_units(intent.amount_received.unwrap_or_default()),
            charge_ref: intent.latest_charge,
        })
    }

    async fn void(&self, hold_ref: &str) -> GatewayResult<GatewayStatus> {
        let idempotency_key = format!("cancel-{hold_ref}");
        let intent: PaymentIntent = self
            .post(
                &format!("/v1/payment_intents/{hold_ref}/cancel"),
                &[],
                Some(&idempotency_key),
            )
            .await?;
        map_intent_status(&intent.status)
    }

    async fn refund(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
        reason: Option<&str>,
    ) -> GatewayResult<RefundResponse> {
        let mut form = vec![
            pair("payment_intent", hold_ref),
            pair("reason", "requested_by_customer"),
        ];
        if let Some(amount) = amount {
            form.push(pair("amount", minor_units(amount)?));
        }
        if let Some(reason) = reason {
            form.push(pair("metadata[reason]", reason));
        }
        let idempotency_key = format!("refund-{hold_ref}");
        let refund: Refund = match self
            .post("/v1/refunds", &form, Some(&idempotency_key))
            .await
        {
            Err(e) => return Err(normalize_refund_error(e)),
            Ok(refund) => refund,
        };
        Ok(RefundResponse {
            refund_ref: refund.id,
            amount: Money::from_minor_units(refund.amount),
        })
    }

    async fn query_status(&self, hold_ref: &str) -> GatewayResult<GatewayStatus> {
        let intent: PaymentIntent = self
            .get(&format!("/v1/payment_intents/{hold_ref}"), &[])
            .await?;
        map_intent_status(&intent.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[test]
    fn test_repeated_refund_is_normalized() {
        let repeated = GatewayError::Rejected {
            code: "charge_already_refunded".into(),
            message: "Charge ch_1 has already been refunded.".into(),
        };
        assert_eq!(normalize_refund_error(repeated), GatewayError::AlreadyRefunded);

        let declined = GatewayError::Rejected {
            code: "card_declined".into(),
            message: "Your card was declined.".into(),
        };
        assert_eq!(normalize_refund_error(declined.clone()), declined);
        assert_eq!(
            normalize_refund_error(GatewayError::Timeout),
            GatewayError::Timeout
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_intent_status("requires_capture").unwrap(),
            GatewayStatus::Authorized
        );
        assert_eq!(map_intent_status("succeeded").unwrap(), GatewayStatus::Captured);
        assert_eq!(map_intent_status("canceled").unwrap(), GatewayStatus::Voided);
        assert_eq!(map_intent_status("processing").unwrap(), GatewayStatus::Pending);
        assert!(matches!(
            map_intent_status("exploded"),
            Err(GatewayError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_unconfigured_fails_fast() {
        let stripe = StripeProcessor::new(StripeConfig {
            api_base: "http://127.0.0.1:9".to_string(),
            ..StripeConfig::default()
        });
        assert!(!stripe.is_configured());

        let request = HoldRequest {
            amount: Money::new(dec!(10)),
            currency: "usd".into(),
            customer_ref: "cus_1".into(),
            method_ref: None,
            marketplace_fee: Money::new(dec!(1)),
            description: "x".into(),
            metadata: BTreeMap::new(),
            idempotency_key: "k".into(),
        };
        assert_eq!(
            stripe.create_hold(request).await.unwrap_err(),
            GatewayError::NotConfigured("STRIPE".into())
        );
        assert_eq!(
            stripe.query_status("pi_1").await.unwrap_err(),
            GatewayError::NotConfigured("STRIPE".into())
        );
    }
}
