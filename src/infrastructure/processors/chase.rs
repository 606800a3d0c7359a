use super::{http_client, status_error, transport_error, DEFAULT_GATEWAY_TIMEOUT};
use crate::domain::fees::{CardType, ProcessorId};
use crate::domain::money::Money;
use crate::domain::ports::{
    CaptureResponse, CustomerProfile, GatewayResult, GatewayStatus, HoldRequest, HoldResponse,
    PaymentProcessor, RefundResponse,
};
use crate::error::GatewayError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ChaseConfig {
    pub enabled: bool,
    pub merchant_id: Option<String>,
    pub api_key: Option<String>,
    pub api_base: String,
    pub timeout: Duration,
}

impl Default for ChaseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            merchant_id: None,
            api_key: None,
            api_base: "https://api.merchant-services.chase.com".to_string(),
            timeout: DEFAULT_GATEWAY_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transaction {
    transaction_id: String,
    status: String,
    #[serde(default)]
    approved_amount: Option<i64>,
    #[serde(default)]
    reference_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerRecord {
    customer_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundRecord {
    refund_id: String,
    amount: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    #[serde(default)]
    response_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeBody<'a> {
    merchant_id: &'a str,
    amount: i64,
    currency: String,
    customer_ref: &'a str,
    payment_method_ref: Option<&'a str>,
    description: &'a str,
    idempotency_key: &'a str,
    metadata: &'a std::collections::BTreeMap<String, String>,
}

pub fn map_transaction_status(status: &str) -> GatewayResult<GatewayStatus> {
    match status.to_ascii_uppercase().as_str() {
        "APPROVED" | "AUTHORIZED" => Ok(GatewayStatus::Authorized),
        "CAPTURED" | "SETTLED" => Ok(GatewayStatus::Captured),
        "VOIDED" | "REVERSED" => Ok(GatewayStatus::Voided),
        "DECLINED" | "ERROR" => Ok(GatewayStatus::Failed),
        "PENDING" | "PROCESSING" => Ok(GatewayStatus::Pending),
        other => Err(GatewayError::InvalidResponse(format!(
            "unknown transaction status: {other}"
        ))),
    }
}

/// Chase merchant services. Cheaper on credit and debit but settles in 1-2
/// business days. Registered even while disabled so comparisons include it.
pub struct ChaseProcessor {
    config: ChaseConfig,
    client: reqwest::Client,
}

impl ChaseProcessor {
    pub fn new(config: ChaseConfig) -> Self {
        let client = http_client(config.timeout);
        Self { config, client }
    }

    fn credentials(&self) -> GatewayResult<(&str, &str)> {
        match (
            self.config.enabled,
            self.config.merchant_id.as_deref(),
            self.config.api_key.as_deref(),
        ) {
            (true, Some(merchant), Some(key)) if !merchant.is_empty() && !key.is_empty() => {
                Ok((merchant, key))
            }
            _ => Err(GatewayError::NotConfigured(ProcessorId::Chase.to_string())),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> GatewayResult<T> {
        let (merchant_id, api_key) = self.credentials()?;
        let mut request = self
            .client
            .request(method, self.url(path))
            .header("X-Merchant-Id", merchant_id)
            .bearer_auth(api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::InvalidResponse(e.to_string()));
        }
        let body: ErrorBody = response.json().await.unwrap_or_default();
        warn!(http_status = %status, "chase request failed");
        Err(status_error(
            status,
            body.response_code
                .unwrap_or_else(|| status.as_u16().to_string()),
            body.message
                .unwrap_or_else(|| "Chase request failed".to_string()),
        ))
    }
}

// Keys are derived from the hold so a retried call lands on the same operation.
fn capture_body(hold_ref: &str, amount: Option<Money>) -> GatewayResult<serde_json::Value> {
    let amount = amount.map(minor_units).transpose()?;
    Ok(json!({
        "amount": amount,
        "idempotencyKey": format!("capture-{hold_ref}"),
    }))
}

fn refund_body(
    hold_ref: &str,
    amount: Option<Money>,
    reason: Option<&str>,
) -> GatewayResult<serde_json::Value> {
    let amount = amount.map(minor_units).transpose()?;
    Ok(json!({
        "amount": amount,
        "reason": reason,
        "idempotencyKey": format!("refund-{hold_ref}"),
    }))
}

fn minor_units(amount: Money) -> GatewayResult<i64> {
    amount.to_minor_units().map_err(|e| GatewayError::Rejected {
        code: "invalid_amount".to_string(),
        message: e.to_string(),
    })
}

#[async_trait]
impl PaymentProcessor for ChaseProcessor {
    fn id(&self) -> ProcessorId {
        ProcessorId::Chase
    }

    fn display_name(&self) -> &str {
        "Chase Merchant Services"
    }

    fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    fn supports_card_type(&self, card_type: CardType) -> bool {
        matches!(card_type, CardType::Credit | CardType::Debit)
    }

    async fn resolve_customer(&self, profile: &CustomerProfile) -> GatewayResult<String> {
        let record: CustomerRecord = self
            .call(
                reqwest::Method::POST,
                "/v1/customers",
                Some(json!({
                    "externalId": profile.customer_id,
                    "name": profile.name,
                    "email": profile.email,
                })),
            )
            .await?;
        Ok(record.customer_id)
    }

    async fn create_hold(&self, request: HoldRequest) -> GatewayResult<HoldResponse> {
        let (merchant_id, _) = self.credentials()?;
        let body = AuthorizeBody {
            merchant_id,
            amount: minor_units(request.amount)?,
            currency: request.currency.to_uppercase(),
            customer_ref: &request.customer_ref,
            payment_method_ref: request.method_ref.as_deref(),
            description: &request.description,
            idempotency_key: &request.idempotency_key,
            metadata: &request.metadata,
        };
        let body = serde_json::to_value(&body)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let tx: Transaction = self
            .call(reqwest::Method::POST, "/v1/transactions/authorize", Some(body))
            .await?;
        match map_transaction_status(&tx.status)? {
            GatewayStatus::Failed => Err(GatewayError::Rejected {
                code: "declined".to_string(),
                message: format!("Authorization {} declined", tx.transaction_id),
            }),
            status => Ok(HoldResponse {
                hold_ref: tx.transaction_id,
                status,
            }),
        }
    }

    async fn capture(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
    ) -> GatewayResult<CaptureResponse> {
        let body = capture_body(hold_ref, amount)?;
        let tx: Transaction = self
            .call(
                reqwest::Method::POST,
                &format!("/v1/transactions/{hold_ref}/capture"),
                Some(body),
            )
            .await?;
        Ok(CaptureResponse {
            status: map_transaction_status(&tx.status)?,
            amount_captured: Money::from_minor_units(tx.approved_amount.unwrap_or_default()),
            charge_ref: tx.reference_id,
        })
    }

    async fn void(&self, hold_ref: &str) -> GatewayResult<GatewayStatus> {
        let tx: Transaction = self
            .call(
                reqwest::Method::POST,
                &format!("/v1/transactions/{hold_ref}/void"),
                None,
            )
            .await?;
        map_transaction_status(&tx.status)
    }

    async fn refund(
        &self,
        hold_ref: &str,
        amount: Option<Money>,
        reason: Option<&str>,
    ) -> GatewayResult<RefundResponse> {
        let body = refund_body(hold_ref, amount, reason)?;
        let refund: RefundRecord = self
            .call(
                reqwest::Method::POST,
                &format!("/v1/transactions/{hold_ref}/refund"),
                Some(body),
            )
            .await?;
        Ok(RefundResponse {
            refund_ref: refund.refund_id,
            amount: Money::from_minor_units(refund.amount),
        })
    }

    async fn query_status(&self, hold_ref: &str) -> GatewayResult<GatewayStatus> {
        let tx: Transaction = self
            .call(
                reqwest::Method::GET,
                &format!("/v1/transactions/{hold_ref}"),
                None,
            )
            .await?;
        map_transaction_status(&tx.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_disabled_chase_fails_fast() {
        let chase = ChaseProcessor::new(ChaseConfig {
            enabled: false,
            merchant_id: Some("m1".into()),
            api_key: Some("k1".into()),
            ..ChaseConfig::default()
        });
        assert!(!chase.is_configured());
        assert_eq!(
            chase.capture("tx_1", Some(Money::new(dec!(1)))).await.unwrap_err(),
            GatewayError::NotConfigured("CHASE".into())
        );
        assert_eq!(
            chase.void("tx_1").await.unwrap_err(),
            GatewayError::NotConfigured("CHASE".into())
        );
    }

    #[test]
    fn test_capture_and_refund_carry_idempotency_keys() {
        let capture = capture_body("tx_1", Some(Money::new(dec!(226.10)))).unwrap();
        assert_eq!(capture["amount"], 22610);
        assert_eq!(capture["idempotencyKey"], "capture-tx_1");

        let refund = refund_body("tx_1", None, Some("duplicate")).unwrap();
        assert!(refund["amount"].is_null());
        assert_eq!(refund["reason"], "duplicate");
        assert_eq!(refund["idempotencyKey"], "refund-tx_1");
        assert_eq!(
            refund_body("tx_1", None, None).unwrap()["idempotencyKey"],
            refund["idempotencyKey"]
        );
    }

    #[test]
    fn test_enabled_without_credentials_is_unconfigured() {
        let chase = ChaseProcessor::new(ChaseConfig {
            enabled: true,
            ..ChaseConfig::default()
        });
        assert!(!chase.is_configured());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_transaction_status("approved").unwrap(),
            GatewayStatus::Authorized
        );
        assert_eq!(map_transaction_status("SETTLED").unwrap(), GatewayStatus::Captured);
        assert_eq!(map_transaction_status("DECLINED").unwrap(), GatewayStatus::Failed);
        assert!(map_transaction_status("???").is_err());
    }
}
