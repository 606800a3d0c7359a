//! JSON API over the orchestrator, mounted under `/api/v1`.
//!
//! Actor identity arrives in the request body (`customerId`, `providerId`);
//! authentication happens in front of this service.

use crate::application::commands::{
    ApproveQuote, ApproveService, CompleteService, NewQuote, NewServiceRequest, ProposeSupplement,
    RefundPayment, ReportIssue, RequestCancellation, RespondSupplement, StartService,
    ValidateCancellation,
};
use crate::application::orchestrator::SettlementOrchestrator;
use crate::application::webhook::{SIGNATURE_HEADER, WebhookReconciler};
use crate::domain::fees::CardType;
use crate::domain::money::Amount;
use crate::error::{ErrorKind, SettlementError};
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Seconds a caller should wait before retrying a payment that is still processing.
pub const RETRY_AFTER_SECS: u64 = 5;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SettlementOrchestrator>,
    /// `None` when no webhook secret is configured; deliveries are then refused.
    pub webhooks: Option<Arc<WebhookReconciler>>,
}

pub fn router(state: AppState) -> Router {
    let service_flow = Router::new()
        .route("/approve-quote", post(approve_quote))
        .route("/start-service", post(start_service))
        .route("/request-supplement", post(request_supplement))
        .route("/respond-supplement", post(respond_supplement))
        .route("/request-cancellation", post(request_cancellation))
        .route("/validate-cancellation", post(validate_cancellation))
        .route("/complete-service", post(complete_service))
        .route("/approve-service", post(approve_service))
        .route("/compare-processors", post(compare_processors))
        .route("/refund", post(refund))
        .route("/report-issue", post(report_issue))
        .route("/approved-quote/{work_order_id}", get(approved_quote))
        .route("/receipt/{payment_id}", get(receipt));

    let api = Router::new()
        .route("/service-requests", post(create_service_request))
        .route("/quotes", post(submit_quote))
        .route("/webhooks/gateway", post(gateway_webhook))
        .nest("/service-flow", service_flow);

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api)
        .with_state(state)
}

impl IntoResponse for SettlementError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let status = match (&self, kind) {
            (SettlementError::RefundWindowExpired, _) => StatusCode::UNPROCESSABLE_ENTITY,
            (_, ErrorKind::Validation | ErrorKind::WebhookVerification) => StatusCode::BAD_REQUEST,
            (_, ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            (_, ErrorKind::Conflict) => StatusCode::CONFLICT,
            (_, ErrorKind::GatewayRejected) => StatusCode::PAYMENT_REQUIRED,
            (_, ErrorKind::GatewayUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
            (_, ErrorKind::Internal) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if kind == ErrorKind::Internal {
            error!(error = %self, "request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = Json(json!({
            "error": message,
            "retryable": self.is_retryable(),
        }));

        let mut response = (status, body).into_response();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
        }
        response
    }
}

type ApiResult<T> = Result<T, SettlementError>;

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn create_service_request(
    State(state): State<AppState>,
    Json(cmd): Json<NewServiceRequest>,
) -> ApiResult<impl IntoResponse> {
    let request = state.orchestrator.create_service_request(cmd).await?;
    Ok((StatusCode::CREATED, Json(request)))
}

async fn submit_quote(
    State(state): State<AppState>,
    Json(cmd): Json<NewQuote>,
) -> ApiResult<impl IntoResponse> {
    let quote = state.orchestrator.submit_quote(cmd).await?;
    Ok((StatusCode::CREATED, Json(quote)))
}

async fn approve_quote(
    State(state): State<AppState>,
    Json(cmd): Json<ApproveQuote>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.approve_quote(cmd).await?))
}

async fn start_service(
    State(state): State<AppState>,
    Json(cmd): Json<StartService>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.start_service(cmd).await?))
}

async fn request_supplement(
    State(state): State<AppState>,
    Json(cmd): Json<ProposeSupplement>,
) -> ApiResult<impl IntoResponse> {
    let supplement = state.orchestrator.request_supplement(cmd).await?;
    Ok((StatusCode::CREATED, Json(supplement)))
}

async fn respond_supplement(
    State(state): State<AppState>,
    Json(cmd): Json<RespondSupplement>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.respond_supplement(cmd).await?))
}

async fn request_cancellation(
    State(state): State<AppState>,
    Json(cmd): Json<RequestCancellation>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.request_cancellation(cmd).await?))
}

async fn validate_cancellation(
    State(state): State<AppState>,
    Json(cmd): Json<ValidateCancellation>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.validate_cancellation(cmd).await?))
}

async fn complete_service(
    State(state): State<AppState>,
    Json(cmd): Json<CompleteService>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.complete_service(cmd).await?))
}

async fn approve_service(
    State(state): State<AppState>,
    Json(cmd): Json<ApproveService>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.approve_service(cmd).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompareRequest {
    amount: Amount,
    #[serde(default)]
    card_type: CardType,
}

async fn compare_processors(
    State(state): State<AppState>,
    Json(request): Json<CompareRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .orchestrator
            .compare_processors(request.amount, request.card_type)?,
    ))
}

async fn refund(
    State(state): State<AppState>,
    Json(cmd): Json<RefundPayment>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.refund_payment(cmd).await?))
}

async fn report_issue(
    State(state): State<AppState>,
    Json(cmd): Json<ReportIssue>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.report_issue(cmd).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RequesterQuery {
    requester_id: String,
}

async fn approved_quote(
    State(state): State<AppState>,
    Path(work_order_id): Path<Uuid>,
    Query(query): Query<RequesterQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .orchestrator
            .approved_quote_details(work_order_id, &query.requester_id)
            .await?,
    ))
}

async fn receipt(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.orchestrator.receipt_for_payment(payment_id).await?))
}

/// Raw body is required: the signature covers the exact bytes received.
async fn gateway_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<impl IntoResponse> {
    let Some(webhooks) = state.webhooks.as_ref() else {
        return Err(SettlementError::WebhookVerification(
            "webhook secret not configured".to_string(),
        ));
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    Ok(Json(webhooks.handle(signature, &body).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: SettlementError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            status_of(SettlementError::Validation("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SettlementError::not_found("Payment", "p1")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SettlementError::Conflict("x".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SettlementError::RefundWindowExpired),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SettlementError::GatewayRejected {
                reason: "declined".into()
            }),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            status_of(SettlementError::WebhookVerification("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SettlementError::ProcessorNotConfigured("CHASE".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(SettlementError::Storage("disk".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unconfigured_processor_is_not_retryable() {
        let response = SettlementError::ProcessorNotConfigured("CHASE".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_pending_sets_retry_after() {
        let response = SettlementError::GatewayPending.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            response.headers().get(header::RETRY_AFTER).unwrap(),
            &HeaderValue::from(RETRY_AFTER_SECS)
        );
    }
}
