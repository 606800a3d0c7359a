mod common;

use chrono::Duration;
use common::{Harness, money};
use rust_decimal_macros::dec;
use serde_json::json;
use workorder_settlement::application::webhook::{WebhookReconciler, sign};
use workorder_settlement::domain::payment::PaymentStatus;
use workorder_settlement::domain::ports::{Clock, GatewayStatus};
use workorder_settlement::domain::work_order::WorkOrderStatus;
use workorder_settlement::error::SettlementError;
use workorder_settlement::infrastructure::processors::sandbox::{SandboxFault, SandboxOp};

const SECRET: &str = "whsec_integration";

fn reconciler(h: &Harness) -> WebhookReconciler {
    WebhookReconciler::new(h.orchestrator.clone(), SECRET)
}

fn event(id: &str, kind: &str, object: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": id,
        "type": kind,
        "data": { "object": object }
    }))
    .unwrap()
}

fn signed(h: &Harness, payload: &[u8]) -> String {
    sign(SECRET, h.clock.now().timestamp(), payload).unwrap()
}

#[tokio::test]
async fn test_authorization_event_confirms_pending_hold() {
    let h = Harness::new();
    h.stripe.set_hold_confirmation(GatewayStatus::Pending).await;
    let hold = h.approved(dec!(200)).await;
    assert_eq!(hold.payment_status, PaymentStatus::Pending);
    assert_eq!(
        h.work_order(hold.work_order_id).await.status,
        WorkOrderStatus::PendingStart
    );
    let hold_ref = h.payment(hold.payment_id).await.hold_ref.unwrap();

    let webhooks = reconciler(&h);
    let payload = event(
        "evt_1",
        "payment_intent.amount_capturable_updated",
        json!({ "id": hold_ref, "metadata": { "payment_id": hold.payment_id.to_string() } }),
    );
    let ack = webhooks
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.received);
    assert!(ack.handled);
    assert_eq!(ack.event_id, "evt_1");

    assert_eq!(
        h.payment(hold.payment_id).await.status,
        PaymentStatus::Authorized
    );
    assert_eq!(
        h.work_order(hold.work_order_id).await.status,
        WorkOrderStatus::InProgress
    );

    // redelivery changes nothing
    let ack = webhooks
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.handled);
    let authorized = h
        .events
        .names()
        .await
        .into_iter()
        .filter(|name| *name == "payment_authorized")
        .count();
    assert_eq!(authorized, 1);
}

#[tokio::test]
async fn test_failed_event_marks_pending_hold_failed() {
    let h = Harness::new();
    h.stripe.set_hold_confirmation(GatewayStatus::Pending).await;
    let hold = h.approved(dec!(120)).await;
    let hold_ref = h.payment(hold.payment_id).await.hold_ref.unwrap();

    let payload = event(
        "evt_fail",
        "payment_intent.payment_failed",
        json!({
            "id": hold_ref,
            "last_payment_error": { "message": "Insufficient funds" }
        }),
    );
    let ack = reconciler(&h)
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.handled);

    let payment = h.payment(hold.payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert!(payment.failure_reason.is_some());
    assert!(h.events.names().await.contains(&"payment_failed"));
}

#[tokio::test]
async fn test_capture_event_settles_an_unconfirmed_capture() {
    let h = Harness::new();
    let hold = h.started(dec!(200)).await;
    h.complete(hold.work_order_id).await;
    h.stripe
        .fail_next(SandboxOp::Capture, SandboxFault::TimeoutAfterApply)
        .await;
    h.stripe
        .fail_next(SandboxOp::QueryStatus, SandboxFault::Unavailable)
        .await;

    let err = h
        .orchestrator
        .approve_service(h.approve_service_command(hold.work_order_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::GatewayPending));
    assert_eq!(
        h.payment(hold.payment_id).await.status,
        PaymentStatus::Authorized
    );

    let hold_ref = h.payment(hold.payment_id).await.hold_ref.unwrap();
    let payload = event("evt_cap", "payment_intent.succeeded", json!({ "id": hold_ref }));
    let ack = reconciler(&h)
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.handled);

    let payment = h.payment(hold.payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Captured);
    assert_eq!(
        h.work_order(hold.work_order_id).await.status,
        WorkOrderStatus::Completed
    );
    let receipt = h
        .orchestrator
        .receipt_for_payment(payment.id)
        .await
        .unwrap();
    assert_eq!(receipt.total_amount, money(dec!(226.10)));
    assert_eq!(h.stripe.calls(SandboxOp::Capture).await, 1);
}

#[tokio::test]
async fn test_duplicate_capture_event_settles_once() {
    let h = Harness::new();
    let hold = h.started(dec!(200)).await;
    h.complete(hold.work_order_id).await;
    h.stripe
        .fail_next(SandboxOp::Capture, SandboxFault::TimeoutAfterApply)
        .await;
    h.stripe
        .fail_next(SandboxOp::QueryStatus, SandboxFault::Unavailable)
        .await;
    let err = h
        .orchestrator
        .approve_service(h.approve_service_command(hold.work_order_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::GatewayPending));

    let webhooks = reconciler(&h);
    let hold_ref = h.payment(hold.payment_id).await.hold_ref.unwrap();
    let payload = event("evt_cap_dup", "payment_intent.succeeded", json!({ "id": hold_ref }));
    let header = signed(&h, &payload);

    let first = webhooks.handle(Some(&header), &payload).await.unwrap();
    assert!(first.handled);
    let receipt = h
        .orchestrator
        .receipt_for_payment(hold.payment_id)
        .await
        .unwrap();

    let second = webhooks.handle(Some(&header), &payload).await.unwrap();
    assert!(second.received);
    assert!(second.handled);
    assert!(second.error.is_none());

    assert_eq!(
        h.payment(hold.payment_id).await.status,
        PaymentStatus::Captured
    );
    let again = h
        .orchestrator
        .receipt_for_payment(hold.payment_id)
        .await
        .unwrap();
    assert_eq!(again.receipt_number, receipt.receipt_number);
    let receipts = h.orchestrator.store().receipts().await.unwrap();
    assert_eq!(
        receipts
            .iter()
            .filter(|r| r.payment_id == hold.payment_id)
            .count(),
        1
    );
    let names = h.events.names().await;
    let count = |wanted: &str| names.iter().filter(|&&name| name == wanted).count();
    assert_eq!(count("payment_captured"), 1);
    assert_eq!(count("receipt_issued"), 1);
}

#[tokio::test]
async fn test_refund_event_records_gateway_refund() {
    let h = Harness::new();
    let settlement = h.settled(dec!(200)).await;
    let hold_ref = settlement.payment.hold_ref.clone().unwrap();

    let payload = event(
        "evt_ref",
        "charge.refunded",
        json!({ "id": "ch_123", "payment_intent": hold_ref, "amount_refunded": 22610 }),
    );
    let ack = reconciler(&h)
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.handled);

    let payment = h.payment(settlement.payment.id).await;
    assert_eq!(payment.status, PaymentStatus::Refunded);
    assert_eq!(payment.refund_amount, Some(money(dec!(226.10))));
}

#[tokio::test]
async fn test_dispute_event_disputes_work_order() {
    let h = Harness::new();
    let settlement = h.settled(dec!(200)).await;
    let hold_ref = settlement.payment.hold_ref.clone().unwrap();

    let payload = event(
        "evt_dp",
        "charge.dispute.created",
        json!({ "id": "dp_1", "payment_intent": hold_ref, "reason": "fraudulent" }),
    );
    let ack = reconciler(&h)
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.handled);

    let work_order = h.work_order(settlement.payment.work_order_id).await;
    assert_eq!(work_order.status, WorkOrderStatus::Disputed);
    assert_eq!(
        work_order.dispute_reason.as_deref(),
        Some("Chargeback opened: fraudulent")
    );
}

#[tokio::test]
async fn test_rejects_unsigned_tampered_and_stale_deliveries() {
    let h = Harness::new();
    let webhooks = reconciler(&h);
    let payload = event("evt_x", "payment_intent.succeeded", json!({ "id": "pi_unknown" }));

    let err = webhooks.handle(None, &payload).await.unwrap_err();
    assert!(matches!(err, SettlementError::WebhookVerification(_)));

    let header = signed(&h, &payload);
    let mut tampered = payload.clone();
    tampered.extend_from_slice(b" ");
    let err = webhooks.handle(Some(&header), &tampered).await.unwrap_err();
    assert!(matches!(err, SettlementError::WebhookVerification(_)));

    let other_secret = sign("whsec_other", h.clock.now().timestamp(), &payload).unwrap();
    let err = webhooks
        .handle(Some(&other_secret), &payload)
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::WebhookVerification(_)));

    let stale = sign(
        SECRET,
        (h.clock.now() - Duration::minutes(10)).timestamp(),
        &payload,
    )
    .unwrap();
    let err = webhooks.handle(Some(&stale), &payload).await.unwrap_err();
    assert!(matches!(err, SettlementError::WebhookVerification(_)));
}

#[tokio::test]
async fn test_unknown_payment_is_acknowledged_with_error() {
    let h = Harness::new();
    let payload = event("evt_y", "payment_intent.succeeded", json!({ "id": "pi_unknown" }));
    let ack = reconciler(&h)
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.received);
    assert!(!ack.handled);
    assert!(ack.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn test_unrecognized_event_type_is_ignored() {
    let h = Harness::new();
    let payload = event("evt_z", "customer.created", json!({ "id": "cus_1" }));
    let ack = reconciler(&h)
        .handle(Some(&signed(&h, &payload)), &payload)
        .await
        .unwrap();
    assert!(ack.received);
    assert!(!ack.handled);
    assert!(ack.error.is_none());
}
