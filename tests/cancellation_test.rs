mod common;

use chrono::Duration;
use common::{CUSTOMER, Harness, PROVIDER, Uuid, money};
use rust_decimal_macros::dec;
use workorder_settlement::application::commands::{
    CancellationOutcome, RequestCancellation, StartService, ValidateCancellation,
};
use workorder_settlement::domain::fees::CancellationFee;
use workorder_settlement::domain::money::Amount;
use workorder_settlement::domain::negotiation::{CancellationResolution, CancellationStatus};
use workorder_settlement::domain::payment::PaymentStatus;
use workorder_settlement::domain::ports::GatewayStatus;
use workorder_settlement::domain::work_order::{ServiceRequestStatus, WorkOrderStatus};
use workorder_settlement::error::SettlementError;
use workorder_settlement::infrastructure::processors::sandbox::{SandboxFault, SandboxOp};

fn cancel(work_order_id: Uuid) -> RequestCancellation {
    RequestCancellation {
        work_order_id,
        customer_id: CUSTOMER.to_string(),
        reason: Some("Found another shop".to_string()),
    }
}

fn validate(cancellation_id: Uuid, costs: Option<rust_decimal::Decimal>) -> ValidateCancellation {
    ValidateCancellation {
        cancellation_id,
        provider_id: PROVIDER.to_string(),
        has_incurred_costs: costs.is_some(),
        reported_costs: costs.map(|c| Amount::new(c).unwrap()),
        note: None,
    }
}

fn pending_id(outcome: CancellationOutcome) -> Uuid {
    match outcome {
        CancellationOutcome::PendingProviderValidation {
            cancellation_id, ..
        } => cancellation_id,
        other => panic!("expected provider validation, got {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_before_start_within_a_day() {
    let h = Harness::new();
    let hold = h.approved(dec!(200)).await;
    h.clock.advance(Duration::hours(3));

    let outcome = h
        .orchestrator
        .request_cancellation(cancel(hold.work_order_id))
        .await
        .unwrap();
    let CancellationOutcome::Cancelled {
        fee,
        holds_released,
        ..
    } = outcome
    else {
        panic!("expected an immediate cancellation");
    };
    assert_eq!(
        fee,
        CancellationFee::Fixed {
            percent: dec!(25),
            amount: money(dec!(50))
        }
    );
    assert_eq!(holds_released, 1);

    let payment = h.payment(hold.payment_id).await;
    assert_eq!(payment.status, PaymentStatus::Cancelled);
    let gateway_hold = h.stripe.hold(payment.hold_ref.as_deref().unwrap()).await.unwrap();
    assert_eq!(gateway_hold.status, GatewayStatus::Voided);

    let work_order = h.work_order(hold.work_order_id).await;
    assert_eq!(work_order.status, WorkOrderStatus::Cancelled);
    let request = h
        .orchestrator
        .store()
        .service_request(work_order.service_request_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(request.status, ServiceRequestStatus::Cancelled);

    let names = h.events.names().await;
    assert!(names.contains(&"payment_voided"));
    assert!(names.contains(&"cancellation_resolved"));
}

#[tokio::test]
async fn test_cancel_before_start_after_a_day() {
    let h = Harness::new();
    let hold = h.approved(dec!(200)).await;
    h.clock.advance(Duration::hours(25));

    let outcome = h
        .orchestrator
        .request_cancellation(cancel(hold.work_order_id))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CancellationOutcome::Cancelled {
            fee: CancellationFee::Fixed { percent, .. },
            ..
        } if percent == dec!(10)
    ));
}

#[tokio::test]
async fn test_started_service_needs_provider_validation() {
    let h = Harness::new();
    let hold = h.started(dec!(200)).await;

    let outcome = h
        .orchestrator
        .request_cancellation(cancel(hold.work_order_id))
        .await
        .unwrap();
    let cancellation_id = pending_id(outcome);

    // hold stays in place until the provider answers
    assert_eq!(
        h.payment(hold.payment_id).await.status,
        PaymentStatus::Authorized
    );
    assert_eq!(h.stripe.calls(SandboxOp::Void).await, 0);

    // asking again returns the same open request
    let again = h
        .orchestrator
        .request_cancellation(cancel(hold.work_order_id))
        .await
        .unwrap();
    assert_eq!(pending_id(again), cancellation_id);
}

#[tokio::test]
async fn test_provider_confirms_no_costs() {
    let h = Harness::new();
    let hold = h.started(dec!(200)).await;
    let cancellation_id = pending_id(
        h.orchestrator
            .request_cancellation(cancel(hold.work_order_id))
            .await
            .unwrap(),
    );

    let outcome = h
        .orchestrator
        .validate_cancellation(validate(cancellation_id, None))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CancellationOutcome::Cancelled { holds_released: 1, .. }
    ));
    assert_eq!(
        h.work_order(hold.work_order_id).await.status,
        WorkOrderStatus::Cancelled
    );
    let cancellation = h
        .orchestrator
        .store()
        .cancellation(cancellation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancellation.status, CancellationStatus::Completed);
    assert_eq!(
        cancellation.resolution,
        Some(CancellationResolution::ProviderConfirmedNoCosts)
    );
}

#[tokio::test]
async fn test_provider_reported_costs_escalate() {
    let h = Harness::new();
    let hold = h.started(dec!(200)).await;
    let cancellation_id = pending_id(
        h.orchestrator
            .request_cancellation(cancel(hold.work_order_id))
            .await
            .unwrap(),
    );

    let outcome = h
        .orchestrator
        .validate_cancellation(validate(cancellation_id, Some(dec!(60))))
        .await
        .unwrap();
    assert_eq!(outcome, CancellationOutcome::Escalated { cancellation_id });

    let work_order = h.work_order(hold.work_order_id).await;
    assert_eq!(work_order.status, WorkOrderStatus::Disputed);
    assert!(work_order.dispute_reason.unwrap().contains("60.00"));
    assert_eq!(
        h.payment(hold.payment_id).await.status,
        PaymentStatus::Authorized
    );
    let cancellation = h
        .orchestrator
        .store()
        .cancellation(cancellation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cancellation.status, CancellationStatus::Escalated);
    assert_eq!(cancellation.reported_costs, Some(money(dec!(60))));

    // a second answer is refused
    let err = h
        .orchestrator
        .validate_cancellation(validate(cancellation_id, None))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Conflict(_)));
}

#[tokio::test]
async fn test_silent_provider_times_out() {
    let h = Harness::new();
    let hold = h.started(dec!(200)).await;
    let cancellation_id = pending_id(
        h.orchestrator
            .request_cancellation(cancel(hold.work_order_id))
            .await
            .unwrap(),
    );

    h.clock.advance(Duration::hours(24));
    assert_eq!(h.orchestrator.sweep_expired().await.unwrap(), (0, 0));
    h.clock.advance(Duration::minutes(1));
    assert_eq!(h.orchestrator.sweep_expired().await.unwrap(), (0, 1));

    let cancellation = h
        .orchestrator
        .store()
        .cancellation(cancellation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        cancellation.resolution,
        Some(CancellationResolution::ProviderTimedOut)
    );
    assert_eq!(
        h.payment(hold.payment_id).await.status,
        PaymentStatus::Cancelled
    );
    assert_eq!(
        h.work_order(hold.work_order_id).await.status,
        WorkOrderStatus::Cancelled
    );
}

#[tokio::test]
async fn test_unreleased_hold_blocks_start_until_retried() {
    let h = Harness::new();
    let hold = h.approved(dec!(200)).await;
    h.stripe.fail_next(SandboxOp::Void, SandboxFault::Timeout).await;

    let err = h
        .orchestrator
        .request_cancellation(cancel(hold.work_order_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::GatewayPending));
    assert_eq!(
        h.work_order(hold.work_order_id).await.status,
        WorkOrderStatus::InProgress
    );

    let err = h
        .orchestrator
        .start_service(StartService {
            work_order_id: hold.work_order_id,
            provider_id: PROVIDER.to_string(),
            photos: vec!["before-1.jpg".to_string()],
            waive_photos: false,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Conflict(_)));

    let outcome = h
        .orchestrator
        .request_cancellation(cancel(hold.work_order_id))
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        CancellationOutcome::Cancelled { holds_released: 1, .. }
    ));
    assert_eq!(
        h.payment(hold.payment_id).await.status,
        PaymentStatus::Cancelled
    );
}

#[tokio::test]
async fn test_completed_work_cannot_be_cancelled() {
    let h = Harness::new();
    let hold = h.started(dec!(200)).await;
    h.complete(hold.work_order_id).await;
    let err = h
        .orchestrator
        .request_cancellation(cancel(hold.work_order_id))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::Conflict(_)));
}

#[tokio::test]
async fn test_only_the_customer_can_cancel() {
    let h = Harness::new();
    let hold = h.approved(dec!(200)).await;
    let err = h
        .orchestrator
        .request_cancellation(RequestCancellation {
            work_order_id: hold.work_order_id,
            customer_id: "someone-else".to_string(),
            reason: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::NotFound { .. }));
}
