#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use workorder_settlement::application::commands::{
    ApproveQuote, ApproveService, ApprovedHold, CompleteService, NewQuote, NewServiceRequest,
    Settlement, StartService,
};
use workorder_settlement::application::orchestrator::SettlementOrchestrator;
use workorder_settlement::domain::fees::{CardType, ProcessorId};
use workorder_settlement::domain::money::Money;
use workorder_settlement::domain::payment::Payment;
use workorder_settlement::domain::work_order::{Party, WorkOrder};
use workorder_settlement::infrastructure::clock::ManualClock;
use workorder_settlement::infrastructure::in_memory::InMemoryStore;
use workorder_settlement::infrastructure::notifications::RecordingNotificationSink;
use workorder_settlement::infrastructure::processors::sandbox::SandboxProcessor;
use workorder_settlement::infrastructure::registry::ProcessorRegistry;

pub use uuid::Uuid;

pub const CUSTOMER: &str = "cust-1";
pub const PROVIDER: &str = "prov-1";

/// Orchestrator wired to sandbox gateways, a manual clock and a recording sink.
pub struct Harness {
    pub orchestrator: Arc<SettlementOrchestrator>,
    pub store: Arc<InMemoryStore>,
    pub stripe: Arc<SandboxProcessor>,
    pub chase: Arc<SandboxProcessor>,
    pub clock: Arc<ManualClock>,
    pub events: RecordingNotificationSink,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let stripe = Arc::new(SandboxProcessor::new(ProcessorId::Stripe));
        let chase = Arc::new(SandboxProcessor::new(ProcessorId::Chase));
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap(),
        ));
        let events = RecordingNotificationSink::new();
        let registry = ProcessorRegistry::new()
            .with(stripe.clone())
            .with(chase.clone());
        let orchestrator = Arc::new(SettlementOrchestrator::new(
            store.clone(),
            registry,
            Arc::new(events.clone()),
            clock.clone(),
        ));
        Self {
            orchestrator,
            store,
            stripe,
            chase,
            clock,
            events,
        }
    }

    pub fn sandbox(&self, processor: ProcessorId) -> &SandboxProcessor {
        match processor {
            ProcessorId::Stripe => self.stripe.as_ref(),
            ProcessorId::Chase => self.chase.as_ref(),
        }
    }

    /// Service request plus a single quote whose total is `parts + labor`.
    pub async fn quoted(&self, parts: Decimal, labor: Decimal) -> Uuid {
        let request = self
            .orchestrator
            .create_service_request(NewServiceRequest {
                customer: party(CUSTOMER, "Dana Ruiz"),
                title: "Brake service".to_string(),
                description: "Front pads grinding".to_string(),
                vehicle: "2019 Honda Civic".to_string(),
            })
            .await
            .unwrap();
        self.orchestrator
            .submit_quote(NewQuote {
                service_request_id: request.id,
                provider: party(PROVIDER, "Ace Auto"),
                parts_cost: Money::new(parts),
                labor_cost: Money::new(labor),
                fees: Money::ZERO,
                tax: Money::ZERO,
                valid_until: None,
            })
            .await
            .unwrap()
            .id
    }

    pub fn approve_command(&self, quote_id: Uuid, processor: ProcessorId) -> ApproveQuote {
        ApproveQuote {
            quote_id,
            customer_id: CUSTOMER.to_string(),
            processor,
            card_type: CardType::Credit,
            payment_method_ref: Some("pm_card_visa".to_string()),
        }
    }

    /// Accepted quote with an authorized hold on Stripe.
    pub async fn approved(&self, subtotal: Decimal) -> ApprovedHold {
        let quote_id = self.quoted(subtotal, Decimal::ZERO).await;
        self.orchestrator
            .approve_quote(self.approve_command(quote_id, ProcessorId::Stripe))
            .await
            .unwrap()
    }

    pub async fn started(&self, subtotal: Decimal) -> ApprovedHold {
        let hold = self.approved(subtotal).await;
        self.orchestrator
            .start_service(StartService {
                work_order_id: hold.work_order_id,
                provider_id: PROVIDER.to_string(),
                photos: vec!["before-1.jpg".to_string()],
                waive_photos: false,
            })
            .await
            .unwrap();
        hold
    }

    pub async fn complete(&self, work_order_id: Uuid) -> WorkOrder {
        self.orchestrator
            .complete_service(CompleteService {
                work_order_id,
                provider_id: PROVIDER.to_string(),
                photos: Vec::new(),
                client_present: true,
                notes: Some("Pads and rotors replaced".to_string()),
            })
            .await
            .unwrap()
    }

    pub fn approve_service_command(&self, work_order_id: Uuid) -> ApproveService {
        ApproveService {
            work_order_id,
            customer_id: CUSTOMER.to_string(),
            accept_service_terms: true,
            accept_fraud_disclaimer: true,
            accept_cancellation_policy: true,
            signature_name: "Dana Ruiz".to_string(),
        }
    }

    /// Runs a work order all the way to a captured payment with a receipt.
    pub async fn settled(&self, subtotal: Decimal) -> Settlement {
        let hold = self.started(subtotal).await;
        self.complete(hold.work_order_id).await;
        self.orchestrator
            .approve_service(self.approve_service_command(hold.work_order_id))
            .await
            .unwrap()
    }

    pub async fn work_order(&self, id: Uuid) -> WorkOrder {
        self.orchestrator.store().work_order(id).await.unwrap().unwrap()
    }

    pub async fn payment(&self, id: Uuid) -> Payment {
        self.orchestrator.store().payment(id).await.unwrap().unwrap()
    }

    pub async fn payments(&self, work_order_id: Uuid) -> Vec<Payment> {
        self.orchestrator
            .store()
            .payments_for_work_order(work_order_id)
            .await
            .unwrap()
    }
}

pub fn party(id: &str, name: &str) -> Party {
    Party {
        id: id.to_string(),
        name: name.to_string(),
        email: None,
    }
}

pub fn money(value: Decimal) -> Money {
    Money::new(value)
}
