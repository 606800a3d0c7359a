//! Application layer: the settlement orchestrator and the services around it.
//!
//! [`orchestrator::SettlementOrchestrator`] owns every state transition. The webhook
//! reconciler and the expiry scheduler only feed it observations.

pub mod commands;
pub mod locks;
pub mod orchestrator;
pub mod receipt;
pub mod scheduler;
pub mod webhook;
