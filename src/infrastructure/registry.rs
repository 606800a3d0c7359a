use crate::domain::fees::{CardType, ProcessorId};
use crate::domain::ports::PaymentProcessor;
use crate::error::{Result, SettlementError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name-to-adapter map handed to the orchestrator at construction.
///
/// Unconfigured adapters are registered too, so comparison still lists them.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: BTreeMap<ProcessorId, Arc<dyn PaymentProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn PaymentProcessor>) -> &mut Self {
        self.processors.insert(processor.id(), processor);
        self
    }

    pub fn with(mut self, processor: Arc<dyn PaymentProcessor>) -> Self {
        self.register(processor);
        self
    }

    pub fn get(&self, id: ProcessorId) -> Result<Arc<dyn PaymentProcessor>> {
        self.processors
            .get(&id)
            .cloned()
            .ok_or_else(|| SettlementError::ProcessorNotRegistered(id.to_string()))
    }

    pub fn get_by_name(&self, name: &str) -> Result<Arc<dyn PaymentProcessor>> {
        self.get(name.parse()?)
    }

    /// Registered ids in registration priority order (STRIPE first).
    pub fn ids(&self) -> Vec<ProcessorId> {
        self.processors.keys().copied().collect()
    }

    /// Looks up `id` and checks it can charge `card_type`.
    pub fn select(
        &self,
        id: ProcessorId,
        card_type: CardType,
    ) -> Result<Arc<dyn PaymentProcessor>> {
        let processor = self.get(id)?;
        if !processor.supports_card_type(card_type) {
            return Err(SettlementError::UnsupportedCardType {
                processor: id.to_string(),
                card_type: card_type.to_string(),
            });
        }
        Ok(processor)
    }
}
