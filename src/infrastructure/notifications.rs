use crate::domain::ports::{DomainEvent, NotificationSink};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Writes every event to the log. The default sink when no chat/push system is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        info!(event = event.name(), %payload, "notification");
        Ok(())
    }
}

/// Keeps published events in memory for inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingNotificationSink {
    events: Arc<RwLock<Vec<DomainEvent>>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.read().await.clone()
    }

    pub async fn names(&self) -> Vec<&'static str> {
        self.events.read().await.iter().map(DomainEvent::name).collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn publish(&self, event: DomainEvent) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
