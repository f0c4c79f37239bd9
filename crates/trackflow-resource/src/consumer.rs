//! Completion topic consumer
//!
//! Thin [`EventHandler`] over the coordinator's promotion path. Errors
//! propagate to the bus, which retries the delivery and dead-letters it
//! once attempts run out.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use trackflow_common::bus::EventHandler;
use trackflow_common::events::{EventType, ResourceEvent};
use trackflow_common::trace::TraceContext;
use trackflow_common::Result;

use crate::coordinator::IngestionCoordinator;

/// Consumer group id for the promotion subscription.
pub const COMPLETION_GROUP: &str = "resource-service";

pub struct CompletionConsumer {
    coordinator: Arc<IngestionCoordinator>,
}

impl CompletionConsumer {
    pub fn new(coordinator: Arc<IngestionCoordinator>) -> Self {
        Self { coordinator }
    }
}

#[async_trait]
impl EventHandler for CompletionConsumer {
    async fn handle(&self, event: ResourceEvent, trace: TraceContext) -> Result<()> {
        match event.event_type() {
            EventType::Create => self.coordinator.on_processing_complete(&event, &trace).await,
            EventType::Delete => {
                debug!(
                    resource_id = event.resource_id(),
                    "delete events carry no completion work"
                );
                Ok(())
            }
        }
    }
}
