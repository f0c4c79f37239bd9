//! Event-driven processing worker
//!
//! One handler invocation walks a resource through the processing phases:
//!
//! `Received -> Fetching -> Validating -> Extracting -> Publishing -> Complete`
//!
//! with `Rejected` as the off-ramp for payloads that fail validation.
//! Infrastructure errors (fetch or publish exhaustion) propagate to the bus,
//! which redelivers and eventually dead-letters. Validation failures do not:
//! a rejected payload is logged once and the event is consumed, so the
//! resource stays in staging.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use trackflow_common::bus::{EventBus, EventHandler};
use trackflow_common::events::{EventType, ResourceEvent, COMPLETION_TOPIC};
use trackflow_common::trace::TraceContext;
use trackflow_common::{FlowError, Result};

use crate::clients::{MetadataSink, ResourceFetcher};
use crate::metadata;

/// Consumer group id for the worker's resource topic subscription.
pub const PROCESSOR_GROUP: &str = "processor-service";

/// ID3v2 files start with this three-byte marker.
const ID3_MAGIC: &[u8] = b"ID3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Received,
    Fetching,
    Validating,
    Extracting,
    Publishing,
    Complete,
    Rejected,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Received => "RECEIVED",
            Phase::Fetching => "FETCHING",
            Phase::Validating => "VALIDATING",
            Phase::Extracting => "EXTRACTING",
            Phase::Publishing => "PUBLISHING",
            Phase::Complete => "COMPLETE",
            Phase::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}

pub struct ProcessorWorker {
    fetcher: Arc<dyn ResourceFetcher>,
    sink: Arc<dyn MetadataSink>,
    bus: EventBus,
}

impl ProcessorWorker {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        sink: Arc<dyn MetadataSink>,
        bus: EventBus,
    ) -> Self {
        Self { fetcher, sink, bus }
    }

    fn phase(resource_id: &str, phase: Phase) {
        debug!(resource_id, phase = %phase, "processing phase");
    }

    async fn process_create(&self, resource_id: &str, trace: &TraceContext) -> Result<()> {
        Self::phase(resource_id, Phase::Received);

        let id: i64 = resource_id
            .parse()
            .map_err(|_| FlowError::Validation(format!("bad resource id: {resource_id}")))?;

        Self::phase(resource_id, Phase::Fetching);
        let bytes = self.fetcher.fetch_resource(resource_id, trace).await?;

        Self::phase(resource_id, Phase::Validating);
        if !bytes.starts_with(ID3_MAGIC) {
            Self::phase(resource_id, Phase::Rejected);
            warn!(
                resource_id,
                trace_id = %trace.id(),
                "payload has no ID3 marker, rejecting without completion"
            );
            return Ok(());
        }

        Self::phase(resource_id, Phase::Extracting);
        let mut track = match metadata::extract(&bytes) {
            Ok(track) => track,
            Err(err) => {
                Self::phase(resource_id, Phase::Rejected);
                warn!(
                    resource_id,
                    trace_id = %trace.id(),
                    error = %err,
                    "metadata extraction failed, rejecting without completion"
                );
                return Ok(());
            }
        };
        track.id = id;

        Self::phase(resource_id, Phase::Publishing);
        self.sink.save_metadata(&track, trace).await?;

        let completion = ResourceEvent::new(resource_id, EventType::Create)?;
        self.bus
            .publish(COMPLETION_TOPIC, resource_id, completion, trace.clone());

        Self::phase(resource_id, Phase::Complete);
        info!(
            resource_id,
            name = %track.name,
            artist = %track.artist,
            trace_id = %trace.id(),
            "resource processed"
        );
        Ok(())
    }

    async fn process_delete(&self, resource_id: &str, trace: &TraceContext) -> Result<()> {
        self.sink.delete_metadata(resource_id, trace).await?;
        info!(resource_id, trace_id = %trace.id(), "metadata deleted");
        Ok(())
    }
}

#[async_trait]
impl EventHandler for ProcessorWorker {
    async fn handle(&self, event: ResourceEvent, trace: TraceContext) -> Result<()> {
        match event.event_type() {
            EventType::Create => self.process_create(event.resource_id(), &trace).await,
            EventType::Delete => self.process_delete(event.resource_id(), &trace).await,
        }
    }
}
