//! Ingestion coordinator
//!
//! Owns the resource lifecycle: ingest into staging, retrieval, batch
//! deletion, and promotion to permanent storage when processing completes.
//! Every step is written to tolerate redelivery, so the completion handler
//! can run any number of times for the same resource without moving the
//! object twice or resurrecting a deleted record.

use std::sync::Arc;

use tracing::{info, warn};

use trackflow_common::bus::EventBus;
use trackflow_common::events::{EventType, ResourceEvent, RESOURCE_TOPIC};
use trackflow_common::trace::TraceContext;
use trackflow_common::{FlowError, Result};

use crate::object_store::{ObjectMover, ObjectRef};
use crate::records::{RecordStore, ResourceRecord, Stage};
use crate::storage_client::StorageResolver;

/// ID3v2 files start with this three-byte marker.
const ID3_MAGIC: &[u8] = b"ID3";

/// Upper bound on the raw ids query parameter for batch deletes.
pub const MAX_IDS_PARAM_LEN: usize = 200;

pub struct IngestionCoordinator {
    records: Arc<dyn RecordStore>,
    resolver: Arc<dyn StorageResolver>,
    mover: ObjectMover,
    bus: EventBus,
}

/// `^[1-9]\d*$` without pulling in a regex engine.
fn parse_resource_id(raw: &str) -> Result<i64> {
    let valid = !raw.is_empty()
        && !raw.starts_with('0')
        && raw.bytes().all(|b| b.is_ascii_digit());
    if !valid {
        return Err(FlowError::Validation(format!(
            "invalid resource id: {raw}"
        )));
    }
    raw.parse::<i64>()
        .map_err(|_| FlowError::Validation(format!("resource id out of range: {raw}")))
}

/// `^\d+(,\d+)*$`, at most [`MAX_IDS_PARAM_LEN`] characters.
fn parse_ids_param(raw: &str) -> Result<Vec<i64>> {
    if raw.is_empty() || raw.len() > MAX_IDS_PARAM_LEN {
        return Err(FlowError::Validation(
            "ids must be a non-empty comma-separated list of at most 200 characters".to_string(),
        ));
    }
    raw.split(',')
        .map(|part| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(FlowError::Validation(format!("invalid id in list: {raw}")));
            }
            part.parse::<i64>()
                .map_err(|_| FlowError::Validation(format!("id out of range: {part}")))
        })
        .collect()
}

impl IngestionCoordinator {
    pub fn new(
        records: Arc<dyn RecordStore>,
        resolver: Arc<dyn StorageResolver>,
        mover: ObjectMover,
        bus: EventBus,
    ) -> Self {
        Self {
            records,
            resolver,
            mover,
            bus,
        }
    }

    /// Accept an uploaded audio payload: stage the object, create the
    /// record, and announce it on the resource topic.
    pub async fn ingest(&self, data: Vec<u8>, trace: &TraceContext) -> Result<ResourceRecord> {
        if data.is_empty() {
            return Err(FlowError::Validation("empty upload".to_string()));
        }
        if !data.starts_with(ID3_MAGIC) {
            return Err(FlowError::Validation(
                "payload is not an ID3-tagged audio file".to_string(),
            ));
        }

        let staging = self.resolver.resolve(Stage::Staging.as_str(), trace).await?;
        let stored = self.mover.put(data, &staging).await?;
        let record = self
            .records
            .create(&stored.object_ref.to_string(), Stage::Staging)
            .await?;

        info!(
            resource_id = record.id,
            object_ref = %stored.object_ref,
            checksum = %stored.checksum,
            trace_id = %trace.id(),
            "resource staged"
        );

        let event = ResourceEvent::new(record.id.to_string(), EventType::Create)?;
        self.bus
            .publish(RESOURCE_TOPIC, &record.id.to_string(), event, trace.clone());
        Ok(record)
    }

    /// Fetch the raw bytes behind a resource id.
    pub async fn retrieve(&self, raw_id: &str, _trace: &TraceContext) -> Result<Vec<u8>> {
        let id = parse_resource_id(raw_id)?;
        let record = self
            .records
            .find_by_id(id)
            .await?
            .ok_or_else(|| FlowError::NotFound(format!("no resource with id {id}")))?;
        let object_ref = ObjectRef::parse(&record.object_location)?;
        self.mover.get(&object_ref).await
    }

    /// Delete a batch of resources by id. Each id is handled independently:
    /// any failure for one id is logged and that id skipped, the rest
    /// proceed. Returns only the ids that were fully deleted; partial
    /// failure never raises.
    pub async fn delete_many(&self, raw_ids: &str, trace: &TraceContext) -> Result<Vec<i64>> {
        let ids = parse_ids_param(raw_ids)?;
        let found = self.records.find_all_by_ids(&ids).await?;

        let mut deleted = Vec::with_capacity(found.len());
        for record in found {
            match self.delete_one(&record, trace).await {
                Ok(()) => deleted.push(record.id),
                Err(err) => warn!(
                    resource_id = record.id,
                    object_ref = %record.object_location,
                    error = %err,
                    "delete failed, skipping id"
                ),
            }
        }

        info!(
            requested = ids.len(),
            deleted = deleted.len(),
            trace_id = %trace.id(),
            "batch delete finished"
        );
        Ok(deleted)
    }

    /// Record first, object second: a failed object delete can only orphan
    /// an unreferenced object, never leave a record pointing at a deleted
    /// one.
    async fn delete_one(&self, record: &ResourceRecord, trace: &TraceContext) -> Result<()> {
        let object_ref = ObjectRef::parse(&record.object_location)?;
        self.records.delete(record.id).await?;
        self.mover.delete(&object_ref).await?;
        let event = ResourceEvent::new(record.id.to_string(), EventType::Delete)?;
        self.bus
            .publish(RESOURCE_TOPIC, &record.id.to_string(), event, trace.clone());
        Ok(())
    }

    /// Promote a processed resource from staging to permanent storage.
    ///
    /// Idempotent under redelivery: an already-promoted record is left
    /// alone, and a record deleted since the event was published is never
    /// recreated.
    pub async fn on_processing_complete(&self, event: &ResourceEvent, trace: &TraceContext) -> Result<()> {
        let id = parse_resource_id(event.resource_id())?;

        let Some(record) = self.records.find_by_id(id).await? else {
            warn!(
                resource_id = id,
                trace_id = %trace.id(),
                "completion for unknown resource, likely deleted; skipping"
            );
            return Ok(());
        };

        if record.stage == Stage::Permanent {
            info!(resource_id = id, "already promoted, skipping redelivery");
            return Ok(());
        }

        let permanent = self
            .resolver
            .resolve(Stage::Permanent.as_str(), trace)
            .await?;
        let object_ref = ObjectRef::parse(&record.object_location)?;
        let new_ref = self.mover.r#move(&object_ref, &permanent).await?;

        let updated = self
            .records
            .update_location_and_stage(id, &new_ref.to_string(), Stage::Permanent)
            .await?;
        if !updated {
            warn!(
                resource_id = id,
                object_ref = %new_ref,
                "record deleted during promotion, object left in permanent storage"
            );
            return Ok(());
        }

        info!(
            resource_id = id,
            object_ref = %new_ref,
            trace_id = %trace.id(),
            "resource promoted to permanent storage"
        );
        Ok(())
    }
}
