//! Trackflow Processing Worker
//!
//! Consumes resource lifecycle events, pulls the staged bytes back from the
//! resource service, extracts ID3 metadata, pushes it to the catalog
//! service, and announces completion so the resource side can promote the
//! object to permanent storage.

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod clients;
pub mod metadata;
pub mod worker;

pub use metadata::TrackMetadata;
pub use worker::ProcessorWorker;
