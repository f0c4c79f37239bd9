//! Trackflow Resource Service
//!
//! Ingestion side of the pipeline: accepts uploaded audio objects, validates
//! them, stores them in the STAGING location, records them, and emits
//! lifecycle events. Consumes the worker's completion events to promote
//! objects from STAGING to PERMANENT storage.

pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod error;
pub mod object_store;
pub mod records;
pub mod routes;
pub mod storage_client;

pub use config::Config;
pub use coordinator::IngestionCoordinator;
