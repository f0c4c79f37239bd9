//! Trackflow Storage Service
//!
//! Directory of logical storage locations. Other services resolve a stage
//! name ("STAGING", "PERMANENT") to the bucket and path prefix that stage
//! lives in. One location per storage type, enforced by a unique constraint.

pub mod config;
pub mod error;
pub mod routes;
pub mod store;

pub use config::Config;
pub use store::{LocationStore, MemoryLocationStore, PgLocationStore, StorageLocation};
