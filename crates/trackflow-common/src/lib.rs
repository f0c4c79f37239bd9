//! Trackflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Trackflow pipeline.
//!
//! # Overview
//!
//! This crate provides the pieces every Trackflow service depends on:
//!
//! - **Error Handling**: the shared error taxonomy and result type
//! - **Events**: typed resource events and the in-process event bus
//! - **Trace**: the correlation context carried across hops
//! - **Retry**: fixed and exponential retry policies
//! - **Breaker**: a failure-threshold circuit breaker
//! - **Checksums**: payload integrity utilities
//!
//! # Example
//!
//! ```no_run
//! use trackflow_common::{Result, FlowError};
//! use trackflow_common::events::{EventType, ResourceEvent};
//!
//! fn creation_event(id: i64) -> Result<ResourceEvent> {
//!     ResourceEvent::new(id.to_string(), EventType::Create)
//! }
//! ```

pub mod breaker;
pub mod bus;
pub mod checksum;
pub mod error;
pub mod events;
pub mod logging;
pub mod retry;
pub mod trace;

// Re-export commonly used types
pub use error::{FlowError, Result};
pub use trace::TraceContext;
