//! Correlation context carried across service hops
//!
//! Every logical operation gets one trace id at its first hop. Downstream
//! hops adopt the inbound id instead of generating their own, so one upload
//! can be followed from the HTTP ingress through the bus, the worker, and
//! back to promotion.
//!
//! The context is an explicit value passed through call signatures rather
//! than a thread- or task-local, so nothing has to be cleared on error paths;
//! dropping the value ends its scope.

use uuid::Uuid;

/// HTTP and event header carrying the correlation id.
pub const TRACE_HEADER: &str = "X-Trace-Id";

/// Correlation id for one logical operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    id: String,
}

impl TraceContext {
    /// Generate a fresh trace id for a request that arrived without one.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
        }
    }

    /// Adopt an inbound trace id, or generate one when the header is absent
    /// or empty.
    pub fn from_header(value: Option<&str>) -> Self {
        match value {
            Some(id) if !id.trim().is_empty() => Self { id: id.to_string() },
            _ => {
                let ctx = Self::new();
                tracing::debug!(trace_id = %ctx.id, "generated new trace id");
                ctx
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}
