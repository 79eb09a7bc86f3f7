//! Out-of-band reporting for conditions the profiled program must not see.

use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Session tables could not be allocated; profiling stays off.
    AllocationFailure { bytes: u64 },
    /// The arc arena is full; call-graph recording stopped for the session.
    Overflow { limit: u64 },
}

/// Append-only channel owned by whoever set up the session.
///
/// `report` may be called from inside the recorder, so implementations
/// should not block for long. Any instrumented code they run is dropped by
/// the recorder's reentrancy guard.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: &Diagnostic);
}

/// Default sink: forwards to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::AllocationFailure { bytes } => {
                tracing::error!(bytes, "monstartup: out of memory, profiling disabled");
            }
            Diagnostic::Overflow { limit } => {
                tracing::warn!(limit, "mcount: arc table overflow, call graph truncated");
            }
        }
    }
}

pub(crate) fn default_sink() -> Arc<dyn DiagnosticSink> {
    Arc::new(TracingSink)
}
