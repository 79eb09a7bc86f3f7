use gmon_profile::profile::{Diagnostic, DiagnosticSink};
use std::sync::{Arc, Mutex};

/// A [`DiagnosticSink`] that accumulates every report into a shared `Vec`.
///
/// ```rust,ignore
/// let (sink, reports) = CapturingSink::new();
/// let profiler = Profiler::builder().with_diagnostics(Arc::new(sink)).build(lo, hi)?;
/// assert!(reports.lock().unwrap().is_empty());
/// ```
pub struct CapturingSink(Arc<Mutex<Vec<Diagnostic>>>);

impl CapturingSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<Diagnostic>>>) {
        let reports = Arc::new(Mutex::new(Vec::new()));
        (Self(reports.clone()), reports)
    }
}

impl DiagnosticSink for CapturingSink {
    fn report(&self, diagnostic: &Diagnostic) {
        self.0.lock().unwrap().push(diagnostic.clone());
    }
}
