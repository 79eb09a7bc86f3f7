mod serializer;

use crate::profile::arc_table::{ArcTable, RecordOutcome};
use crate::profile::config::ProfileConfig;
use crate::profile::diagnostics::{Diagnostic, DiagnosticSink, default_sink};
use crate::profile::error::{ProfileError, Result};
use crate::profile::format::{self, RawArc};
use crate::profile::histogram::Histogram;
use crate::profile::state::{ProfileState, StateCell};
use crate::profile::text_range::TextRange;
use serde::Serialize;
use std::io::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory size of one arc record, used when reporting allocation failures.
const ARC_RECORD_MEM_SIZE: u64 = 16;

/// Counters for calls and samples that were seen but not recorded.
#[derive(Debug, Default)]
struct DropCounters {
    calls_out_of_range: AtomicU64,
    calls_reentrant: AtomicU64,
    samples_out_of_range: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfileStats {
    /// Distinct arcs in the table.
    pub arcs: usize,
    pub arc_capacity: usize,
    /// Calls from outside the profiled range, or into a callee the artifact
    /// layout cannot represent.
    pub calls_out_of_range: u64,
    /// Calls dropped because the recorder was already busy.
    pub calls_reentrant: u64,
    pub samples_out_of_range: u64,
    pub histogram_samples: u64,
}

/// One profiling session: the arc table, the PC histogram and their state.
///
/// [`record`](Profiler::record) and [`sample`](Profiler::sample) are the hot
/// paths. Neither allocates, blocks, or returns an error; when profiling is
/// off, the call is out of range, or the recorder is busy they return
/// without doing anything.
pub struct Profiler {
    range: TextRange,
    config: ProfileConfig,
    state: StateCell,
    /// The recorder only ever `try_lock`s this, so a call arriving while it is
    /// held is dropped instead of waiting.
    arcs: Mutex<ArcTable>,
    histogram: Histogram,
    dropped: DropCounters,
    diagnostics: Arc<dyn DiagnosticSink>,
}

pub struct ProfilerBuilder {
    config: ProfileConfig,
    diagnostics: Arc<dyn DiagnosticSink>,
    start_on: bool,
}

impl ProfilerBuilder {
    pub fn with_config(mut self, config: ProfileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticSink>) -> Self {
        self.diagnostics = sink;
        self
    }

    /// Build the session stopped instead of recording immediately.
    pub fn start_off(mut self) -> Self {
        self.start_on = false;
        self
    }

    /// Size and allocate every table for the text range `lowpc..highpc`.
    pub fn build(self, lowpc: u64, highpc: u64) -> Result<Profiler> {
        let range = TextRange::new(lowpc, highpc, &self.config)?;
        let bytes = range.table_bytes(ARC_RECORD_MEM_SIZE);

        let tables = u32::try_from(range.tolimit()).ok().and_then(|capacity| {
            let histogram = Histogram::try_new(range.bucket_count())?;
            let arcs = ArcTable::try_new(range.from_bucket_count(), capacity)?;
            Some((histogram, arcs))
        });
        let Some((histogram, arcs)) = tables else {
            self.diagnostics
                .report(&Diagnostic::AllocationFailure { bytes });
            return Err(ProfileError::AllocationFailure { bytes });
        };

        tracing::debug!(
            lowpc = format_args!("{:#x}", range.lowpc()),
            highpc = format_args!("{:#x}", range.highpc()),
            kcountsize = range.kcountsize(),
            fromssize = range.fromssize(),
            tolimit = range.tolimit(),
            scale = format_args!("{:#x}", range.scale().raw()),
            "profiling tables allocated"
        );

        let state = if self.start_on {
            ProfileState::On
        } else {
            ProfileState::Off
        };
        Ok(Profiler {
            range,
            config: self.config,
            state: StateCell::new(state),
            arcs: Mutex::new(arcs),
            histogram,
            dropped: DropCounters::default(),
            diagnostics: self.diagnostics,
        })
    }
}

impl Profiler {
    pub fn builder() -> ProfilerBuilder {
        ProfilerBuilder {
            config: ProfileConfig::default(),
            diagnostics: default_sink(),
            start_on: true,
        }
    }

    /// Build a session with the default diagnostics sink, already recording.
    pub fn new(lowpc: u64, highpc: u64, config: ProfileConfig) -> Result<Self> {
        Self::builder().with_config(config).build(lowpc, highpc)
    }

    /// Count one call from `frompc` (the call site) into `selfpc` (the callee).
    #[inline]
    pub fn record(&self, frompc: u64, selfpc: u64) {
        if !self.state.is_on() {
            return;
        }
        // Signal handlers and uninstrumented libraries call in from outside the text range.
        let Some(from) = self.range.from_index(frompc) else {
            self.dropped.calls_out_of_range.fetch_add(1, Ordering::Relaxed);
            return;
        };
        if selfpc > self.config.layout.max_address() {
            self.dropped.calls_out_of_range.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let outcome = match self.arcs.try_lock() {
            Ok(mut arcs) => arcs.record(from, selfpc),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner().record(from, selfpc),
            Err(TryLockError::WouldBlock) => {
                self.dropped.calls_reentrant.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        // The table is unlocked again here, so the sink may query the profiler.
        if outcome == RecordOutcome::Overflow && self.state.fail() {
            self.diagnostics.report(&Diagnostic::Overflow {
                limit: self.range.tolimit(),
            });
        }
    }

    /// Blocking access to the arc table for the read paths.
    fn table(&self) -> MutexGuard<'_, ArcTable> {
        // Recording never panics mid-update, so a poisoned table is still consistent.
        self.arcs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one timer tick that interrupted the program at `pc`.
    #[inline]
    pub fn sample(&self, pc: u64) {
        if !self.state.is_on() {
            return;
        }
        match self.range.bucket(pc) {
            Some(bucket) => self.histogram.increment(bucket),
            None => {
                self.dropped
                    .samples_out_of_range
                    .fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Resume recording. Counts accumulate across stop/start. Returns false
    /// if the session has overflowed.
    pub fn start(&self) -> bool {
        let started = self.state.start();
        tracing::debug!(started, "profiling start requested");
        started
    }

    /// Pause recording, keeping everything collected so far.
    pub fn stop(&self) -> bool {
        let stopped = self.state.stop();
        tracing::debug!(stopped, "profiling stop requested");
        stopped
    }

    pub fn state(&self) -> ProfileState {
        self.state.get()
    }

    pub fn text_range(&self) -> &TextRange {
        &self.range
    }

    pub fn config(&self) -> &ProfileConfig {
        &self.config
    }

    pub fn histogram(&self) -> Vec<u16> {
        self.histogram.snapshot()
    }

    /// Arcs as they will be written: bucket order, then chain order.
    pub fn arcs(&self) -> Vec<RawArc> {
        self.table()
            .iter()
            .map(|a| RawArc {
                frompc: self.range.from_address(a.from_index),
                selfpc: a.selfpc,
                count: a.count as u64,
            })
            .collect()
    }

    /// Current count for the arc `frompc → selfpc`, if it was recorded.
    pub fn arc_count(&self, frompc: u64, selfpc: u64) -> Option<u32> {
        let from = self.range.from_index(frompc)?;
        self.table().count(from, selfpc)
    }

    pub fn stats(&self) -> ProfileStats {
        let (arcs, arc_capacity) = {
            let table = self.table();
            (table.len(), table.capacity())
        };
        ProfileStats {
            arcs,
            arc_capacity,
            calls_out_of_range: self.dropped.calls_out_of_range.load(Ordering::Relaxed),
            calls_reentrant: self.dropped.calls_reentrant.load(Ordering::Relaxed),
            samples_out_of_range: self.dropped.samples_out_of_range.load(Ordering::Relaxed),
            histogram_samples: self.histogram.total(),
        }
    }

    /// `Err(Overflow)` if the arc table filled up and the call graph is partial.
    pub fn check_complete(&self) -> Result<()> {
        match self.state() {
            ProfileState::Error => Err(ProfileError::Overflow {
                limit: self.range.tolimit(),
            }),
            _ => Ok(()),
        }
    }

    /// Size in bytes of the artifact [`finalize`](Profiler::finalize) would write now.
    pub fn artifact_len(&self) -> usize {
        let layout = &self.config.layout;
        format::header_size(layout)
            + self.range.kcountsize() as usize
            + self.stats().arcs * format::arc_record_size(layout)
    }

    /// Serialize the session into `sink`.
    ///
    /// Read-only: the tables are untouched, so a failed write can be retried.
    /// Recording should have stopped. A recorder still running on another
    /// thread drops its calls while the arc table is being walked.
    pub fn finalize(&self, sink: &mut impl Write) -> Result<()> {
        if self.state() == ProfileState::Error {
            tracing::warn!(
                tolimit = self.range.tolimit(),
                "writing profile after arc table overflow; call graph is incomplete"
            );
        }
        let written = serializer::write_profile(self, sink)?;
        sink.flush()?;
        tracing::info!(
            arcs = written.arcs,
            bytes = written.bytes,
            "profile written"
        );
        Ok(())
    }

    pub fn finalize_to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.artifact_len());
        self.finalize(&mut buf)?;
        Ok(buf)
    }
}

#[cfg(test)]
impl Profiler {
    /// Hold the arc table, as a recording in progress would.
    pub(crate) fn hold_busy(&self) -> MutexGuard<'_, ArcTable> {
        self.table()
    }

    pub(crate) fn arc_table_snapshot(&self) -> ArcTable {
        self.table().clone()
    }
}
