pub mod analysis;
pub mod arc_table;
pub mod bootstrap;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod format;
pub mod global;
pub mod histogram;
pub mod recorder;
pub mod state;
pub mod text_range;
pub mod writer;

pub use analysis::{
    CalleeCalls, GmonData, GmonReader, HotBucket, ProfileSummary, print_summary, summarize,
};
pub use arc_table::ARC_COUNT_MAX;
pub use bootstrap::{ProfileGuard, current_text_bounds};
pub use config::{ArtifactLayout, ByteOrder, ProfileConfig};
pub use diagnostics::{Diagnostic, DiagnosticSink, TracingSink};
pub use error::{ProfileError, Result};
pub use format::{GMONVERSION, GmonHeader, RawArc};
pub use global::{mcleanup, mcleanup_to_path, moncontrol, monstartup};
pub use histogram::HISTCOUNTER_MAX;
pub use recorder::{ProfileStats, Profiler, ProfilerBuilder};
pub use state::ProfileState;
pub use text_range::{ScaleFactor, TextRange};
pub use writer::{DEFAULT_OUTPUT_FILE, write_profile_file};
