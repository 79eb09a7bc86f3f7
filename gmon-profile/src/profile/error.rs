use std::io;

/// Errors observable by the code that sets up or tears down a session.
///
/// The per-call recorder and the per-tick sampler never return these; they
/// degrade silently and report through the diagnostic sink instead.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("invalid profiling configuration: {0}")]
    Config(String),

    #[error("could not allocate {bytes} bytes of profiling tables")]
    AllocationFailure { bytes: u64 },

    #[error("arc table overflow: more than {limit} distinct arcs")]
    Overflow { limit: u64 },

    #[error("failed to write profile: {0}")]
    Io(#[from] io::Error),

    #[error("a process-wide profiler is already installed")]
    AlreadyInitialized,

    #[error("the process-wide profiler has already been finalized")]
    Finalized,
}

pub type Result<T> = std::result::Result<T, ProfileError>;
