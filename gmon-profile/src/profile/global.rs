//! The process-wide profiler.
//!
//! One [`Profiler`] can be installed per process. It lives until exit:
//! installed once, finalized once, never restarted after finalize. The free
//! functions here are what instrumentation hooks and a timer call into, and
//! they do nothing until a profiler is installed.

use crate::profile::config::ProfileConfig;
use crate::profile::error::{ProfileError, Result};
use crate::profile::recorder::Profiler;
use crate::profile::writer;
use std::io::Write;
use std::path::Path;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

static PROFILER: OnceLock<Profiler> = OnceLock::new();
static FINALIZED: AtomicBool = AtomicBool::new(false);

/// Allocate tables for `lowpc..highpc` and start recording process-wide.
pub fn monstartup(lowpc: u64, highpc: u64, config: ProfileConfig) -> Result<&'static Profiler> {
    if FINALIZED.load(Ordering::Acquire) {
        return Err(ProfileError::Finalized);
    }
    if PROFILER.get().is_some() {
        return Err(ProfileError::AlreadyInitialized);
    }
    install(Profiler::new(lowpc, highpc, config)?)
}

/// Install an already built profiler, e.g. one with a custom diagnostics sink.
pub fn install(profiler: Profiler) -> Result<&'static Profiler> {
    if FINALIZED.load(Ordering::Acquire) {
        return Err(ProfileError::Finalized);
    }
    PROFILER
        .set(profiler)
        .map_err(|_| ProfileError::AlreadyInitialized)?;
    let Some(current) = PROFILER.get() else {
        return Err(ProfileError::AlreadyInitialized);
    };
    tracing::info!(
        lowpc = format_args!("{:#x}", current.text_range().lowpc()),
        highpc = format_args!("{:#x}", current.text_range().highpc()),
        "process-wide profiling started"
    );
    Ok(current)
}

pub fn profiler() -> Option<&'static Profiler> {
    PROFILER.get()
}

/// Count one call. No-op until a profiler is installed.
#[inline]
pub fn record(frompc: u64, selfpc: u64) {
    if let Some(p) = PROFILER.get() {
        p.record(frompc, selfpc);
    }
}

/// Count one timer tick at `pc`. No-op until a profiler is installed.
#[inline]
pub fn sample(pc: u64) {
    if let Some(p) = PROFILER.get() {
        p.sample(pc);
    }
}

/// Pause or resume process-wide recording. Resuming is ignored once the
/// profile has been written.
pub fn moncontrol(on: bool) {
    let Some(p) = PROFILER.get() else {
        return;
    };
    if !on {
        p.stop();
    } else if FINALIZED.load(Ordering::Acquire) {
        tracing::debug!("moncontrol: profile already written, not restarting");
    } else {
        p.start();
    }
}

/// Stop recording and write the profile to `sink`.
///
/// A write error leaves the session unfinalized so the call can be retried.
pub fn mcleanup(sink: &mut impl Write) -> Result<()> {
    let p = begin_cleanup()?;
    p.finalize(sink)?;
    FINALIZED.store(true, Ordering::Release);
    Ok(())
}

pub fn mcleanup_to_path(path: impl AsRef<Path>) -> Result<()> {
    let p = begin_cleanup()?;
    writer::write_profile_file(p, path)?;
    FINALIZED.store(true, Ordering::Release);
    Ok(())
}

fn begin_cleanup() -> Result<&'static Profiler> {
    if FINALIZED.load(Ordering::Acquire) {
        return Err(ProfileError::Finalized);
    }
    let p = PROFILER.get().ok_or_else(|| {
        ProfileError::Config("mcleanup called before monstartup".to_string())
    })?;
    p.stop();
    Ok(p)
}

/// Entry hooks for code built with `-finstrument-functions`.
#[cfg(feature = "cyg-profile")]
mod cyg_profile {
    use std::ffi::c_void;

    #[unsafe(no_mangle)]
    pub extern "C" fn __cyg_profile_func_enter(this_fn: *mut c_void, call_site: *mut c_void) {
        super::record(call_site as usize as u64, this_fn as usize as u64);
    }

    #[unsafe(no_mangle)]
    pub extern "C" fn __cyg_profile_func_exit(_this_fn: *mut c_void, _call_site: *mut c_void) {}
}
