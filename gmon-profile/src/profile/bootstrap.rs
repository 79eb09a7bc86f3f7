//! Session setup and teardown for a running program.

use crate::profile::error::Result;
use crate::profile::recorder::Profiler;
use crate::profile::writer::write_profile_file;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Executable address range `(lowpc, highpc)` of the running binary.
///
/// Covers every executable mapping of the main executable, so it includes
/// the whole text segment even when the linker split it.
pub fn current_text_bounds() -> io::Result<(u64, u64)> {
    let exe = std::env::current_exe()?;
    let maps = fs::read_to_string("/proc/self/maps")?;
    text_bounds_in(&maps, &exe).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("no executable mapping of {}", exe.display()),
        )
    })
}

fn text_bounds_in(maps: &str, exe: &Path) -> Option<(u64, u64)> {
    maps.lines()
        .filter_map(parse_maps_line)
        .filter(|(_, _, path)| Path::new(path) == exe)
        .map(|(start, end, _)| (start, end))
        .reduce(|(lo, hi), (start, end)| (lo.min(start), hi.max(end)))
}

fn parse_maps_line(line: &str) -> Option<(u64, u64, &str)> {
    let mut parts = line.split_whitespace();
    let addr_range = parts.next()?;
    let perms = parts.next()?;
    if !perms.contains('x') {
        return None;
    }
    let _offset = parts.next()?;
    let _dev = parts.next()?;
    let _inode = parts.next()?;
    let path = parts.next()?;
    if !path.starts_with('/') {
        return None;
    }

    let (start_str, end_str) = addr_range.split_once('-')?;
    let start = u64::from_str_radix(start_str, 16).ok()?;
    let end = u64::from_str_radix(end_str, 16).ok()?;
    Some((start, end, path))
}

/// Writes the session to a file when dropped.
///
/// Dropping stops the profiler and writes the artifact, logging any failure.
/// Call [`finish`](ProfileGuard::finish) instead to handle the error.
pub struct ProfileGuard {
    profiler: Arc<Profiler>,
    path: Option<PathBuf>,
}

impl ProfileGuard {
    pub fn new(profiler: impl Into<Arc<Profiler>>, path: impl Into<PathBuf>) -> Self {
        Self {
            profiler: profiler.into(),
            path: Some(path.into()),
        }
    }

    /// Profile the running binary, writing to `path` on drop.
    pub fn for_current_exe(path: impl Into<PathBuf>) -> Result<Self> {
        let (lowpc, highpc) = current_text_bounds()?;
        Ok(Self::new(Profiler::builder().build(lowpc, highpc)?, path))
    }

    /// Shared handle for recording from other threads.
    pub fn profiler(&self) -> Arc<Profiler> {
        self.profiler.clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn finish(mut self) -> Result<()> {
        self.write()
    }

    fn write(&mut self) -> Result<()> {
        let Some(path) = self.path.take() else {
            return Ok(());
        };
        self.profiler.stop();
        write_profile_file(&self.profiler, &path)
    }
}

impl std::ops::Deref for ProfileGuard {
    type Target = Profiler;

    fn deref(&self) -> &Profiler {
        &self.profiler
    }
}

impl Drop for ProfileGuard {
    fn drop(&mut self) {
        if let Err(e) = self.write() {
            tracing::error!(error = %e, "failed to write profile on drop");
        }
    }
}
