//! Tunable constants for a profiling session and the artifact layout.

use crate::profile::error::{ProfileError, Result};
use serde::Serialize;

/// Width in bytes of one histogram counter (`u16`).
pub const HISTCOUNTER_SIZE: u64 = 2;
/// Width in bytes of one from-table slot in the classic layout. The serialized
/// `frompc` of an arc is derived from it, so it stays part of the hash even
/// though heads are stored as `u32` in memory.
pub const FROM_SLOT_SIZE: u64 = 2;

pub const DEFAULT_HIST_FRACTION: u64 = 2;
pub const DEFAULT_HASH_FRACTION: u64 = 2;
pub const DEFAULT_ARC_DENSITY: u64 = 2;
pub const DEFAULT_MIN_ARCS: u64 = 50;
pub const DEFAULT_MAX_ARCS: u64 = (1 << 16) - 2;
pub const DEFAULT_PROFRATE_HZ: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}

/// How addresses and integers are laid out in the artifact.
///
/// The report tool reads the file with the word size and byte order of the
/// profiled target, so these default to the host's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ArtifactLayout {
    /// 4 or 8.
    pub address_width: usize,
    pub byte_order: ByteOrder,
}

impl ArtifactLayout {
    pub const fn native() -> Self {
        Self {
            address_width: std::mem::size_of::<usize>(),
            byte_order: ByteOrder::native(),
        }
    }

    pub const fn new(address_width: usize, byte_order: ByteOrder) -> Self {
        Self {
            address_width,
            byte_order,
        }
    }

    /// Largest address representable in the artifact.
    pub fn max_address(&self) -> u64 {
        if self.address_width == 4 {
            u32::MAX as u64
        } else {
            u64::MAX
        }
    }
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self::native()
    }
}

/// Configuration for a profiling session.
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    /// Text bytes per histogram byte (`HISTFRACTION`).
    pub hist_fraction: u64,
    /// Text bytes per from-table slot byte (`HASHFRACTION`).
    pub hash_fraction: u64,
    /// Arc capacity as a percentage of the text size (`ARCDENSITY`).
    pub arc_density: u64,
    pub min_arcs: u64,
    pub max_arcs: u64,
    /// Sampling rate written to the header. The timer that actually calls
    /// `sample` is external; this only tells the report tool how to convert
    /// ticks to seconds.
    pub profrate_hz: u32,
    pub layout: ArtifactLayout,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            hist_fraction: DEFAULT_HIST_FRACTION,
            hash_fraction: DEFAULT_HASH_FRACTION,
            arc_density: DEFAULT_ARC_DENSITY,
            min_arcs: DEFAULT_MIN_ARCS,
            max_arcs: DEFAULT_MAX_ARCS,
            profrate_hz: DEFAULT_PROFRATE_HZ,
            layout: ArtifactLayout::native(),
        }
    }
}

impl ProfileConfig {
    pub fn with_hist_fraction(mut self, fraction: u64) -> Self {
        self.hist_fraction = fraction;
        self
    }

    pub fn with_hash_fraction(mut self, fraction: u64) -> Self {
        self.hash_fraction = fraction;
        self
    }

    pub fn with_arc_density(mut self, percent: u64) -> Self {
        self.arc_density = percent;
        self
    }

    pub fn with_arc_limits(mut self, min_arcs: u64, max_arcs: u64) -> Self {
        self.min_arcs = min_arcs;
        self.max_arcs = max_arcs;
        self
    }

    pub fn with_profrate(mut self, hz: u32) -> Self {
        self.profrate_hz = hz;
        self
    }

    pub fn with_layout(mut self, layout: ArtifactLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.hist_fraction == 0 {
            return Err(ProfileError::Config("hist_fraction must be non-zero".into()));
        }
        if self.hash_fraction == 0 {
            return Err(ProfileError::Config("hash_fraction must be non-zero".into()));
        }
        if self.min_arcs == 0 {
            return Err(ProfileError::Config("min_arcs must be non-zero".into()));
        }
        if self.min_arcs > self.max_arcs {
            return Err(ProfileError::Config(format!(
                "min_arcs {} exceeds max_arcs {}",
                self.min_arcs, self.max_arcs
            )));
        }
        // Arc indices are stored as u32, slot 0 reserved.
        if self.max_arcs >= u32::MAX as u64 {
            return Err(ProfileError::Config(format!(
                "max_arcs {} does not fit the arc index type",
                self.max_arcs
            )));
        }
        if !matches!(self.layout.address_width, 4 | 8) {
            return Err(ProfileError::Config(format!(
                "unsupported address width {}",
                self.layout.address_width
            )));
        }
        Ok(())
    }
}
