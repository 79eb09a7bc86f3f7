//! The profiled address span and everything sized from it.
//!
//! `lowpc`/`highpc` are rounded to `hist_fraction * HISTCOUNTER_SIZE` so that
//! `textsize / hist_fraction` is a whole number of counters and the report
//! tool can redo the same scaling with integer arithmetic.

use crate::profile::config::{FROM_SLOT_SIZE, HISTCOUNTER_SIZE, ProfileConfig};
use crate::profile::error::{ProfileError, Result};

/// `profil(2)` scale meaning "one counter byte per text byte".
pub const SCALE_1_TO_1: u32 = 0x10000;

/// 16.16 fixed-point ratio of histogram bytes to text bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleFactor(u32);

impl ScaleFactor {
    /// Integer-only derivation of the scale for `kcountsize` histogram bytes
    /// covering `textsize` text bytes. Matches the rounding the report tool
    /// expects, which a floating point ratio does not always reproduce.
    /// An empty histogram gets a zero scale.
    pub(crate) fn compute(textsize: u64, kcountsize: u64) -> Self {
        let o = textsize;
        let k = kcountsize;
        if k == 0 {
            return ScaleFactor(0);
        }
        if k >= o {
            return ScaleFactor(SCALE_1_TO_1);
        }
        let quot = o / k;
        let scale = if quot >= 0x10000 {
            1
        } else if quot >= 0x100 {
            0x10000 / quot
        } else if o >= 0x80_0000 {
            0x100_0000 / (o / (k >> 8))
        } else {
            0x100_0000 / ((o << 8) / k)
        };
        ScaleFactor(scale as u32)
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    /// Map a text offset to a counter index.
    #[inline]
    pub fn bucket(self, offset: u64) -> u64 {
        let counters = (offset / HISTCOUNTER_SIZE) as u128;
        ((counters * self.0 as u128) >> 16) as u64
    }
}

#[derive(Debug, Clone)]
pub struct TextRange {
    lowpc: u64,
    highpc: u64,
    textsize: u64,
    /// Histogram size in bytes.
    kcountsize: u64,
    /// From-table size in classic slot bytes.
    fromssize: u64,
    /// Arc capacity.
    tolimit: u64,
    hash_width: u64,
    scale: ScaleFactor,
    bucket_count: usize,
    from_bucket_count: usize,
}

impl TextRange {
    pub fn new(lowpc: u64, highpc: u64, config: &ProfileConfig) -> Result<Self> {
        config.validate()?;
        if highpc <= lowpc {
            return Err(ProfileError::Config(format!(
                "empty text range {lowpc:#x}..{highpc:#x}"
            )));
        }

        let granule = config
            .hist_fraction
            .checked_mul(HISTCOUNTER_SIZE)
            .ok_or_else(|| ProfileError::Config("hist_fraction too large".into()))?;
        let lowpc = round_down(lowpc, granule);
        let highpc = round_up(highpc, granule).ok_or_else(|| {
            ProfileError::Config(format!("highpc {highpc:#x} overflows when rounded"))
        })?;
        if highpc > config.layout.max_address() {
            return Err(ProfileError::Config(format!(
                "highpc {highpc:#x} does not fit a {}-byte address",
                config.layout.address_width
            )));
        }

        let textsize = highpc - lowpc;
        let kcountsize = textsize / config.hist_fraction;
        let hash_width = config
            .hash_fraction
            .checked_mul(FROM_SLOT_SIZE)
            .ok_or_else(|| ProfileError::Config("hash_fraction too large".into()))?;
        let fromssize = textsize.div_ceil(hash_width) * FROM_SLOT_SIZE;
        let tolimit = (textsize.saturating_mul(config.arc_density) / 100)
            .clamp(config.min_arcs, config.max_arcs);
        let bucket_count = table_len(kcountsize / HISTCOUNTER_SIZE, "histogram")?;
        let from_bucket_count = table_len(fromssize / FROM_SLOT_SIZE, "from table")?;

        Ok(Self {
            lowpc,
            highpc,
            textsize,
            kcountsize,
            fromssize,
            tolimit,
            hash_width,
            scale: ScaleFactor::compute(textsize, kcountsize),
            bucket_count,
            from_bucket_count,
        })
    }

    pub fn lowpc(&self) -> u64 {
        self.lowpc
    }

    pub fn highpc(&self) -> u64 {
        self.highpc
    }

    pub fn textsize(&self) -> u64 {
        self.textsize
    }

    pub fn kcountsize(&self) -> u64 {
        self.kcountsize
    }

    pub fn fromssize(&self) -> u64 {
        self.fromssize
    }

    pub fn tolimit(&self) -> u64 {
        self.tolimit
    }

    pub fn scale(&self) -> ScaleFactor {
        self.scale
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn from_bucket_count(&self) -> usize {
        self.from_bucket_count
    }

    pub fn contains(&self, pc: u64) -> bool {
        pc >= self.lowpc && pc < self.highpc
    }

    /// Histogram counter for a sampled pc, or `None` if it lies outside the range.
    #[inline]
    pub fn bucket(&self, pc: u64) -> Option<usize> {
        if !self.contains(pc) {
            return None;
        }
        let idx = self.scale.bucket(pc - self.lowpc);
        (idx < self.bucket_count as u64).then_some(idx as usize)
    }

    /// From-table slot for a caller address, or `None` if it lies outside the range.
    #[inline]
    pub fn from_index(&self, frompc: u64) -> Option<usize> {
        if !self.contains(frompc) {
            return None;
        }
        Some(((frompc - self.lowpc) / self.hash_width) as usize)
    }

    /// The caller address the artifact records for a from-table slot.
    pub fn from_address(&self, index: usize) -> u64 {
        self.lowpc + index as u64 * self.hash_width
    }

    /// Total bytes the session tables need, for allocation-failure reports.
    pub(crate) fn table_bytes(&self, record_size: u64) -> u64 {
        self.kcountsize
            .saturating_add(self.fromssize)
            .saturating_add(self.tolimit.saturating_mul(record_size))
    }
}

fn table_len(entries: u64, table: &str) -> Result<usize> {
    usize::try_from(entries).map_err(|_| {
        ProfileError::Config(format!(
            "{table} of {entries} entries is not addressable on this target"
        ))
    })
}

fn round_down(x: u64, granule: u64) -> u64 {
    x - x % granule
}

fn round_up(x: u64, granule: u64) -> Option<u64> {
    match x % granule {
        0 => Some(x),
        rem => x.checked_add(granule - rem),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::config::{ArtifactLayout, ByteOrder};

    fn range(lowpc: u64, highpc: u64) -> TextRange {
        TextRange::new(lowpc, highpc, &ProfileConfig::default()).unwrap()
    }

    #[test]
    fn test_reference_scenario_sizes() {
        let r = range(0x1000, 0x2000);
        assert_eq!(r.textsize(), 4096);
        assert_eq!(r.kcountsize(), 2048);
        assert_eq!(r.bucket_count(), 1024);
        assert_eq!(r.fromssize(), r.kcountsize());
        assert_eq!(r.scale().raw(), 0x8000);
        assert_eq!(r.bucket(0x1010), Some(4));
    }

    #[test]
    fn test_each_bucket_covers_four_bytes() {
        let r = range(0x1000, 0x2000);
        for pc in 0x1000..0x1004 {
            assert_eq!(r.bucket(pc), Some(0));
        }
        assert_eq!(r.bucket(0x1004), Some(1));
        assert_eq!(r.bucket(0x1fff), Some(1023));
    }

    #[test]
    fn test_out_of_range_pc_has_no_bucket() {
        let r = range(0x1000, 0x2000);
        assert_eq!(r.bucket(0xfff), None);
        assert_eq!(r.bucket(0x2000), None);
        assert_eq!(r.from_index(0x2000), None);
        assert_eq!(r.from_index(0), None);
    }

    #[test]
    fn test_rounding_is_outward_and_idempotent() {
        let r = range(0x1003, 0x1ffd);
        assert_eq!(r.lowpc(), 0x1000);
        assert_eq!(r.highpc(), 0x2000);

        let again = range(r.lowpc(), r.highpc());
        assert_eq!(again.lowpc(), r.lowpc());
        assert_eq!(again.highpc(), r.highpc());
    }

    #[test]
    fn test_empty_or_inverted_range_is_config_error() {
        let cfg = ProfileConfig::default();
        assert!(matches!(
            TextRange::new(0x2000, 0x2000, &cfg),
            Err(ProfileError::Config(_))
        ));
        assert!(matches!(
            TextRange::new(0x2000, 0x1000, &cfg),
            Err(ProfileError::Config(_))
        ));
    }

    #[test]
    fn test_range_must_fit_address_width() {
        let cfg =
            ProfileConfig::default().with_layout(ArtifactLayout::new(4, ByteOrder::Little));
        assert!(matches!(
            TextRange::new(0x1000, 0x1_0000_1000, &cfg),
            Err(ProfileError::Config(_))
        ));
    }

    #[test]
    fn test_tolimit_is_clamped() {
        // 4096 * 2 / 100 = 81
        assert_eq!(range(0x1000, 0x2000).tolimit(), 81);
        // Tiny ranges get MINARCS.
        assert_eq!(range(0x1000, 0x1010).tolimit(), 50);
        // Huge ranges get MAXARCS.
        assert_eq!(range(0, 0x1000_0000).tolimit(), 65534);
    }

    #[test]
    fn test_scale_branches() {
        assert_eq!(ScaleFactor::compute(100, 100).raw(), SCALE_1_TO_1);
        assert_eq!(ScaleFactor::compute(4096, 2048).raw(), 0x8000);
        assert_eq!(ScaleFactor::compute(4096, 1024).raw(), 0x4000);
        // quot >= 0x100
        assert_eq!(ScaleFactor::compute(0x10000, 0x100).raw(), 0x100);
        // quot >= 0x10000
        assert_eq!(ScaleFactor::compute(0x100_0000, 0x10).raw(), 1);
        // large text, small quotient
        assert_eq!(ScaleFactor::compute(0x100_0000, 0x80_0000).raw(), 0x8000);
    }

    #[test]
    fn test_scale_of_empty_histogram_is_zero() {
        assert_eq!(ScaleFactor::compute(4096, 0).raw(), 0);
        assert_eq!(ScaleFactor::compute(0, 0).raw(), 0);
        assert_eq!(ScaleFactor::compute(4096, 0).bucket(0x800), 0);
    }

    #[cfg(target_pointer_width = "32")]
    #[test]
    fn test_unaddressable_tables_are_config_error() {
        let cfg =
            ProfileConfig::default().with_layout(ArtifactLayout::new(8, ByteOrder::Little));
        assert!(matches!(
            TextRange::new(0, 1 << 40, &cfg),
            Err(ProfileError::Config(_))
        ));
    }

    #[test]
    fn test_table_lengths_match_byte_sizes() {
        let r = range(0x1000, 0x9000);
        assert_eq!(r.bucket_count() as u64, r.kcountsize() / HISTCOUNTER_SIZE);
        assert_eq!(r.from_bucket_count() as u64, r.fromssize() / FROM_SLOT_SIZE);
    }

    #[test]
    fn test_unequal_fractions_keep_every_caller_in_bounds() {
        let cfg = ProfileConfig::default()
            .with_hist_fraction(4)
            .with_hash_fraction(1);
        let r = TextRange::new(0x1000, 0x2000, &cfg).unwrap();
        assert_eq!(r.from_bucket_count(), 2048);
        assert_eq!(r.from_index(0x1fff), Some(2047));
        assert_eq!(r.from_address(2047), 0x1ffe);
    }

    #[test]
    fn test_identity_scale_when_hist_fraction_is_one() {
        let cfg = ProfileConfig::default().with_hist_fraction(1);
        let r = TextRange::new(0x1000, 0x2000, &cfg).unwrap();
        assert_eq!(r.scale().raw(), SCALE_1_TO_1);
        assert_eq!(r.bucket_count(), 2048);
        assert_eq!(r.bucket(0x1fff), Some(2047));
    }

    mod bucket_proptest {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            #[test]
            fn buckets_are_in_range_and_monotonic(
                lowpc in 0u64..(1 << 40),
                len in 1u64..(1 << 24),
                hist_fraction in 1u64..=8,
                a in any::<u64>(),
                b in any::<u64>(),
            ) {
                let cfg = ProfileConfig::default().with_hist_fraction(hist_fraction);
                let r = TextRange::new(lowpc, lowpc + len, &cfg).unwrap();
                prop_assert_eq!(r.bucket(r.lowpc()), Some(0));
                prop_assert_eq!(r.bucket(r.highpc()), None);

                let (a, b) = (a % r.textsize(), b % r.textsize());
                let (lo, hi) = (a.min(b), a.max(b));
                let (blo, bhi) = (r.bucket(r.lowpc() + lo), r.bucket(r.lowpc() + hi));
                // Every in-range pc lands in a counter.
                prop_assert!(blo.is_some());
                prop_assert!(bhi.is_some());
                let (x, y) = (blo.unwrap(), bhi.unwrap());
                prop_assert!(x < r.bucket_count());
                prop_assert!(y < r.bucket_count());
                prop_assert!(x <= y);
            }

            #[test]
            fn every_caller_hashes_in_bounds(
                lowpc in 0u64..(1 << 40),
                len in 1u64..(1 << 20),
                hist_fraction in 1u64..=4,
                hash_fraction in 1u64..=4,
                off in any::<u64>(),
            ) {
                let cfg = ProfileConfig::default()
                    .with_hist_fraction(hist_fraction)
                    .with_hash_fraction(hash_fraction);
                let r = TextRange::new(lowpc, lowpc + len, &cfg).unwrap();
                let pc = r.lowpc() + off % r.textsize();
                let idx = r.from_index(pc).unwrap();
                prop_assert!(idx < r.from_bucket_count());
                prop_assert!(r.from_address(idx) <= pc);
            }
        }
    }
}
