//! PC-sample histogram: one saturating `u16` counter per text sub-range.

use std::sync::atomic::{AtomicU16, Ordering};

/// Value at which a histogram counter stops counting.
pub const HISTCOUNTER_MAX: u16 = u16::MAX;

pub struct Histogram {
    counters: Box<[AtomicU16]>,
}

impl Histogram {
    /// Allocate `buckets` zeroed counters, or `None` if the memory is unavailable.
    pub fn try_new(buckets: usize) -> Option<Self> {
        let mut counters = Vec::new();
        counters.try_reserve_exact(buckets).ok()?;
        counters.resize_with(buckets, || AtomicU16::new(0));
        Some(Self {
            counters: counters.into_boxed_slice(),
        })
    }

    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Increment one counter, clamping at [`HISTCOUNTER_MAX`].
    #[inline]
    pub fn increment(&self, bucket: usize) {
        if let Some(counter) = self.counters.get(bucket) {
            let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |c| {
                c.checked_add(1)
            });
        }
    }

    pub fn get(&self, bucket: usize) -> u16 {
        self.counters
            .get(bucket)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> Vec<u16> {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub fn total(&self) -> u64 {
        self.counters
            .iter()
            .map(|c| c.load(Ordering::Relaxed) as u64)
            .sum()
    }
}
