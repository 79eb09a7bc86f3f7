use crate::profile::config::ArtifactLayout;
use crate::profile::format::{self, GmonHeader, RawArc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Error, ErrorKind, Read, Result};
use std::path::Path;

pub struct GmonReader<R: Read> {
    reader: BufReader<R>,
    layout: ArtifactLayout,
    header: Option<GmonHeader>,
}

impl GmonReader<File> {
    pub fn open(path: impl AsRef<Path>, layout: ArtifactLayout) -> Result<Self> {
        Ok(Self::new(File::open(path)?, layout))
    }
}

impl<R: Read> GmonReader<R> {
    pub fn new(reader: R, layout: ArtifactLayout) -> Self {
        Self {
            reader: BufReader::new(reader),
            layout,
            header: None,
        }
    }

    pub fn read_header(&mut self) -> Result<GmonHeader> {
        let header = format::read_header(&mut self.reader, &self.layout)?;
        self.header = Some(header);
        Ok(header)
    }

    /// Histogram counters. Must follow [`read_header`](Self::read_header).
    pub fn read_histogram(&mut self) -> Result<Vec<u16>> {
        let header = self.header.ok_or_else(|| {
            Error::new(ErrorKind::InvalidInput, "histogram read before header")
        })?;
        let bytes = header.histogram_bytes(&self.layout).ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidData,
                format!("byte count {} is smaller than the header", header.ncnt),
            )
        })?;
        if bytes % 2 != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("odd histogram size {bytes}"),
            ));
        }
        format::read_histogram(&mut self.reader, &self.layout, bytes)
    }

    /// Next arc record, `None` at end of file.
    pub fn read_arc(&mut self) -> Result<Option<RawArc>> {
        format::read_arc(&mut self.reader, &self.layout)
    }

    pub fn read_all(mut self) -> Result<GmonData> {
        let header = self.read_header()?;
        let histogram = self.read_histogram()?;
        let mut arcs = Vec::new();
        while let Some(arc) = self.read_arc()? {
            arcs.push(arc);
        }
        Ok(GmonData {
            header,
            histogram,
            arcs,
        })
    }
}

/// A parsed `gmon.out`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GmonData {
    pub header: GmonHeader,
    pub histogram: Vec<u16>,
    pub arcs: Vec<RawArc>,
}

impl GmonData {
    /// Address range `[start, end)` that histogram bucket `index` covers.
    pub fn bucket_range(&self, index: usize) -> (u64, u64) {
        let span = (self.header.highpc - self.header.lowpc) as u128;
        let n = self.histogram.len().max(1) as u128;
        let at = |i: u128| self.header.lowpc + (span * i / n) as u64;
        (at(index as u128), at(index as u128 + 1))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HotBucket {
    pub start: u64,
    pub end: u64,
    pub samples: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalleeCalls {
    pub selfpc: u64,
    pub calls: u64,
    /// Distinct caller buckets.
    pub callers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub lowpc: u64,
    pub highpc: u64,
    pub profrate: u32,
    pub total_samples: u64,
    pub sampled_seconds: f64,
    /// Non-empty buckets, most samples first.
    pub hot_buckets: Vec<HotBucket>,
    pub arcs: usize,
    pub total_calls: u64,
    /// Callees, most calls first.
    pub callees: Vec<CalleeCalls>,
}

/// Aggregate a profile, keeping the `top` hottest buckets and callees.
pub fn summarize(data: &GmonData, top: usize) -> ProfileSummary {
    let total_samples: u64 = data.histogram.iter().map(|&c| c as u64).sum();

    let mut hot_buckets: Vec<HotBucket> = data
        .histogram
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c > 0)
        .map(|(i, &samples)| {
            let (start, end) = data.bucket_range(i);
            HotBucket {
                start,
                end,
                samples,
            }
        })
        .collect();
    hot_buckets.sort_by(|a, b| b.samples.cmp(&a.samples).then(a.start.cmp(&b.start)));
    hot_buckets.truncate(top);

    let mut by_callee: HashMap<u64, (u64, usize)> = HashMap::new();
    for arc in &data.arcs {
        let entry = by_callee.entry(arc.selfpc).or_default();
        entry.0 += arc.count;
        entry.1 += 1;
    }
    let mut callees: Vec<CalleeCalls> = by_callee
        .into_iter()
        .map(|(selfpc, (calls, callers))| CalleeCalls {
            selfpc,
            calls,
            callers,
        })
        .collect();
    callees.sort_by(|a, b| b.calls.cmp(&a.calls).then(a.selfpc.cmp(&b.selfpc)));
    callees.truncate(top);

    let sampled_seconds = if data.header.profrate > 0 {
        total_samples as f64 / data.header.profrate as f64
    } else {
        0.0
    };

    ProfileSummary {
        lowpc: data.header.lowpc,
        highpc: data.header.highpc,
        profrate: data.header.profrate,
        total_samples,
        sampled_seconds,
        hot_buckets,
        arcs: data.arcs.len(),
        total_calls: data.arcs.iter().map(|a| a.count).sum(),
        callees,
    }
}

pub fn print_summary(summary: &ProfileSummary) {
    println!("\n=== Profile ===");
    println!("Text: {:#x}..{:#x}", summary.lowpc, summary.highpc);
    println!(
        "Samples: {} ({:.2}s at {} Hz)",
        summary.total_samples, summary.sampled_seconds, summary.profrate
    );
    println!("Arcs: {} ({} calls)", summary.arcs, summary.total_calls);

    if !summary.hot_buckets.is_empty() {
        println!("\n=== Hottest Addresses ===");
        for b in &summary.hot_buckets {
            let pct = if summary.total_samples > 0 {
                b.samples as f64 * 100.0 / summary.total_samples as f64
            } else {
                0.0
            };
            println!(
                "  {:#x}..{:#x}  {:>6} samples  {:5.1}%",
                b.start, b.end, b.samples, pct
            );
        }
    }

    if !summary.callees.is_empty() {
        println!("\n=== Most Called ===");
        for c in &summary.callees {
            println!(
                "  {:#x}  {:>8} calls from {} site(s)",
                c.selfpc, c.calls, c.callers
            );
        }
    }
}
