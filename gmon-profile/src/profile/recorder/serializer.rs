use super::Profiler;
use crate::profile::error::{ProfileError, Result};
use crate::profile::format::{self, GMONVERSION, GmonHeader, RawArc};
use std::io::Write;

pub(super) struct Written {
    pub arcs: usize,
    pub bytes: usize,
}

/// Header, histogram, then every arc in bucket/chain order.
pub(super) fn write_profile(profiler: &Profiler, sink: &mut impl Write) -> Result<Written> {
    let layout = &profiler.config.layout;
    let range = &profiler.range;

    let header_bytes = format::header_size(layout) as u64;
    let ncnt = u32::try_from(range.kcountsize() + header_bytes).map_err(|_| {
        ProfileError::Config(format!(
            "histogram of {} bytes does not fit the header byte count",
            range.kcountsize()
        ))
    })?;
    let header = GmonHeader {
        lowpc: range.lowpc(),
        highpc: range.highpc(),
        ncnt,
        version: GMONVERSION,
        profrate: profiler.config.profrate_hz,
    };
    format::write_header(sink, layout, &header)?;
    format::write_histogram(sink, layout, profiler.histogram.snapshot())?;

    let mut arcs = 0;
    {
        let table = profiler.table();
        for entry in table.iter() {
            let arc = RawArc {
                frompc: range.from_address(entry.from_index),
                selfpc: entry.selfpc,
                count: entry.count as u64,
            };
            format::write_arc(sink, layout, &arc)?;
            arcs += 1;
        }
    }

    Ok(Written {
        arcs,
        bytes: ncnt as usize + arcs * format::arc_record_size(layout),
    })
}
