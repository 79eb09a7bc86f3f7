//! `gmon.out` wire format.
//!
//! ## File layout
//! ```text
//! Header:  lowpc(W) + highpc(W) + ncnt(u32) + version(u32) + profrate(u32) + spare(3 * u32)
//!          = 2W + 24 bytes
//! Histogram: kcountsize bytes of u16 counters, bucket order
//! Arcs:    frompc(W) + selfpc(W) + count(W), one per distinct arc, until EOF
//! ```
//!
//! `W` is the address width of the profiled target (4 or 8) and every field
//! uses its byte order. `ncnt` counts the histogram bytes plus the header.
//! `count` is a signed `long` on the target, so it never exceeds `i32::MAX`
//! coming from this crate.

use crate::profile::config::{ArtifactLayout, ByteOrder};
use serde::Serialize;
use std::io::{self, Read, Write};

/// Header version that tells the report tool a profiling rate is present.
pub const GMONVERSION: u32 = 0x0005_1879;
const SPARE_WORDS: usize = 3;

pub fn header_size(layout: &ArtifactLayout) -> usize {
    2 * layout.address_width + 3 * 4 + SPARE_WORDS * 4
}

pub fn arc_record_size(layout: &ArtifactLayout) -> usize {
    3 * layout.address_width
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GmonHeader {
    pub lowpc: u64,
    pub highpc: u64,
    /// Histogram bytes plus header bytes.
    pub ncnt: u32,
    pub version: u32,
    pub profrate: u32,
}

impl GmonHeader {
    /// Histogram size in bytes implied by `ncnt`.
    pub fn histogram_bytes(&self, layout: &ArtifactLayout) -> Option<usize> {
        (self.ncnt as usize).checked_sub(header_size(layout))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RawArc {
    pub frompc: u64,
    pub selfpc: u64,
    pub count: u64,
}

fn write_u32(w: &mut impl Write, order: ByteOrder, v: u32) -> io::Result<()> {
    match order {
        ByteOrder::Little => w.write_all(&v.to_le_bytes()),
        ByteOrder::Big => w.write_all(&v.to_be_bytes()),
    }
}

fn write_word(w: &mut impl Write, layout: &ArtifactLayout, v: u64) -> io::Result<()> {
    if layout.address_width == 4 {
        let narrow = u32::try_from(v).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("value {v:#x} does not fit a 4-byte field"),
            )
        })?;
        return write_u32(w, layout.byte_order, narrow);
    }
    match layout.byte_order {
        ByteOrder::Little => w.write_all(&v.to_le_bytes()),
        ByteOrder::Big => w.write_all(&v.to_be_bytes()),
    }
}

pub fn write_header(
    w: &mut impl Write,
    layout: &ArtifactLayout,
    header: &GmonHeader,
) -> io::Result<()> {
    write_word(w, layout, header.lowpc)?;
    write_word(w, layout, header.highpc)?;
    write_u32(w, layout.byte_order, header.ncnt)?;
    write_u32(w, layout.byte_order, header.version)?;
    write_u32(w, layout.byte_order, header.profrate)?;
    for _ in 0..SPARE_WORDS {
        write_u32(w, layout.byte_order, 0)?;
    }
    Ok(())
}

pub fn write_histogram(
    w: &mut impl Write,
    layout: &ArtifactLayout,
    counters: impl IntoIterator<Item = u16>,
) -> io::Result<()> {
    // Batch counters so an unbuffered sink doesn't see one write per bucket.
    let mut chunk = [0u8; 512];
    let mut filled = 0;
    for c in counters {
        let bytes = match layout.byte_order {
            ByteOrder::Little => c.to_le_bytes(),
            ByteOrder::Big => c.to_be_bytes(),
        };
        chunk[filled..filled + 2].copy_from_slice(&bytes);
        filled += 2;
        if filled == chunk.len() {
            w.write_all(&chunk)?;
            filled = 0;
        }
    }
    w.write_all(&chunk[..filled])
}

pub fn write_arc(w: &mut impl Write, layout: &ArtifactLayout, arc: &RawArc) -> io::Result<()> {
    write_word(w, layout, arc.frompc)?;
    write_word(w, layout, arc.selfpc)?;
    write_word(w, layout, arc.count)
}

/// Fill `buf` completely. Returns `Ok(false)` if the reader was already at EOF,
/// and `UnexpectedEof` if it ran dry part way through.
fn read_full_or_eof(r: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "truncated record",
                ));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

fn decode_u32(bytes: &[u8], order: ByteOrder) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&bytes[..4]);
    match order {
        ByteOrder::Little => u32::from_le_bytes(b),
        ByteOrder::Big => u32::from_be_bytes(b),
    }
}

fn decode_word(bytes: &[u8], layout: &ArtifactLayout) -> u64 {
    if layout.address_width == 4 {
        return decode_u32(bytes, layout.byte_order) as u64;
    }
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[..8]);
    match layout.byte_order {
        ByteOrder::Little => u64::from_le_bytes(b),
        ByteOrder::Big => u64::from_be_bytes(b),
    }
}

pub fn read_header(r: &mut impl Read, layout: &ArtifactLayout) -> io::Result<GmonHeader> {
    let w = layout.address_width;
    let mut buf = vec![0u8; header_size(layout)];
    r.read_exact(&mut buf)?;
    let header = GmonHeader {
        lowpc: decode_word(&buf[0..], layout),
        highpc: decode_word(&buf[w..], layout),
        ncnt: decode_u32(&buf[2 * w..], layout.byte_order),
        version: decode_u32(&buf[2 * w + 4..], layout.byte_order),
        profrate: decode_u32(&buf[2 * w + 8..], layout.byte_order),
    };
    if header.version != GMONVERSION {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "unexpected gmon version {:#x} (wrong address width or byte order?)",
                header.version
            ),
        ));
    }
    Ok(header)
}

pub fn read_histogram(
    r: &mut impl Read,
    layout: &ArtifactLayout,
    bytes: usize,
) -> io::Result<Vec<u16>> {
    let mut buf = vec![0u8; bytes];
    r.read_exact(&mut buf)?;
    Ok(buf
        .chunks_exact(2)
        .map(|c| match layout.byte_order {
            ByteOrder::Little => u16::from_le_bytes([c[0], c[1]]),
            ByteOrder::Big => u16::from_be_bytes([c[0], c[1]]),
        })
        .collect())
}

/// Read one arc record. Returns `Ok(None)` at EOF.
pub fn read_arc(r: &mut impl Read, layout: &ArtifactLayout) -> io::Result<Option<RawArc>> {
    let w = layout.address_width;
    let mut buf = [0u8; 24];
    let buf = &mut buf[..arc_record_size(layout)];
    if !read_full_or_eof(r, buf)? {
        return Ok(None);
    }
    Ok(Some(RawArc {
        frompc: decode_word(&buf[0..], layout),
        selfpc: decode_word(&buf[w..], layout),
        count: decode_word(&buf[2 * w..], layout),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LE32: ArtifactLayout = ArtifactLayout::new(4, ByteOrder::Little);
    const LE64: ArtifactLayout = ArtifactLayout::new(8, ByteOrder::Little);
    const BE32: ArtifactLayout = ArtifactLayout::new(4, ByteOrder::Big);

    fn header() -> GmonHeader {
        GmonHeader {
            lowpc: 0x1000,
            highpc: 0x2000,
            ncnt: 2048 + 32,
            version: GMONVERSION,
            profrate: 100,
        }
    }

    #[test]
    fn test_sizes() {
        assert_eq!(header_size(&LE32), 32);
        assert_eq!(header_size(&LE64), 40);
        assert_eq!(arc_record_size(&LE32), 12);
        assert_eq!(arc_record_size(&LE64), 24);
    }

    #[test]
    fn test_header_bytes_32bit_le() {
        let mut buf = Vec::new();
        write_header(&mut buf, &LE32, &header()).unwrap();
        assert_eq!(buf.len(), 32);
        assert_eq!(&buf[0..4], &0x1000u32.to_le_bytes());
        assert_eq!(&buf[4..8], &0x2000u32.to_le_bytes());
        assert_eq!(&buf[8..12], &2080u32.to_le_bytes());
        assert_eq!(&buf[12..16], &[0x79, 0x18, 0x05, 0x00]);
        assert_eq!(&buf[16..20], &100u32.to_le_bytes());
        assert!(buf[20..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_big_endian_fields() {
        let mut buf = Vec::new();
        write_header(&mut buf, &BE32, &header()).unwrap();
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x10, 0x00]);
        assert_eq!(&buf[12..16], &[0x00, 0x05, 0x18, 0x79]);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_header(&mut cursor, &BE32).unwrap(), header());
    }

    #[test]
    fn test_wrong_layout_is_detected() {
        let mut buf = Vec::new();
        write_header(&mut buf, &LE64, &header()).unwrap();
        let err = read_header(&mut Cursor::new(buf), &LE32).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_wide_value_rejected_in_narrow_layout() {
        let arc = RawArc {
            frompc: 0x1000,
            selfpc: 0x1_0000_0000,
            count: 1,
        };
        let err = write_arc(&mut Vec::new(), &LE32, &arc).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_histogram_spans_chunk_boundary() {
        let counters: Vec<u16> = (0..700).collect();
        let mut buf = Vec::new();
        write_histogram(&mut buf, &LE32, counters.iter().copied()).unwrap();
        assert_eq!(buf.len(), 1400);
        let back = read_histogram(&mut Cursor::new(buf), &LE32, 1400).unwrap();
        assert_eq!(back, counters);
    }

    #[test]
    fn test_arcs_until_eof() {
        let arcs = [
            RawArc {
                frompc: 0x1100,
                selfpc: 0x1200,
                count: 5,
            },
            RawArc {
                frompc: 0x1100,
                selfpc: 0x1300,
                count: 2,
            },
        ];
        let mut buf = Vec::new();
        for a in &arcs {
            write_arc(&mut buf, &LE64, a).unwrap();
        }
        assert_eq!(buf.len(), 48);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_arc(&mut cursor, &LE64).unwrap(), Some(arcs[0]));
        assert_eq!(read_arc(&mut cursor, &LE64).unwrap(), Some(arcs[1]));
        assert_eq!(read_arc(&mut cursor, &LE64).unwrap(), None);
    }

    #[test]
    fn test_truncated_arc_is_an_error() {
        let mut cursor = Cursor::new(vec![0u8; 5]);
        let err = read_arc(&mut cursor, &LE32).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
