//! Summarize a gmon.out file.
//!
//! Usage:
//!   cargo run --example gmon_dump -- <gmon.out> [--top N] [--json]
//!   cargo run --example gmon_dump -- <gmon.out> --width 4 --big-endian

use clap::Parser;
use gmon_profile::profile::{ArtifactLayout, ByteOrder, GmonReader, print_summary, summarize};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

#[derive(Parser)]
#[command(about = "Print a summary of a gmon.out profile")]
struct Args {
    #[arg(help = "Profile to read")]
    path: PathBuf,

    #[arg(long, default_value = "10", help = "Number of hot buckets and callees to list")]
    top: usize,

    #[arg(long, help = "Address width of the profiled target in bytes (4 or 8)")]
    width: Option<usize>,

    #[arg(long, help = "The profile was written by a big-endian target")]
    big_endian: bool,

    #[arg(long, help = "Emit the summary and raw arcs as JSON")]
    json: bool,
}

fn main() -> std::io::Result<()> {
    let args = Args::parse();

    let native = ArtifactLayout::native();
    let byte_order = if args.big_endian {
        ByteOrder::Big
    } else if args.width.is_some() {
        ByteOrder::Little
    } else {
        native.byte_order
    };
    let layout = ArtifactLayout::new(args.width.unwrap_or(native.address_width), byte_order);

    let data = GmonReader::open(&args.path, layout)?.read_all()?;
    let summary = summarize(&data, args.top);

    if args.json {
        let mut w = BufWriter::new(std::io::stdout().lock());
        let doc = serde_json::json!({
            "summary": summary,
            "arcs": data.arcs,
        });
        serde_json::to_writer_pretty(&mut w, &doc).map_err(std::io::Error::other)?;
        w.write_all(b"\n")?;
        w.flush()?;
    } else {
        println!("Profile: {}", args.path.display());
        print_summary(&summary);
    }
    Ok(())
}
