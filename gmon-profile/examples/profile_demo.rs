//! Profile a small synthetic workload and write `gmon.out`.
//!
//! Functions record their own calls the way an instrumentation hook would,
//! and a timer thread samples the function currently running.
//!
//!   RUST_LOG=gmon_profile=debug cargo run --example profile_demo
//!   cargo run --example gmon_dump -- gmon.out

use gmon_profile::profile::{DEFAULT_OUTPUT_FILE, ProfileGuard, Profiler};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

static CURRENT_PC: AtomicU64 = AtomicU64::new(0);

fn addr(f: fn(&Profiler, u64) -> u64) -> u64 {
    f as usize as u64
}

fn enter(p: &Profiler, caller: u64, this: u64) {
    p.record(caller, this);
    CURRENT_PC.store(this, Ordering::Relaxed);
}

fn leaf(p: &Profiler, x: u64) -> u64 {
    enter(p, addr(middle), addr(leaf));
    (0..200).fold(x, |acc, i| acc.wrapping_mul(31).wrapping_add(i))
}

fn middle(p: &Profiler, x: u64) -> u64 {
    enter(p, addr(top), addr(middle));
    let mut acc = x;
    for i in 0..8 {
        acc ^= leaf(p, acc + i);
    }
    CURRENT_PC.store(addr(middle), Ordering::Relaxed);
    acc
}

fn top(p: &Profiler, x: u64) -> u64 {
    enter(p, addr(top), addr(top));
    (0..16).fold(x, |acc, i| acc ^ middle(p, acc + i))
}

fn main() -> gmon_profile::profile::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let guard = ProfileGuard::for_current_exe(DEFAULT_OUTPUT_FILE)?;
    let profiler = guard.profiler();

    let done = Arc::new(AtomicBool::new(false));
    let timer = {
        let (profiler, done) = (profiler.clone(), done.clone());
        let period = Duration::from_secs(1) / profiler.config().profrate_hz;
        std::thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                std::thread::sleep(period);
                profiler.sample(CURRENT_PC.load(Ordering::Relaxed));
            }
        })
    };

    let mut acc = 0u64;
    for round in 0..2_000 {
        acc ^= top(&profiler, round);
    }
    done.store(true, Ordering::Relaxed);
    let _ = timer.join();

    let stats = profiler.stats();
    println!("checksum {acc:#x}");
    println!(
        "{} arcs, {} samples, {} calls dropped",
        stats.arcs,
        stats.histogram_samples,
        stats.calls_out_of_range + stats.calls_reentrant
    );
    guard.finish()?;
    println!("Profile written to {DEFAULT_OUTPUT_FILE}");
    Ok(())
}
