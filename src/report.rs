//! Text rendering for the memory map and end-of-run statistics

use std::fmt::Write;

use crate::clock::SimTime;
use crate::memory::FrameTable;
use crate::stats::Stats;

/// One line per frame plus a usage summary
pub fn memory_map(frames: &FrameTable, now: SimTime) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Master: Current memory layout at time {} is:", now);
    let _ = writeln!(out, "{:>10}  {:<8} {:<6} {:<8} {}", "", "Occupied", "RefBit", "DirtyBit", "Owner");

    for (i, f) in frames.iter().enumerate() {
        let label = format!("Frame {}:", i);
        match (f.owner, f.page) {
            (Some(pid), Some(page)) => {
                let _ = writeln!(
                    out,
                    "{:>10}  {:<8} {:<6} {:<8} P{} page {}",
                    label, "Yes", f.referenced as u8, f.dirty as u8, pid, page
                );
            }
            _ => {
                let _ = writeln!(out, "{:>10}  {:<8} {:<6} {:<8} -", label, "No", 0, 0);
            }
        }
    }

    let dirty = frames.iter().filter(|f| f.dirty).count();
    let _ = write!(
        out,
        "Frames in use: {}/{}, dirty: {}, clock hand at {}",
        frames.owned_count(),
        frames.len(),
        dirty,
        frames.hand()
    );
    out
}

pub fn stats_summary(stats: &Stats, now: SimTime) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "STATS at time {}:", now);
    let _ = writeln!(out, "Memory accesses per second: {:.3}", stats.accesses_per_second(now));
    let _ = writeln!(out, "Page faults per memory access: {:.6}", stats.page_faults_per_access());
    let _ = writeln!(out, "Average memory access time: {}", stats.average_access_time());
    let _ = writeln!(out, "Total memory accesses: {}", stats.memory_accesses);
    let _ = writeln!(out, "Total page faults: {}", stats.page_faults);
    let _ = writeln!(out, "Swaps: {} ({} dirty write-backs)", stats.swaps, stats.write_backs);
    let _ = write!(
        out,
        "Workers launched: {}, completed: {}, killed: {}",
        stats.workers_launched, stats.workers_completed, stats.workers_killed
    );
    out
}
