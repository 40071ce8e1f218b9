//! Per-process memory accounting.
//!
//! The supervisor's bloat detector cares about memory a worker actually
//! dirtied, not what it mapped, so it sums the `Private_Dirty` fields of the
//! kernel's per-process memory map (`/proc/<pid>/smaps`). Reads can fail at
//! any time (the process may exit mid-sweep, or smaps may be restricted);
//! every failure is reported as 0 MB so a vanished or unreadable worker is
//! never misclassified as bloated.

use std::fs;

const KB_PER_MB: u64 = 1024;

/// Sum of the process's `Private_Dirty` memory, in whole megabytes.
///
/// Returns 0 if the memory map cannot be read or parsed.
pub fn private_dirty_mb(pid: u32) -> u64 {
    match fs::read_to_string(format!("/proc/{pid}/smaps")) {
        Ok(smaps) => sum_private_dirty_kb(&smaps) / KB_PER_MB,
        Err(_) => 0,
    }
}

/// Parse an smaps document and sum every `Private_Dirty:` line, in kB.
///
/// Lines that do not parse are skipped rather than failing the sweep.
fn sum_private_dirty_kb(smaps: &str) -> u64 {
    smaps
        .lines()
        .filter(|line| line.starts_with("Private_Dirty:"))
        .filter_map(|line| line.split_whitespace().nth(1))
        .filter_map(|kb| kb.parse::<u64>().ok())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMAPS_FIXTURE: &str = "\
00400000-00452000 r-xp 00000000 08:02 173521 /usr/bin/worker
Size:                328 kB
Rss:                 292 kB
Shared_Dirty:          0 kB
Private_Dirty:      2048 kB
Referenced:          292 kB
7f3c8c000000-7f3c8c021000 rw-p 00000000 00:00 0
Size:                132 kB
Private_Dirty:      1024 kB
Swap:                  0 kB
";

    #[test]
    fn test_sums_all_private_dirty_lines() {
        assert_eq!(sum_private_dirty_kb(SMAPS_FIXTURE), 3072);
    }

    #[test]
    fn test_ignores_similar_fields() {
        // Shared_Dirty must not be counted.
        let smaps = "Shared_Dirty: 512 kB\nPrivate_Dirty: 128 kB\n";
        assert_eq!(sum_private_dirty_kb(smaps), 128);
    }

    #[test]
    fn test_garbage_lines_are_skipped() {
        let smaps = "Private_Dirty: not-a-number kB\nPrivate_Dirty: 64 kB\n";
        assert_eq!(sum_private_dirty_kb(smaps), 64);
    }

    #[test]
    fn test_missing_process_reads_as_zero() {
        assert_eq!(private_dirty_mb(9_999_999), 0);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_own_memory_map_is_readable() {
        // The exact value varies; the read path must simply not fail.
        let _ = private_dirty_mb(std::process::id());
    }
}
