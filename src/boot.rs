//! Boot & recovery (spec.md §2 bullet 7). Grounded directly on
//! `original_source/src/MicroOcpp.cpp`'s `BootStats` handling: a boot
//! counter persisted to `bootstats.jsn`, incremented on every boot, with
//! `lastBootSuccess` only updated once the BootNotification gate clears —
//! three consecutive boots that never clear the gate trigger a
//! configuration wipe.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::FsError;
use crate::filesystem::{load_json, save_json, FilesystemAdapter};

const BOOTSTATS_FILE: &str = "bootstats.jsn";
const FAILURE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootStats {
    pub boot_nr: u64,
    pub last_boot_success: u64,
}

impl BootStats {
    /// Consecutive boots since the last one that reached a successful
    /// BootNotification (spec.md §9 "boot-failure-counter-driven config
    /// recovery").
    pub fn failure_count(&self) -> u64 {
        self.boot_nr.saturating_sub(self.last_boot_success)
    }
}

/// Load `bootstats.jsn`, bump `bootNr`, and recover (wipe) configuration
/// if `>3` consecutive boots have failed to clear the BootNotification
/// gate. Call once at process start, before anything else touches
/// persisted config.
pub fn boot(fs: &dyn FilesystemAdapter) -> Result<BootStats, FsError> {
    let mut stats: BootStats = load_json(fs, BOOTSTATS_FILE)?.unwrap_or_default();

    if stats.failure_count() > FAILURE_THRESHOLD as u64 {
        warn!(
            failures = stats.failure_count(),
            "boot failure threshold exceeded, recovering configuration"
        );
        recover_config(fs)?;
        stats = BootStats::default();
    }

    stats.boot_nr += 1;
    save_json(fs, BOOTSTATS_FILE, &stats)?;
    info!(boot_nr = stats.boot_nr, "boot");
    Ok(stats)
}

/// Call once the BootNotification gate has cleared (CSMS responded
/// `Accepted`/`Pending` resolved). Marks this boot as successful so the
/// failure counter resets.
pub fn mark_boot_success(fs: &dyn FilesystemAdapter, stats: &mut BootStats) -> Result<(), FsError> {
    if stats.last_boot_success != stats.boot_nr {
        stats.last_boot_success = stats.boot_nr;
        save_json(fs, BOOTSTATS_FILE, stats)?;
        info!(boot_nr = stats.boot_nr, "boot marked successful");
    }
    Ok(())
}

fn recover_config(fs: &dyn FilesystemAdapter) -> Result<(), FsError> {
    fs.remove("ocpp-config.jsn")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::MemFilesystem;

    #[test]
    fn boot_nr_increments_each_boot() {
        let fs = MemFilesystem::new();
        let first = boot(&fs).unwrap();
        assert_eq!(first.boot_nr, 1);
        let second = boot(&fs).unwrap();
        assert_eq!(second.boot_nr, 2);
    }

    #[test]
    fn success_resets_failure_count() {
        let fs = MemFilesystem::new();
        let mut stats = boot(&fs).unwrap();
        mark_boot_success(&fs, &mut stats).unwrap();
        assert_eq!(stats.failure_count(), 0);
    }

    #[test]
    fn repeated_failures_trigger_config_recovery() {
        let fs = MemFilesystem::new();
        fs.write("ocpp-config.jsn", b"{\"values\":{\"A\":\"1\"}}").unwrap();
        for _ in 0..4 {
            boot(&fs).unwrap();
        }
        // Boot 5 should have seen failure_count (4) > 3 and wiped config.
        let fifth = boot(&fs).unwrap();
        assert_eq!(fifth.boot_nr, 1, "stats reset after recovery");
        assert!(fs.read("ocpp-config.jsn").unwrap().is_none());
    }
}
