use std::time::Instant;
use tracing::info;

/// Counters for one sync run
///
/// Every discovered file lands in exactly one bucket, so
/// uploaded + updated + skipped + failed == discovered once the walk ends.
#[derive(Debug, Clone)]
pub struct SyncSummary {
    pub discovered: usize,
    pub uploaded: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes_transferred: u64,
    started: Instant,
    elapsed_secs: f64,
}

impl SyncSummary {
    pub fn new(discovered: usize) -> Self {
        Self {
            discovered,
            uploaded: 0,
            updated: 0,
            skipped: 0,
            failed: 0,
            bytes_transferred: 0,
            started: Instant::now(),
            elapsed_secs: 0.0,
        }
    }

    pub fn record_uploaded(&mut self, bytes: u64) {
        self.uploaded += 1;
        self.bytes_transferred += bytes;
    }

    pub fn record_updated(&mut self, bytes: u64) {
        self.updated += 1;
        self.bytes_transferred += bytes;
    }

    pub fn record_skipped(&mut self) {
        self.skipped += 1;
    }

    pub fn record_failed(&mut self) {
        self.failed += 1;
    }

    /// Number of files that reached a terminal outcome
    pub fn processed(&self) -> usize {
        self.uploaded + self.updated + self.skipped + self.failed
    }

    pub fn finish(&mut self) {
        self.elapsed_secs = self.started.elapsed().as_secs_f64();
    }

    pub fn report(&self) {
        info!(
            "Summary: {} uploaded, {} updated, {} skipped, {} failed",
            self.uploaded, self.updated, self.skipped, self.failed
        );

        if self.bytes_transferred > 0 {
            let speed = if self.elapsed_secs > 0.0 {
                self.bytes_transferred as f64 / self.elapsed_secs
            } else {
                0.0
            };
            info!(
                "Transferred {} in {:.1}s ({}/s)",
                format_bytes(self.bytes_transferred),
                self.elapsed_secs,
                format_bytes(speed as u64)
            );
        }
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    const TB: u64 = GB * 1024;

    if bytes >= TB {
        format!("{:.1} TiB", bytes as f64 / TB as f64)
    } else if bytes >= GB {
        format!("{:.1} GiB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MiB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KiB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
