//! Storage-efficiency accounting.
//!
//! Four counters accumulated by the write pipeline, the derived ratios, and
//! the rendered report a host can expose through `statfs` or a control
//! channel. Compression can inflate (LZ4 on incompressible data never does,
//! because the pipeline stores such blocks verbatim, but dedup-exempt
//! metadata could), so the derived deltas are computed in signed arithmetic.

use std::fmt::Write;

/// Counters accumulated across the engine's lifetime. Not persisted; they
/// describe the current run.
#[derive(Debug, Default, Clone, Copy)]
pub struct StorageStats {
    /// Bytes callers asked the pipeline to write.
    pub total_logical_bytes: u64,
    /// Bytes that survived dedup and went on to compression.
    pub bytes_after_dedup: u64,
    /// Bytes actually persisted after compression.
    pub total_physical_bytes: u64,
    /// Writes satisfied entirely by an existing block.
    pub deduplication_count: u64,
}

impl StorageStats {
    /// Share of logical bytes absorbed by dedup. Always within `[0, 1]`.
    pub fn dedup_ratio(&self) -> f64 {
        if self.total_logical_bytes == 0 {
            return 0.0;
        }
        1.0 - self.bytes_after_dedup as f64 / self.total_logical_bytes as f64
    }

    /// Share of post-dedup bytes removed by compression. Negative when
    /// storage overhead inflated the physical footprint.
    pub fn compression_ratio(&self) -> f64 {
        if self.bytes_after_dedup == 0 {
            return 0.0;
        }
        let saved = self.bytes_after_dedup as i64 - self.total_physical_bytes as i64;
        saved as f64 / self.bytes_after_dedup as f64
    }

    /// Share of logical bytes that never reached the disk. At most `1`,
    /// unbounded below.
    pub fn saved_ratio(&self) -> f64 {
        if self.total_logical_bytes == 0 {
            return 0.0;
        }
        let saved = self.total_logical_bytes as i64 - self.total_physical_bytes as i64;
        saved as f64 / self.total_logical_bytes as f64
    }

    /// Forward projection: how many logical bytes the given physical
    /// headroom should absorb at the observed savings rate.
    pub fn projected_logical_capacity(&self, remaining_physical: u64) -> u64 {
        let saved = self.saved_ratio();
        if saved < 1.0 {
            (remaining_physical as f64 / (1.0 - saved)) as u64
        } else {
            remaining_physical
        }
    }

    /// The human-readable storage report.
    pub fn report(&self, remaining_physical: u64) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "=== SmartFS Storage Report ===");
        let _ = writeln!(out, "Logical bytes written : {}", self.total_logical_bytes);
        let _ = writeln!(out, "After deduplication   : {}", self.bytes_after_dedup);
        let _ = writeln!(out, "Physical bytes stored : {}", self.total_physical_bytes);
        let _ = writeln!(out, "Dedup hits            : {}", self.deduplication_count);
        let _ = writeln!(out, "Dedup ratio           : {:.1}%", self.dedup_ratio() * 100.0);
        let _ = writeln!(
            out,
            "Compression ratio     : {:.1}%",
            self.compression_ratio() * 100.0
        );
        let _ = writeln!(out, "Total saved           : {:.1}%", self.saved_ratio() * 100.0);
        let _ = writeln!(
            out,
            "Projected capacity    : {} bytes",
            self.projected_logical_capacity(remaining_physical)
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stats_are_neutral() {
        let stats = StorageStats::default();
        assert_eq!(stats.dedup_ratio(), 0.0);
        assert_eq!(stats.compression_ratio(), 0.0);
        assert_eq!(stats.saved_ratio(), 0.0);
        assert_eq!(stats.projected_logical_capacity(1000), 1000);
    }

    #[test]
    fn ratios_stay_in_their_ranges() {
        let stats = StorageStats {
            total_logical_bytes: 1000,
            bytes_after_dedup: 400,
            total_physical_bytes: 100,
            deduplication_count: 3,
        };
        let dedup = stats.dedup_ratio();
        assert!((0.0..=1.0).contains(&dedup));
        assert!((dedup - 0.6).abs() < 1e-9);
        assert!((stats.compression_ratio() - 0.75).abs() < 1e-9);
        assert!((stats.saved_ratio() - 0.9).abs() < 1e-9);
    }

    #[test]
    fn inflation_goes_negative() {
        let stats = StorageStats {
            total_logical_bytes: 100,
            bytes_after_dedup: 100,
            total_physical_bytes: 150,
            deduplication_count: 0,
        };
        assert!(stats.compression_ratio() < 0.0);
        assert!(stats.saved_ratio() < 0.0);
        assert!(stats.saved_ratio() <= 1.0);
        // negative savings shrink the projection below the raw headroom
        assert!(stats.projected_logical_capacity(1000) < 1000);
    }

    #[test]
    fn projection_amplifies_savings() {
        let stats = StorageStats {
            total_logical_bytes: 1000,
            bytes_after_dedup: 500,
            total_physical_bytes: 500,
            deduplication_count: 1,
        };
        // saved ratio 0.5 doubles the projected capacity
        assert_eq!(stats.projected_logical_capacity(4096), 8192);
    }

    #[test]
    fn all_saved_projects_raw_headroom() {
        let stats = StorageStats {
            total_logical_bytes: 1000,
            bytes_after_dedup: 0,
            total_physical_bytes: 0,
            deduplication_count: 10,
        };
        assert_eq!(stats.saved_ratio(), 1.0);
        assert_eq!(stats.projected_logical_capacity(777), 777);
    }

    #[test]
    fn report_carries_every_counter() {
        let stats = StorageStats {
            total_logical_bytes: 10,
            bytes_after_dedup: 10,
            total_physical_bytes: 8,
            deduplication_count: 1,
        };
        let report = stats.report(4096);
        assert!(report.contains("Logical bytes written : 10"));
        assert!(report.contains("Dedup hits            : 1"));
        assert!(report.contains("Projected capacity"));
    }
}
