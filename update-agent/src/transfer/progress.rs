//! Aggregate download progress shared between file workers and the ticker.
//!
//! Two byte counters are kept. `transferred_bytes` counts what came off the
//! wire and only grows; the ticker samples it for throughput. `written_bytes`
//! counts decoded bytes written for files with a usable declared size and
//! drives the percent. A failed attempt takes its written bytes back out.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Session-wide counters. Safe to share across tasks behind an `Arc`.
#[derive(Debug)]
pub struct DownloadProgress {
    transferred_bytes: AtomicU64,
    written_bytes: AtomicU64,
    files_completed: AtomicUsize,
    files_failed: AtomicUsize,
    total_files: usize,
    estimated_bytes: u64,
}

/// Point-in-time view of [`DownloadProgress`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub transferred_bytes: u64,
    pub written_bytes: u64,
    pub estimated_bytes: u64,
    pub files_completed: usize,
    pub files_failed: usize,
    pub total_files: usize,
    pub percent: f64,
}

impl DownloadProgress {
    pub fn new(total_files: usize, estimated_bytes: u64) -> Self {
        Self {
            transferred_bytes: AtomicU64::new(0),
            written_bytes: AtomicU64::new(0),
            files_completed: AtomicUsize::new(0),
            files_failed: AtomicUsize::new(0),
            total_files,
            estimated_bytes,
        }
    }

    /// Record bytes received from the network (monotonic).
    pub fn add_bytes(&self, bytes: u64) {
        self.transferred_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record decoded bytes written towards the size estimate.
    pub fn add_written(&self, bytes: u64) {
        self.written_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Take back bytes written by an attempt that was thrown away.
    pub fn rollback_written(&self, bytes: u64) {
        let _ = self
            .written_bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn complete_file(&self) {
        self.files_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fail_file(&self) {
        self.files_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transferred_bytes(&self) -> u64 {
        self.transferred_bytes.load(Ordering::Relaxed)
    }

    pub fn written_bytes(&self) -> u64 {
        self.written_bytes.load(Ordering::Relaxed)
    }

    pub fn files_completed(&self) -> usize {
        self.files_completed.load(Ordering::Relaxed)
    }

    pub fn files_failed(&self) -> usize {
        self.files_failed.load(Ordering::Relaxed)
    }

    pub fn total_files(&self) -> usize {
        self.total_files
    }

    /// Size-based percentage when sizes are known, file ratio otherwise.
    pub fn percent(&self) -> f64 {
        let percent = if self.estimated_bytes > 0 {
            (self.written_bytes() as f64 / self.estimated_bytes as f64) * 100.0
        } else if self.total_files > 0 {
            (self.files_completed() as f64 / self.total_files as f64) * 100.0
        } else {
            100.0 // Nothing to transfer
        };
        percent.min(100.0)
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            transferred_bytes: self.transferred_bytes(),
            written_bytes: self.written_bytes(),
            estimated_bytes: self.estimated_bytes,
            files_completed: self.files_completed(),
            files_failed: self.files_failed(),
            total_files: self.total_files,
            percent: self.percent(),
        }
    }
}

/// Throughput from successive samples of a monotonic byte counter.
pub struct ThroughputSampler {
    last_bytes: u64,
    last_time: Instant,
}

impl ThroughputSampler {
    pub fn new(start_bytes: u64) -> Self {
        Self {
            last_bytes: start_bytes,
            last_time: Instant::now(),
        }
    }

    /// Bytes per second since the previous sample.
    pub fn sample(&mut self, total_bytes: u64) -> u64 {
        self.sample_at(total_bytes, Instant::now())
    }

    fn sample_at(&mut self, total_bytes: u64, now: Instant) -> u64 {
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        let diff = total_bytes.saturating_sub(self.last_bytes);
        self.last_bytes = total_bytes;
        self.last_time = now;

        if elapsed > 0.0 {
            (diff as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_counters() {
        let progress = DownloadProgress::new(3, 1000);
        progress.add_bytes(200);
        progress.add_written(250);
        progress.add_written(250);
        progress.complete_file();
        progress.fail_file();

        let snap = progress.snapshot();
        assert_eq!(snap.transferred_bytes, 200);
        assert_eq!(snap.written_bytes, 500);
        assert_eq!(snap.files_completed, 1);
        assert_eq!(snap.files_failed, 1);
        assert!((snap.percent - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_percent_is_capped() {
        let progress = DownloadProgress::new(1, 100);
        progress.add_written(400);
        assert_eq!(progress.percent(), 100.0);
    }

    #[test]
    fn test_compressed_wire_bytes_do_not_drive_percent() {
        let progress = DownloadProgress::new(1, 1000);
        // 100 gzip bytes on the wire inflate to 500 bytes on disk
        progress.add_bytes(100);
        progress.add_written(500);
        assert!((progress.percent() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_rollback_removes_failed_attempt() {
        let progress = DownloadProgress::new(1, 1000);
        progress.add_bytes(800);
        progress.add_written(800);
        progress.rollback_written(800);

        assert_eq!(progress.percent(), 0.0);
        // Throughput still saw the traffic
        assert_eq!(progress.transferred_bytes(), 800);

        progress.rollback_written(10);
        assert_eq!(progress.written_bytes(), 0);
    }

    #[test]
    fn test_percent_falls_back_to_file_ratio() {
        let progress = DownloadProgress::new(4, 0);
        progress.add_written(10_000);
        progress.complete_file();
        assert!((progress.percent() - 25.0).abs() < 0.01);

        assert_eq!(DownloadProgress::new(0, 0).percent(), 100.0);
    }

    #[test]
    fn test_throughput_from_delta() {
        let start = Instant::now();
        let mut sampler = ThroughputSampler {
            last_bytes: 0,
            last_time: start,
        };

        assert_eq!(sampler.sample_at(2048, start + Duration::from_secs(2)), 1024);
        // Stalled transfer reports zero rather than a stale rate
        assert_eq!(sampler.sample_at(2048, start + Duration::from_secs(3)), 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
        assert_eq!(format_speed(1024 * 1024), "1.00 MB/s");
    }
}
