//! Progress reporting shared by conversion and verification

use std::time::{Duration, Instant};

/// Progress of a long-running copy or comparison
#[derive(Debug, Clone)]
pub struct Progress {
    /// Bytes processed so far
    pub bytes_done: u64,

    /// Total bytes to process
    pub total_bytes: u64,

    /// Current speed in bytes per second
    pub speed_bps: u64,

    /// Estimated time remaining in seconds
    pub eta_seconds: Option<u64>,

    /// Elapsed time since start
    pub elapsed: Duration,
}

impl Progress {
    /// Create a new progress instance
    pub fn new(total_bytes: u64) -> Self {
        Self {
            bytes_done: 0,
            total_bytes,
            speed_bps: 0,
            eta_seconds: None,
            elapsed: Duration::ZERO,
        }
    }

    /// Calculate completion percentage (0.0 to 100.0)
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            100.0
        } else {
            (self.bytes_done as f64 / self.total_bytes as f64) * 100.0
        }
    }

    /// Check if the operation is complete
    pub fn is_complete(&self) -> bool {
        self.bytes_done >= self.total_bytes
    }

    /// Format speed for display (e.g., "45.2 MB/s")
    pub fn speed_display(&self) -> String {
        format_speed(self.speed_bps)
    }

    /// Format ETA for display (e.g., "2m 30s")
    pub fn eta_display(&self) -> String {
        match self.eta_seconds {
            Some(secs) if secs > 0 => format_duration(secs),
            _ => "calculating...".to_string(),
        }
    }
}

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;

/// Drives a [`Progress`] and hands every update to an optional callback
pub(crate) struct Tracker<'a> {
    progress: Progress,
    start: Instant,
    speed: SpeedTracker,
    callback: Option<&'a ProgressCallback>,
}

impl<'a> Tracker<'a> {
    pub(crate) fn new(total_bytes: u64, callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            progress: Progress::new(total_bytes),
            start: Instant::now(),
            speed: SpeedTracker::new(),
            callback,
        }
    }

    pub(crate) fn advance(&mut self, bytes: u64) {
        let p = &mut self.progress;
        p.bytes_done += bytes;
        p.elapsed = self.start.elapsed();
        self.speed.update(p.bytes_done);
        p.speed_bps = self.speed.current_speed();
        p.eta_seconds = calculate_eta(p.bytes_done, p.total_bytes, p.speed_bps);

        if let Some(callback) = self.callback {
            callback(p);
        }
    }

    pub(crate) fn bytes_done(&self) -> u64 {
        self.progress.bytes_done
    }

    /// Elapsed time and average speed
    pub(crate) fn finish(&self) -> (Duration, u64) {
        let elapsed = self.start.elapsed();
        let average = if elapsed.as_secs() > 0 {
            self.progress.bytes_done / elapsed.as_secs()
        } else {
            self.progress.bytes_done
        };
        (elapsed, average)
    }
}

/// Speed over the last few samples
struct SpeedTracker {
    samples: Vec<(Instant, u64)>,
    max_samples: usize,
}

impl SpeedTracker {
    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(10),
            max_samples: 10,
        }
    }

    fn update(&mut self, bytes_done: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.remove(0);
        }
        self.samples.push((Instant::now(), bytes_done));
    }

    fn current_speed(&self) -> u64 {
        let (Some(first), Some(last)) = (self.samples.first(), self.samples.last()) else {
            return 0;
        };

        let duration = last.0.duration_since(first.0);
        let bytes = last.1.saturating_sub(first.1);

        if duration.as_millis() > 0 {
            (bytes as f64 / duration.as_secs_f64()) as u64
        } else {
            0
        }
    }
}

/// Calculate estimated time remaining
fn calculate_eta(bytes_done: u64, total_bytes: u64, speed_bps: u64) -> Option<u64> {
    if speed_bps == 0 || bytes_done >= total_bytes {
        return None;
    }
    Some(total_bytes.saturating_sub(bytes_done) / speed_bps)
}

/// Format speed for display
pub fn format_speed(bytes_per_second: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes_per_second >= GB {
        format!("{:.1} GB/s", bytes_per_second as f64 / GB as f64)
    } else if bytes_per_second >= MB {
        format!("{:.1} MB/s", bytes_per_second as f64 / MB as f64)
    } else if bytes_per_second >= KB {
        format!("{:.1} KB/s", bytes_per_second as f64 / KB as f64)
    } else {
        format!("{} B/s", bytes_per_second)
    }
}

/// Format duration for display
pub fn format_duration(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else if seconds >= 60 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_progress_percentage() {
        let mut progress = Progress::new(1000);
        assert_eq!(progress.percentage(), 0.0);
        progress.bytes_done = 250;
        assert_eq!(progress.percentage(), 25.0);
        assert!(!progress.is_complete());
        progress.bytes_done = 1000;
        assert!(progress.is_complete());
    }

    #[test]
    fn test_progress_empty_is_complete() {
        let progress = Progress::new(0);
        assert_eq!(progress.percentage(), 100.0);
        assert!(progress.is_complete());
    }

    #[test]
    fn test_eta_display() {
        let mut progress = Progress::new(100);
        assert_eq!(progress.eta_display(), "calculating...");
        progress.eta_seconds = Some(150);
        assert_eq!(progress.eta_display(), "2m 30s");
    }

    #[test]
    fn test_calculate_eta() {
        assert_eq!(calculate_eta(0, 1000, 0), None);
        assert_eq!(calculate_eta(1000, 1000, 10), None);
        assert_eq!(calculate_eta(500, 1000, 100), Some(5));
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(512), "512 B/s");
        assert_eq!(format_speed(1536), "1.5 KB/s");
        assert_eq!(format_speed(45 * 1024 * 1024), "45.0 MB/s");
        assert_eq!(format_speed(2 * 1024 * 1024 * 1024), "2.0 GB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3720), "1h 2m");
    }

    #[test]
    fn test_tracker_reports_each_advance() {
        let seen = Arc::new(AtomicU64::new(0));
        let sink = Arc::clone(&seen);
        let callback: ProgressCallback = Box::new(move |p| {
            sink.store(p.bytes_done, Ordering::SeqCst);
        });

        let mut tracker = Tracker::new(1024, Some(&callback));
        tracker.advance(512);
        assert_eq!(seen.load(Ordering::SeqCst), 512);
        tracker.advance(512);
        assert_eq!(seen.load(Ordering::SeqCst), 1024);
        assert_eq!(tracker.bytes_done(), 1024);

        let (_, average) = tracker.finish();
        assert!(average > 0);
    }
}
