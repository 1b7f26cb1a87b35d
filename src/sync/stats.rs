//! Progress tracking for sighting synchronization.
//!
//! Counts what happened to every feed entry (decoded, malformed, replayed) and to every
//! marker and cluster refresh, and logs a summary at regular intervals.

use tracing::info;

/// Counters kept by the sighting feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedStats {
    /// Entries decoded and buffered
    pub decoded: usize,
    /// Entries dropped because they did not decode
    pub malformed: usize,
    /// Entries ignored because their key was already buffered
    pub duplicates: usize,
}

impl FeedStats {
    pub fn record_decoded(&mut self) {
        self.decoded += 1;
    }

    pub fn record_malformed(&mut self) {
        self.malformed += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }
}

/// Counters kept by the marker synchronizer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerStats {
    pub markers_rendered: usize,
    pub marker_failures: usize,
    pub cluster_attachments: usize,
    /// Refresh cycles that ran out of retries without attaching
    pub cluster_give_ups: usize,
}

impl MarkerStats {
    pub fn record_marker(&mut self) {
        self.markers_rendered += 1;
    }

    pub fn record_marker_failure(&mut self) {
        self.marker_failures += 1;
    }

    pub fn record_cluster_attachment(&mut self) {
        self.cluster_attachments += 1;
    }

    pub fn record_cluster_give_up(&mut self) {
        self.cluster_give_ups += 1;
    }
}

/// Statistics about a synchronization session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub feed: FeedStats,
    pub markers: MarkerStats,
}

impl SyncStats {
    /// Get a human-readable summary of the sync statistics
    pub fn summary(&self) -> String {
        format!(
            "{} records ({} malformed, {} replayed), {} markers{}, {} cluster attachments{}",
            self.feed.decoded,
            self.feed.malformed,
            self.feed.duplicates,
            self.markers.markers_rendered,
            if self.markers.marker_failures == 0 {
                String::new()
            } else {
                format!(" ({} failed)", self.markers.marker_failures)
            },
            self.markers.cluster_attachments,
            if self.markers.cluster_give_ups == 0 {
                String::new()
            } else {
                format!(" ({} cycles gave up)", self.markers.cluster_give_ups)
            }
        )
    }
}

/// Logs sync progress every `interval` decoded records.
#[derive(Debug, Clone)]
pub struct ProgressLogger {
    interval: usize,
    last_logged: usize,
}

impl ProgressLogger {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            last_logged: 0,
        }
    }

    /// Log progress at regular intervals or when forced
    pub fn log_progress(&mut self, stats: &SyncStats, force: bool) -> bool {
        let since_last = stats.feed.decoded.saturating_sub(self.last_logged);
        if !(force || since_last >= self.interval) {
            return false;
        }

        info!("Sync progress: {}", stats.summary());
        self.last_logged = stats.feed.decoded;
        true
    }
}

impl Default for ProgressLogger {
    fn default() -> Self {
        Self::new(100)
    }
}
