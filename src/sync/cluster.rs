//! Cluster layer attachment state and retry policy.
//!
//! The clustering add-on loads on its own schedule and exposes no completion callback.
//! A refresh request that finds it missing retries at a fixed interval a bounded number of
//! times and then gives up for that cycle; plain markers are unaffected either way.

use crate::map::{AddonAvailability, MapHandle};

use backoff::backoff::Backoff;
use std::time::Duration;

/// Where the synchronizer is in attaching the cluster layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAttachmentState {
    /// No cluster layer has been attached and no attempt is in progress.
    Unattempted,
    /// A cluster layer covers the marker set as of the last refresh.
    Ready,
    /// The add-on was missing; `retries_used` retries have been scheduled this cycle.
    Pending { retries_used: u32 },
}

/// Fixed-interval retry policy with a retry budget per refresh cycle.
///
/// `next_backoff` yields the interval `max_retries` times after each `reset`, then `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRetryPolicy {
    interval: Duration,
    max_retries: u32,
    retries_used: u32,
}

impl ClusterRetryPolicy {
    pub fn new(interval: Duration, max_retries: u32) -> Self {
        Self {
            interval,
            max_retries,
            retries_used: 0,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn retries_used(&self) -> u32 {
        self.retries_used
    }
}

impl Default for ClusterRetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 2)
    }
}

impl Backoff for ClusterRetryPolicy {
    fn reset(&mut self) {
        self.retries_used = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.retries_used < self.max_retries {
            self.retries_used += 1;
            Some(self.interval)
        } else {
            None
        }
    }
}

/// Clustering add-on loaded, mapping library loaded, and a map surface to cluster on.
pub fn cluster_available(addons: &dyn AddonAvailability, map: Option<MapHandle>) -> bool {
    addons.clustering_loaded() && addons.mapping_loaded() && map.is_some()
}
