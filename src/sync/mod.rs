//! Sighting Synchronization Module
//!
//! This module keeps the main map in step with the sighting records held by the store.
//! It is composed of several submodules, each responsible for a specific aspect of the sync process:
//!
//! - `controller`: The main entry point. It wires the feed, the marker synchronizer and the submission form into one event loop.
//! - `events`: Defines the events the view sends in and the notices it gets back.
//! - `feed`: Ordered, deduplicated stream of decoded sighting records with replaying subscriptions.
//! - `markers`: Turns records into map markers and keeps the cluster layer attached over them.
//! - `cluster`: Cluster attachment state and the bounded retry policy used while the clustering add-on loads.
//! - `stats`: Counters for decoded records, rendered markers and cluster attachments, with periodic progress logging.
//!
//! The controller owns every piece of mutable state, so records, view events and retries are
//! handled one at a time in arrival order.

/// Cluster attachment state and retry policy
pub mod cluster;
/// Main coordinator for the sighting map
pub mod controller;
/// View events and notices
pub mod events;
/// Sighting feed and subscriptions
pub mod feed;
/// Marker synchronization against the map provider
pub mod markers;
/// Sync statistics and progress logging
pub mod stats;

pub use cluster::{ClusterAttachmentState, ClusterRetryPolicy};
pub use controller::{Collaborators, SightingMapController};
pub use events::{ViewEvent, ViewNotice};
pub use feed::{FeedSubscription, IngestOutcome, SightingFeed};
pub use markers::{Marker, MarkerSynchronizer, info_window_content};
pub use stats::{FeedStats, MarkerStats, ProgressLogger, SyncStats};
