//! Marker synchronizer.
//!
//! Owns the authoritative marker set for the main map. Each feed record becomes exactly one
//! plain marker as soon as a map surface exists; the cluster layer is rebuilt over the whole
//! set whenever it grows, with a bounded retry while the clustering add-on is still loading.
//!
//! The synchronizer never sleeps. Methods that need a retry return the delay, and the caller
//! calls [`MarkerSynchronizer::retry_clusters`] once it has elapsed.

use crate::config::{ClusterConfig, MapConfig};
use crate::map::{
    AddonAvailability, ClusterHandle, ClusterOptions, IconHandle, IconOptions, InfoWindowHandle,
    LatLng, MapError, MapHandle, MapProvider, MarkerHandle, MarkerOptions,
};
use crate::store::{RecordKey, SightingRecord};
use crate::sync::cluster::{ClusterAttachmentState, ClusterRetryPolicy, cluster_available};
use crate::sync::stats::MarkerStats;
use crate::utils::{escape_html, format_display_date};

use backoff::backoff::Backoff;
use chrono::Locale;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A rendered sighting.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    /// The record this marker was built from
    pub record: SightingRecord,
    pub handle: MarkerHandle,
    pub position: LatLng,
    pub icon: Option<IconHandle>,
}

/// Info window markup for a sighting.
pub fn info_window_content(record: &SightingRecord, locale: Locale) -> String {
    format!(
        "<strong>Found:</strong> {}<br><strong>When:</strong> {}",
        escape_html(&record.subject_name),
        format_display_date(record.when, locale)
    )
}

pub struct MarkerSynchronizer {
    provider: Box<dyn MapProvider>,
    addons: Arc<dyn AddonAvailability>,
    map_config: MapConfig,
    cluster_options: ClusterOptions,
    date_locale: Locale,

    // Created with the map surface
    map: Option<MapHandle>,
    icon: Option<IconHandle>,
    info_window: Option<InfoWindowHandle>,

    /// Records that arrived before the surface existed
    waiting: Vec<SightingRecord>,
    markers: Vec<Marker>,
    index: HashMap<RecordKey, usize>,

    cluster: Option<ClusterHandle>,
    state: ClusterAttachmentState,
    retry_policy: ClusterRetryPolicy,

    stats: MarkerStats,
}

impl MarkerSynchronizer {
    pub fn new(
        provider: Box<dyn MapProvider>,
        addons: Arc<dyn AddonAvailability>,
        map_config: MapConfig,
        cluster_config: &ClusterConfig,
    ) -> Self {
        let date_locale = map_config.date_locale();
        Self {
            provider,
            addons,
            map_config,
            cluster_options: cluster_config.options(),
            date_locale,
            map: None,
            icon: None,
            info_window: None,
            waiting: Vec::new(),
            markers: Vec::new(),
            index: HashMap::new(),
            cluster: None,
            state: ClusterAttachmentState::Unattempted,
            retry_policy: cluster_config.retry_policy(),
            stats: MarkerStats::default(),
        }
    }

    /// Construct the main map surface with its shared icon and info window.
    ///
    /// Records that arrived earlier get their markers now, followed by one cluster refresh.
    /// Returns the delay before [`retry_clusters`](Self::retry_clusters) if one is needed.
    pub fn init_map(&mut self) -> Result<Option<Duration>, MapError> {
        if self.map.is_some() {
            debug!("Main map already constructed");
            return Ok(None);
        }

        let map = self
            .provider
            .create_map(&self.map_config.surface, &self.map_config.main_options())?;
        self.info_window = Some(self.provider.create_info_window()?);

        // A missing icon only costs the glyph, markers fall back to the provider default
        self.icon = match self.provider.create_icon(&IconOptions {
            url: self.map_config.icon_url.clone(),
            size: self.map_config.icon_size,
        }) {
            Ok(icon) => Some(icon),
            Err(e) => {
                warn!("Failed to create sighting icon: {}", e);
                None
            }
        };
        self.map = Some(map);

        let waiting = std::mem::take(&mut self.waiting);
        info!(
            "Constructed main map, placing {} waiting sightings",
            waiting.len()
        );
        for record in waiting {
            self.place_marker(map, record);
        }

        Ok(self.refresh_clusters())
    }

    /// Add one record from the feed.
    ///
    /// Returns the delay before [`retry_clusters`](Self::retry_clusters) if the cluster
    /// layer could not be attached yet.
    pub fn add_record(&mut self, record: SightingRecord) -> Option<Duration> {
        if !self.accept(&record) {
            return None;
        }

        match self.map {
            Some(map) => {
                if self.place_marker(map, record) {
                    self.refresh_clusters()
                } else {
                    None
                }
            }
            None => {
                debug!("Map not constructed yet, holding sighting {}", record.key);
                self.waiting.push(record);
                None
            }
        }
    }

    /// Add a batch of records with a single cluster refresh at the end.
    pub fn add_records(&mut self, records: impl IntoIterator<Item = SightingRecord>) -> Option<Duration> {
        let mut placed = 0usize;
        for record in records {
            if !self.accept(&record) {
                continue;
            }
            match self.map {
                Some(map) => {
                    if self.place_marker(map, record) {
                        placed += 1;
                    }
                }
                None => self.waiting.push(record),
            }
        }

        if placed > 0 {
            self.refresh_clusters()
        } else {
            None
        }
    }

    fn accept(&self, record: &SightingRecord) -> bool {
        let known = self.index.contains_key(&record.key)
            || self.waiting.iter().any(|waiting| waiting.key == record.key);
        if known {
            debug!("Sighting {} already has a marker", record.key);
        }
        !known
    }

    fn place_marker(&mut self, map: MapHandle, record: SightingRecord) -> bool {
        let options = MarkerOptions {
            map,
            position: record.position,
            icon: self.icon,
            draggable: false,
            title: None,
        };

        match self.provider.create_marker(&options) {
            Ok(handle) => {
                self.index.insert(record.key.clone(), self.markers.len());
                self.markers.push(Marker {
                    position: record.position,
                    icon: self.icon,
                    handle,
                    record,
                });
                self.stats.record_marker();
                true
            }
            Err(e) => {
                warn!("Dropping marker for sighting {}: {}", record.key, e);
                self.stats.record_marker_failure();
                false
            }
        }
    }

    /// Start a cluster refresh cycle over the current marker set.
    ///
    /// A cycle already waiting for a retry is superseded and its budget starts over.
    pub fn refresh_clusters(&mut self) -> Option<Duration> {
        if self.attach_clusters() {
            return None;
        }

        self.retry_policy.reset();
        self.schedule_retry()
    }

    /// Retry attachment for the current cycle. Does nothing unless a retry is pending.
    pub fn retry_clusters(&mut self) -> Option<Duration> {
        let ClusterAttachmentState::Pending { retries_used } = self.state else {
            return None;
        };

        debug!("Cluster attachment retry {}", retries_used);
        if self.attach_clusters() {
            return None;
        }
        self.schedule_retry()
    }

    fn schedule_retry(&mut self) -> Option<Duration> {
        match self.retry_policy.next_backoff() {
            Some(delay) => {
                self.state = ClusterAttachmentState::Pending {
                    retries_used: self.retry_policy.retries_used(),
                };
                Some(delay)
            }
            None => {
                debug!(
                    "Clustering unavailable after {} retries, showing plain markers",
                    self.retry_policy.retries_used()
                );
                self.stats.record_cluster_give_up();
                self.state = if self.cluster.is_some() {
                    ClusterAttachmentState::Ready
                } else {
                    ClusterAttachmentState::Unattempted
                };
                None
            }
        }
    }

    fn attach_clusters(&mut self) -> bool {
        if !cluster_available(self.addons.as_ref(), self.map) {
            return false;
        }
        let Some(map) = self.map else {
            return false;
        };

        let handles: Vec<MarkerHandle> = self.markers.iter().map(|m| m.handle).collect();
        match self
            .provider
            .create_cluster(map, &handles, &self.cluster_options)
        {
            Ok(cluster) => {
                debug!("Attached cluster layer over {} markers", handles.len());
                // The previous layer stays up until its replacement exists
                if let Some(previous) = self.cluster.replace(cluster) {
                    if let Err(e) = self.provider.clear_cluster(previous) {
                        warn!("Failed to clear previous cluster layer: {}", e);
                    }
                }
                self.state = ClusterAttachmentState::Ready;
                self.stats.record_cluster_attachment();
                true
            }
            Err(e) => {
                warn!("Failed to attach cluster layer: {}", e);
                false
            }
        }
    }

    /// Open the shared info window on the marker for `key`.
    pub fn open_info_window(&mut self, key: &RecordKey) -> Result<(), MapError> {
        let (Some(map), Some(window)) = (self.map, self.info_window) else {
            return Err(MapError::NoSurface);
        };
        let marker = self
            .index
            .get(key)
            .and_then(|&i| self.markers.get(i))
            .ok_or_else(|| MapError::UnknownMarker(key.to_string()))?;

        let content = info_window_content(&marker.record, self.date_locale);
        self.provider
            .open_info_window(window, map, marker.handle, &content)
    }

    /// Centre the main map, optionally changing the zoom first.
    pub fn recenter(&mut self, center: LatLng, zoom: Option<u8>) -> Result<(), MapError> {
        let map = self.map.ok_or(MapError::NoSurface)?;
        if let Some(zoom) = zoom {
            self.provider.set_zoom(map, zoom)?;
        }
        self.provider.set_center(map, center)
    }

    /// The provider, for surfaces other than the main map.
    pub fn provider_mut(&mut self) -> &mut dyn MapProvider {
        self.provider.as_mut()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    pub fn marker(&self, key: &RecordKey) -> Option<&Marker> {
        self.index.get(key).and_then(|&i| self.markers.get(i))
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.waiting.len()
    }

    pub fn map(&self) -> Option<MapHandle> {
        self.map
    }

    pub fn icon(&self) -> Option<IconHandle> {
        self.icon
    }

    pub fn cluster_state(&self) -> ClusterAttachmentState {
        self.state
    }

    pub fn cluster(&self) -> Option<ClusterHandle> {
        self.cluster
    }

    pub fn stats(&self) -> &MarkerStats {
        &self.stats
    }
}
