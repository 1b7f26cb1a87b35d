//! Headless map provider.
//!
//! Draws nothing: every call is recorded so the demo binary can log what would have been
//! rendered and tests can assert on it. Clones share the same recording.

use super::*;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// A call made against the [`HeadlessMap`].
#[derive(Debug, Clone, PartialEq)]
pub enum MapCall {
    CreateMap {
        map: MapHandle,
        surface: String,
        center: LatLng,
        zoom: u8,
    },
    SetCenter {
        map: MapHandle,
        center: LatLng,
    },
    SetZoom {
        map: MapHandle,
        zoom: u8,
    },
    CreateIcon {
        icon: IconHandle,
        url: String,
    },
    CreateMarker {
        marker: MarkerHandle,
        options: MarkerOptions,
    },
    CreateInfoWindow {
        window: InfoWindowHandle,
    },
    OpenInfoWindow {
        window: InfoWindowHandle,
        anchor: MarkerHandle,
        content: String,
    },
    CreateCluster {
        cluster: ClusterHandle,
        markers: Vec<MarkerHandle>,
    },
    ClearCluster {
        cluster: ClusterHandle,
    },
}

#[derive(Default)]
struct HeadlessState {
    next_handle: u64,
    calls: Vec<MapCall>,
    missing_surfaces: HashSet<String>,
    failing_positions: Vec<LatLng>,
    failing_clusters: bool,
    addresses: HashMap<String, LatLng>,
}

#[derive(Clone, Default)]
pub struct HeadlessMap {
    state: Arc<Mutex<HeadlessState>>,
}

impl HeadlessMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_handle(state: &mut HeadlessState) -> u64 {
        state.next_handle += 1;
        state.next_handle
    }

    /// Make `create_map` fail for `surface`, as if the element were missing from the page.
    pub fn without_surface(self, surface: &str) -> Self {
        self.lock().missing_surfaces.insert(surface.to_string());
        self
    }

    /// Make `create_marker` fail for markers at `position`.
    pub fn failing_marker_at(self, position: LatLng) -> Self {
        self.lock().failing_positions.push(position);
        self
    }

    /// Make `create_cluster` fail until switched off again.
    pub fn set_cluster_failure(&self, fail: bool) {
        self.lock().failing_clusters = fail;
    }

    /// Register a geocoding result.
    pub fn with_address(self, address: &str, location: LatLng) -> Self {
        self.lock().addresses.insert(address.to_string(), location);
        self
    }

    pub fn calls(&self) -> Vec<MapCall> {
        self.lock().calls.clone()
    }

    /// Markers created so far, in creation order.
    pub fn markers(&self) -> Vec<(MarkerHandle, MarkerOptions)> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MapCall::CreateMarker { marker, options } => Some((*marker, options.clone())),
                _ => None,
            })
            .collect()
    }

    /// Every cluster layer built so far, as the list of markers it covered.
    pub fn clusters(&self) -> Vec<Vec<MarkerHandle>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                MapCall::CreateCluster { markers, .. } => Some(markers.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MapCall) {
        debug!("Map call: {:?}", call);
        self.lock().calls.push(call);
    }
}

impl MapProvider for HeadlessMap {
    fn create_map(&mut self, surface: &str, options: &MapOptions) -> Result<MapHandle, MapError> {
        let map = {
            let mut state = self.lock();
            if state.missing_surfaces.contains(surface) {
                return Err(MapError::SurfaceNotFound(surface.to_string()));
            }
            MapHandle(Self::next_handle(&mut state))
        };
        self.record(MapCall::CreateMap {
            map,
            surface: surface.to_string(),
            center: options.center,
            zoom: options.zoom,
        });
        Ok(map)
    }

    fn set_center(&mut self, map: MapHandle, center: LatLng) -> Result<(), MapError> {
        self.record(MapCall::SetCenter { map, center });
        Ok(())
    }

    fn set_zoom(&mut self, map: MapHandle, zoom: u8) -> Result<(), MapError> {
        self.record(MapCall::SetZoom { map, zoom });
        Ok(())
    }

    fn create_icon(&mut self, options: &IconOptions) -> Result<IconHandle, MapError> {
        let icon = IconHandle(Self::next_handle(&mut self.lock()));
        self.record(MapCall::CreateIcon {
            icon,
            url: options.url.clone(),
        });
        Ok(icon)
    }

    fn create_marker(&mut self, options: &MarkerOptions) -> Result<MarkerHandle, MapError> {
        let marker = {
            let mut state = self.lock();
            if state.failing_positions.contains(&options.position) {
                return Err(MapError::Provider(format!(
                    "cannot place marker at ({}, {})",
                    options.position.lat, options.position.lng
                )));
            }
            MarkerHandle(Self::next_handle(&mut state))
        };
        self.record(MapCall::CreateMarker {
            marker,
            options: options.clone(),
        });
        Ok(marker)
    }

    fn create_info_window(&mut self) -> Result<InfoWindowHandle, MapError> {
        let window = InfoWindowHandle(Self::next_handle(&mut self.lock()));
        self.record(MapCall::CreateInfoWindow { window });
        Ok(window)
    }

    fn open_info_window(
        &mut self,
        window: InfoWindowHandle,
        _map: MapHandle,
        anchor: MarkerHandle,
        content: &str,
    ) -> Result<(), MapError> {
        self.record(MapCall::OpenInfoWindow {
            window,
            anchor,
            content: content.to_string(),
        });
        Ok(())
    }

    fn create_cluster(
        &mut self,
        _map: MapHandle,
        markers: &[MarkerHandle],
        _options: &ClusterOptions,
    ) -> Result<ClusterHandle, MapError> {
        let cluster = {
            let mut state = self.lock();
            if state.failing_clusters {
                return Err(MapError::Provider("cluster layer rejected".to_string()));
            }
            ClusterHandle(Self::next_handle(&mut state))
        };
        self.record(MapCall::CreateCluster {
            cluster,
            markers: markers.to_vec(),
        });
        Ok(cluster)
    }

    fn clear_cluster(&mut self, cluster: ClusterHandle) -> Result<(), MapError> {
        self.record(MapCall::ClearCluster { cluster });
        Ok(())
    }
}

#[async_trait::async_trait]
impl Geocoder for HeadlessMap {
    async fn geocode(&self, address: &str) -> Result<LatLng, GeocodeError> {
        self.lock()
            .addresses
            .get(address.trim())
            .copied()
            .ok_or_else(|| GeocodeError::NotFound(address.to_string()))
    }
}

/// Switchable [`AddonAvailability`].
#[derive(Debug, Default)]
pub struct AddonSwitch {
    mapping: AtomicBool,
    clustering: AtomicBool,
}

impl AddonSwitch {
    pub fn new(mapping: bool, clustering: bool) -> Self {
        Self {
            mapping: AtomicBool::new(mapping),
            clustering: AtomicBool::new(clustering),
        }
    }

    pub fn set_mapping(&self, loaded: bool) {
        self.mapping.store(loaded, Ordering::SeqCst);
    }

    pub fn set_clustering(&self, loaded: bool) {
        self.clustering.store(loaded, Ordering::SeqCst);
    }
}

impl AddonAvailability for AddonSwitch {
    fn mapping_loaded(&self) -> bool {
        self.mapping.load(Ordering::SeqCst)
    }

    fn clustering_loaded(&self) -> bool {
        self.clustering.load(Ordering::SeqCst)
    }
}

/// Geolocation that always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedGeo(Result<LatLng, PositionUnavailable>);

impl FixedGeo {
    pub fn at(position: LatLng) -> Self {
        Self(Ok(position))
    }

    pub fn denied() -> Self {
        Self(Err(PositionUnavailable::Denied))
    }
}

#[async_trait::async_trait]
impl GeoProvider for FixedGeo {
    async fn current_position(&self) -> Result<LatLng, PositionUnavailable> {
        self.0
    }
}
