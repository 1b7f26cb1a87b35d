//! Map provider integration
//!
//! Boundary types for the third-party mapping library, its clustering add-on and the
//! device geolocation service. Everything the synchronization engine draws goes through
//! [`MapProvider`]; handles returned by the provider are opaque and owned by it.

/// Recording provider used by the demo binary and tests
mod headless;

pub use headless::{AddonSwitch, FixedGeo, HeadlessMap, MapCall};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A geographic position in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

impl LatLng {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Check that both coordinates are finite and inside the geographic range.
    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

macro_rules! provider_handle {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct $name(pub u64);
        )*
    };
}

provider_handle!(
    /// A constructed map surface.
    MapHandle,
    /// A point marker placed on a surface.
    MarkerHandle,
    /// An info window that can be anchored at a marker.
    InfoWindowHandle,
    /// A marker image shared between markers.
    IconHandle,
    /// A cluster layer grouping markers of one surface.
    ClusterHandle,
);

/// One entry of the map style list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapStyle {
    pub feature_type: String,
    pub element_type: String,
    pub stylers: BTreeMap<String, String>,
}

impl MapStyle {
    pub fn new(feature_type: &str, element_type: &str, styler: &str, value: &str) -> Self {
        Self {
            feature_type: feature_type.to_string(),
            element_type: element_type.to_string(),
            stylers: BTreeMap::from([(styler.to_string(), value.to_string())]),
        }
    }
}

/// Options for constructing a map surface.
#[derive(Debug, Clone, PartialEq)]
pub struct MapOptions {
    pub center: LatLng,
    pub zoom: u8,
    pub styles: Vec<MapStyle>,
}

/// Options for a shared marker image.
#[derive(Debug, Clone, PartialEq)]
pub struct IconOptions {
    pub url: String,
    /// Rendered width and height in pixels.
    pub size: u32,
}

/// Options for a single marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerOptions {
    pub map: MapHandle,
    pub position: LatLng,
    pub icon: Option<IconHandle>,
    pub draggable: bool,
    pub title: Option<String>,
}

/// Options handed to the clustering add-on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterOptions {
    pub grid_size: u32,
    pub image_path: String,
    pub max_zoom: u8,
}

/// Rendering surface and marker API of the mapping library.
///
/// Calls are synchronous: the library renders on the caller's event loop.
pub trait MapProvider: Send {
    fn create_map(&mut self, surface: &str, options: &MapOptions) -> Result<MapHandle, MapError>;

    fn set_center(&mut self, map: MapHandle, center: LatLng) -> Result<(), MapError>;

    fn set_zoom(&mut self, map: MapHandle, zoom: u8) -> Result<(), MapError>;

    fn create_icon(&mut self, options: &IconOptions) -> Result<IconHandle, MapError>;

    fn create_marker(&mut self, options: &MarkerOptions) -> Result<MarkerHandle, MapError>;

    fn create_info_window(&mut self) -> Result<InfoWindowHandle, MapError>;

    /// Replace the window's content and open it anchored at `anchor`.
    ///
    /// Opening a window that is already open elsewhere moves it.
    fn open_info_window(
        &mut self,
        window: InfoWindowHandle,
        map: MapHandle,
        anchor: MarkerHandle,
        content: &str,
    ) -> Result<(), MapError>;

    /// Build a cluster layer over `markers`. Only valid when the add-on is loaded.
    fn create_cluster(
        &mut self,
        map: MapHandle,
        markers: &[MarkerHandle],
        options: &ClusterOptions,
    ) -> Result<ClusterHandle, MapError>;

    fn clear_cluster(&mut self, cluster: ClusterHandle) -> Result<(), MapError>;
}

/// Address lookup offered by the mapping library.
#[async_trait::async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<LatLng, GeocodeError>;
}

/// Device geolocation.
#[async_trait::async_trait]
pub trait GeoProvider: Send + Sync {
    async fn current_position(&self) -> Result<LatLng, PositionUnavailable>;
}

/// Presence checks for the asynchronously loaded third-party libraries.
///
/// Neither library announces when it finished loading, so the only way to know is to ask.
pub trait AddonAvailability: Send + Sync {
    fn mapping_loaded(&self) -> bool;

    fn clustering_loaded(&self) -> bool;
}

/// Error types for map provider calls
#[derive(Debug, thiserror::Error)]
pub enum MapError {
    #[error("Map surface not found: {0}")]
    SurfaceNotFound(String),

    #[error("Map surface has not been constructed")]
    NoSurface,

    #[error("No marker for sighting {0}")]
    UnknownMarker(String),

    #[error("Provider error: {0}")]
    Provider(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    #[error("No location found for address: {0}")]
    NotFound(String),

    #[error("Geocoder error: {0}")]
    Provider(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PositionUnavailable {
    #[error("Location permission denied")]
    Denied,

    #[error("No location signal")]
    NoSignal,
}
