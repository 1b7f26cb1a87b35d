//! Configuration for the sighting map.
//!
//! Every field has a default matching the hosted application, so an empty JSON object is a
//! valid configuration file.

use crate::map::{ClusterOptions, LatLng, MapOptions, MapStyle};
use crate::sync::ClusterRetryPolicy;

use chrono::Locale;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Store path that holds the sighting records
	pub feed_path: String,
	pub map: MapConfig,
	pub cluster: ClusterConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			feed_path: "found".to_string(),
			map: MapConfig::default(),
			cluster: ClusterConfig::default(),
		}
	}
}

impl Config {
	/// Load a configuration file, filling unspecified fields with defaults.
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let raw = tokio::fs::read_to_string(path.as_ref()).await?;
		Self::from_json_str(&raw)
	}

	pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
		Ok(serde_json::from_str(raw)?)
	}
}

/// Map surfaces, zoom levels and the shared sighting icon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MapConfig {
	/// Element id of the main map surface
	pub surface: String,
	/// Element id of the draggable map shown in the submission popup
	pub drag_surface: String,
	/// Centre used until the device position is known
	pub default_center: LatLng,
	pub zoom: u8,
	pub drag_zoom: u8,
	/// Zoom applied after a successful address search
	pub search_zoom: u8,
	pub icon_url: String,
	pub icon_size: u32,
	pub styles: Vec<MapStyle>,
	/// Locale used for dates in info windows, e.g. `en_US` or `de_DE`
	pub locale: String,
}

impl Default for MapConfig {
	fn default() -> Self {
		Self {
			surface: "main-map".to_string(),
			drag_surface: "draggable-geolocation-map".to_string(),
			default_center: LatLng::new(-34.397, 150.644),
			zoom: 16,
			drag_zoom: 17,
			search_zoom: 16,
			icon_url: "assets/images/pokeball.png".to_string(),
			icon_size: 20,
			styles: vec![
				MapStyle::new("road", "geometry", "color", "#5BA99F"),
				MapStyle::new("landscape", "geometry", "hue", "#96FF91"),
				MapStyle::new("poi", "geometry", "color", "#EAFFE7"),
			],
			locale: "en_US".to_string(),
		}
	}
}

impl MapConfig {
	pub fn main_options(&self) -> MapOptions {
		MapOptions {
			center: self.default_center,
			zoom: self.zoom,
			styles: self.styles.clone(),
		}
	}

	/// The configured date locale, falling back to `en_US` for names chrono does not know.
	pub fn date_locale(&self) -> Locale {
		Locale::try_from(self.locale.as_str()).unwrap_or_else(|_| {
			warn!("Unknown locale {}, formatting dates as en_US", self.locale);
			Locale::en_US
		})
	}

	pub fn drag_options(&self, center: LatLng) -> MapOptions {
		MapOptions {
			center,
			zoom: self.drag_zoom,
			styles: self.styles.clone(),
		}
	}
}

/// Clustering add-on options and the attachment retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
	pub grid_size: u32,
	pub image_path: String,
	pub max_zoom: u8,
	/// Delay between attachment attempts while the add-on is missing
	pub retry_interval_ms: u64,
	/// Retries after the first failed attempt of a refresh cycle
	pub max_retries: u32,
}

impl Default for ClusterConfig {
	fn default() -> Self {
		Self {
			grid_size: 50,
			image_path: "assets/images/m".to_string(),
			max_zoom: 14,
			retry_interval_ms: 500,
			max_retries: 2,
		}
	}
}

impl ClusterConfig {
	pub fn options(&self) -> ClusterOptions {
		ClusterOptions {
			grid_size: self.grid_size,
			image_path: self.image_path.clone(),
			max_zoom: self.max_zoom,
		}
	}

	pub fn retry_policy(&self) -> ClusterRetryPolicy {
		ClusterRetryPolicy::new(
			Duration::from_millis(self.retry_interval_ms),
			self.max_retries,
		)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),
}
