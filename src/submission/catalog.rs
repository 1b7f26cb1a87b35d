//! Known-subject catalog.
//!
//! The list of creature names a sighting may be filed under. It is published as a JSON
//! array of entries with an `ename` field; other fields are ignored.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
struct CatalogEntry {
	ename: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectCatalog {
	names: BTreeSet<String>,
}

impl SubjectCatalog {
	pub fn new<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self {
			names: names.into_iter().map(Into::into).collect(),
		}
	}

	pub fn from_json_str(raw: &str) -> Result<Self, CatalogError> {
		let entries: Vec<CatalogEntry> = serde_json::from_str(raw)?;
		Ok(Self::new(entries.into_iter().map(|entry| entry.ename)))
	}

	/// Load the catalog from a local file.
	pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
		let raw = tokio::fs::read_to_string(path.as_ref()).await?;
		let catalog = Self::from_json_str(&raw)?;
		info!(
			"Loaded {} subjects from {}",
			catalog.len(),
			path.as_ref().display()
		);
		Ok(catalog)
	}

	/// Fetch the catalog over HTTP.
	pub async fn fetch(client: &reqwest::Client, url: &str) -> Result<Self, CatalogError> {
		let response = client.get(url).send().await?.error_for_status()?;
		let entries: Vec<CatalogEntry> = response.json().await?;
		let catalog = Self::new(entries.into_iter().map(|entry| entry.ename));
		info!("Fetched {} subjects from {}", catalog.len(), url);
		Ok(catalog)
	}

	/// Exact, case-sensitive membership test.
	pub fn contains(&self, name: &str) -> bool {
		self.names.contains(name)
	}

	pub fn len(&self) -> usize {
		self.names.len()
	}

	pub fn is_empty(&self) -> bool {
		self.names.is_empty()
	}
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("JSON parse error: {0}")]
	JsonError(#[from] serde_json::Error),

	#[error("HTTP error: {0}")]
	HttpError(#[from] reqwest::Error),
}
