//! Sighting submission
//!
//! Backs the "add sighting" popup: the draft being edited, validation against the
//! known-subject catalog, and the write through the record store. A successful write does
//! not add a marker itself; the marker appears when the store feed echoes the record back.

/// Known-subject catalog
pub mod catalog;

pub use catalog::{CatalogError, SubjectCatalog};

use crate::config::MapConfig;
use crate::map::{
	IconHandle, LatLng, MapError, MapHandle, MapProvider, MarkerHandle, MarkerOptions,
	PositionUnavailable,
};
use crate::store::{RecordKey, RecordStore, SightingWrite, StoreError};

use tracing::{debug, info, warn};

/// The logged-in user filing a sighting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitter {
	pub uid: String,
}

impl Submitter {
	pub fn new(uid: impl Into<String>) -> Self {
		Self {
			uid: uid.into(),
		}
	}
}

/// Session lookup of the authentication layer.
pub trait SessionProvider: Send + Sync {
	fn current_submitter(&self) -> Option<Submitter>;
}

/// A session that never changes.
#[derive(Debug, Clone, Default)]
pub struct StaticSession(pub Option<Submitter>);

impl SessionProvider for StaticSession {
	fn current_submitter(&self) -> Option<Submitter> {
		self.0.clone()
	}
}

/// Draft backing the submission form
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingSighting {
	pub subject_name: Option<String>,
	pub latitude: Option<f64>,
	pub longitude: Option<f64>,
}

impl PendingSighting {
	/// All three fields are filled in.
	pub fn is_submittable(&self) -> bool {
		self.subject_name
			.as_deref()
			.is_some_and(|name| !name.trim().is_empty())
			&& self.latitude.is_some()
			&& self.longitude.is_some()
	}

	pub fn position(&self) -> Option<LatLng> {
		Some(LatLng::new(self.latitude?, self.longitude?))
	}

	pub fn clear(&mut self) {
		*self = Self::default();
	}
}

/// Identifies one opening of the popup.
///
/// Results that were requested for an earlier opening are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PopupTicket(u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
	#[error("Please enter what you found.")]
	EmptyName,

	#[error("You have entered an invalid Pokemon: {0}")]
	UnknownSubject(String),

	#[error("Please choose where you found it.")]
	MissingCoordinates,

	#[error("That location is not on the map.")]
	CoordinatesOutOfRange,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
	#[error(transparent)]
	Validation(#[from] ValidationError),

	#[error("You must be logged in to add a sighting")]
	Auth,

	#[error("Store error: {0}")]
	Store(#[from] StoreError),
}

pub struct SightingSubmission {
	catalog: SubjectCatalog,
	path: String,
	draft: PendingSighting,
	popup_open: bool,
	opening: u64,
}

impl SightingSubmission {
	pub fn new(catalog: SubjectCatalog, path: impl Into<String>) -> Self {
		Self {
			catalog,
			path: path.into(),
			draft: PendingSighting::default(),
			popup_open: false,
			opening: 0,
		}
	}

	/// Open the popup with an empty draft.
	///
	/// Resolve the device position for the returned ticket and hand it to
	/// [`apply_location`](Self::apply_location).
	pub fn open_popup(&mut self) -> PopupTicket {
		self.opening += 1;
		self.popup_open = true;
		self.draft.clear();
		debug!("Opened submission popup #{}", self.opening);
		PopupTicket(self.opening)
	}

	/// Close the popup and discard the draft.
	pub fn close_popup(&mut self) {
		if self.popup_open {
			debug!("Closed submission popup #{}", self.opening);
		}
		self.popup_open = false;
		self.draft.clear();
	}

	pub fn is_open(&self) -> bool {
		self.popup_open
	}

	/// Ticket of the current opening.
	pub fn ticket(&self) -> PopupTicket {
		PopupTicket(self.opening)
	}

	/// Whether `ticket` still refers to the popup as it is open now.
	pub fn is_current(&self, ticket: PopupTicket) -> bool {
		self.popup_open && ticket.0 == self.opening
	}

	/// Seed the draft with a resolved device position.
	///
	/// Returns the applied position; `None` when the position was unavailable or the popup
	/// was closed or reopened in the meantime.
	pub fn apply_location(
		&mut self,
		ticket: PopupTicket,
		result: Result<LatLng, PositionUnavailable>,
	) -> Option<LatLng> {
		if !self.is_current(ticket) {
			debug!("Ignoring location for a popup that is no longer open");
			return None;
		}

		match result {
			Ok(position) => {
				self.set_coordinates(position);
				Some(position)
			}
			Err(e) => {
				info!("Device location unavailable, coordinates left empty: {}", e);
				None
			}
		}
	}

	pub fn set_subject_name(&mut self, name: impl Into<String>) {
		self.draft.subject_name = Some(name.into());
	}

	pub fn set_coordinates(&mut self, position: LatLng) {
		self.draft.latitude = Some(position.lat);
		self.draft.longitude = Some(position.lng);
	}

	pub fn draft(&self) -> &PendingSighting {
		&self.draft
	}

	pub fn catalog(&self) -> &SubjectCatalog {
		&self.catalog
	}

	/// Validate the draft and build the value to write.
	pub fn prepare(
		&self,
		submitter: Option<&Submitter>,
		server_timestamp: serde_json::Value,
	) -> Result<SightingWrite, SubmissionError> {
		let name = self
			.draft
			.subject_name
			.as_deref()
			.map(str::trim)
			.unwrap_or_default();
		if name.is_empty() {
			return Err(ValidationError::EmptyName.into());
		}
		if !self.catalog.contains(name) {
			return Err(ValidationError::UnknownSubject(name.to_string()).into());
		}

		let position = self
			.draft
			.position()
			.ok_or(ValidationError::MissingCoordinates)?;
		if !position.is_valid() {
			return Err(ValidationError::CoordinatesOutOfRange.into());
		}

		let submitter = submitter.ok_or(SubmissionError::Auth)?;

		Ok(SightingWrite {
			subject_name: name.to_string(),
			latitude: position.lat,
			longitude: position.lng,
			reporter_id: submitter.uid.clone(),
			when: server_timestamp,
		})
	}

	/// Apply the store's answer to a write prepared under `ticket`.
	///
	/// On success the popup closes, unless it was already closed or reopened since.
	pub fn finish(
		&mut self,
		ticket: PopupTicket,
		result: Result<RecordKey, StoreError>,
	) -> Result<RecordKey, SubmissionError> {
		match result {
			Ok(key) => {
				info!("Sighting {} stored", key);
				if self.is_current(ticket) {
					self.close_popup();
				}
				Ok(key)
			}
			Err(e) => {
				warn!("Failed to store sighting: {}", e);
				Err(e.into())
			}
		}
	}

	/// Validate the draft, write it and wait for the acknowledgment.
	pub async fn submit(
		&mut self,
		store: &dyn RecordStore,
		submitter: Option<&Submitter>,
	) -> Result<RecordKey, SubmissionError> {
		let ticket = self.ticket();
		let value = self
			.prepare(submitter, store.server_timestamp())?
			.to_value()?;
		let result = store.write(&self.path, value).await;
		self.finish(ticket, result)
	}
}

/// The secondary map inside the popup, with a draggable marker for picking the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DragMap {
	pub map: MapHandle,
	pub marker: MarkerHandle,
}

impl DragMap {
	pub fn open(
		provider: &mut dyn MapProvider,
		config: &MapConfig,
		center: LatLng,
		icon: Option<IconHandle>,
	) -> Result<Self, MapError> {
		let map = provider.create_map(&config.drag_surface, &config.drag_options(center))?;
		provider.set_center(map, center)?;
		let marker = provider.create_marker(&MarkerOptions {
			map,
			position: center,
			icon,
			draggable: true,
			title: Some("Your location".to_string()),
		})?;
		Ok(Self { map, marker })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::map::HeadlessMap;
	use crate::store::MemoryRecordStore;

	fn submission() -> SightingSubmission {
		SightingSubmission::new(SubjectCatalog::new(["Pidgey", "Rattata"]), "found")
	}

	fn submitter() -> Submitter {
		Submitter::new("user-1")
	}

	#[tokio::test]
	async fn empty_name_is_rejected() {
		let store = MemoryRecordStore::new();
		let mut form = submission();
		form.open_popup();
		form.set_subject_name("");
		form.set_coordinates(LatLng::new(1.0, 1.0));

		let result = form.submit(&store, Some(&submitter())).await;
		assert!(matches!(
			result,
			Err(SubmissionError::Validation(ValidationError::EmptyName))
		));
		assert!(store.writes().is_empty());
		assert!(form.is_open());
	}

	#[tokio::test]
	async fn missing_coordinates_are_rejected() {
		let store = MemoryRecordStore::new();
		let mut form = submission();
		form.open_popup();
		form.set_subject_name("Pidgey");

		let result = form.submit(&store, Some(&submitter())).await;
		assert!(matches!(
			result,
			Err(SubmissionError::Validation(ValidationError::MissingCoordinates))
		));
		assert!(store.writes().is_empty());
	}

	#[tokio::test]
	async fn unknown_subject_is_rejected_after_trimming() {
		let store = MemoryRecordStore::new();
		let mut form = submission();
		form.open_popup();
		form.set_coordinates(LatLng::new(1.0, 1.0));

		form.set_subject_name("pidgey");
		assert!(matches!(
			form.submit(&store, Some(&submitter())).await,
			Err(SubmissionError::Validation(ValidationError::UnknownSubject(_)))
		));

		form.set_subject_name("  Pidgey  ");
		assert!(form.submit(&store, Some(&submitter())).await.is_ok());
		assert_eq!(store.writes()[0].1["subjectName"], "Pidgey");
	}

	#[tokio::test]
	async fn valid_sighting_is_written_once_with_reporter_and_timestamp() {
		let store = MemoryRecordStore::new();
		let mut form = submission();
		form.open_popup();
		form.set_subject_name("Pidgey");
		form.set_coordinates(LatLng::new(10.0, 20.0));

		let key = form
			.submit(&store, Some(&submitter()))
			.await
			.expect("submission should succeed");

		let writes = store.writes();
		assert_eq!(writes.len(), 1);
		let (path, value) = &writes[0];
		assert_eq!(path, "found");
		assert_eq!(value["reporterId"], "user-1");
		assert_eq!(value["latitude"], 10.0);
		assert_eq!(value["longitude"], 20.0);
		assert!(value["when"].is_i64());
		assert!(!key.as_str().is_empty());

		assert!(!form.is_open());
		assert_eq!(form.draft(), &PendingSighting::default());
	}

	#[tokio::test]
	async fn missing_session_is_an_auth_error() {
		let store = MemoryRecordStore::new();
		let mut form = submission();
		form.open_popup();
		form.set_subject_name("Pidgey");
		form.set_coordinates(LatLng::new(10.0, 20.0));

		assert!(matches!(
			form.submit(&store, None).await,
			Err(SubmissionError::Auth)
		));
		assert!(store.writes().is_empty());
	}

	#[tokio::test]
	async fn store_failure_keeps_the_popup_open() {
		let store = MemoryRecordStore::new();
		store.set_fail_writes(true);
		let mut form = submission();
		form.open_popup();
		form.set_subject_name("Pidgey");
		form.set_coordinates(LatLng::new(10.0, 20.0));

		assert!(matches!(
			form.submit(&store, Some(&submitter())).await,
			Err(SubmissionError::Store(StoreError::Write(_)))
		));
		assert!(form.is_open());
		assert_eq!(form.draft().subject_name.as_deref(), Some("Pidgey"));
	}

	#[tokio::test]
	async fn denied_location_leaves_coordinates_empty_until_dragged() {
		let store = MemoryRecordStore::new();
		let mut form = submission();
		let ticket = form.open_popup();

		assert_eq!(
			form.apply_location(ticket, Err(PositionUnavailable::Denied)),
			None
		);
		form.set_subject_name("Pidgey");
		assert_eq!(form.draft().latitude, None);
		assert!(!form.draft().is_submittable());
		assert!(matches!(
			form.submit(&store, Some(&submitter())).await,
			Err(SubmissionError::Validation(ValidationError::MissingCoordinates))
		));

		form.set_coordinates(LatLng::new(3.0, 4.0));
		assert!(form.draft().is_submittable());
		assert!(form.submit(&store, Some(&submitter())).await.is_ok());
	}

	#[test]
	fn location_for_a_closed_popup_is_ignored() {
		let mut form = submission();
		let stale = form.open_popup();
		form.close_popup();
		assert_eq!(
			form.apply_location(stale, Ok(LatLng::new(1.0, 2.0))),
			None
		);

		let current = form.open_popup();
		assert_eq!(form.apply_location(stale, Ok(LatLng::new(1.0, 2.0))), None);
		assert_eq!(form.draft().latitude, None);

		assert_eq!(
			form.apply_location(current, Ok(LatLng::new(1.0, 2.0))),
			Some(LatLng::new(1.0, 2.0))
		);
		assert_eq!(form.draft().position(), Some(LatLng::new(1.0, 2.0)));
	}

	#[test]
	fn drag_map_places_a_draggable_marker() {
		let mut map = HeadlessMap::new();
		let center = LatLng::new(1.0, 2.0);
		let drag = DragMap::open(&mut map, &MapConfig::default(), center, None)
			.expect("drag map should open");

		let markers = map.markers();
		assert_eq!(markers.len(), 1);
		assert_eq!(markers[0].0, drag.marker);
		assert!(markers[0].1.draggable);
		assert_eq!(markers[0].1.map, drag.map);
		assert_eq!(markers[0].1.title.as_deref(), Some("Your location"));
	}
}
