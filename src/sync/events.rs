//! Events exchanged between the view and the sighting map controller.
//!
//! The view translates user interaction (marker clicks, popup buttons, form input, drag-map
//! moves) into [`ViewEvent`]s. The controller reports outcomes back as [`ViewNotice`]s,
//! which carry the message to show the user where one is needed.

use crate::map::LatLng;
use crate::store::RecordKey;

/// User interaction forwarded by the view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// A sighting marker on the main map was clicked
    MarkerClicked(RecordKey),
    /// The "add sighting" popup was opened
    OpenPopup,
    /// The popup was dismissed (close button or Escape)
    ClosePopup,
    /// The subject name field changed
    SetSubjectName(String),
    /// The drag-map marker was dropped or clicked at a new position
    MoveDraft(LatLng),
    /// The submission form was submitted
    Submit,
    /// Centre the main map on the device position
    FindMe,
    /// Centre the main map on an address
    SearchAddress(String),
    /// Stop the controller loop
    Shutdown,
}

/// Outcome reported back to the view
#[derive(Debug, Clone, PartialEq)]
pub enum ViewNotice {
    PopupOpened,
    PopupClosed,
    /// The store acknowledged a new sighting
    Submitted(RecordKey),
    /// The draft was rejected before anything was written
    SubmissionRejected(String),
    /// The submitter has no session
    LoginRequired,
    /// The store rejected the write
    SubmissionFailed,
    /// Device position could not be determined
    LocationUnavailable,
    AddressNotFound(String),
    /// The sighting feed could not be opened
    FeedUnavailable,
}

impl ViewNotice {
    /// Message to display, for notices that need one.
    pub fn user_message(&self) -> Option<String> {
        match self {
            ViewNotice::SubmissionRejected(reason) => Some(reason.clone()),
            ViewNotice::LoginRequired => Some("Please log in to add a sighting.".to_string()),
            ViewNotice::SubmissionFailed => {
                Some("Something went wrong, make sure all fields are filled out".to_string())
            }
            ViewNotice::LocationUnavailable => Some(
                "Sorry your current location could not be found. Please make sure you enabled \
                 location permissions or manually enter the address below."
                    .to_string(),
            ),
            ViewNotice::AddressNotFound(address) => {
                Some(format!("No location found for \"{}\"", address))
            }
            ViewNotice::FeedUnavailable => Some("Sightings could not be loaded.".to_string()),
            ViewNotice::PopupOpened | ViewNotice::PopupClosed | ViewNotice::Submitted(_) => None,
        }
    }
}
