//! Sighting map sync engine.
//!
//! Streams sighting records out of an append-only store, renders each one as a marker on the
//! main map with clustering layered on top, and files new sightings from the submission popup.

/// Runtime configuration
pub mod config;
/// Map provider abstraction and a headless implementation
pub mod map;
/// Record store abstraction, wire types and the in-memory store
pub mod store;
/// Submission form, validation and the known-subject catalog
pub mod submission;
/// Feed, marker synchronization and the controller loop
pub mod sync;
/// Formatting helpers
pub mod utils;
