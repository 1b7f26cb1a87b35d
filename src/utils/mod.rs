//!
//! Utility module for the sighting map.
//!
//! Re-exports formatting helpers used when rendering info windows.
/// Date and markup formatting for display
pub mod format;

pub use format::{escape_html, format_display_date};
