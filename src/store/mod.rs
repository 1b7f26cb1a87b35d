//! Record store integration
//!
//! This module defines the boundary to the realtime record store that holds sightings.
//! The store exposes an append-only feed per path and accepts writes whose
//! acknowledgment is the only completion signal the rest of the crate relies on.

/// In-process store used by the demo binary and tests
mod memory;
/// Type definitions for store data structures
mod types;

pub use memory::MemoryRecordStore;
pub use types::*;

use futures_util::Stream;
use std::pin::Pin;

/// Stream of raw entries from an append feed, in store arrival order.
pub type FeedStream = Pin<Box<dyn Stream<Item = Result<FeedEntry, StoreError>> + Send>>;

/// Append-only realtime record store.
#[async_trait::async_trait]
pub trait RecordStore: Send + Sync {
    /// Subscribe to the append feed under `path`.
    ///
    /// The stream first yields every entry already present and then every new entry
    /// as it is written.
    async fn read_append_feed(&self, path: &str) -> Result<FeedStream, StoreError>;

    /// Append `value` under `path`, resolving once the store acknowledged the write.
    async fn write(&self, path: &str, value: serde_json::Value) -> Result<RecordKey, StoreError>;

    /// Sentinel the store replaces with its own clock when a write is applied.
    fn server_timestamp(&self) -> serde_json::Value {
        serde_json::json!({ ".sv": "timestamp" })
    }
}
