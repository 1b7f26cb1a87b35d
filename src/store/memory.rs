//!
//! In-process record store.
//!
//! Keeps every path's entries in memory and fans writes out to live feed subscribers.
//! Keys follow the push-key scheme of the hosted store (time prefix plus random suffix)
//! and the server-timestamp sentinel is resolved against the local clock on write.

use super::types::*;
use super::{FeedStream, RecordStore};

use futures::channel::mpsc;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Default)]
struct Inner {
	entries: HashMap<String, Vec<FeedEntry>>,
	listeners: HashMap<String, Vec<mpsc::UnboundedSender<Result<FeedEntry, StoreError>>>>,
	writes: Vec<(String, serde_json::Value)>,
	fail_writes: bool,
	sequence: u64,
}

/// In-memory implementation of [`RecordStore`].
///
/// Cloning is cheap and every clone shares the same underlying data.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
	inner: Arc<Mutex<Inner>>,
}

impl MemoryRecordStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, Inner> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}

	/// Make subsequent writes fail with [`StoreError::Write`].
	pub fn set_fail_writes(&self, fail: bool) {
		self.lock().fail_writes = fail;
	}

	/// Every acknowledged write, as `(path, resolved value)`.
	pub fn writes(&self) -> Vec<(String, serde_json::Value)> {
		self.lock().writes.clone()
	}

	/// Append a raw entry without validation or key generation.
	///
	/// Entries are delivered as given, including duplicated keys and malformed values,
	/// which is how a replaying or misbehaving backend looks to subscribers.
	pub fn push_raw(&self, path: &str, key: impl Into<RecordKey>, value: serde_json::Value) {
		let entry = FeedEntry::new(key, value);
		let mut inner = self.lock();
		Self::append(&mut inner, path, entry);
	}

	fn append(inner: &mut Inner, path: &str, entry: FeedEntry) {
		inner
			.entries
			.entry(path.to_string())
			.or_default()
			.push(entry.clone());

		if let Some(listeners) = inner.listeners.get_mut(path) {
			listeners.retain(|listener| listener.unbounded_send(Ok(entry.clone())).is_ok());
		}
	}

	fn next_key(inner: &mut Inner) -> RecordKey {
		inner.sequence += 1;
		let millis = chrono::Utc::now().timestamp_millis();
		let mut suffix = [0u8; 4];
		rand::rng().fill(&mut suffix);
		RecordKey::new(format!(
			"{:012x}{:06x}{}",
			millis,
			inner.sequence,
			hex::encode(suffix)
		))
	}

	fn resolve_timestamps(&self, value: &mut serde_json::Value) {
		let sentinel = self.server_timestamp();
		if let Some(fields) = value.as_object_mut() {
			let now = chrono::Utc::now().timestamp_millis();
			for field in fields.values_mut() {
				if *field == sentinel {
					*field = serde_json::Value::from(now);
				}
			}
		}
	}
}

#[async_trait::async_trait]
impl RecordStore for MemoryRecordStore {
	async fn read_append_feed(&self, path: &str) -> Result<FeedStream, StoreError> {
		let (sender, receiver) = mpsc::unbounded();
		let mut inner = self.lock();

		let existing = inner.entries.get(path).cloned().unwrap_or_default();
		debug!("Replaying {} entries from {}", existing.len(), path);
		for entry in existing {
			sender
				.unbounded_send(Ok(entry))
				.map_err(|_| StoreError::Closed)?;
		}

		inner
			.listeners
			.entry(path.to_string())
			.or_default()
			.push(sender);

		Ok(Box::pin(receiver))
	}

	async fn write(&self, path: &str, mut value: serde_json::Value) -> Result<RecordKey, StoreError> {
		if self.lock().fail_writes {
			return Err(StoreError::Write(format!("write to {} rejected", path)));
		}

		self.resolve_timestamps(&mut value);

		let mut inner = self.lock();
		let key = Self::next_key(&mut inner);
		inner.writes.push((path.to_string(), value.clone()));
		Self::append(&mut inner, path, FeedEntry::new(key.clone(), value));

		info!("Stored record {} under {}", key, path);
		Ok(key)
	}
}
