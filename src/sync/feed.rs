//! Sighting feed.
//!
//! Turns the store's raw append feed into a de-duplicated, decoded sequence of
//! [`SightingRecord`]s. Every subscriber sees each record exactly once: the records
//! already buffered when it subscribed, then every later arrival, in arrival order.

use crate::store::{FeedEntry, RecordKey, SightingRecord};
use crate::sync::stats::FeedStats;

use std::collections::HashSet;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What happened to one ingested feed entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
	/// Decoded, buffered and delivered to subscribers
	Accepted,
	/// Key already buffered; ignored
	Duplicate,
	/// Did not decode; logged and skipped
	Malformed,
}

/// Receiving end of a feed subscription.
///
/// Dropping the subscription unregisters it; the feed prunes it on the next delivery.
#[derive(Debug)]
pub struct FeedSubscription {
	receiver: mpsc::UnboundedReceiver<SightingRecord>,
}

impl FeedSubscription {
	/// Wait for the next record. Returns `None` once the feed itself is gone.
	pub async fn recv(&mut self) -> Option<SightingRecord> {
		self.receiver.recv().await
	}

	/// Take the next record if one is already queued.
	pub fn try_recv(&mut self) -> Option<SightingRecord> {
		self.receiver.try_recv().ok()
	}

	/// Stop receiving records. Already queued records are discarded.
	pub fn unsubscribe(mut self) {
		self.receiver.close();
	}
}

#[derive(Debug, Default)]
pub struct SightingFeed {
	records: Vec<SightingRecord>,
	keys: HashSet<RecordKey>,
	subscribers: Vec<mpsc::UnboundedSender<SightingRecord>>,
	stats: FeedStats,
}

impl SightingFeed {
	pub fn new() -> Self {
		Self::default()
	}

	/// Register a subscriber. Buffered records are queued for it immediately.
	pub fn subscribe(&mut self) -> FeedSubscription {
		let (sender, receiver) = mpsc::unbounded_channel();
		for record in &self.records {
			// The receiver is still in scope, sending cannot fail here.
			let _ = sender.send(record.clone());
		}
		self.subscribers.push(sender);
		debug!(
			"New feed subscriber, replayed {} records ({} subscribers)",
			self.records.len(),
			self.subscribers.len()
		);
		FeedSubscription { receiver }
	}

	/// Decode one raw entry and deliver it if it is new.
	pub fn ingest(&mut self, entry: FeedEntry) -> IngestOutcome {
		if self.keys.contains(&entry.key) {
			debug!("Ignoring replayed sighting {}", entry.key);
			self.stats.record_duplicate();
			return IngestOutcome::Duplicate;
		}

		let record = match SightingRecord::decode(&entry) {
			Ok(record) => record,
			Err(e) => {
				warn!("Skipping sighting {}: {}", entry.key, e);
				self.stats.record_malformed();
				return IngestOutcome::Malformed;
			}
		};

		self.keys.insert(record.key.clone());
		self.subscribers
			.retain(|subscriber| subscriber.send(record.clone()).is_ok());
		self.records.push(record);
		self.stats.record_decoded();

		IngestOutcome::Accepted
	}

	/// Buffered records in arrival order.
	pub fn records(&self) -> &[SightingRecord] {
		&self.records
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers.len()
	}

	pub fn stats(&self) -> &FeedStats {
		&self.stats
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn entry(key: &str, name: &str) -> FeedEntry {
		FeedEntry::new(
			key,
			json!({
				"subjectName": name,
				"latitude": 10.0,
				"longitude": 20.0,
				"reporterId": "user-1",
				"when": 1_470_000_000_000i64,
			}),
		)
	}

	fn drain(subscription: &mut FeedSubscription) -> Vec<String> {
		let mut keys = Vec::new();
		while let Some(record) = subscription.try_recv() {
			keys.push(record.key.to_string());
		}
		keys
	}

	#[test]
	fn late_subscriber_gets_replay_then_live_records() {
		let mut feed = SightingFeed::new();
		feed.ingest(entry("a", "Pidgey"));
		feed.ingest(entry("b", "Rattata"));

		let mut subscription = feed.subscribe();
		assert_eq!(drain(&mut subscription), vec!["a", "b"]);

		feed.ingest(entry("c", "Zubat"));
		assert_eq!(drain(&mut subscription), vec!["c"]);
	}

	#[test]
	fn replayed_keys_are_delivered_once() {
		let mut feed = SightingFeed::new();
		let mut subscription = feed.subscribe();

		assert_eq!(feed.ingest(entry("a", "Pidgey")), IngestOutcome::Accepted);
		assert_eq!(feed.ingest(entry("a", "Pidgey")), IngestOutcome::Duplicate);

		assert_eq!(drain(&mut subscription), vec!["a"]);
		assert_eq!(feed.len(), 1);
		assert_eq!(feed.stats().duplicates, 1);
	}

	#[test]
	fn malformed_entries_do_not_halt_the_feed() {
		let mut feed = SightingFeed::new();
		let mut subscription = feed.subscribe();

		feed.ingest(entry("a", "Pidgey"));
		assert_eq!(
			feed.ingest(FeedEntry::new("bad", json!({ "latitude": "north" }))),
			IngestOutcome::Malformed
		);
		feed.ingest(entry("c", "Zubat"));

		assert_eq!(drain(&mut subscription), vec!["a", "c"]);
		assert_eq!(feed.stats().malformed, 1);
		assert_eq!(feed.stats().decoded, 2);
	}

	#[test]
	fn arrival_order_is_kept_regardless_of_timestamps() {
		let mut feed = SightingFeed::new();
		let mut later = entry("a", "Pidgey");
		later.value["when"] = json!(2_000_000_000_000i64);
		feed.ingest(later);
		feed.ingest(entry("b", "Rattata"));

		let keys: Vec<_> = feed.records().iter().map(|r| r.key.to_string()).collect();
		assert_eq!(keys, vec!["a", "b"]);
	}

	#[tokio::test]
	async fn recv_waits_for_the_next_record() {
		let mut feed = SightingFeed::new();
		let mut subscription = feed.subscribe();
		feed.ingest(entry("a", "Pidgey"));

		let record = subscription.recv().await.expect("record should arrive");
		assert_eq!(record.key, RecordKey::new("a"));

		drop(feed);
		assert!(subscription.recv().await.is_none());
	}

	#[test]
	fn dropped_subscribers_are_pruned() {
		let mut feed = SightingFeed::new();
		let kept = feed.subscribe();
		let dropped = feed.subscribe();
		dropped.unsubscribe();

		feed.ingest(entry("a", "Pidgey"));
		assert_eq!(feed.subscriber_count(), 1);
		drop(kept);
	}
}
