//! Sighting map controller and integration point for all sync components.
//!
//! The controller owns the feed, the marker synchronizer and the submission form, and runs
//! the single event loop they share. The loop is responsible for:
//! - Pumping the store's append feed into the [`SightingFeed`]
//! - Delivering feed records to the [`MarkerSynchronizer`] and firing its cluster retries
//! - Handling view events and reporting outcomes as notices
//! - Racing geolocation, geocoding and store writes without blocking the feed
//!
//! Nothing here is fatal: failures are logged and reported, and the loop keeps going until
//! the view shuts it down.

use crate::config::Config;
use crate::map::{
    AddonAvailability, GeoProvider, GeocodeError, Geocoder, LatLng, MapProvider,
    PositionUnavailable,
};
use crate::store::{FeedEntry, FeedStream, RecordKey, RecordStore, StoreError};
use crate::submission::{
    DragMap, PopupTicket, SessionProvider, SightingSubmission, SubjectCatalog, SubmissionError,
};
use crate::sync::events::{ViewEvent, ViewNotice};
use crate::sync::feed::{FeedSubscription, IngestOutcome, SightingFeed};
use crate::sync::markers::MarkerSynchronizer;
use crate::sync::stats::{ProgressLogger, SyncStats};

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// External collaborators the controller is wired to
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub map: Box<dyn MapProvider>,
    pub addons: Arc<dyn AddonAvailability>,
    pub geo: Arc<dyn GeoProvider>,
    pub geocoder: Arc<dyn Geocoder>,
    pub session: Arc<dyn SessionProvider>,
}

/// Results of work started by the loop and finished later
enum Deferred {
    StartupPosition(Result<LatLng, PositionUnavailable>),
    FindMe(Result<LatLng, PositionUnavailable>),
    PopupLocation(PopupTicket, Result<LatLng, PositionUnavailable>),
    AddressLookup(String, Result<LatLng, GeocodeError>),
    WriteAcked(PopupTicket, Result<RecordKey, StoreError>),
}

pub struct SightingMapController {
    config: Config,

    store: Arc<dyn RecordStore>,
    geo: Arc<dyn GeoProvider>,
    geocoder: Arc<dyn Geocoder>,
    session: Arc<dyn SessionProvider>,

    feed: SightingFeed,
    markers: MarkerSynchronizer,
    submission: SightingSubmission,
    drag_map: Option<DragMap>,

    deferred: FuturesUnordered<BoxFuture<'static, Deferred>>,
    retry_at: Option<Instant>,
    notices: mpsc::UnboundedSender<ViewNotice>,
    progress: ProgressLogger,
}

impl SightingMapController {
    /// Wire the controller; notices for the view arrive on the returned receiver.
    pub fn new(
        config: Config,
        collaborators: Collaborators,
        catalog: SubjectCatalog,
    ) -> (Self, mpsc::UnboundedReceiver<ViewNotice>) {
        let (notices, notice_receiver) = mpsc::unbounded_channel();
        let markers = MarkerSynchronizer::new(
            collaborators.map,
            collaborators.addons,
            config.map.clone(),
            &config.cluster,
        );
        let submission = SightingSubmission::new(catalog, config.feed_path.clone());

        let controller = Self {
            config,
            store: collaborators.store,
            geo: collaborators.geo,
            geocoder: collaborators.geocoder,
            session: collaborators.session,
            feed: SightingFeed::new(),
            markers,
            submission,
            drag_map: None,
            deferred: FuturesUnordered::new(),
            retry_at: None,
            notices,
            progress: ProgressLogger::default(),
        };
        (controller, notice_receiver)
    }

    /// Run the event loop until [`ViewEvent::Shutdown`] or until the event sender is dropped.
    ///
    /// Work still in flight at shutdown (geolocation, writes, cluster retries) is dropped.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<ViewEvent>) -> SyncStats {
        info!("Starting sighting map controller");

        let mut feed_stream = self.open_feed().await;
        let mut subscription = self.feed.subscribe();
        self.start_map();

        loop {
            let retry_at = self.retry_at;
            let retry = async move {
                match retry_at {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                entry = next_entry(&mut feed_stream), if feed_stream.is_some() => match entry {
                    Some(entry) => {
                        let mut accepted = self.ingest(entry);
                        accepted |= self.ingest_ready(&mut feed_stream);
                        if accepted {
                            self.deliver(&mut subscription);
                        }
                    }
                    None => {
                        info!("Sighting feed closed");
                        feed_stream = None;
                    }
                },
                Some(done) = self.deferred.next(), if !self.deferred.is_empty() => {
                    self.on_deferred(done);
                }
                _ = retry, if retry_at.is_some() => {
                    self.retry_at = None;
                    let delay = self.markers.retry_clusters();
                    self.schedule_retry(delay);
                }
                event = events.recv() => match event {
                    Some(ViewEvent::Shutdown) | None => {
                        info!("Shutting down sighting map controller");
                        break;
                    }
                    Some(event) => self.on_event(event),
                },
            }
        }

        let stats = self.stats();
        self.progress.log_progress(&stats, true);
        stats
    }

    async fn open_feed(&mut self) -> Option<FeedStream> {
        match self.store.read_append_feed(&self.config.feed_path).await {
            Ok(stream) => Some(stream),
            Err(e) => {
                error!(
                    "Failed to open sighting feed {}: {}",
                    self.config.feed_path, e
                );
                self.notify(ViewNotice::FeedUnavailable);
                None
            }
        }
    }

    /// Construct the main map and ask for the device position to centre it.
    fn start_map(&mut self) {
        match self.markers.init_map() {
            Ok(delay) => self.schedule_retry(delay),
            Err(e) => error!("Failed to construct main map: {}", e),
        }

        let geo = self.geo.clone();
        self.deferred.push(Box::pin(async move {
            Deferred::StartupPosition(geo.current_position().await)
        }));
    }

    /// Ingest one entry from the store. Returns whether a new record was buffered.
    fn ingest(&mut self, entry: Result<FeedEntry, StoreError>) -> bool {
        match entry {
            Ok(entry) => self.feed.ingest(entry) == IngestOutcome::Accepted,
            Err(e) => {
                error!("Error in sighting feed: {}", e);
                false
            }
        }
    }

    /// Ingest every entry the store has already delivered without waiting for more.
    fn ingest_ready(&mut self, stream: &mut Option<FeedStream>) -> bool {
        let mut accepted = false;
        while let Some(ready) = stream.as_mut() {
            match ready.next().now_or_never() {
                Some(Some(entry)) => accepted |= self.ingest(entry),
                Some(None) => {
                    info!("Sighting feed closed");
                    *stream = None;
                }
                None => break,
            }
        }
        accepted
    }

    /// Hand every queued record to the synchronizer as one batch.
    fn deliver(&mut self, subscription: &mut FeedSubscription) {
        let mut batch = Vec::new();
        while let Some(record) = subscription.try_recv() {
            batch.push(record);
        }
        debug!("Delivering {} sightings", batch.len());
        let delay = self.markers.add_records(batch);
        self.schedule_retry(delay);
        let stats = self.stats();
        self.progress.log_progress(&stats, false);
    }

    fn schedule_retry(&mut self, delay: Option<Duration>) {
        if let Some(delay) = delay {
            self.retry_at = Some(Instant::now() + delay);
        }
    }

    fn on_event(&mut self, event: ViewEvent) {
        debug!("View event: {:?}", event);
        match event {
            ViewEvent::MarkerClicked(key) => {
                if let Err(e) = self.markers.open_info_window(&key) {
                    warn!("Cannot open info window for {}: {}", key, e);
                }
            }
            ViewEvent::OpenPopup => {
                let ticket = self.submission.open_popup();
                self.drag_map = None;
                let geo = self.geo.clone();
                self.deferred.push(Box::pin(async move {
                    Deferred::PopupLocation(ticket, geo.current_position().await)
                }));
                self.notify(ViewNotice::PopupOpened);
            }
            ViewEvent::ClosePopup => {
                self.submission.close_popup();
                self.drag_map = None;
                self.notify(ViewNotice::PopupClosed);
            }
            ViewEvent::SetSubjectName(name) => self.submission.set_subject_name(name),
            ViewEvent::MoveDraft(position) => {
                if self.submission.is_open() {
                    self.submission.set_coordinates(position);
                }
            }
            ViewEvent::Submit => self.submit(),
            ViewEvent::FindMe => {
                let geo = self.geo.clone();
                self.deferred.push(Box::pin(async move {
                    Deferred::FindMe(geo.current_position().await)
                }));
            }
            ViewEvent::SearchAddress(address) => {
                let geocoder = self.geocoder.clone();
                self.deferred.push(Box::pin(async move {
                    let result = geocoder.geocode(&address).await;
                    Deferred::AddressLookup(address, result)
                }));
            }
            ViewEvent::Shutdown => {}
        }
    }

    fn submit(&mut self) {
        let ticket = self.submission.ticket();
        let submitter = self.session.current_submitter();
        let prepared = self
            .submission
            .prepare(submitter.as_ref(), self.store.server_timestamp())
            .and_then(|write| write.to_value().map_err(SubmissionError::from));

        let value = match prepared {
            Ok(value) => value,
            Err(e) => {
                self.report_submission_error(e);
                return;
            }
        };

        let store = self.store.clone();
        let path = self.config.feed_path.clone();
        self.deferred.push(Box::pin(async move {
            Deferred::WriteAcked(ticket, store.write(&path, value).await)
        }));
    }

    fn report_submission_error(&mut self, error: SubmissionError) {
        let notice = match error {
            SubmissionError::Validation(e) => {
                info!("Sighting rejected: {}", e);
                ViewNotice::SubmissionRejected(e.to_string())
            }
            SubmissionError::Auth => ViewNotice::LoginRequired,
            SubmissionError::Store(e) => {
                error!("Failed to store sighting: {}", e);
                ViewNotice::SubmissionFailed
            }
        };
        self.notify(notice);
    }

    fn on_deferred(&mut self, done: Deferred) {
        match done {
            Deferred::StartupPosition(Ok(position)) | Deferred::FindMe(Ok(position)) => {
                if let Err(e) = self.markers.recenter(position, None) {
                    warn!("Cannot centre main map: {}", e);
                }
            }
            Deferred::StartupPosition(Err(e)) | Deferred::FindMe(Err(e)) => {
                info!("Device location unavailable: {}", e);
                self.notify(ViewNotice::LocationUnavailable);
            }
            Deferred::PopupLocation(ticket, result) => self.on_popup_location(ticket, result),
            Deferred::AddressLookup(address, Ok(position)) => {
                let zoom = Some(self.config.map.search_zoom);
                if let Err(e) = self.markers.recenter(position, zoom) {
                    warn!("Cannot centre main map on {}: {}", address, e);
                }
            }
            Deferred::AddressLookup(address, Err(e)) => {
                info!("Address lookup failed: {}", e);
                self.notify(ViewNotice::AddressNotFound(address));
            }
            Deferred::WriteAcked(ticket, result) => match self.submission.finish(ticket, result) {
                Ok(key) => {
                    if !self.submission.is_open() {
                        self.drag_map = None;
                    }
                    self.notify(ViewNotice::Submitted(key));
                }
                Err(e) => self.report_submission_error(e),
            },
        }
    }

    fn on_popup_location(
        &mut self,
        ticket: PopupTicket,
        result: Result<LatLng, PositionUnavailable>,
    ) {
        if !self.submission.is_current(ticket) {
            debug!("Popup closed before the device location resolved");
            return;
        }

        let center = match self.submission.apply_location(ticket, result) {
            Some(position) => position,
            None => {
                self.notify(ViewNotice::LocationUnavailable);
                self.config.map.default_center
            }
        };

        let icon = self.markers.icon();
        match DragMap::open(self.markers.provider_mut(), &self.config.map, center, icon) {
            Ok(drag_map) => self.drag_map = Some(drag_map),
            Err(e) => warn!("Failed to open drag map: {}", e),
        }
    }

    fn notify(&self, notice: ViewNotice) {
        if self.notices.send(notice).is_err() {
            debug!("View stopped listening for notices");
        }
    }

    pub fn stats(&self) -> SyncStats {
        SyncStats {
            feed: self.feed.stats().clone(),
            markers: self.markers.stats().clone(),
        }
    }

    pub fn feed(&self) -> &SightingFeed {
        &self.feed
    }

    pub fn markers(&self) -> &MarkerSynchronizer {
        &self.markers
    }

    pub fn submission(&self) -> &SightingSubmission {
        &self.submission
    }

    pub fn drag_map(&self) -> Option<DragMap> {
        self.drag_map
    }
}

async fn next_entry(stream: &mut Option<FeedStream>) -> Option<Result<FeedEntry, StoreError>> {
    match stream {
        Some(stream) => stream.next().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::{AddonSwitch, FixedGeo, HeadlessMap, MapCall};
    use crate::store::MemoryRecordStore;
    use crate::submission::{StaticSession, Submitter};
    use crate::sync::cluster::ClusterAttachmentState;
    use serde_json::json;

    struct Harness {
        store: MemoryRecordStore,
        map: HeadlessMap,
        addons: Arc<AddonSwitch>,
        controller: SightingMapController,
        notices: mpsc::UnboundedReceiver<ViewNotice>,
    }

    /// Geolocation that answers only after `delay`.
    struct DelayedGeo {
        position: LatLng,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl GeoProvider for DelayedGeo {
        async fn current_position(&self) -> Result<LatLng, PositionUnavailable> {
            tokio::time::sleep(self.delay).await;
            Ok(self.position)
        }
    }

    /// Store whose writes are acknowledged only after `delay`.
    struct SlowStore {
        inner: MemoryRecordStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl RecordStore for SlowStore {
        async fn read_append_feed(&self, path: &str) -> Result<FeedStream, StoreError> {
            self.inner.read_append_feed(path).await
        }

        async fn write(
            &self,
            path: &str,
            value: serde_json::Value,
        ) -> Result<RecordKey, StoreError> {
            tokio::time::sleep(self.delay).await;
            self.inner.write(path, value).await
        }
    }

    fn harness(geo: FixedGeo, session: Option<Submitter>) -> Harness {
        harness_with(Arc::new(geo), session, None)
    }

    fn harness_with(
        geo: Arc<dyn GeoProvider>,
        session: Option<Submitter>,
        write_delay: Option<Duration>,
    ) -> Harness {
        let store = MemoryRecordStore::new();
        let record_store: Arc<dyn RecordStore> = match write_delay {
            Some(delay) => Arc::new(SlowStore {
                inner: store.clone(),
                delay,
            }),
            None => Arc::new(store.clone()),
        };
        let map = HeadlessMap::new().with_address("Pallet Town", LatLng::new(7.0, 8.0));
        let addons = Arc::new(AddonSwitch::new(true, true));
        let (controller, notices) = SightingMapController::new(
            Config::default(),
            Collaborators {
                store: record_store,
                map: Box::new(map.clone()),
                addons: addons.clone(),
                geo,
                geocoder: Arc::new(map.clone()),
                session: Arc::new(StaticSession(session)),
            },
            SubjectCatalog::new(["Pidgey", "Rattata"]),
        );
        Harness {
            store,
            map,
            addons,
            controller,
            notices,
        }
    }

    fn spawn_controller(
        mut controller: SightingMapController,
    ) -> (
        mpsc::UnboundedSender<ViewEvent>,
        tokio::task::JoinHandle<SightingMapController>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            controller.run(receiver).await;
            controller
        });
        (sender, task)
    }

    fn sighting(name: &str, lat: f64, lng: f64) -> serde_json::Value {
        json!({
            "subjectName": name,
            "latitude": lat,
            "longitude": lng,
            "reporterId": "user-2",
            "when": 1_470_000_000_000i64,
        })
    }

    async fn run_with(
        controller: &mut SightingMapController,
        events: Vec<ViewEvent>,
    ) -> SyncStats {
        let (sender, receiver) = mpsc::unbounded_channel();
        for event in events {
            sender.send(event).expect("receiver alive");
        }
        sender.send(ViewEvent::Shutdown).expect("receiver alive");
        controller.run(receiver).await
    }

    fn drain(notices: &mut mpsc::UnboundedReceiver<ViewNotice>) -> Vec<ViewNotice> {
        let mut out = Vec::new();
        while let Ok(notice) = notices.try_recv() {
            out.push(notice);
        }
        out
    }

    #[tokio::test]
    async fn existing_records_become_markers_once() {
        let mut h = harness(FixedGeo::at(LatLng::new(1.0, 1.0)), None);
        h.store.push_raw("found", "a", sighting("Pidgey", 1.0, 1.0));
        h.store.push_raw("found", "b", sighting("Rattata", 1.0, 1.0));
        h.store.push_raw("found", "a", sighting("Pidgey", 1.0, 1.0));
        h.store.push_raw("found", "bad", json!({ "subjectName": 3 }));

        let stats = run_with(&mut h.controller, vec![]).await;

        assert_eq!(stats.feed.decoded, 2);
        assert_eq!(stats.feed.duplicates, 1);
        assert_eq!(stats.feed.malformed, 1);
        assert_eq!(h.controller.markers().marker_count(), 2);
        assert_eq!(h.map.markers().len(), 2);
        assert_eq!(
            h.controller.markers().cluster_state(),
            ClusterAttachmentState::Ready
        );
    }

    #[tokio::test]
    async fn submitted_sighting_appears_through_the_feed() {
        let mut h = harness(
            FixedGeo::at(LatLng::new(1.0, 1.0)),
            Some(Submitter::new("user-1")),
        );

        let stats = run_with(
            &mut h.controller,
            vec![
                ViewEvent::OpenPopup,
                ViewEvent::SetSubjectName("Pidgey".to_string()),
                ViewEvent::MoveDraft(LatLng::new(10.0, 20.0)),
                ViewEvent::Submit,
            ],
        )
        .await;

        let writes = h.store.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1["reporterId"], "user-1");
        assert_eq!(writes[0].1["latitude"], 10.0);

        assert_eq!(stats.feed.decoded, 1);
        assert_eq!(h.controller.markers().marker_count(), 1);
        assert_eq!(
            h.controller.markers().markers()[0].position,
            LatLng::new(10.0, 20.0)
        );
        assert!(!h.controller.submission().is_open());

        let notices = drain(&mut h.notices);
        assert!(
            notices
                .iter()
                .any(|notice| matches!(notice, ViewNotice::Submitted(_)))
        );
    }

    #[tokio::test]
    async fn denied_location_requires_dragging_before_submit() {
        let mut h = harness(FixedGeo::denied(), Some(Submitter::new("user-1")));

        run_with(
            &mut h.controller,
            vec![
                ViewEvent::OpenPopup,
                ViewEvent::SetSubjectName("Pidgey".to_string()),
                ViewEvent::Submit,
            ],
        )
        .await;

        assert!(h.store.writes().is_empty());
        assert!(h.controller.submission().is_open());
        assert_eq!(h.controller.submission().draft().latitude, None);
        // The drag map falls back to the default centre so a position can still be picked
        assert!(h.controller.drag_map().is_some());

        let notices = drain(&mut h.notices);
        assert!(notices.contains(&ViewNotice::LocationUnavailable));
        assert!(notices.iter().any(|notice| matches!(
            notice,
            ViewNotice::SubmissionRejected(_)
        )));

        run_with(
            &mut h.controller,
            vec![
                ViewEvent::MoveDraft(LatLng::new(3.0, 4.0)),
                ViewEvent::Submit,
            ],
        )
        .await;
        assert_eq!(h.store.writes().len(), 1);
    }

    #[tokio::test]
    async fn submit_without_session_asks_for_login() {
        let mut h = harness(FixedGeo::at(LatLng::new(1.0, 1.0)), None);

        run_with(
            &mut h.controller,
            vec![
                ViewEvent::OpenPopup,
                ViewEvent::SetSubjectName("Pidgey".to_string()),
                ViewEvent::Submit,
            ],
        )
        .await;

        assert!(h.store.writes().is_empty());
        assert!(drain(&mut h.notices).contains(&ViewNotice::LoginRequired));
    }

    #[tokio::test]
    async fn store_failure_is_reported_and_popup_stays_open() {
        let mut h = harness(
            FixedGeo::at(LatLng::new(1.0, 1.0)),
            Some(Submitter::new("user-1")),
        );
        h.store.set_fail_writes(true);

        run_with(
            &mut h.controller,
            vec![
                ViewEvent::OpenPopup,
                ViewEvent::SetSubjectName("Pidgey".to_string()),
                ViewEvent::Submit,
            ],
        )
        .await;

        assert!(h.controller.submission().is_open());
        assert!(drain(&mut h.notices).contains(&ViewNotice::SubmissionFailed));
    }

    #[tokio::test]
    async fn marker_click_and_address_search_drive_the_main_map() {
        let mut h = harness(FixedGeo::at(LatLng::new(1.0, 1.0)), None);
        h.store.push_raw("found", "a", sighting("Pidgey", 1.0, 1.0));

        run_with(
            &mut h.controller,
            vec![
                ViewEvent::MarkerClicked(RecordKey::new("a")),
                ViewEvent::SearchAddress("Pallet Town".to_string()),
                ViewEvent::SearchAddress("Nowhere".to_string()),
            ],
        )
        .await;

        let calls = h.map.calls();
        assert!(
            calls
                .iter()
                .any(|call| matches!(call, MapCall::OpenInfoWindow { .. }))
        );
        assert!(calls.contains(&MapCall::SetZoom {
            map: h.controller.markers().map().expect("main map"),
            zoom: 16,
        }));
        assert!(calls.contains(&MapCall::SetCenter {
            map: h.controller.markers().map().expect("main map"),
            center: LatLng::new(7.0, 8.0),
        }));
        assert!(
            drain(&mut h.notices).contains(&ViewNotice::AddressNotFound("Nowhere".to_string()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cluster_retry_timer_attaches_once_addon_loads() {
        let h = harness(FixedGeo::at(LatLng::new(1.0, 1.0)), None);
        h.addons.set_clustering(false);
        h.store.push_raw("found", "a", sighting("Pidgey", 1.0, 1.0));
        h.store.push_raw("found", "b", sighting("Rattata", 2.0, 2.0));

        let addons = h.addons.clone();
        let (sender, task) = spawn_controller(h.controller);

        // First retry fires at 500ms and still finds nothing
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(h.map.clusters().is_empty());

        // Second retry at 1000ms succeeds
        addons.set_clustering(true);
        tokio::time::sleep(Duration::from_millis(500)).await;
        sender.send(ViewEvent::Shutdown).expect("controller alive");
        let controller = task.await.expect("controller task");

        let clusters = h.map.clusters();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 2);
        assert_eq!(
            controller.markers().cluster_state(),
            ClusterAttachmentState::Ready
        );
    }

    #[tokio::test]
    async fn replay_builds_the_cluster_layer_once() {
        let mut h = harness(FixedGeo::at(LatLng::new(1.0, 1.0)), None);
        for i in 0..200 {
            h.store.push_raw(
                "found",
                format!("k{:03}", i),
                sighting("Pidgey", 1.0, f64::from(i) / 10.0),
            );
        }

        run_with(&mut h.controller, vec![]).await;

        assert_eq!(h.controller.markers().marker_count(), 200);
        // One layer when the map is constructed, one for the whole replay
        let clusters = h.map.clusters();
        assert_eq!(clusters.len(), 2);
        assert!(clusters[0].is_empty());
        assert_eq!(clusters[1].len(), 200);
        let clears = h
            .map
            .calls()
            .iter()
            .filter(|call| matches!(call, MapCall::ClearCluster { .. }))
            .count();
        assert_eq!(clears, 1);
    }

    #[tokio::test]
    async fn startup_and_find_me_centre_on_the_device() {
        let device = LatLng::new(1.5, 2.5);
        let mut h = harness(FixedGeo::at(device), None);

        run_with(&mut h.controller, vec![ViewEvent::FindMe]).await;

        let map = h.controller.markers().map().expect("main map");
        let centred = h
            .map
            .calls()
            .iter()
            .filter(|call| **call == MapCall::SetCenter { map, center: device })
            .count();
        assert_eq!(centred, 2);

        let mut denied = harness(FixedGeo::denied(), None);
        run_with(&mut denied.controller, vec![ViewEvent::FindMe]).await;
        let unavailable = drain(&mut denied.notices)
            .into_iter()
            .filter(|notice| *notice == ViewNotice::LocationUnavailable)
            .count();
        assert_eq!(unavailable, 2);
        assert!(
            !denied
                .map
                .calls()
                .iter()
                .any(|call| matches!(call, MapCall::SetCenter { .. }))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn location_arriving_after_close_opens_nothing() {
        let geo = DelayedGeo {
            position: LatLng::new(5.0, 5.0),
            delay: Duration::from_secs(1),
        };
        let h = harness_with(Arc::new(geo), None, None);
        let (events, task) = spawn_controller(h.controller);

        events.send(ViewEvent::OpenPopup).expect("controller alive");
        tokio::time::sleep(Duration::from_millis(100)).await;
        events.send(ViewEvent::ClosePopup).expect("controller alive");
        tokio::time::sleep(Duration::from_secs(2)).await;
        events.send(ViewEvent::Shutdown).expect("controller alive");
        let controller = task.await.expect("controller task");

        assert!(!controller.submission().is_open());
        assert_eq!(controller.submission().draft().latitude, None);
        assert!(controller.drag_map().is_none());

        let calls = h.map.calls();
        assert!(!calls.iter().any(|call| matches!(
            call,
            MapCall::CreateMap { surface, .. } if surface == "draggable-geolocation-map"
        )));
        // The startup request still centres the main map once it resolves
        assert!(calls.iter().any(|call| matches!(
            call,
            MapCall::SetCenter { center, .. } if *center == LatLng::new(5.0, 5.0)
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn late_write_ack_leaves_the_reopened_popup_alone() {
        let mut h = harness_with(
            Arc::new(FixedGeo::at(LatLng::new(1.0, 1.0))),
            Some(Submitter::new("user-1")),
            Some(Duration::from_secs(1)),
        );
        let (events, task) = spawn_controller(h.controller);

        for event in [
            ViewEvent::OpenPopup,
            ViewEvent::SetSubjectName("Pidgey".to_string()),
            ViewEvent::Submit,
        ] {
            events.send(event).expect("controller alive");
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        for event in [
            ViewEvent::ClosePopup,
            ViewEvent::OpenPopup,
            ViewEvent::SetSubjectName("Rattata".to_string()),
        ] {
            events.send(event).expect("controller alive");
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
        events.send(ViewEvent::Shutdown).expect("controller alive");
        let controller = task.await.expect("controller task");

        assert_eq!(h.store.writes().len(), 1);
        assert!(controller.submission().is_open());
        assert_eq!(
            controller.submission().draft().subject_name.as_deref(),
            Some("Rattata")
        );
        assert!(controller.drag_map().is_some());
        assert_eq!(controller.markers().marker_count(), 1);
        assert!(
            drain(&mut h.notices)
                .iter()
                .any(|notice| matches!(notice, ViewNotice::Submitted(_)))
        );
    }
}
