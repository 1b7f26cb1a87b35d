use sighting_sync::config::Config;
use sighting_sync::map::{AddonSwitch, FixedGeo, HeadlessMap, LatLng};
use sighting_sync::store::MemoryRecordStore;
use sighting_sync::submission::{StaticSession, SubjectCatalog, Submitter};
use sighting_sync::sync::{Collaborators, SightingMapController, ViewEvent};

use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_SUBJECTS: [&str; 6] = [
	"Bulbasaur",
	"Charmander",
	"Squirtle",
	"Pikachu",
	"Pidgey",
	"Rattata",
];

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	info!("Starting sighting map");

	let mut args = std::env::args().skip(1);
	let config = match args.next() {
		Some(path) => match Config::load(&path).await {
			Ok(config) => config,
			Err(e) => {
				error!("Failed to load config {}: {}", path, e);
				return;
			}
		},
		None => Config::default(),
	};
	let catalog = load_catalog(args.next()).await;

	let store = MemoryRecordStore::new();
	let map = HeadlessMap::new().with_address("Sydney Opera House", LatLng::new(-33.8568, 151.2153));
	let session = StaticSession(Some(Submitter::new("demo-user")));

	// Something to render before the first submission
	store.push_raw(
		&config.feed_path,
		"-seed-1",
		serde_json::json!({
			"subjectName": "Pikachu",
			"latitude": -34.397,
			"longitude": 150.644,
			"reporterId": "seed",
			"when": chrono::Utc::now().timestamp_millis(),
		}),
	);

	let (mut controller, mut notices) = SightingMapController::new(
		config,
		Collaborators {
			store: Arc::new(store.clone()),
			map: Box::new(map.clone()),
			addons: Arc::new(AddonSwitch::new(true, true)),
			geo: Arc::new(FixedGeo::at(LatLng::new(-34.4, 150.65))),
			geocoder: Arc::new(map.clone()),
			session: Arc::new(session),
		},
		catalog,
	);

	let (events, receiver) = tokio::sync::mpsc::unbounded_channel();
	let script = [
		ViewEvent::OpenPopup,
		ViewEvent::SetSubjectName("Pidgey".to_string()),
		ViewEvent::MoveDraft(LatLng::new(-34.41, 150.66)),
		ViewEvent::Submit,
		ViewEvent::SearchAddress("Sydney Opera House".to_string()),
		ViewEvent::Shutdown,
	];
	for event in script {
		if events.send(event).is_err() {
			warn!("Controller stopped before the demo script finished");
			break;
		}
	}

	let stats = controller.run(receiver).await;

	while let Ok(notice) = notices.try_recv() {
		match notice.user_message() {
			Some(message) => info!("{:?}: {}", notice, message),
			None => info!("{:?}", notice),
		}
	}

	info!(
		"Rendered {} markers, {} provider calls",
		controller.markers().marker_count(),
		map.calls().len()
	);
	info!("Final sync stats: {}", stats.summary());
}

/// Catalog from a URL, a local file, or the built-in starter list.
async fn load_catalog(source: Option<String>) -> SubjectCatalog {
	let result = match source.as_deref() {
		Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
			SubjectCatalog::fetch(&reqwest::Client::new(), url).await
		}
		Some(path) => SubjectCatalog::load(path).await,
		None => return SubjectCatalog::new(DEFAULT_SUBJECTS),
	};

	result.unwrap_or_else(|e| {
		warn!("Failed to load subject catalog, using built-in list: {}", e);
		SubjectCatalog::new(DEFAULT_SUBJECTS)
	})
}
