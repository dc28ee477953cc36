pub mod clock;
pub mod config;
pub mod health;
pub mod observability;
pub mod records;
pub mod state;
pub mod store;
pub mod sync;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use axum::{
	Router,
	routing::{get, post},
};
use log::{info, warn};
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::clock::SystemClock;
use crate::config::Settings;
use crate::state::AppState;
use crate::store::{MemoryStore, PgStore, RecordStore};
use crate::sync::TokenAuthority;

/// Build the HTTP surface over an already-assembled state.
pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/sync", post(sync::sync_handler))
		.route("/api/sync/", post(sync::sync_handler))
		.route("/api/animals", get(records::list_animals))
		.route("/api/animals/stats", get(records::herd_stats))
		.route("/api/animals/search", get(records::search_animal))
		.route("/api/animals/{id}", get(records::get_animal))
		.route("/api/animals/{id}/events", get(records::animal_events))
		.route("/health", get(health::health))
		.route("/health/db", get(health::db_health))
		.route("/metrics", get(health::metrics_handler))
		.with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
	let allowed: Vec<HeaderValue> = origins
		.iter()
		.filter_map(|o| match HeaderValue::from_str(o) {
			Ok(v) => Some(v),
			Err(_) => {
				warn!("ignoring invalid CORS origin '{}'", o);
				None
			}
		})
		.collect();
	CorsLayer::new()
		.allow_origin(AllowOrigin::list(allowed))
		.allow_methods([Method::GET, Method::POST, Method::OPTIONS])
		.allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Open the configured store. A Postgres store gets its schema applied.
pub async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn RecordStore>> {
	if settings.uses_memory_store() {
		warn!("using the in-memory store; records are lost on exit");
		return Ok(Arc::new(MemoryStore::new()));
	}
	let store = PgStore::connect(settings.database_url.as_str(), settings.db_max_connections)
		.await
		.context("failed to connect to the database")?;
	store
		.migrate()
		.await
		.context("failed to apply the herd schema")?;
	Ok(Arc::new(store))
}

pub async fn build_state(settings: &Settings) -> anyhow::Result<AppState> {
	Ok(AppState {
		store: open_store(settings).await?,
		auth: Arc::new(TokenAuthority::from_settings(settings)),
		metrics: observability::init_metrics()?,
		clock: Arc::new(SystemClock),
		max_batch_jobs: settings.max_batch_jobs,
	})
}

/// Serve the API until the process is stopped.
pub async fn run(settings: Settings) -> anyhow::Result<()> {
	let state = build_state(&settings).await?;
	let app = router(state).layer(cors_layer(&settings.cors_origins));

	let addr = format!("{}:{}", settings.host, settings.port);
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.with_context(|| format!("failed to bind {}", addr))?;
	info!("herd API listening on http://{}", addr);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("server error")?;
	info!("herd API stopped");
	Ok(())
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		warn!("failed to listen for shutdown signal: {}", e);
		std::future::pending::<()>().await;
	}
}
