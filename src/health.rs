use axum::{extract::State, http::StatusCode, response::IntoResponse};
use log::warn;

use crate::state::AppState;

/// Liveness check; answers as long as the process serves requests.
pub async fn health() -> &'static str {
	"ok"
}

/// DB health endpoint: returns 200 OK when the configured store can run a
/// simple query, otherwise returns 503 Service Unavailable.
pub async fn db_health(State(state): State<AppState>) -> impl IntoResponse {
	match state.store.ping().await {
		Ok(()) => (StatusCode::OK, "OK").into_response(),
		Err(e) => {
			warn!("database health check failed: {}", e);
			(StatusCode::SERVICE_UNAVAILABLE, format!("db error: {}", e)).into_response()
		}
	}
}

/// Prometheus metrics endpoint: returns metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
	let metrics_text = state.metrics.encode();
	(
		StatusCode::OK,
		[(
			axum::http::header::CONTENT_TYPE,
			"text/plain; version=0.0.4",
		)],
		metrics_text,
	)
		.into_response()
}
