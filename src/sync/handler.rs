use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use log::warn;
use serde_json::json;

use super::auth::Caller;
use super::coordinator::BatchCoordinator;
use super::error::SyncError;
use super::job::{Job, SyncRequest};
use crate::state::AppState;

impl IntoResponse for SyncError {
	fn into_response(self) -> Response {
		(
			StatusCode::BAD_REQUEST,
			Json(json!({ "status": "error", "message": self.to_string() })),
		)
			.into_response()
	}
}

/// `POST /sync`: replay a client's offline queue in one transaction.
///
/// Authentication is checked by the `Caller` extractor before the body is
/// looked at. Per-job failures still answer 200; only a malformed request or
/// a systemic failure answers 400.
pub async fn sync_handler(
	State(state): State<AppState>,
	caller: Caller,
	body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, SyncError> {
	state.metrics.sync_requests_total.inc();

	let Json(request) = body.map_err(|e| {
		warn!("malformed sync request from user {}: {}", caller.user_id, e);
		SyncError::MalformedRequest(e.body_text())
	})?;
	if request.jobs.len() > state.max_batch_jobs {
		return Err(SyncError::BatchTooLarge {
			len: request.jobs.len(),
			max: state.max_batch_jobs,
		});
	}

	let jobs: Vec<Job> = request.jobs.into_iter().map(Job::from).collect();
	let coordinator = BatchCoordinator::new(state.store.clone(), state.clock.clone());

	let started = Instant::now();
	let applied = coordinator.apply(jobs, &caller).await;
	state
		.metrics
		.sync_batch_duration_seconds
		.observe(started.elapsed().as_secs_f64());

	match applied {
		Ok(results) => {
			state.metrics.record_results(&results);
			Ok(Json(json!({ "status": "ok", "results": results })))
		}
		Err(e) => {
			state.metrics.sync_batch_failures_total.inc();
			Err(e)
		}
	}
}
