use std::sync::Arc;

use crate::clock::Clock;
use crate::observability::MetricsRegistry;
use crate::store::RecordStore;
use crate::sync::TokenAuthority;

/// Application state passed to handlers via Axum's `State` extractor.
///
/// Every collaborator is behind an `Arc` so the state is cheap to clone per
/// request; the store and clock are trait objects so tests can swap in the
/// in-memory store and a fixed date.
#[derive(Clone)]
pub struct AppState {
	pub store: Arc<dyn RecordStore>,
	pub auth: Arc<TokenAuthority>,
	pub metrics: Arc<MetricsRegistry>,
	pub clock: Arc<dyn Clock>,
	pub max_batch_jobs: usize,
}
