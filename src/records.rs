//! Read-only record endpoints the client uses to refresh its local copy
//! after a sync.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::NaiveDate;
use log::error;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::clock::age_in_years;
use crate::store::{Animal, Event, HerdStats, StoreError};
use crate::state::AppState;
use crate::sync::Caller;

/// An animal as served to clients, with its age relative to today.
#[derive(Debug, Serialize)]
pub struct AnimalView {
	#[serde(flatten)]
	pub animal: Animal,
	pub age: i32,
}

impl AnimalView {
	pub fn new(animal: Animal, today: NaiveDate) -> Self {
		let age = age_in_years(animal.birth_date, today);
		Self { animal, age }
	}
}

pub enum RecordError {
	Store(StoreError),
	MissingTag,
	UnknownTag(String),
}

impl From<StoreError> for RecordError {
	fn from(e: StoreError) -> Self {
		RecordError::Store(e)
	}
}

impl IntoResponse for RecordError {
	fn into_response(self) -> Response {
		match self {
			RecordError::Store(StoreError::NotFound { .. }) => (
				StatusCode::NOT_FOUND,
				Json(json!({ "detail": "Not found." })),
			)
				.into_response(),
			RecordError::MissingTag => (
				StatusCode::BAD_REQUEST,
				Json(json!({ "error": "the tag_id query parameter is required" })),
			)
				.into_response(),
			RecordError::UnknownTag(tag) => (
				StatusCode::NOT_FOUND,
				Json(json!({ "error": format!("no animal with tag_id '{}'", tag) })),
			)
				.into_response(),
			RecordError::Store(e) => {
				error!("record lookup failed: {}", e);
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					Json(json!({ "detail": e.to_string() })),
				)
					.into_response()
			}
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct TagQuery {
	tag_id: Option<String>,
}

pub async fn list_animals(
	State(state): State<AppState>,
	_caller: Caller,
) -> Result<Json<Vec<AnimalView>>, RecordError> {
	let today = state.clock.today();
	let animals = state.store.list_animals().await?;
	Ok(Json(
		animals
			.into_iter()
			.map(|a| AnimalView::new(a, today))
			.collect(),
	))
}

pub async fn get_animal(
	State(state): State<AppState>,
	_caller: Caller,
	Path(id): Path<i64>,
) -> Result<Json<AnimalView>, RecordError> {
	let animal = state.store.get_animal(id).await?;
	Ok(Json(AnimalView::new(animal, state.clock.today())))
}

/// Events of one animal, latest first. 404 when the animal itself is missing.
pub async fn animal_events(
	State(state): State<AppState>,
	_caller: Caller,
	Path(id): Path<i64>,
) -> Result<Json<Vec<Event>>, RecordError> {
	state.store.get_animal(id).await?;
	Ok(Json(state.store.events_for_animal(id).await?))
}

/// Exact tag lookup.
pub async fn search_animal(
	State(state): State<AppState>,
	_caller: Caller,
	Query(query): Query<TagQuery>,
) -> Result<Json<AnimalView>, RecordError> {
	let tag = query
		.tag_id
		.filter(|t| !t.trim().is_empty())
		.ok_or(RecordError::MissingTag)?;
	match state.store.animal_by_tag(&tag).await? {
		Some(animal) => Ok(Json(AnimalView::new(animal, state.clock.today()))),
		None => Err(RecordError::UnknownTag(tag)),
	}
}

pub async fn herd_stats(
	State(state): State<AppState>,
	_caller: Caller,
) -> Result<Json<HerdStats>, RecordError> {
	Ok(Json(state.store.herd_stats(state.clock.today()).await?))
}
