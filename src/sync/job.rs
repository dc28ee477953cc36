use std::str::FromStr;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::error::{ErrorKind, FieldError, JobError};
use crate::store::Gender;

/// Request body of `POST /sync`.
///
/// Jobs stay raw JSON until each is decoded on its own, so one malformed job
/// cannot sink the rest of the batch.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncRequest {
	#[serde(default)]
	pub jobs: Vec<Value>,
}

/// The closed set of mutations a batch may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
	CreateAnimal,
	UpdateAnimal,
	DeleteAnimal,
	CreateEvent,
}

impl FromStr for Action {
	type Err = JobError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		// The `*Cow` spellings are what older clients queue.
		match s {
			"createAnimal" | "createCow" => Ok(Action::CreateAnimal),
			"updateAnimal" | "updateCow" => Ok(Action::UpdateAnimal),
			"deleteAnimal" | "deleteCow" => Ok(Action::DeleteAnimal),
			"createEvent" => Ok(Action::CreateEvent),
			other => Err(JobError::UnknownAction(other.to_string())),
		}
	}
}

/// Animal fields a job may carry. Every field is optional here; whether it
/// is required depends on the action and is checked by the validator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnimalPayload {
	pub tag_id: Option<String>,
	pub name: Option<String>,
	pub breed: Option<String>,
	pub birth_date: Option<NaiveDate>,
	pub gender: Option<Gender>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPayload {
	/// Owning animal; may be a temporary id from earlier in the batch.
	pub cow: Option<i64>,
	pub event_type: Option<String>,
	pub date: Option<NaiveDate>,
	pub notes: Option<String>,
}

/// A job's typed intent. Client-supplied `id`, `photo` and `user` payload
/// fields have no counterpart here and are dropped during decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
	CreateAnimal {
		temp_id: Option<i64>,
		fields: AnimalPayload,
	},
	UpdateAnimal {
		entity_id: i64,
		fields: AnimalPayload,
	},
	DeleteAnimal {
		entity_id: i64,
	},
	CreateEvent {
		temp_id: Option<i64>,
		fields: EventPayload,
	},
}

/// A queued client mutation after boundary decoding. The echo fields keep
/// whatever the client sent, so even an undecodable job is answered in
/// position with its own identifiers.
#[derive(Debug, Clone)]
pub struct Job {
	/// Client queue id; opaque, echoed back as `queueId`.
	pub queue_id: Value,
	pub action: Value,
	pub temp_id: Value,
	pub entity_id: Value,
	pub operation: Result<Operation, JobError>,
}

impl From<Value> for Job {
	fn from(raw: Value) -> Self {
		let Value::Object(mut fields) = raw else {
			return Job {
				queue_id: Value::Null,
				action: Value::Null,
				temp_id: Value::Null,
				entity_id: Value::Null,
				operation: Err(JobError::invalid("job", "expected a JSON object")),
			};
		};
		let mut take = |key: &str| fields.remove(key).unwrap_or_default();
		let (queue_id, action, temp_id, entity_id, payload) = (
			take("id"),
			take("action"),
			take("tempId"),
			take("entityId"),
			take("payload"),
		);
		let operation = decode_operation(&action, &temp_id, &entity_id, &payload);
		Job {
			queue_id,
			action,
			temp_id,
			entity_id,
			operation,
		}
	}
}

fn decode_operation(
	action: &Value,
	temp_id: &Value,
	entity_id: &Value,
	payload: &Value,
) -> Result<Operation, JobError> {
	let action: Action = match action {
		Value::String(name) => name.parse()?,
		other => return Err(JobError::UnknownAction(other.to_string())),
	};
	let empty = Map::new();
	let payload = match payload {
		Value::Null => &empty,
		Value::Object(map) => map,
		_ => return Err(JobError::invalid("payload", "expected a JSON object")),
	};

	match action {
		Action::CreateAnimal => Ok(Operation::CreateAnimal {
			temp_id: optional_id(temp_id, "tempId")?,
			fields: animal_payload(payload)?,
		}),
		Action::UpdateAnimal => Ok(Operation::UpdateAnimal {
			entity_id: required_id(entity_id, "entityId")?,
			fields: animal_payload(payload)?,
		}),
		Action::DeleteAnimal => Ok(Operation::DeleteAnimal {
			entity_id: required_id(entity_id, "entityId")?,
		}),
		Action::CreateEvent => Ok(Operation::CreateEvent {
			temp_id: optional_id(temp_id, "tempId")?,
			fields: event_payload(payload)?,
		}),
	}
}

fn optional_id(value: &Value, name: &'static str) -> Result<Option<i64>, JobError> {
	parse_id(value).map_err(|message| JobError::invalid(name, message))
}

fn required_id(value: &Value, name: &'static str) -> Result<i64, JobError> {
	optional_id(value, name)?.ok_or_else(|| JobError::invalid(name, "this field is required"))
}

/// An identifier may arrive as an integer or, from form posts, as a numeric
/// string.
fn parse_id(value: &Value) -> Result<Option<i64>, String> {
	match value {
		Value::Null => Ok(None),
		Value::Number(n) => n
			.as_i64()
			.map(Some)
			.ok_or_else(|| format!("{} is not a valid identifier", n)),
		Value::String(s) => s
			.trim()
			.parse::<i64>()
			.map(Some)
			.map_err(|_| format!("'{}' is not a valid identifier", s)),
		other => Err(format!("{} is not a valid identifier", other)),
	}
}

fn animal_payload(payload: &Map<String, Value>) -> Result<AnimalPayload, JobError> {
	let mut errors = Vec::new();
	let fields = AnimalPayload {
		tag_id: field(payload, "tag_id", &mut errors),
		name: field(payload, "name", &mut errors),
		breed: field(payload, "breed", &mut errors),
		birth_date: field(payload, "birth_date", &mut errors),
		gender: field(payload, "gender", &mut errors),
	};
	if errors.is_empty() {
		Ok(fields)
	} else {
		Err(JobError::InvalidPayload(errors))
	}
}

fn event_payload(payload: &Map<String, Value>) -> Result<EventPayload, JobError> {
	let mut errors = Vec::new();
	let fields = EventPayload {
		cow: id_field(payload, "cow", &mut errors),
		event_type: field(payload, "event_type", &mut errors),
		date: field(payload, "date", &mut errors),
		notes: field(payload, "notes", &mut errors),
	};
	if errors.is_empty() {
		Ok(fields)
	} else {
		Err(JobError::InvalidPayload(errors))
	}
}

/// Decode one optional field, recording a named error if it has the wrong shape.
fn field<T: DeserializeOwned>(
	payload: &Map<String, Value>,
	name: &'static str,
	errors: &mut Vec<FieldError>,
) -> Option<T> {
	match payload.get(name) {
		None | Some(Value::Null) => None,
		Some(v) => match serde_json::from_value(v.clone()) {
			Ok(parsed) => Some(parsed),
			Err(e) => {
				errors.push(FieldError::new(name, e.to_string()));
				None
			}
		},
	}
}

fn id_field(
	payload: &Map<String, Value>,
	name: &'static str,
	errors: &mut Vec<FieldError>,
) -> Option<i64> {
	let value = payload.get(name)?;
	match parse_id(value) {
		Ok(id) => id,
		Err(message) => {
			errors.push(FieldError::new(name, message));
			None
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
	Ok,
	Error,
	Merged,
}

/// Per-job answer; `results[i]` answers `jobs[i]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
	pub queue_id: Value,
	pub temp_id: Value,
	pub entity_id: Value,
	pub action: Value,
	pub status: JobStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub real_id: Option<i64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error_kind: Option<ErrorKind>,
}

impl JobResult {
	fn echo(job: &Job, status: JobStatus) -> Self {
		Self {
			queue_id: job.queue_id.clone(),
			temp_id: job.temp_id.clone(),
			entity_id: job.entity_id.clone(),
			action: job.action.clone(),
			status,
			real_id: None,
			error: None,
			error_kind: None,
		}
	}

	pub fn applied(job: &Job, real_id: i64) -> Self {
		Self {
			real_id: Some(real_id),
			..Self::echo(job, JobStatus::Ok)
		}
	}

	pub fn merged(job: &Job, unresolved_id: i64) -> Self {
		Self {
			real_id: Some(unresolved_id),
			..Self::echo(job, JobStatus::Merged)
		}
	}

	pub fn failed(job: &Job, err: &JobError) -> Self {
		Self {
			error: Some(err.to_string()),
			error_kind: Some(err.kind()),
			..Self::echo(job, JobStatus::Error)
		}
	}
}
