use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{EntityKind, StoreError};

/// Machine-readable category of a failed job, echoed as `errorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	Validation,
	NotFound,
	Conflict,
	UnknownAction,
	InvalidPayload,
}

/// One offending field and what is wrong with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
	pub field: &'static str,
	pub message: String,
}

impl FieldError {
	pub fn new(field: &'static str, message: impl Into<String>) -> Self {
		Self {
			field,
			message: message.into(),
		}
	}
}

impl fmt::Display for FieldError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.field, self.message)
	}
}

fn join_fields(fields: &[FieldError]) -> String {
	fields
		.iter()
		.map(ToString::to_string)
		.collect::<Vec<_>>()
		.join("; ")
}

/// A failure confined to a single job. The batch carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
	#[error("unknown action: {0}")]
	UnknownAction(String),
	#[error("invalid payload: {}", join_fields(.0))]
	InvalidPayload(Vec<FieldError>),
	#[error("validation failed: {}", join_fields(.0))]
	Validation(Vec<FieldError>),
	#[error("{entity} with id {id} does not exist")]
	NotFound { entity: EntityKind, id: i64 },
	#[error("{0}")]
	Conflict(String),
}

impl JobError {
	pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
		JobError::InvalidPayload(vec![FieldError::new(field, message)])
	}

	pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
		JobError::Validation(vec![FieldError::new(field, message)])
	}

	pub fn kind(&self) -> ErrorKind {
		match self {
			JobError::UnknownAction(_) => ErrorKind::UnknownAction,
			JobError::InvalidPayload(_) => ErrorKind::InvalidPayload,
			JobError::Validation(_) => ErrorKind::Validation,
			JobError::NotFound { .. } => ErrorKind::NotFound,
			JobError::Conflict(_) => ErrorKind::Conflict,
		}
	}

	/// Names of the offending fields, if the error is field-scoped.
	pub fn fields(&self) -> Vec<&'static str> {
		match self {
			JobError::InvalidPayload(f) | JobError::Validation(f) => {
				f.iter().map(|e| e.field).collect()
			}
			_ => Vec::new(),
		}
	}
}

/// Why a job did not apply: either its own fault, or the store's.
#[derive(Debug)]
pub enum JobFailure {
	Rejected(JobError),
	Systemic(StoreError),
}

impl From<JobError> for JobFailure {
	fn from(e: JobError) -> Self {
		JobFailure::Rejected(e)
	}
}

impl From<StoreError> for JobFailure {
	fn from(e: StoreError) -> Self {
		match e {
			StoreError::NotFound { entity, id } => {
				JobFailure::Rejected(JobError::NotFound { entity, id })
			}
			StoreError::Conflict(msg) => JobFailure::Rejected(JobError::Conflict(msg)),
			StoreError::InvalidValue(msg) => {
				JobFailure::Rejected(JobError::validation("payload", msg))
			}
			backend @ StoreError::Backend(_) => JobFailure::Systemic(backend),
		}
	}
}

/// A failure of the batch as a whole; nothing from the batch is persisted.
#[derive(Debug, Error)]
pub enum SyncError {
	#[error("sync transaction failed: {0}")]
	Transaction(#[from] StoreError),
	#[error("batch of {len} jobs exceeds the limit of {max}")]
	BatchTooLarge { len: usize, max: usize },
	#[error("malformed sync request: {0}")]
	MalformedRequest(String),
}
