pub mod memory;
pub mod postgres;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Breed assigned when a create omits it.
pub const DEFAULT_BREED: &str = "Highland Cattle";

/// The two record kinds the store persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
	Animal,
	Event,
}

impl fmt::Display for EntityKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			EntityKind::Animal => f.write_str("animal"),
			EntityKind::Event => f.write_str("event"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Gender {
	#[serde(rename = "M")]
	Male,
	#[default]
	#[serde(rename = "F")]
	Female,
}

impl Gender {
	pub fn code(self) -> &'static str {
		match self {
			Gender::Male => "M",
			Gender::Female => "F",
		}
	}
}

impl FromStr for Gender {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"M" => Ok(Gender::Male),
			"F" => Ok(Gender::Female),
			other => Err(format!("'{}' is not a valid gender (expected M or F)", other)),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Animal {
	pub id: i64,
	pub tag_id: String,
	pub name: String,
	pub breed: String,
	pub birth_date: NaiveDate,
	pub gender: Gender,
	pub photo: Option<String>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

/// A validated animal ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnimal {
	pub tag_id: String,
	pub name: String,
	pub breed: String,
	pub birth_date: NaiveDate,
	pub gender: Gender,
}

/// A validated partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnimalPatch {
	pub tag_id: Option<String>,
	pub name: Option<String>,
	pub breed: Option<String>,
	pub birth_date: Option<NaiveDate>,
	pub gender: Option<Gender>,
}

impl AnimalPatch {
	pub fn is_empty(&self) -> bool {
		*self == AnimalPatch::default()
	}

	pub fn apply_to(&self, animal: &mut Animal) {
		if let Some(tag_id) = &self.tag_id {
			animal.tag_id = tag_id.clone();
		}
		if let Some(name) = &self.name {
			animal.name = name.clone();
		}
		if let Some(breed) = &self.breed {
			animal.breed = breed.clone();
		}
		if let Some(birth_date) = self.birth_date {
			animal.birth_date = birth_date;
		}
		if let Some(gender) = self.gender {
			animal.gender = gender;
		}
	}
}

/// A lifecycle event recorded against one animal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Event {
	pub id: i64,
	/// Owning animal's id.
	pub cow: i64,
	pub event_type: String,
	pub date: NaiveDate,
	pub notes: String,
	/// Caller that recorded the event.
	pub user_id: Option<i64>,
	pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
	pub cow: i64,
	pub event_type: String,
	pub date: NaiveDate,
	pub notes: String,
	pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenderCount {
	pub gender: Gender,
	pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreedCount {
	pub breed: String,
	pub count: i64,
}

/// Herd summary. Groups are ordered by key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HerdStats {
	pub total: i64,
	pub by_gender: Vec<GenderCount>,
	pub by_breed: Vec<BreedCount>,
	/// Mean age in whole years, rounded to one decimal; 0 for an empty herd.
	pub average_age: f64,
}

fn round_to_tenth(value: f64) -> f64 {
	(value * 10.0).round() / 10.0
}

#[derive(Debug, Error)]
pub enum StoreError {
	#[error("{entity} with id {id} does not exist")]
	NotFound { entity: EntityKind, id: i64 },
	/// A unique or foreign-key constraint rejected the write.
	#[error("{0}")]
	Conflict(String),
	/// The backend refused a value it cannot represent, such as an embedded
	/// NUL or an out-of-range date. Only the offending write is affected.
	#[error("value rejected by the database: {0}")]
	InvalidValue(String),
	/// The backend itself failed; the enclosing transaction is no longer trustworthy.
	#[error("storage backend failure: {0}")]
	Backend(String),
}

impl StoreError {
	pub fn not_found(entity: EntityKind, id: i64) -> Self {
		StoreError::NotFound { entity, id }
	}
}

impl StoreError {
	/// Classify a database error by SQLSTATE. Integrity (class 23) and data
	/// (class 22) errors are confined to one write; anything else is systemic.
	pub fn from_sqlstate(code: Option<&str>, message: &str) -> Self {
		match code {
			// unique_violation
			Some("23505") => {
				StoreError::Conflict(format!("unique constraint violated: {}", message))
			}
			// foreign_key_violation
			Some("23503") => {
				StoreError::Conflict(format!("referenced record does not exist: {}", message))
			}
			Some(code) if code.starts_with("22") => StoreError::InvalidValue(message.to_string()),
			_ => StoreError::Backend(message.to_string()),
		}
	}
}

impl From<sqlx::Error> for StoreError {
	fn from(e: sqlx::Error) -> Self {
		if let sqlx::Error::Database(db) = &e {
			return StoreError::from_sqlstate(db.code().as_deref(), db.message());
		}
		StoreError::Backend(e.to_string())
	}
}

/// Read access plus the ability to open a write transaction.
///
/// Implemented by `PgStore` and `MemoryStore`; handlers only see this trait.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
	/// Open a transaction covering every write of one sync batch.
	async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
	/// Cheap round trip to confirm the backend answers.
	async fn ping(&self) -> Result<(), StoreError>;
	/// All animals, newest first.
	async fn list_animals(&self) -> Result<Vec<Animal>, StoreError>;
	async fn get_animal(&self, id: i64) -> Result<Animal, StoreError>;
	/// Events of one animal, latest `date` first.
	async fn events_for_animal(&self, animal_id: i64) -> Result<Vec<Event>, StoreError>;
	/// The animal carrying exactly `tag_id`, if any.
	async fn animal_by_tag(&self, tag_id: &str) -> Result<Option<Animal>, StoreError>;
	/// Counts and mean age, with ages taken relative to `today`.
	async fn herd_stats(&self, today: NaiveDate) -> Result<HerdStats, StoreError>;
}

/// An open transaction. Dropping it without `commit` discards its writes.
///
/// A single savepoint level is supported: `savepoint` marks the current
/// state, and either `release_savepoint` keeps the writes since the mark or
/// `rollback_to_savepoint` undoes them while keeping the transaction usable.
#[async_trait]
pub trait StoreTx: Send {
	async fn savepoint(&mut self) -> Result<(), StoreError>;
	async fn release_savepoint(&mut self) -> Result<(), StoreError>;
	async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError>;

	async fn find_animal(&mut self, id: i64) -> Result<Option<Animal>, StoreError>;
	/// Whether `tag_id` belongs to an animal other than `excluding`.
	async fn tag_in_use(&mut self, tag_id: &str, excluding: Option<i64>)
	-> Result<bool, StoreError>;
	async fn insert_animal(&mut self, animal: &NewAnimal) -> Result<Animal, StoreError>;
	async fn update_animal(&mut self, id: i64, patch: &AnimalPatch) -> Result<Animal, StoreError>;
	/// Delete an animal and its events.
	async fn delete_animal(&mut self, id: i64) -> Result<(), StoreError>;
	async fn insert_event(&mut self, event: &NewEvent) -> Result<Event, StoreError>;

	async fn commit(self: Box<Self>) -> Result<(), StoreError>;
	async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn sqlstate_classes_map_to_store_errors() {
		assert!(matches!(
			StoreError::from_sqlstate(Some("23505"), "duplicate key"),
			StoreError::Conflict(m) if m.contains("unique")
		));
		assert!(matches!(
			StoreError::from_sqlstate(Some("23503"), "fk"),
			StoreError::Conflict(_)
		));
		// invalid byte sequence for encoding "UTF8": 0x00
		assert!(matches!(
			StoreError::from_sqlstate(Some("22021"), "invalid byte sequence"),
			StoreError::InvalidValue(_)
		));
		// date out of range
		assert!(matches!(
			StoreError::from_sqlstate(Some("22008"), "date out of range"),
			StoreError::InvalidValue(_)
		));
		assert!(matches!(
			StoreError::from_sqlstate(Some("40001"), "serialization failure"),
			StoreError::Backend(_)
		));
		assert!(matches!(
			StoreError::from_sqlstate(None, "gone"),
			StoreError::Backend(_)
		));
	}

	#[test]
	fn average_age_rounds_to_one_decimal() {
		assert_eq!(round_to_tenth(10.0 / 3.0), 3.3);
		assert_eq!(round_to_tenth(2.25), 2.3);
		assert_eq!(round_to_tenth(0.0), 0.0);
	}

	#[test]
	fn connection_errors_are_systemic() {
		assert!(matches!(
			StoreError::from(sqlx::Error::PoolTimedOut),
			StoreError::Backend(_)
		));
	}
}
