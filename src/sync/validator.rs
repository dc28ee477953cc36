use chrono::{Datelike, NaiveDate};

use crate::clock::Clock;
use crate::store::{Animal, AnimalPatch, DEFAULT_BREED, NewAnimal, NewEvent, StoreTx};

use super::error::{FieldError, JobError, JobFailure};
use super::job::{AnimalPayload, EventPayload};
use super::resolver::Resolution;

pub const TAG_ID_MAX_LEN: usize = 50;
pub const NAME_MAX_LEN: usize = 100;
pub const BREED_MAX_LEN: usize = 100;
pub const EVENT_TYPE_MAX_LEN: usize = 50;
/// Calendar years a stored date may fall in.
pub const MIN_YEAR: i32 = 1;
pub const MAX_YEAR: i32 = 9999;

const REQUIRED: &str = "this field is required";
const NUL_CHAR: &str = "null characters are not allowed";

/// Turns decoded payloads into store-ready records, enforcing field rules,
/// tag uniqueness and date bounds. Every offending field is reported, not
/// just the first.
pub struct JobValidator<'a> {
	clock: &'a dyn Clock,
}

impl<'a> JobValidator<'a> {
	pub fn new(clock: &'a dyn Clock) -> Self {
		Self { clock }
	}

	pub async fn new_animal(
		&self,
		tx: &mut dyn StoreTx,
		fields: &AnimalPayload,
	) -> Result<NewAnimal, JobFailure> {
		let mut errors = Vec::new();

		let tag_id = required_text(&fields.tag_id, "tag_id", TAG_ID_MAX_LEN, &mut errors);
		let name = required_text(&fields.name, "name", NAME_MAX_LEN, &mut errors);
		let breed = optional_text(&fields.breed, "breed", BREED_MAX_LEN, &mut errors);
		let birth_date = match fields.birth_date {
			Some(date) => self.birth_date(date, &mut errors),
			None => {
				errors.push(FieldError::new("birth_date", REQUIRED));
				None
			}
		};
		if let Some(tag) = &tag_id {
			if tx.tag_in_use(tag, None).await? {
				errors.push(duplicate_tag(tag));
			}
		}

		match (tag_id, name, birth_date) {
			(Some(tag_id), Some(name), Some(birth_date)) if errors.is_empty() => Ok(NewAnimal {
				tag_id,
				name,
				breed: breed.unwrap_or_else(|| DEFAULT_BREED.to_string()),
				birth_date,
				gender: fields.gender.unwrap_or_default(),
			}),
			_ => Err(JobError::Validation(errors).into()),
		}
	}

	/// Validate a partial update against the row it will modify. Keeping an
	/// animal's own tag id is not a collision.
	pub async fn animal_patch(
		&self,
		tx: &mut dyn StoreTx,
		current: &Animal,
		fields: &AnimalPayload,
	) -> Result<AnimalPatch, JobFailure> {
		let mut errors = Vec::new();

		let tag_id = optional_text(&fields.tag_id, "tag_id", TAG_ID_MAX_LEN, &mut errors);
		let name = optional_text(&fields.name, "name", NAME_MAX_LEN, &mut errors);
		let breed = optional_text(&fields.breed, "breed", BREED_MAX_LEN, &mut errors);
		let birth_date = fields
			.birth_date
			.and_then(|date| self.birth_date(date, &mut errors));
		if let Some(tag) = &tag_id {
			if *tag != current.tag_id && tx.tag_in_use(tag, Some(current.id)).await? {
				errors.push(duplicate_tag(tag));
			}
		}

		if !errors.is_empty() {
			return Err(JobError::Validation(errors).into());
		}
		Ok(AnimalPatch {
			tag_id,
			name,
			breed,
			birth_date,
			gender: fields.gender,
		})
	}

	/// Validate an event whose `cow` reference has already been resolved.
	/// The attributing user always comes from the caller.
	pub async fn new_event(
		&self,
		tx: &mut dyn StoreTx,
		fields: &EventPayload,
		cow: Option<Resolution>,
		user_id: i64,
	) -> Result<NewEvent, JobFailure> {
		let mut errors = Vec::new();

		let animal_id = match cow {
			None => {
				errors.push(FieldError::new("cow", REQUIRED));
				None
			}
			Some(Resolution::Unresolved(id)) => {
				errors.push(FieldError::new(
					"cow",
					format!(
						"animal {} does not exist; its create did not succeed in this batch",
						id
					),
				));
				None
			}
			Some(Resolution::Real(id)) => {
				if tx.find_animal(id).await?.is_some() {
					Some(id)
				} else {
					errors.push(FieldError::new(
						"cow",
						format!("invalid pk - animal {} does not exist", id),
					));
					None
				}
			}
		};
		let event_type = required_text(
			&fields.event_type,
			"event_type",
			EVENT_TYPE_MAX_LEN,
			&mut errors,
		);
		let date = match fields.date {
			Some(date) => date_in_range("date", date, &mut errors),
			None => {
				errors.push(FieldError::new("date", REQUIRED));
				None
			}
		};
		let notes = fields.notes.clone().unwrap_or_default();
		if notes.contains('\0') {
			errors.push(FieldError::new("notes", NUL_CHAR));
		}

		match (animal_id, event_type, date) {
			(Some(cow), Some(event_type), Some(date)) if errors.is_empty() => Ok(NewEvent {
				cow,
				event_type,
				date,
				notes,
				user_id,
			}),
			_ => Err(JobError::Validation(errors).into()),
		}
	}

	fn birth_date(&self, date: NaiveDate, errors: &mut Vec<FieldError>) -> Option<NaiveDate> {
		let date = date_in_range("birth_date", date, errors)?;
		let today = self.clock.today();
		if date > today {
			errors.push(FieldError::new(
				"birth_date",
				format!("{} is in the future (today is {})", date, today),
			));
			return None;
		}
		Some(date)
	}
}

fn date_in_range(
	field: &'static str,
	date: NaiveDate,
	errors: &mut Vec<FieldError>,
) -> Option<NaiveDate> {
	if !(MIN_YEAR..=MAX_YEAR).contains(&date.year()) {
		errors.push(FieldError::new(
			field,
			format!("year must be between {} and {}", MIN_YEAR, MAX_YEAR),
		));
		return None;
	}
	Some(date)
}

fn duplicate_tag(tag: &str) -> FieldError {
	FieldError::new(
		"tag_id",
		format!(
			"an animal with tag_id '{}' already exists; tag_id must be unique",
			tag
		),
	)
}

fn required_text(
	value: &Option<String>,
	field: &'static str,
	max_len: usize,
	errors: &mut Vec<FieldError>,
) -> Option<String> {
	if value.is_none() {
		errors.push(FieldError::new(field, REQUIRED));
		return None;
	}
	optional_text(value, field, max_len, errors)
}

/// Trim and bound a text field. Absent is fine; blank is not.
fn optional_text(
	value: &Option<String>,
	field: &'static str,
	max_len: usize,
	errors: &mut Vec<FieldError>,
) -> Option<String> {
	let trimmed = value.as_deref()?.trim();
	if trimmed.is_empty() {
		errors.push(FieldError::new(field, "this field may not be blank"));
		return None;
	}
	if trimmed.contains('\0') {
		errors.push(FieldError::new(field, NUL_CHAR));
		return None;
	}
	if trimmed.chars().count() > max_len {
		errors.push(FieldError::new(
			field,
			format!("ensure this field has no more than {} characters", max_len),
		));
		return None;
	}
	Some(trimmed.to_string())
}
