use std::collections::HashMap;

use crate::store::EntityKind;

use super::error::JobError;

/// Client-generated ids are negative; server ids never are.
pub fn is_temporary(id: i64) -> bool {
	id < 0
}

/// Outcome of looking an id up in the batch's resolution map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	/// A server id, either given directly or mapped from a temporary one.
	Real(i64),
	/// A temporary id whose create never succeeded in this batch.
	Unresolved(i64),
}

/// Temporary-to-real id map for the lifetime of one sync batch.
///
/// Constructed per request and dropped with it, so a temporary id never
/// resolves across requests.
#[derive(Debug, Default)]
pub struct IdResolver {
	map: HashMap<i64, (EntityKind, i64)>,
}

impl IdResolver {
	pub fn new() -> Self {
		Self::default()
	}

	/// Resolve `id` as a reference to an entity of `kind`. Server ids pass
	/// through; a temporary id resolves only if a create of the same kind
	/// registered it earlier in the batch.
	pub fn resolve(&self, kind: EntityKind, id: i64) -> Resolution {
		if !is_temporary(id) {
			return Resolution::Real(id);
		}
		match self.map.get(&id) {
			Some((registered, real)) if *registered == kind => Resolution::Real(*real),
			_ => Resolution::Unresolved(id),
		}
	}

	/// Check that a create job's `tempId` can be registered once it persists.
	pub fn check_claim(&self, temp_id: Option<i64>) -> Result<(), JobError> {
		match temp_id {
			None => Ok(()),
			Some(id) if !is_temporary(id) => Err(JobError::invalid(
				"tempId",
				format!("{} is not a temporary identifier (must be negative)", id),
			)),
			Some(id) if self.map.contains_key(&id) => Err(JobError::invalid(
				"tempId",
				format!("{} was already used by an earlier job in this batch", id),
			)),
			Some(_) => Ok(()),
		}
	}

	/// Record a successful create. Call after persistence, before the next job.
	pub fn register(&mut self, kind: EntityKind, temp_id: i64, real_id: i64) {
		self.map.insert(temp_id, (kind, real_id));
	}

	/// Number of temporary ids registered so far.
	pub fn registered(&self) -> usize {
		self.map.len()
	}
}
