use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::clock::Clock;
use crate::store::{EntityKind, RecordStore, StoreTx};

use super::auth::Caller;
use super::error::{JobError, JobFailure, SyncError};
use super::job::{Job, JobResult, JobStatus, Operation};
use super::resolver::{IdResolver, Resolution};
use super::validator::JobValidator;

/// What a job did once it got past validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
	Applied(i64),
	/// The job targeted a temporary id whose create never persisted; it is
	/// acknowledged without touching the store.
	Merged(i64),
}

/// Applies one sync batch inside a single store transaction.
///
/// Jobs run strictly in request order. A job that fails on its own terms is
/// rolled back to its savepoint and reported; the batch carries on. A store
/// failure aborts the batch and nothing is persisted.
pub struct BatchCoordinator {
	store: Arc<dyn RecordStore>,
	clock: Arc<dyn Clock>,
}

impl BatchCoordinator {
	pub fn new(store: Arc<dyn RecordStore>, clock: Arc<dyn Clock>) -> Self {
		Self { store, clock }
	}

	pub async fn apply(&self, jobs: Vec<Job>, caller: &Caller) -> Result<Vec<JobResult>, SyncError> {
		let mut tx = self.store.begin().await?;

		let outcome = self.run_jobs(tx.as_mut(), &jobs, caller).await;
		match outcome {
			Ok(results) => {
				if let Err(e) = tx.commit().await {
					error!("commit of sync batch from user {} failed: {}", caller.user_id, e);
					return Err(SyncError::Transaction(e));
				}
				log_summary(&results, caller);
				Ok(results)
			}
			Err(e) => {
				error!(
					"sync batch of {} jobs from user {} aborted: {}",
					jobs.len(),
					caller.user_id,
					e
				);
				if let Err(rb) = tx.rollback().await {
					warn!("rollback after aborted sync batch failed: {}", rb);
				}
				Err(e)
			}
		}
	}

	async fn run_jobs(
		&self,
		tx: &mut dyn StoreTx,
		jobs: &[Job],
		caller: &Caller,
	) -> Result<Vec<JobResult>, SyncError> {
		let validator = JobValidator::new(self.clock.as_ref());
		let mut resolver = IdResolver::new();
		let mut results = Vec::with_capacity(jobs.len());

		for job in jobs {
			let operation = match &job.operation {
				Ok(op) => op,
				Err(e) => {
					debug!("job {} rejected while decoding: {}", job.queue_id, e);
					results.push(JobResult::failed(job, e));
					continue;
				}
			};

			tx.savepoint().await?;
			match apply_job(tx, &validator, &mut resolver, operation, caller).await {
				Ok(outcome) => {
					tx.release_savepoint().await?;
					results.push(match outcome {
						Outcome::Applied(id) => JobResult::applied(job, id),
						Outcome::Merged(id) => JobResult::merged(job, id),
					});
				}
				Err(JobFailure::Rejected(e)) => {
					tx.rollback_to_savepoint().await?;
					warn!(
						"sync job {} ({}) failed: {}",
						job.queue_id,
						job.action,
						e
					);
					results.push(JobResult::failed(job, &e));
				}
				Err(JobFailure::Systemic(e)) => return Err(SyncError::Transaction(e)),
			}
		}

		debug!("{} temporary ids resolved in batch", resolver.registered());
		Ok(results)
	}
}

async fn apply_job(
	tx: &mut dyn StoreTx,
	validator: &JobValidator<'_>,
	resolver: &mut IdResolver,
	operation: &Operation,
	caller: &Caller,
) -> Result<Outcome, JobFailure> {
	match operation {
		Operation::CreateAnimal { temp_id, fields } => {
			resolver.check_claim(*temp_id)?;
			let new = validator.new_animal(tx, fields).await?;
			let animal = tx.insert_animal(&new).await?;
			if let Some(temp) = temp_id {
				resolver.register(EntityKind::Animal, *temp, animal.id);
			}
			Ok(Outcome::Applied(animal.id))
		}
		Operation::UpdateAnimal { entity_id, fields } => {
			let id = match resolver.resolve(EntityKind::Animal, *entity_id) {
				Resolution::Real(id) => id,
				Resolution::Unresolved(id) => return Ok(Outcome::Merged(id)),
			};
			let current = tx
				.find_animal(id)
				.await?
				.ok_or(JobError::NotFound {
					entity: EntityKind::Animal,
					id,
				})?;
			let patch = validator.animal_patch(tx, &current, fields).await?;
			if patch.is_empty() {
				return Ok(Outcome::Applied(id));
			}
			let animal = tx.update_animal(id, &patch).await?;
			Ok(Outcome::Applied(animal.id))
		}
		Operation::DeleteAnimal { entity_id } => {
			match resolver.resolve(EntityKind::Animal, *entity_id) {
				Resolution::Real(id) => {
					tx.delete_animal(id).await?;
					Ok(Outcome::Applied(id))
				}
				Resolution::Unresolved(id) => Ok(Outcome::Merged(id)),
			}
		}
		Operation::CreateEvent { temp_id, fields } => {
			resolver.check_claim(*temp_id)?;
			let cow = fields
				.cow
				.map(|id| resolver.resolve(EntityKind::Animal, id));
			let new = validator
				.new_event(tx, fields, cow, caller.user_id)
				.await?;
			let event = tx.insert_event(&new).await?;
			if let Some(temp) = temp_id {
				resolver.register(EntityKind::Event, *temp, event.id);
			}
			Ok(Outcome::Applied(event.id))
		}
	}
}

fn log_summary(results: &[JobResult], caller: &Caller) {
	let count = |status: JobStatus| results.iter().filter(|r| r.status == status).count();
	info!(
		"sync batch from {} (user {}) committed: {} jobs, {} ok, {} merged, {} error",
		caller.username,
		caller.user_id,
		results.len(),
		count(JobStatus::Ok),
		count(JobStatus::Merged),
		count(JobStatus::Error)
	);
}
