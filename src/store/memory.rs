use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{
	Animal, AnimalPatch, BreedCount, EntityKind, Event, Gender, GenderCount, HerdStats, NewAnimal,
	NewEvent, RecordStore, StoreError, StoreTx, round_to_tenth,
};
use crate::clock::age_in_years;

#[derive(Debug, Default)]
struct Tables {
	animals: BTreeMap<i64, Animal>,
	events: BTreeMap<i64, Event>,
	last_animal_id: i64,
	last_event_id: i64,
}

/// One-shot failure switches used to exercise the systemic error path.
#[derive(Debug, Default)]
struct Faults {
	fail_next_commit: AtomicBool,
	/// `n > 0` makes the n-th write from now fail.
	fail_write_in: AtomicUsize,
}

impl Faults {
	fn check_write(&self) -> Result<(), StoreError> {
		let prev = self
			.fail_write_in
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.unwrap_or(0);
		if prev == 1 {
			return Err(StoreError::Backend("injected write failure".to_string()));
		}
		Ok(())
	}
}

/// In-process record store.
///
/// Transactions take the store lock for their whole lifetime, so batches are
/// fully serialized. Writes land in the shared tables straight away and are
/// logged with the row they replaced; rolling back replays that log in
/// reverse. Like a database sequence, ids are never handed out twice.
#[derive(Clone, Default)]
pub struct MemoryStore {
	tables: Arc<Mutex<Tables>>,
	faults: Arc<Faults>,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `commit` fail with a backend error.
	pub fn fail_next_commit(&self) {
		self.faults.fail_next_commit.store(true, Ordering::SeqCst);
	}

	/// Make the `nth` write (1-based) from now fail with a backend error.
	pub fn fail_write(&self, nth: usize) {
		self.faults.fail_write_in.store(nth, Ordering::SeqCst);
	}

	pub async fn animal_count(&self) -> usize {
		self.tables.lock().await.animals.len()
	}

	pub async fn event_count(&self) -> usize {
		self.tables.lock().await.events.len()
	}

	pub async fn get_event(&self, id: i64) -> Option<Event> {
		self.tables.lock().await.events.get(&id).cloned()
	}
}

#[async_trait]
impl RecordStore for MemoryStore {
	async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
		let tables = self.tables.clone().lock_owned().await;
		Ok(Box::new(MemoryTx {
			tables,
			undo: Vec::new(),
			savepoint: None,
			committed: false,
			faults: self.faults.clone(),
		}))
	}

	async fn ping(&self) -> Result<(), StoreError> {
		Ok(())
	}

	async fn list_animals(&self) -> Result<Vec<Animal>, StoreError> {
		let tables = self.tables.lock().await;
		let mut animals: Vec<Animal> = tables.animals.values().cloned().collect();
		animals.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
		Ok(animals)
	}

	async fn get_animal(&self, id: i64) -> Result<Animal, StoreError> {
		self.tables
			.lock()
			.await
			.animals
			.get(&id)
			.cloned()
			.ok_or_else(|| StoreError::not_found(EntityKind::Animal, id))
	}

	async fn events_for_animal(&self, animal_id: i64) -> Result<Vec<Event>, StoreError> {
		let tables = self.tables.lock().await;
		let mut events: Vec<Event> = tables
			.events
			.values()
			.filter(|e| e.cow == animal_id)
			.cloned()
			.collect();
		events.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
		Ok(events)
	}

	async fn animal_by_tag(&self, tag_id: &str) -> Result<Option<Animal>, StoreError> {
		let tables = self.tables.lock().await;
		Ok(tables.animals.values().find(|a| a.tag_id == tag_id).cloned())
	}

	async fn herd_stats(&self, today: NaiveDate) -> Result<HerdStats, StoreError> {
		let tables = self.tables.lock().await;
		let mut by_gender: BTreeMap<&'static str, (Gender, i64)> = BTreeMap::new();
		let mut by_breed: BTreeMap<&str, i64> = BTreeMap::new();
		let mut age_sum = 0i64;
		for animal in tables.animals.values() {
			by_gender
				.entry(animal.gender.code())
				.or_insert((animal.gender, 0))
				.1 += 1;
			*by_breed.entry(animal.breed.as_str()).or_default() += 1;
			age_sum += i64::from(age_in_years(animal.birth_date, today));
		}
		let total = tables.animals.len() as i64;
		let average_age = if total == 0 {
			0.0
		} else {
			round_to_tenth(age_sum as f64 / total as f64)
		};
		Ok(HerdStats {
			total,
			by_gender: by_gender
				.into_values()
				.map(|(gender, count)| GenderCount { gender, count })
				.collect(),
			by_breed: by_breed
				.into_iter()
				.map(|(breed, count)| BreedCount {
					breed: breed.to_string(),
					count,
				})
				.collect(),
			average_age,
		})
	}
}

/// A row as it was before the transaction touched it; `None` if absent.
enum Undo {
	Animal(i64, Option<Animal>),
	Event(i64, Option<Event>),
}

struct MemoryTx {
	tables: OwnedMutexGuard<Tables>,
	undo: Vec<Undo>,
	/// Undo log length when the savepoint was taken.
	savepoint: Option<usize>,
	committed: bool,
	faults: Arc<Faults>,
}

impl MemoryTx {
	fn put_animal(&mut self, animal: Animal) {
		let id = animal.id;
		let prior = self.tables.animals.insert(id, animal);
		self.undo.push(Undo::Animal(id, prior));
	}

	fn put_event(&mut self, event: Event) {
		let id = event.id;
		let prior = self.tables.events.insert(id, event);
		self.undo.push(Undo::Event(id, prior));
	}

	fn undo_to(&mut self, len: usize) {
		while self.undo.len() > len {
			let Some(entry) = self.undo.pop() else {
				break;
			};
			match entry {
				Undo::Animal(id, Some(row)) => {
					self.tables.animals.insert(id, row);
				}
				Undo::Animal(id, None) => {
					self.tables.animals.remove(&id);
				}
				Undo::Event(id, Some(row)) => {
					self.tables.events.insert(id, row);
				}
				Undo::Event(id, None) => {
					self.tables.events.remove(&id);
				}
			}
		}
	}
}

impl Drop for MemoryTx {
	fn drop(&mut self) {
		if !self.committed {
			self.undo_to(0);
		}
	}
}

#[async_trait]
impl StoreTx for MemoryTx {
	async fn savepoint(&mut self) -> Result<(), StoreError> {
		self.savepoint = Some(self.undo.len());
		Ok(())
	}

	async fn release_savepoint(&mut self) -> Result<(), StoreError> {
		self.savepoint
			.take()
			.map(|_| ())
			.ok_or_else(|| StoreError::Backend("no savepoint to release".to_string()))
	}

	async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
		let mark = self
			.savepoint
			.take()
			.ok_or_else(|| StoreError::Backend("no savepoint to roll back to".to_string()))?;
		self.undo_to(mark);
		Ok(())
	}

	async fn find_animal(&mut self, id: i64) -> Result<Option<Animal>, StoreError> {
		Ok(self.tables.animals.get(&id).cloned())
	}

	async fn tag_in_use(&mut self, tag_id: &str, excluding: Option<i64>) -> Result<bool, StoreError> {
		Ok(self
			.tables
			.animals
			.values()
			.any(|a| a.tag_id == tag_id && Some(a.id) != excluding))
	}

	async fn insert_animal(&mut self, animal: &NewAnimal) -> Result<Animal, StoreError> {
		self.faults.check_write()?;
		if self.tag_in_use(&animal.tag_id, None).await? {
			return Err(StoreError::Conflict(format!(
				"unique constraint violated: tag_id '{}' already exists",
				animal.tag_id
			)));
		}
		let now = Utc::now();
		self.tables.last_animal_id += 1;
		let row = Animal {
			id: self.tables.last_animal_id,
			tag_id: animal.tag_id.clone(),
			name: animal.name.clone(),
			breed: animal.breed.clone(),
			birth_date: animal.birth_date,
			gender: animal.gender,
			photo: None,
			created_at: now,
			updated_at: now,
		};
		self.put_animal(row.clone());
		Ok(row)
	}

	async fn update_animal(&mut self, id: i64, patch: &AnimalPatch) -> Result<Animal, StoreError> {
		self.faults.check_write()?;
		if let Some(tag_id) = &patch.tag_id {
			if self.tag_in_use(tag_id, Some(id)).await? {
				return Err(StoreError::Conflict(format!(
					"unique constraint violated: tag_id '{}' already exists",
					tag_id
				)));
			}
		}
		let animal = self
			.tables
			.animals
			.get_mut(&id)
			.ok_or_else(|| StoreError::not_found(EntityKind::Animal, id))?;
		patch.apply_to(animal);
		animal.updated_at = Utc::now();
		Ok(animal.clone())
	}

	async fn delete_animal(&mut self, id: i64) -> Result<(), StoreError> {
		self.faults.check_write()?;
		let Some(animal) = self.tables.animals.remove(&id) else {
			return Err(StoreError::not_found(EntityKind::Animal, id));
		};
		self.undo.push(Undo::Animal(id, Some(animal)));
		let owned: Vec<i64> = self
			.tables
			.events
			.values()
			.filter(|e| e.cow == id)
			.map(|e| e.id)
			.collect();
		for event_id in owned {
			if let Some(event) = self.tables.events.remove(&event_id) {
				self.undo.push(Undo::Event(event_id, Some(event)));
			}
		}
		Ok(())
	}

	async fn insert_event(&mut self, event: &NewEvent) -> Result<Event, StoreError> {
		self.faults.check_write()?;
		if !self.tables.animals.contains_key(&event.cow) {
			return Err(StoreError::Conflict(format!(
				"referenced record does not exist: animal {}",
				event.cow
			)));
		}
		self.tables.last_event_id += 1;
		let row = Event {
			id: self.tables.last_event_id,
			cow: event.cow,
			event_type: event.event_type.clone(),
			date: event.date,
			notes: event.notes.clone(),
			user_id: Some(event.user_id),
			created_at: Utc::now(),
		};
		self.put_event(row.clone());
		Ok(row)
	}

	async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
		// a failed commit drops the transaction, which undoes its writes
		if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
			return Err(StoreError::Backend("injected commit failure".to_string()));
		}
		self.committed = true;
		Ok(())
	}

	async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
		Ok(())
	}
}
