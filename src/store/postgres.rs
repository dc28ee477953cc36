use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::debug;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, Transaction};

use super::{
	Animal, AnimalPatch, BreedCount, EntityKind, Event, Gender, GenderCount, HerdStats, NewAnimal,
	NewEvent, RecordStore, StoreError, StoreTx, round_to_tenth,
};

/// Schema applied by `PgStore::migrate`; every statement is idempotent.
pub const SCHEMA_SQL: &str = include_str!("../../sql/v1/001-herd_schema.sql");

const ANIMAL_COLUMNS: &str =
	"id, tag_id, name, breed, birth_date, gender, photo, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, animal_id AS cow, event_type, date, notes, user_id, created_at";

#[derive(sqlx::FromRow)]
struct AnimalRow {
	id: i64,
	tag_id: String,
	name: String,
	breed: String,
	birth_date: NaiveDate,
	gender: String,
	photo: Option<String>,
	created_at: DateTime<Utc>,
	updated_at: DateTime<Utc>,
}

impl TryFrom<AnimalRow> for Animal {
	type Error = StoreError;

	fn try_from(row: AnimalRow) -> Result<Self, Self::Error> {
		let gender: Gender = row.gender.parse().map_err(StoreError::Backend)?;
		Ok(Animal {
			id: row.id,
			tag_id: row.tag_id,
			name: row.name,
			breed: row.breed,
			birth_date: row.birth_date,
			gender,
			photo: row.photo,
			created_at: row.created_at,
			updated_at: row.updated_at,
		})
	}
}

/// Record store backed by PostgreSQL through a `sqlx` pool.
#[derive(Clone)]
pub struct PgStore {
	pool: PgPool,
}

impl PgStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	/// Connect helper using a DATABASE_URL-like string
	pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
		let pool = PgPoolOptions::new()
			.max_connections(max_connections)
			.connect(database_url)
			.await?;
		Ok(Self::new(pool))
	}

	/// Create the herd tables if they do not exist yet.
	pub async fn migrate(&self) -> Result<(), StoreError> {
		// A bare &str runs through the simple-query protocol, which accepts
		// several statements at once.
		self.pool.execute(SCHEMA_SQL).await?;
		debug!("herd schema applied");
		Ok(())
	}
}

#[async_trait]
impl RecordStore for PgStore {
	async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
		let tx = self.pool.begin().await?;
		Ok(Box::new(PgTx { tx }))
	}

	async fn ping(&self) -> Result<(), StoreError> {
		sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
		Ok(())
	}

	async fn list_animals(&self) -> Result<Vec<Animal>, StoreError> {
		let sql = format!(
			"SELECT {} FROM animals ORDER BY created_at DESC, id DESC",
			ANIMAL_COLUMNS
		);
		let rows = sqlx::query_as::<_, AnimalRow>(&sql)
			.fetch_all(&self.pool)
			.await?;
		rows.into_iter().map(Animal::try_from).collect()
	}

	async fn get_animal(&self, id: i64) -> Result<Animal, StoreError> {
		let sql = format!("SELECT {} FROM animals WHERE id = $1", ANIMAL_COLUMNS);
		let row = sqlx::query_as::<_, AnimalRow>(&sql)
			.bind(id)
			.fetch_optional(&self.pool)
			.await?
			.ok_or_else(|| StoreError::not_found(EntityKind::Animal, id))?;
		Animal::try_from(row)
	}

	async fn events_for_animal(&self, animal_id: i64) -> Result<Vec<Event>, StoreError> {
		let sql = format!(
			"SELECT {} FROM events WHERE animal_id = $1 ORDER BY date DESC, id DESC",
			EVENT_COLUMNS
		);
		let events = sqlx::query_as::<_, Event>(&sql)
			.bind(animal_id)
			.fetch_all(&self.pool)
			.await?;
		Ok(events)
	}

	async fn animal_by_tag(&self, tag_id: &str) -> Result<Option<Animal>, StoreError> {
		let sql = format!("SELECT {} FROM animals WHERE tag_id = $1", ANIMAL_COLUMNS);
		let row = sqlx::query_as::<_, AnimalRow>(&sql)
			.bind(tag_id)
			.fetch_optional(&self.pool)
			.await?;
		row.map(Animal::try_from).transpose()
	}

	async fn herd_stats(&self, today: NaiveDate) -> Result<HerdStats, StoreError> {
		// age() counts whole years the same way the API reports them
		let (total, average_age) = sqlx::query_as::<_, (i64, Option<f64>)>(
			"SELECT COUNT(*), AVG(EXTRACT(YEAR FROM age($1::date, birth_date)))::FLOAT8 FROM animals",
		)
		.bind(today)
		.fetch_one(&self.pool)
		.await?;
		let genders = sqlx::query_as::<_, (String, i64)>(
			"SELECT gender, COUNT(*) FROM animals GROUP BY gender ORDER BY gender",
		)
		.fetch_all(&self.pool)
		.await?;
		let breeds = sqlx::query_as::<_, (String, i64)>(
			"SELECT breed, COUNT(*) FROM animals GROUP BY breed ORDER BY breed",
		)
		.fetch_all(&self.pool)
		.await?;

		let by_gender = genders
			.into_iter()
			.map(|(code, count)| {
				let gender: Gender = code.parse().map_err(StoreError::Backend)?;
				Ok(GenderCount { gender, count })
			})
			.collect::<Result<Vec<_>, StoreError>>()?;
		Ok(HerdStats {
			total,
			by_gender,
			by_breed: breeds
				.into_iter()
				.map(|(breed, count)| BreedCount { breed, count })
				.collect(),
			average_age: average_age.map(round_to_tenth).unwrap_or(0.0),
		})
	}
}

/// One pooled transaction; dropping it rolls back.
struct PgTx {
	tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgTx {
	async fn savepoint(&mut self) -> Result<(), StoreError> {
		sqlx::query("SAVEPOINT sync_job")
			.execute(&mut *self.tx)
			.await?;
		Ok(())
	}

	async fn release_savepoint(&mut self) -> Result<(), StoreError> {
		sqlx::query("RELEASE SAVEPOINT sync_job")
			.execute(&mut *self.tx)
			.await?;
		Ok(())
	}

	async fn rollback_to_savepoint(&mut self) -> Result<(), StoreError> {
		sqlx::query("ROLLBACK TO SAVEPOINT sync_job")
			.execute(&mut *self.tx)
			.await?;
		Ok(())
	}

	async fn find_animal(&mut self, id: i64) -> Result<Option<Animal>, StoreError> {
		let sql = format!(
			"SELECT {} FROM animals WHERE id = $1 FOR UPDATE",
			ANIMAL_COLUMNS
		);
		let row = sqlx::query_as::<_, AnimalRow>(&sql)
			.bind(id)
			.fetch_optional(&mut *self.tx)
			.await?;
		row.map(Animal::try_from).transpose()
	}

	async fn tag_in_use(&mut self, tag_id: &str, excluding: Option<i64>) -> Result<bool, StoreError> {
		let taken = sqlx::query_scalar::<_, bool>(
			"SELECT EXISTS (SELECT 1 FROM animals WHERE tag_id = $1 AND ($2::BIGINT IS NULL OR id <> $2))",
		)
		.bind(tag_id)
		.bind(excluding)
		.fetch_one(&mut *self.tx)
		.await?;
		Ok(taken)
	}

	async fn insert_animal(&mut self, animal: &NewAnimal) -> Result<Animal, StoreError> {
		let sql = format!(
			"INSERT INTO animals (tag_id, name, breed, birth_date, gender) \
			 VALUES ($1, $2, $3, $4, $5) RETURNING {}",
			ANIMAL_COLUMNS
		);
		let row = sqlx::query_as::<_, AnimalRow>(&sql)
			.bind(&animal.tag_id)
			.bind(&animal.name)
			.bind(&animal.breed)
			.bind(animal.birth_date)
			.bind(animal.gender.code())
			.fetch_one(&mut *self.tx)
			.await?;
		Animal::try_from(row)
	}

	async fn update_animal(&mut self, id: i64, patch: &AnimalPatch) -> Result<Animal, StoreError> {
		let mut animal = self
			.find_animal(id)
			.await?
			.ok_or_else(|| StoreError::not_found(EntityKind::Animal, id))?;
		patch.apply_to(&mut animal);

		let sql = format!(
			"UPDATE animals SET tag_id = $2, name = $3, breed = $4, birth_date = $5, gender = $6, \
			 updated_at = now() WHERE id = $1 RETURNING {}",
			ANIMAL_COLUMNS
		);
		let row = sqlx::query_as::<_, AnimalRow>(&sql)
			.bind(id)
			.bind(&animal.tag_id)
			.bind(&animal.name)
			.bind(&animal.breed)
			.bind(animal.birth_date)
			.bind(animal.gender.code())
			.fetch_one(&mut *self.tx)
			.await?;
		Animal::try_from(row)
	}

	async fn delete_animal(&mut self, id: i64) -> Result<(), StoreError> {
		// events go with the animal via ON DELETE CASCADE
		let done = sqlx::query("DELETE FROM animals WHERE id = $1")
			.bind(id)
			.execute(&mut *self.tx)
			.await?;
		if done.rows_affected() == 0 {
			return Err(StoreError::not_found(EntityKind::Animal, id));
		}
		Ok(())
	}

	async fn insert_event(&mut self, event: &NewEvent) -> Result<Event, StoreError> {
		let sql = format!(
			"INSERT INTO events (animal_id, event_type, date, notes, user_id) \
			 VALUES ($1, $2, $3, $4, $5) RETURNING {}",
			EVENT_COLUMNS
		);
		let row = sqlx::query_as::<_, Event>(&sql)
			.bind(event.cow)
			.bind(&event.event_type)
			.bind(event.date)
			.bind(&event.notes)
			.bind(event.user_id)
			.fetch_one(&mut *self.tx)
			.await?;
		Ok(row)
	}

	async fn commit(self: Box<Self>) -> Result<(), StoreError> {
		self.tx.commit().await?;
		Ok(())
	}

	async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
		self.tx.rollback().await?;
		Ok(())
	}
}
