// Sync against a real PostgreSQL database.
//
// Requires RUN_DOCKER_INTEGRATION_TESTS=1 and a reachable database at
// HRD_TEST_DATABASE_URL (defaults to the docker-compose service).
mod common;

#[cfg(feature = "integration-tests")]
mod postgres {
	use std::sync::Arc;
	use std::time::{SystemTime, UNIX_EPOCH};

	use axum::http::StatusCode;
	use chrono::NaiveDate;
	use highlander_herd::store::{Gender, NewAnimal, NewEvent, PgStore, RecordStore, StoreError};
	use serde_json::json;

	use super::common::{
		TestApp, check_docker_enabled, create_animal, test_database_url, wait_for_postgres,
	};

	/// Tags unique to this run so repeated runs don't collide.
	fn tag(suffix: &str) -> String {
		let nanos = SystemTime::now()
			.duration_since(UNIX_EPOCH)
			.unwrap()
			.as_nanos();
		format!("T{}{}", nanos % 1_000_000_000_000, suffix)
	}

	async fn store() -> PgStore {
		let pool = wait_for_postgres(&test_database_url(), 30)
			.await
			.expect("postgres reachable");
		let store = PgStore::new(pool);
		store.migrate().await.expect("apply schema");
		// migrations are idempotent
		store.migrate().await.expect("re-apply schema");
		store
	}

	#[tokio::test]
	async fn savepoints_isolate_failed_jobs() {
		if !check_docker_enabled() {
			return;
		}
		let store = store().await;
		let app = TestApp::with_store(Arc::new(store.clone()), 500);
		let first = tag("a");
		let second = tag("b");

		let (status, body) = app
			.sync(json!([
				create_animal(1, -1, &first),
				create_animal(2, -2, &first),
				create_animal(3, -3, &second),
				{
					"id": 4,
					"action": "createEvent",
					"tempId": -4,
					"payload": {"cow": -3, "event_type": "vaccination", "date": "2024-01-01"}
				}
			]))
			.await;
		assert_eq!(status, StatusCode::OK);
		let results = body["results"].as_array().unwrap();
		let statuses: Vec<_> = results.iter().map(|r| r["status"].as_str().unwrap()).collect();
		assert_eq!(statuses, vec!["ok", "error", "ok", "ok"]);
		assert!(results[1]["error"].as_str().unwrap().contains("unique"));

		let cow = results[2]["realId"].as_i64().unwrap();
		let events = store.events_for_animal(cow).await.unwrap();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].user_id, Some(42));

		let (_, body) = app
			.sync(json!([
				{"id": 5, "action": "deleteAnimal", "entityId": cow},
				{"id": 6, "action": "deleteAnimal", "entityId": -99}
			]))
			.await;
		assert_eq!(body["results"][0]["status"], "ok");
		assert_eq!(body["results"][1]["status"], "merged");
		assert!(store.events_for_animal(cow).await.unwrap().is_empty());
		assert!(store.get_animal(cow).await.is_err());
	}

	#[tokio::test]
	async fn database_health_reports_ok() {
		if !check_docker_enabled() {
			return;
		}
		let store = store().await;
		store.ping().await.expect("ping");
		let app = TestApp::with_store(Arc::new(store), 500);
		let (status, _) = app.get("/health/db", None).await;
		assert_eq!(status, StatusCode::OK);
	}

	#[tokio::test]
	async fn data_exceptions_are_confined_to_the_savepoint() {
		if !check_docker_enabled() {
			return;
		}
		let store = store().await;
		let tag = tag("n");
		let mut tx = store.begin().await.expect("begin");
		let animal = tx
			.insert_animal(&NewAnimal {
				tag_id: tag.clone(),
				name: "Morag".to_string(),
				breed: "Highland Cattle".to_string(),
				birth_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
				gender: Gender::Female,
			})
			.await
			.expect("insert animal");

		tx.savepoint().await.expect("savepoint");
		let err = tx
			.insert_event(&NewEvent {
				cow: animal.id,
				event_type: "weighing".to_string(),
				date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
				notes: "4\u{0}50kg".to_string(),
				user_id: 1,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, StoreError::InvalidValue(_)), "{:?}", err);
		tx.rollback_to_savepoint().await.expect("rollback to savepoint");
		tx.commit().await.expect("commit");

		let found = store.animal_by_tag(&tag).await.unwrap().expect("by tag");
		assert_eq!(found.id, animal.id);
		let stats = store
			.herd_stats(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap())
			.await
			.unwrap();
		assert!(stats.total >= 1);
		assert!(stats.by_gender.iter().any(|g| g.gender == Gender::Female));
	}
}
