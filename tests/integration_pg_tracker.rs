//! Paridad mínima del tracker Postgres contra el backend en memoria,
//! corriendo el mismo recorrido por ambos. Se saltea sin DATABASE_URL.

use chrono::{Duration, Utc};
use dlc_core::{HeaderPatch, InMemoryTrackerStore, NewRequest, TrackerStore};
use dlc_domain::{Stage, SwitchDirection};
use dlc_persistence::config::DbConfig;
use dlc_persistence::pg::{build_pool, PgTrackerStore, PoolProvider};
use uuid::Uuid;

fn drive(store: &dyn TrackerStore, correlation_id: &str) -> (Stage, u32, Vec<u32>) {
    let now = Utc::now();
    store.create_header(NewRequest { correlation_id: correlation_id.into(),
                                     subscription_id: "sub-parity".into(),
                                     site: format!("SITE-{correlation_id}"),
                                     meter_serial: "M1".into(),
                                     override_value: SwitchDirection::Off,
                                     group_id: None,
                                     request_start: Some(now),
                                     request_end: Some(now + Duration::minutes(30)) },
                        now)
         .unwrap();
    store.update_tracker(correlation_id, Stage::Queued, now, None, HeaderPatch::default())
         .unwrap();
    store.update_tracker(correlation_id,
                         Stage::PolicyCreated,
                         now,
                         Some("created"),
                         HeaderPatch::policy(777, "DLCOverride(OFF)-M1-parity"))
         .unwrap();

    let header = store.get_header(correlation_id).unwrap().unwrap();
    let numbers = store.stage_records(correlation_id)
                       .unwrap()
                       .iter()
                       .map(|s| s.stage_number)
                       .collect();
    (header.current_stage, header.stage_count, numbers)
}

#[test]
fn postgres_tracker_matches_in_memory_behaviour() {
    if std::env::var("DATABASE_URL").is_err() {
        eprintln!("skip postgres_tracker_matches_in_memory_behaviour (no DATABASE_URL)");
        return;
    }
    let cfg = DbConfig::from_env();
    let pool = build_pool(&cfg.url, 1, 2).expect("pool");
    let pg_store = PgTrackerStore::new(PoolProvider { pool });

    let memory_store = InMemoryTrackerStore::new();
    let memory = drive(&memory_store, &format!("parity-mem-{}", Uuid::new_v4()));
    let postgres = drive(&pg_store, &format!("parity-pg-{}", Uuid::new_v4()));

    assert_eq!(memory.0, postgres.0);
    assert_eq!(memory.1, postgres.1);
    assert_eq!(memory.2, postgres.2);
}
