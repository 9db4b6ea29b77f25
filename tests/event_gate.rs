// tests/event_gate.rs
use chrono::{DateTime, Duration, TimeZone, Utc};

use dialog_scout::dedup::{EventDecision, EventGate};
use dialog_scout::store::{EventRecord, EventRecordStore, SqliteStore};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 4, 18, 0, 0).unwrap()
}

fn record(message_id: i64, title: &str, start: DateTime<Utc>, description: &str) -> EventRecord {
    EventRecord {
        source_id: 1,
        message_id,
        title: title.to_string(),
        start_time: start,
        end_time: start + Duration::hours(1),
        description: description.to_string(),
        provider_event_id: Some(format!("gcal-{message_id}")),
    }
}

#[test]
fn extended_title_within_window_is_duplicate() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert(&record(1, "Team Dinner", t0(), "")).unwrap();

    let decision = EventGate::default()
        .check(&store, "Team Dinner with Bob", t0() + Duration::minutes(5))
        .unwrap();
    match decision {
        EventDecision::Duplicate { existing, .. } => {
            assert_eq!(existing.provider_event_id.as_deref(), Some("gcal-1"))
        }
        EventDecision::New => panic!("expected a duplicate"),
    }
}

#[test]
fn window_is_checked_before_similarity() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert(&record(1, "Dinner", t0(), "")).unwrap();

    let gate = EventGate::default();
    assert_eq!(
        gate.check(&store, "Completely Unrelated Meeting", t0() + Duration::minutes(200))
            .unwrap(),
        EventDecision::New
    );
    // identical title, still outside the window
    assert_eq!(
        gate.check(&store, "Dinner", t0() + Duration::minutes(200)).unwrap(),
        EventDecision::New
    );
    // and inside it
    assert!(matches!(
        gate.check(&store, "dinner", t0() - Duration::minutes(120)).unwrap(),
        EventDecision::Duplicate { .. }
    ));
}

#[test]
fn unrelated_title_inside_window_is_new() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert(&record(1, "Dinner", t0(), "")).unwrap();
    assert_eq!(
        EventGate::default()
            .check(&store, "Board game night", t0() + Duration::minutes(30))
            .unwrap(),
        EventDecision::New
    );
}

#[test]
fn upsert_keeps_one_record_per_message() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert(&record(5, "Gig", t0(), "first")).unwrap();
    store.upsert(&record(5, "Gig", t0(), "second")).unwrap();

    let all = store.find_near(t0(), Duration::minutes(1)).unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].description, "second");
}

#[test]
fn custom_window_is_honored() {
    let store = SqliteStore::open_in_memory().unwrap();
    store.upsert(&record(1, "Standup", t0(), "")).unwrap();
    let narrow = EventGate::new(Duration::minutes(10));
    assert_eq!(narrow.window(), Duration::minutes(10));
    assert_eq!(
        narrow
            .check(&store, "Standup", t0() + Duration::minutes(30))
            .unwrap(),
        EventDecision::New
    );
}
