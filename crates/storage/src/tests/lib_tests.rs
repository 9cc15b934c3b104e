use super::*;

#[test]
fn stores_and_removes_values() {
    let store = MemoryStore::new(StorageScope::Durable);
    assert_eq!(store.get("filters").expect("get"), None);

    store.set("filters", "\"open\"").expect("set");
    assert_eq!(
        store.get("filters").expect("get").as_deref(),
        Some("\"open\"")
    );
    assert_eq!(store.len(), 1);

    store.remove("filters").expect("remove");
    assert_eq!(store.get("filters").expect("get"), None);
    assert!(store.is_empty());
}

#[test]
fn contexts_share_entries_but_not_ids() {
    let tab_a = MemoryStore::new(StorageScope::Session);
    let tab_b = tab_a.context();
    assert_ne!(tab_a.context_id(), tab_b.context_id());

    tab_a.set("page_size", "25").expect("set");
    assert_eq!(tab_b.get("page_size").expect("get").as_deref(), Some("25"));
}

#[test]
fn quota_rejects_oversized_writes_and_keeps_previous_value() {
    let store = MemoryStore::with_quota(StorageScope::Durable, 16);
    store.set("k", "small").expect("fits");

    let err = store
        .set("k", "this value is far too large")
        .expect_err("quota should reject");
    assert!(matches!(err, StorageError::QuotaExceeded { quota: 16, .. }));
    assert_eq!(err.key(), "k");
    assert_eq!(store.get("k").expect("get").as_deref(), Some("small"));
}

#[test]
fn quota_accounts_for_replaced_entry() {
    let store = MemoryStore::with_quota(StorageScope::Durable, 10);
    store.set("key", "1234567").expect("exactly at quota");
    store.set("key", "7654321").expect("replacement of same size fits");
    assert_eq!(store.used_bytes(), 10);
}

#[tokio::test]
async fn emits_events_tagged_with_writer_context() {
    let tab_a = MemoryStore::new(StorageScope::Durable);
    let tab_b = tab_a.context();
    let mut events = tab_b.subscribe().expect("memory store supports events");

    tab_a.set("theme", "\"dark\"").expect("set");
    tab_a.remove("theme").expect("remove");

    let first = events.recv().await.expect("set event");
    assert_eq!(first.key, "theme");
    assert_eq!(first.new_value.as_deref(), Some("\"dark\""));
    assert_eq!(first.origin, tab_a.context_id());
    assert_eq!(first.scope, StorageScope::Durable);

    let second = events.recv().await.expect("remove event");
    assert_eq!(second.new_value, None);
}

#[tokio::test]
async fn unchanged_writes_and_missing_removals_are_silent() {
    let store = MemoryStore::new(StorageScope::Durable);
    store.set("k", "1").expect("set");
    let mut events = store.subscribe().expect("events");

    store.set("k", "1").expect("same value");
    store.remove("missing").expect("remove missing");
    store.set("k", "2").expect("new value");

    let event = events.recv().await.expect("event");
    assert_eq!(event.new_value.as_deref(), Some("2"));
    assert!(events.try_recv().is_err());
}
