use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use parking_lot::Mutex;
use state_core::{
    AsyncOperation, AsyncOptions, BreakpointConfig, BreakpointSource, BreakpointThresholds,
    DebouncedValue, Dispose, ErrorKind, OperationStatus, PersistOptions, PersistentCell,
    ResponsiveResolver, Scope, SelectionManager, SelectionOptions, StorageScope, Viewport,
    ViewportTracker,
};
use storage::{KeyValueStore, MemoryStore};
use tokio::time::sleep;

#[derive(Debug, Clone, PartialEq)]
struct Incident {
    id: u32,
    title: &'static str,
    archived: bool,
}

fn catalog() -> Vec<Incident> {
    vec![
        Incident { id: 1, title: "disk full on db-1", archived: false },
        Incident { id: 2, title: "cpu spike on api-3", archived: false },
        Incident { id: 3, title: "disk latency on db-2", archived: false },
        Incident { id: 4, title: "disk alarm flapping", archived: true },
        Incident { id: 5, title: "disk quota on backup", archived: false },
    ]
}

fn search_catalog(calls: Arc<AtomicU32>) -> AsyncOperation<String, Vec<Incident>> {
    AsyncOperation::new(
        move |query: String| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                sleep(Duration::from_millis(80)).await;
                Ok::<_, anyhow::Error>(
                    catalog()
                        .into_iter()
                        .filter(|incident| incident.title.contains(query.as_str()))
                        .collect(),
                )
            }
        },
        AsyncOptions::default().with_timeout(Duration::from_secs(1)),
    )
}

fn wire_search(text: &DebouncedValue<String>, search: &AsyncOperation<String, Vec<Incident>>) {
    let runner = search.clone();
    text.on_change(move |query: &String| {
        let runner = runner.clone();
        let query = query.clone();
        tokio::spawn(async move {
            let _ = runner.execute(query).await;
        });
    })
    .detach();
}

#[tokio::test(start_paused = true)]
async fn typing_searching_selecting_and_persisting_on_one_screen() {
    let store = MemoryStore::new(StorageScope::Session);
    let scope = Scope::new("incident-list");
    let calls = Arc::new(AtomicU32::new(0));

    let search = scope.attach(search_catalog(Arc::clone(&calls)));
    let text = scope.attach(DebouncedValue::new(String::new(), Duration::from_millis(300)));
    wire_search(&text, &search);
    let last_query = scope.attach(PersistentCell::new(
        Arc::new(store.clone()),
        "incidents.last_query",
        String::new(),
        PersistOptions::default(),
    ));

    for typed in ["d", "di", "dis", "disk"] {
        text.set(typed.to_string());
        sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    sleep(Duration::from_millis(600)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(search.status(), OperationStatus::Resolved);
    let results = search.data().expect("search results");
    assert_eq!(
        results.iter().map(|incident| incident.id).collect::<Vec<_>>(),
        vec![1, 3, 4, 5]
    );

    let overflows = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&overflows);
    let selection = scope.attach(SelectionManager::with_options(
        |incident: &Incident| incident.id,
        SelectionOptions::default()
            .max_selections(2)
            .selectable(|incident: &Incident| !incident.archived)
            .on_overflow(move |err| sink.lock().push(err.kind())),
    ));
    selection.select_all(&results);

    let stats = selection.selection_stats(&results);
    assert_eq!(stats.selectable, 3);
    assert_eq!(stats.selected, 2);
    assert!(stats.indeterminate);
    assert_eq!(stats.remaining_capacity, Some(0));
    assert_eq!(*overflows.lock(), vec![ErrorKind::CapacityExceeded]);

    let tracker = ViewportTracker::new(BreakpointThresholds::default(), Viewport::new(1024, 768));
    let resolver = ResponsiveResolver::new(Arc::new(tracker.clone()));
    let columns = scope.attach(resolver.watch(BreakpointConfig::new().xs(1).lg(4)));
    assert_eq!(columns.get(), Some(1));
    tracker.resize(Viewport::new(1440, 900));
    assert_eq!(columns.get(), Some(4));
    assert_eq!(resolver.grid_columns(None), 4);

    last_query.set_value(text.value());
    assert_eq!(
        store.get("incidents.last_query").expect("read").as_deref(),
        Some("\"disk\"")
    );

    scope.detach();
    assert!(search.is_disposed() && text.is_disposed() && selection.is_disposed());
    assert!(last_query.is_disposed() && columns.is_disposed());

    text.set("cpu".to_string());
    sleep(Duration::from_millis(600)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.current(), state_core::Breakpoint::Lg);
}

#[tokio::test(start_paused = true)]
async fn late_typing_supersedes_an_in_flight_search() {
    let scope = Scope::new("incident-list");
    let calls = Arc::new(AtomicU32::new(0));
    let search = scope.attach(search_catalog(Arc::clone(&calls)));
    let text = scope.attach(DebouncedValue::new(String::new(), Duration::from_millis(20)));
    wire_search(&text, &search);

    text.set("disk".to_string());
    sleep(Duration::from_millis(40)).await;
    assert!(search.is_loading());

    text.set("cpu".to_string());
    sleep(Duration::from_millis(400)).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let results = search.data().expect("search results");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, 2);
}

#[tokio::test(start_paused = true)]
async fn reopened_screen_restores_the_last_query() {
    let store = MemoryStore::new(StorageScope::Durable);
    {
        let scope = Scope::new("first-visit");
        let cell = scope.attach(PersistentCell::new(
            Arc::new(store.clone()),
            "last_query",
            String::new(),
            PersistOptions::default(),
        ));
        cell.set_value("disk".to_string());
    }

    let scope = Scope::new("second-visit");
    let cell = scope.attach(PersistentCell::new(
        Arc::new(store.context()),
        "last_query",
        String::new(),
        PersistOptions::default(),
    ));
    assert_eq!(cell.value(), "disk");

    cell.remove_value();
    assert_eq!(cell.value(), "");
    assert!(store.is_empty());
}
