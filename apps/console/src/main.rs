use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use shared::domain::{Breakpoint, StorageScope, Viewport};
use state_core::{
    load_settings, AsyncOperation, BreakpointConfig, DebouncedValue, PersistentCell,
    ResponsiveResolver, Scope, SelectionManager, ViewportTracker,
};
use storage::MemoryStore;
use tokio::time::{sleep, timeout};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Drives one incident-list screen: type a query, search, select, remember it.
#[derive(Parser, Debug)]
struct Args {
    /// Settings file, `state_core.toml` when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Text typed into the search box one keystroke at a time.
    #[arg(long, default_value = "disk")]
    query: String,
    #[arg(long, default_value_t = 60)]
    keystroke_ms: u64,
    #[arg(long, default_value_t = 1280)]
    width: u32,
    #[arg(long, default_value_t = 800)]
    height: u32,
    /// Overrides the configured selection cap.
    #[arg(long)]
    max_selections: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Incident {
    id: u32,
    title: &'static str,
    severity: &'static str,
    resolved: bool,
}

const CATALOG: &[Incident] = &[
    Incident { id: 101, title: "disk full on db-1", severity: "critical", resolved: false },
    Incident { id: 102, title: "cpu spike on api-3", severity: "major", resolved: false },
    Incident { id: 103, title: "disk latency on db-2", severity: "minor", resolved: false },
    Incident { id: 104, title: "disk alarm flapping", severity: "minor", resolved: true },
    Incident { id: 105, title: "tls cert expiring on edge", severity: "major", resolved: false },
    Incident { id: 106, title: "disk quota on backup", severity: "major", resolved: false },
];

fn search_catalog(query: &str) -> Vec<Incident> {
    let needle = query.trim().to_lowercase();
    CATALOG
        .iter()
        .filter(|incident| incident.title.contains(needle.as_str()))
        .cloned()
        .collect()
}

#[derive(Debug, Serialize)]
struct ScreenReport {
    query: String,
    restored_query: Option<String>,
    results: Vec<Incident>,
    selected: Vec<u32>,
    selectable: usize,
    all_selected: bool,
    indeterminate: bool,
    remaining_capacity: Option<usize>,
    breakpoint: Breakpoint,
    grid_columns: u32,
    spacing: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref());
    if args.max_selections.is_some() {
        settings.max_selections = args.max_selections;
    }
    info!(?settings, "console: settings loaded");

    let store = MemoryStore::new(StorageScope::Session);
    let scope = Scope::new("incident-list");

    let last_query = scope.attach(PersistentCell::new(
        Arc::new(store.clone()),
        "incidents.last_query",
        String::new(),
        settings
            .persist_options()
            .on_error(|err| warn!(error = %err, "console: last query not persisted")),
    ));
    let restored_query = Some(last_query.value()).filter(|query| !query.is_empty());

    let search = scope.attach(AsyncOperation::new(
        |query: String| async move {
            sleep(Duration::from_millis(120)).await;
            Ok::<_, anyhow::Error>(search_catalog(&query))
        },
        settings
            .async_options()
            .on_error(|err| warn!(error = %err, "console: search failed")),
    ));

    let text = scope.attach(DebouncedValue::with_options(
        String::new(),
        settings.debounce_options(),
    ));
    let runner = search.clone();
    text.on_change(move |query: &String| {
        let runner = runner.clone();
        let query = query.clone();
        tokio::spawn(async move {
            info!(%query, "console: searching");
            if let Err(err) = runner.execute(query).await {
                warn!(error = %err, "console: search aborted");
            }
        });
    })
    .detach();

    for typed in (1..=args.query.chars().count()).map(|n| args.query.chars().take(n).collect::<String>()) {
        text.set(typed);
        sleep(Duration::from_millis(args.keystroke_ms)).await;
    }

    let settle = settings.debounce_options().delay + Duration::from_millis(50);
    timeout(Duration::from_secs(10), async {
        sleep(settle).await;
        while search.is_loading() || text.pending() {
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("search did not settle")?;

    let results = search.data().unwrap_or_default();
    info!(count = results.len(), "console: results ready");

    let selection = scope.attach(SelectionManager::with_options(
        |incident: &Incident| incident.id,
        settings
            .selection_options()
            .selectable(|incident: &Incident| !incident.resolved)
            .on_overflow(|err| warn!(error = %err, "console: selection capped")),
    ));
    selection.select_all(&results);
    let stats = selection.selection_stats(&results);
    let mut selected: Vec<u32> = selection.selected_ids().into_iter().collect();
    selected.sort_unstable();

    let tracker = ViewportTracker::new(settings.thresholds(), Viewport::new(args.width, args.height));
    let resolver = ResponsiveResolver::new(Arc::new(tracker));
    let columns = resolver.grid_columns(Some(&BreakpointConfig::new().xs(1).md(2).xl(3)));

    last_query.set_value(text.value());

    let report = ScreenReport {
        query: text.value(),
        restored_query,
        results,
        selected,
        selectable: stats.selectable,
        all_selected: stats.all_selected,
        indeterminate: stats.indeterminate,
        remaining_capacity: stats.remaining_capacity,
        breakpoint: resolver.breakpoint(),
        grid_columns: columns,
        spacing: resolver.spacing(None).to_string(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    scope.detach();
    Ok(())
}
