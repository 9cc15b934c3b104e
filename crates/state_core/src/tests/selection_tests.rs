use super::*;

use shared::error::ErrorKind;

#[derive(Debug, Clone, PartialEq)]
struct Incident {
    id: u32,
    archived: bool,
}

fn incident(id: u32) -> Incident {
    Incident { id, archived: false }
}

fn incidents(ids: &[u32]) -> Vec<Incident> {
    ids.iter().copied().map(incident).collect()
}

fn manager() -> SelectionManager<Incident, u32> {
    SelectionManager::new(|item: &Incident| item.id)
}

fn change_counter(selection: &SelectionManager<Incident, u32>) -> (Subscription, Arc<Mutex<Vec<Vec<u32>>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let subscription = selection.on_change(move |change| {
        let mut ids: Vec<u32> = change.items.iter().map(|item| item.id).collect();
        assert_eq!(ids.len(), change.ids.len());
        ids.sort_unstable();
        sink.lock().push(ids);
    });
    (subscription, seen)
}

#[test]
fn select_all_over_capacity_takes_first_items_and_overflows_once() {
    let overflows = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&overflows);
    let selection = SelectionManager::with_options(
        |item: &Incident| item.id,
        SelectionOptions::default()
            .max_selections(2)
            .on_overflow(move |err| sink.lock().push(err.clone())),
    );
    let (_subscription, changes) = change_counter(&selection);

    selection.select_all(&incidents(&[1, 2, 3]));

    assert_eq!(selection.len(), 2);
    assert_eq!(selection.selected_ids(), HashSet::from([1, 2]));
    assert_eq!(changes.lock().len(), 1);
    let overflows = overflows.lock();
    assert_eq!(overflows.len(), 1);
    match &overflows[0] {
        ControllerError::CapacityExceeded { limit, requested } => {
            assert_eq!((*limit, *requested), (2, 3));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn select_item_when_full_reports_overflow_without_mutation() {
    let overflows = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&overflows);
    let selection = SelectionManager::with_options(
        |item: &Incident| item.id,
        SelectionOptions::default()
            .max_selections(1)
            .on_overflow(move |err| sink.lock().push(err.kind())),
    );

    selection.select_item(&incident(1));
    selection.select_item(&incident(1));
    selection.select_item(&incident(2));

    assert_eq!(selection.selected_items(), vec![incident(1)]);
    assert_eq!(*overflows.lock(), vec![ErrorKind::CapacityExceeded]);
}

#[test]
fn unselectable_items_are_skipped() {
    let selection = SelectionManager::with_options(
        |item: &Incident| item.id,
        SelectionOptions::default().selectable(|item: &Incident| !item.archived),
    );
    let archived = Incident { id: 9, archived: true };
    let items = vec![incident(1), archived.clone(), incident(2)];

    selection.select_item(&archived);
    assert!(selection.is_empty());

    selection.select_all(&items);
    assert_eq!(selection.selected_ids(), HashSet::from([1, 2]));
    assert!(selection.is_all_selected(&items));
    assert!(!selection.is_indeterminate(&items));

    let stats = selection.selection_stats(&items);
    assert_eq!(stats.total, 3);
    assert_eq!(stats.selectable, 2);
    assert_eq!(stats.selected, 2);
    assert!(stats.all_selected);
    assert_eq!(stats.remaining_capacity, None);
}

#[test]
fn each_change_publishes_one_consistent_notification() {
    let selection = manager();
    let (_subscription, changes) = change_counter(&selection);
    let items = incidents(&[1, 2, 3]);

    selection.select_item(&items[0]);
    selection.select_item(&items[0]);
    selection.toggle_item(&items[1]);
    selection.deselect_item(&items[2]);
    selection.toggle_item(&items[0]);
    selection.deselect_all();
    selection.deselect_all();

    assert_eq!(
        *changes.lock(),
        vec![vec![1], vec![1, 2], vec![2], vec![]]
    );
}

#[test]
fn toggle_all_flips_only_the_supplied_subset() {
    let selection = manager();
    let page_one = incidents(&[1, 2]);
    let page_two = incidents(&[3, 4]);

    selection.select_all(&page_two);
    selection.select_item(&page_one[0]);
    assert!(selection.is_indeterminate(&page_one));

    selection.toggle_all(&page_one);
    assert!(selection.is_all_selected(&page_one));

    selection.toggle_all(&page_one);
    assert!(!selection.is_indeterminate(&page_one));
    assert_eq!(selection.selected_ids(), HashSet::from([3, 4]));
}

#[test]
fn select_range_accepts_reversed_and_out_of_bounds_indices() {
    let selection = manager();
    let items = incidents(&[10, 11, 12, 13, 14]);

    selection.select_range(&items, 3, 1);
    assert_eq!(selection.selected_ids(), HashSet::from([11, 12, 13]));

    selection.deselect_all();
    selection.select_range(&items, 3, 99);
    assert_eq!(selection.selected_ids(), HashSet::from([13, 14]));

    selection.select_range(&[], 0, 4);
    assert_eq!(selection.len(), 2);
}

#[test]
fn stats_track_selection_outside_the_visible_list() {
    let selection = SelectionManager::with_options(
        |item: &Incident| item.id,
        SelectionOptions::default().max_selections(5),
    );
    selection.select_all(&incidents(&[1, 2, 3]));

    let visible = incidents(&[3, 4]);
    let stats = selection.selection_stats(&visible);
    assert_eq!(stats.selected, 1);
    assert_eq!(stats.selected_total, 3);
    assert!(stats.indeterminate);
    assert_eq!(stats.remaining_capacity, Some(2));

    assert!(!selection.is_all_selected(&[]));
}

#[test]
fn reset_and_dispose() {
    let selection = manager();
    let (_subscription, changes) = change_counter(&selection);
    selection.select_all(&incidents(&[1, 2]));

    selection.reset();
    assert!(selection.is_empty());

    selection.dispose();
    selection.select_item(&incident(5));
    assert!(selection.is_disposed());
    assert!(selection.is_empty());
    assert_eq!(changes.lock().len(), 2);
}
