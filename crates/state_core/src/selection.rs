//! Bounded multi-select over a caller-supplied item list.
//!
//! Items are compared by the key the `identity` function derives, never by value.
//! The selection keeps insertion order; when a bulk selection would overflow
//! `max_selections` the first items in the supplied order win.

use std::{collections::HashSet, hash::Hash, sync::Arc};

use parking_lot::Mutex;
use shared::error::ControllerError;
use tracing::{debug, warn};

use crate::{
    lifecycle::Dispose,
    observer::{ErrorCallback, Observers, Subscription},
};

pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct SelectionOptions<T> {
    pub max_selections: Option<usize>,
    pub selectable: Option<Predicate<T>>,
    pub on_overflow: Option<ErrorCallback>,
}

impl<T> Default for SelectionOptions<T> {
    fn default() -> Self {
        Self {
            max_selections: None,
            selectable: None,
            on_overflow: None,
        }
    }
}

impl<T> SelectionOptions<T> {
    pub fn max_selections(mut self, limit: usize) -> Self {
        self.max_selections = Some(limit);
        self
    }

    pub fn selectable(mut self, predicate: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.selectable = Some(Arc::new(predicate));
        self
    }

    pub fn on_overflow(mut self, callback: impl Fn(&ControllerError) + Send + Sync + 'static) -> Self {
        self.on_overflow = Some(Arc::new(callback));
        self
    }
}

/// Published once per mutation that changed the set.
#[derive(Debug, Clone)]
pub struct SelectionChange<T, K> {
    pub items: Vec<T>,
    pub ids: HashSet<K>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SelectionStats {
    /// Items in the supplied list.
    pub total: usize,
    pub selectable: usize,
    /// Selected items within the supplied list.
    pub selected: usize,
    /// Selected items overall, including ones outside the supplied list.
    pub selected_total: usize,
    pub all_selected: bool,
    pub indeterminate: bool,
    pub remaining_capacity: Option<usize>,
}

struct SelectionState<T, K> {
    items: Vec<T>,
    ids: HashSet<K>,
    disposed: bool,
}

impl<T: Clone, K: Clone> SelectionState<T, K> {
    fn change(&self) -> SelectionChange<T, K> {
        SelectionChange {
            items: self.items.clone(),
            ids: self.ids.clone(),
        }
    }
}

struct SelectionInner<T, K> {
    identity: Arc<dyn Fn(&T) -> K + Send + Sync>,
    options: SelectionOptions<T>,
    state: Mutex<SelectionState<T, K>>,
    observers: Observers<SelectionChange<T, K>>,
}

pub struct SelectionManager<T, K> {
    inner: Arc<SelectionInner<T, K>>,
}

impl<T, K> Clone for SelectionManager<T, K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

enum Outcome<T, K> {
    Unchanged,
    Changed(SelectionChange<T, K>),
}

impl<T, K> SelectionManager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new(identity: impl Fn(&T) -> K + Send + Sync + 'static) -> Self {
        Self::with_options(identity, SelectionOptions::default())
    }

    pub fn with_options(
        identity: impl Fn(&T) -> K + Send + Sync + 'static,
        options: SelectionOptions<T>,
    ) -> Self {
        Self {
            inner: Arc::new(SelectionInner {
                identity: Arc::new(identity),
                options,
                state: Mutex::new(SelectionState {
                    items: Vec::new(),
                    ids: HashSet::new(),
                    disposed: false,
                }),
                observers: Observers::new(),
            }),
        }
    }

    pub fn on_change(
        &self,
        callback: impl Fn(&SelectionChange<T, K>) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.observers.subscribe(callback)
    }

    fn is_selectable(&self, item: &T) -> bool {
        self.inner
            .options
            .selectable
            .as_ref()
            .map_or(true, |predicate| predicate(item))
    }

    fn id(&self, item: &T) -> K {
        (self.inner.identity)(item)
    }

    fn publish(&self, outcome: Outcome<T, K>) {
        if let Outcome::Changed(change) = outcome {
            self.inner.observers.notify(&change);
        }
    }

    fn overflow(&self, limit: usize, requested: usize) {
        warn!(limit, requested, "selection: capacity exceeded");
        if let Some(on_overflow) = &self.inner.options.on_overflow {
            on_overflow(&ControllerError::CapacityExceeded { limit, requested });
        }
    }

    pub fn select_item(&self, item: &T) {
        if !self.is_selectable(item) {
            return;
        }
        let id = self.id(item);
        let mut overflowed = None;
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.disposed || state.ids.contains(&id) {
                return;
            }
            match self.inner.options.max_selections {
                Some(limit) if state.items.len() >= limit => {
                    overflowed = Some((limit, state.items.len() + 1));
                    Outcome::Unchanged
                }
                _ => {
                    state.ids.insert(id);
                    state.items.push(item.clone());
                    Outcome::Changed(state.change())
                }
            }
        };
        if let Some((limit, requested)) = overflowed {
            self.overflow(limit, requested);
        }
        self.publish(outcome);
    }

    pub fn deselect_item(&self, item: &T) {
        let id = self.id(item);
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.disposed || !state.ids.remove(&id) {
                return;
            }
            let identity = &self.inner.identity;
            state.items.retain(|selected| identity(selected) != id);
            Outcome::Changed(state.change())
        };
        self.publish(outcome);
    }

    pub fn toggle_item(&self, item: &T) {
        if self.is_selected(item) {
            self.deselect_item(item);
        } else {
            self.select_item(item);
        }
    }

    /// Selects every selectable item in `items`, capped at the remaining capacity.
    pub fn select_all(&self, items: &[T]) {
        let candidates: Vec<(K, &T)> = items
            .iter()
            .filter(|item| self.is_selectable(item))
            .map(|item| (self.id(item), item))
            .collect();
        self.select_many(candidates);
    }

    fn select_many(&self, candidates: Vec<(K, &T)>) {
        let mut overflowed = None;
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            let mut seen = HashSet::new();
            let fresh: Vec<(K, &T)> = candidates
                .into_iter()
                .filter(|(id, _)| !state.ids.contains(id) && seen.insert(id.clone()))
                .collect();

            let room = match self.inner.options.max_selections {
                Some(limit) => {
                    let room = limit.saturating_sub(state.items.len());
                    if fresh.len() > room {
                        overflowed = Some((limit, state.items.len() + fresh.len()));
                    }
                    room
                }
                None => fresh.len(),
            };

            let mut added = 0;
            for (id, item) in fresh.into_iter().take(room) {
                state.ids.insert(id);
                state.items.push(item.clone());
                added += 1;
            }
            debug!(added, selected = state.items.len(), "selection: bulk select");
            if added > 0 {
                Outcome::Changed(state.change())
            } else {
                Outcome::Unchanged
            }
        };
        if let Some((limit, requested)) = overflowed {
            self.overflow(limit, requested);
        }
        self.publish(outcome);
    }

    pub fn deselect_all(&self) {
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.disposed || state.items.is_empty() {
                return;
            }
            state.items.clear();
            state.ids.clear();
            Outcome::Changed(state.change())
        };
        self.publish(outcome);
    }

    /// Deselects the selectable subset of `items` if all of it is selected,
    /// otherwise selects it.
    pub fn toggle_all(&self, items: &[T]) {
        if !self.is_all_selected(items) {
            self.select_all(items);
            return;
        }
        let targets: HashSet<K> = items
            .iter()
            .filter(|item| self.is_selectable(item))
            .map(|item| self.id(item))
            .collect();
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.disposed {
                return;
            }
            state.ids.retain(|id| !targets.contains(id));
            let identity = &self.inner.identity;
            state.items.retain(|item| !targets.contains(&identity(item)));
            Outcome::Changed(state.change())
        };
        self.publish(outcome);
    }

    /// Selects the inclusive slice between `start` and `end` in either order.
    /// Indices past the end of `items` are clamped.
    pub fn select_range(&self, items: &[T], start: usize, end: usize) {
        let Some(last) = items.len().checked_sub(1) else {
            return;
        };
        let (low, high) = (start.min(end).min(last), start.max(end).min(last));
        self.select_all(&items[low..=high]);
    }

    pub fn is_selected(&self, item: &T) -> bool {
        let id = self.id(item);
        self.inner.state.lock().ids.contains(&id)
    }

    fn count_selected(&self, items: &[T]) -> (usize, usize) {
        let keys: Vec<K> = items
            .iter()
            .filter(|item| self.is_selectable(item))
            .map(|item| self.id(item))
            .collect();
        let state = self.inner.state.lock();
        let selected = keys.iter().filter(|id| state.ids.contains(id)).count();
        (keys.len(), selected)
    }

    /// False when `items` has no selectable entries.
    pub fn is_all_selected(&self, items: &[T]) -> bool {
        let (selectable, selected) = self.count_selected(items);
        selectable > 0 && selected == selectable
    }

    pub fn is_indeterminate(&self, items: &[T]) -> bool {
        let (selectable, selected) = self.count_selected(items);
        selected > 0 && selected < selectable
    }

    pub fn selection_stats(&self, items: &[T]) -> SelectionStats {
        let (selectable, selected) = self.count_selected(items);
        let selected_total = self.len();
        SelectionStats {
            total: items.len(),
            selectable,
            selected,
            selected_total,
            all_selected: selectable > 0 && selected == selectable,
            indeterminate: selected > 0 && selected < selectable,
            remaining_capacity: self
                .inner
                .options
                .max_selections
                .map(|limit| limit.saturating_sub(selected_total)),
        }
    }

    /// Empties the selection.
    pub fn reset(&self) {
        debug!("selection: reset");
        self.deselect_all();
    }

    pub fn selected_items(&self) -> Vec<T> {
        self.inner.state.lock().items.clone()
    }

    pub fn selected_ids(&self) -> HashSet<K> {
        self.inner.state.lock().ids.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T, K> Dispose for SelectionManager<T, K>
where
    T: Clone + Send + Sync + 'static,
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn dispose(&self) {
        self.inner.state.lock().disposed = true;
        self.inner.observers.clear();
    }

    fn is_disposed(&self) -> bool {
        self.inner.state.lock().disposed
    }
}

#[cfg(test)]
#[path = "tests/selection_tests.rs"]
mod tests;
