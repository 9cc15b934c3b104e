//! Breakpoint-keyed configuration and the resolver that picks from it.
//!
//! Lookup order for the current breakpoint: exact entry, then the nearest
//! smaller breakpoint that has one, then the nearest larger one. The layout
//! helpers are thin wrappers over that lookup with a default map per property.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared::domain::{Breakpoint, Viewport};
use tracing::debug;

use crate::{
    lifecycle::Dispose,
    observer::{Observers, Subscription},
    viewport::{BreakpointListener, BreakpointSource},
};

/// Pixels per spacing unit.
pub const SPACING_UNIT_PX: f32 = 8.0;
/// Root font size used for rem conversion.
pub const ROOT_FONT_PX: f32 = 16.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakpointConfig<T> {
    values: BTreeMap<Breakpoint, T>,
}

impl<T> Default for BreakpointConfig<T> {
    fn default() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }
}

impl<T> FromIterator<(Breakpoint, T)> for BreakpointConfig<T> {
    fn from_iter<I: IntoIterator<Item = (Breakpoint, T)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

impl<T> BreakpointConfig<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, breakpoint: Breakpoint, value: T) -> Self {
        self.values.insert(breakpoint, value);
        self
    }

    pub fn xs(self, value: T) -> Self {
        self.with(Breakpoint::Xs, value)
    }

    pub fn sm(self, value: T) -> Self {
        self.with(Breakpoint::Sm, value)
    }

    pub fn md(self, value: T) -> Self {
        self.with(Breakpoint::Md, value)
    }

    pub fn lg(self, value: T) -> Self {
        self.with(Breakpoint::Lg, value)
    }

    pub fn xl(self, value: T) -> Self {
        self.with(Breakpoint::Xl, value)
    }

    pub fn get(&self, breakpoint: Breakpoint) -> Option<&T> {
        self.values.get(&breakpoint)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn resolve(&self, at: Breakpoint) -> Option<&T> {
        std::iter::once(at)
            .chain(at.smaller())
            .chain(at.larger())
            .find_map(|breakpoint| self.values.get(&breakpoint))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Length {
    Px(f32),
    Rem(f32),
    Percent(f32),
}

impl Length {
    pub fn units(units: f32) -> Self {
        Length::Px(units * SPACING_UNIT_PX)
    }

    /// Absolute size in px. Percentages are taken of `container_px`.
    pub fn to_px(self, container_px: f32) -> f32 {
        match self {
            Length::Px(px) => px,
            Length::Rem(rem) => rem * ROOT_FONT_PX,
            Length::Percent(percent) => container_px * percent / 100.0,
        }
    }

    pub fn to_rem(self, container_px: f32) -> f32 {
        self.to_px(container_px) / ROOT_FONT_PX
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Length::Px(px) => write!(f, "{px}px"),
            Length::Rem(rem) => write!(f, "{rem}rem"),
            Length::Percent(percent) => write!(f, "{percent}%"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Visibility {
    pub hide_on: BTreeSet<Breakpoint>,
}

impl Visibility {
    pub fn hide_on(breakpoints: impl IntoIterator<Item = Breakpoint>) -> Self {
        Self {
            hide_on: breakpoints.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlexDirection {
    Row,
    Column,
}

/// Per-breakpoint flex settings; gap is in spacing units.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlexConfig {
    pub direction: BreakpointConfig<FlexDirection>,
    pub wrap: BreakpointConfig<bool>,
    pub gap: BreakpointConfig<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlexProps {
    pub direction: FlexDirection,
    pub wrap: bool,
    pub gap: Length,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DimensionsConfig {
    pub width: BreakpointConfig<Length>,
    pub height: BreakpointConfig<Length>,
    pub max_width: BreakpointConfig<Length>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dimensions {
    pub width: Option<Length>,
    pub height: Option<Length>,
    pub max_width: Option<Length>,
}

/// Fallback maps consulted when a caller's config yields nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsiveDefaults {
    pub grid_columns: BreakpointConfig<u32>,
    pub spacing: BreakpointConfig<f32>,
    pub padding: BreakpointConfig<f32>,
    pub margin: BreakpointConfig<f32>,
    pub flex: FlexConfig,
    pub dimensions: DimensionsConfig,
}

impl Default for ResponsiveDefaults {
    fn default() -> Self {
        Self {
            grid_columns: BreakpointConfig::new().xs(1).sm(2).md(3).lg(4).xl(6),
            spacing: BreakpointConfig::new().xs(1.0).sm(2.0).md(2.0).lg(3.0).xl(4.0),
            padding: BreakpointConfig::new().xs(2.0).md(3.0).lg(4.0),
            margin: BreakpointConfig::new().xs(1.0).sm(2.0).lg(3.0),
            flex: FlexConfig {
                direction: BreakpointConfig::new()
                    .xs(FlexDirection::Column)
                    .md(FlexDirection::Row),
                wrap: BreakpointConfig::new().xs(true),
                gap: BreakpointConfig::new().xs(1.0).md(2.0),
            },
            dimensions: DimensionsConfig {
                width: BreakpointConfig::new().xs(Length::Percent(100.0)),
                height: BreakpointConfig::new(),
                max_width: BreakpointConfig::new()
                    .sm(Length::Px(600.0))
                    .md(Length::Px(960.0))
                    .lg(Length::Px(1280.0))
                    .xl(Length::Px(1920.0)),
            },
        }
    }
}

/// Resolves breakpoint configs against a live [`BreakpointSource`].
#[derive(Clone)]
pub struct ResponsiveResolver {
    source: Arc<dyn BreakpointSource>,
    defaults: Arc<ResponsiveDefaults>,
}

impl ResponsiveResolver {
    pub fn new(source: Arc<dyn BreakpointSource>) -> Self {
        Self::with_defaults(source, ResponsiveDefaults::default())
    }

    pub fn with_defaults(source: Arc<dyn BreakpointSource>, defaults: ResponsiveDefaults) -> Self {
        Self {
            source,
            defaults: Arc::new(defaults),
        }
    }

    pub fn breakpoint(&self) -> Breakpoint {
        self.source.current()
    }

    pub fn viewport(&self) -> Viewport {
        self.source.viewport()
    }

    pub fn defaults(&self) -> &ResponsiveDefaults {
        &self.defaults
    }

    pub fn resolve<'a, T>(&self, config: &'a BreakpointConfig<T>) -> Option<&'a T> {
        config.resolve(self.source.current())
    }

    fn resolve_or<'a, T>(
        &self,
        config: Option<&'a BreakpointConfig<T>>,
        fallback: &'a BreakpointConfig<T>,
    ) -> Option<&'a T> {
        let at = self.source.current();
        config
            .and_then(|config| config.resolve(at))
            .or_else(|| fallback.resolve(at))
    }

    pub fn grid_columns(&self, config: Option<&BreakpointConfig<u32>>) -> u32 {
        self.resolve_or(config, &self.defaults.grid_columns)
            .copied()
            .unwrap_or(1)
    }

    /// Gap between siblings; config values are spacing units.
    pub fn spacing(&self, config: Option<&BreakpointConfig<f32>>) -> Length {
        Length::units(self.resolve_or(config, &self.defaults.spacing).copied().unwrap_or(0.0))
    }

    pub fn padding(&self, config: Option<&BreakpointConfig<f32>>) -> Length {
        Length::units(self.resolve_or(config, &self.defaults.padding).copied().unwrap_or(0.0))
    }

    pub fn margin(&self, config: Option<&BreakpointConfig<f32>>) -> Length {
        Length::units(self.resolve_or(config, &self.defaults.margin).copied().unwrap_or(0.0))
    }

    /// Exact membership in the hide-list; no fallback.
    pub fn is_hidden(&self, visibility: &Visibility) -> bool {
        visibility.hide_on.contains(&self.source.current())
    }

    pub fn flex(&self, config: Option<&FlexConfig>) -> FlexProps {
        let defaults = &self.defaults.flex;
        FlexProps {
            direction: self
                .resolve_or(config.map(|c| &c.direction), &defaults.direction)
                .copied()
                .unwrap_or(FlexDirection::Row),
            wrap: self
                .resolve_or(config.map(|c| &c.wrap), &defaults.wrap)
                .copied()
                .unwrap_or(false),
            gap: Length::units(
                self.resolve_or(config.map(|c| &c.gap), &defaults.gap)
                    .copied()
                    .unwrap_or(0.0),
            ),
        }
    }

    pub fn dimensions(&self, config: Option<&DimensionsConfig>) -> Dimensions {
        let defaults = &self.defaults.dimensions;
        Dimensions {
            width: self
                .resolve_or(config.map(|c| &c.width), &defaults.width)
                .copied(),
            height: self
                .resolve_or(config.map(|c| &c.height), &defaults.height)
                .copied(),
            max_width: self
                .resolve_or(config.map(|c| &c.max_width), &defaults.max_width)
                .copied(),
        }
    }

    pub fn on_change(&self, listener: BreakpointListener) -> Subscription {
        self.source.on_change(listener)
    }

    /// A value that follows `config` across breakpoint changes.
    pub fn watch<T>(&self, config: BreakpointConfig<T>) -> ResponsiveValue<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        ResponsiveValue::new(Arc::clone(&self.source), config)
    }
}

struct ValueInner<T> {
    current: Mutex<Option<T>>,
    observers: Observers<Option<T>>,
    subscription: Mutex<Option<Subscription>>,
}

/// Resolved value of a [`BreakpointConfig`], recomputed on every breakpoint change.
pub struct ResponsiveValue<T> {
    inner: Arc<ValueInner<T>>,
}

impl<T> Clone for ResponsiveValue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> ResponsiveValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(source: Arc<dyn BreakpointSource>, config: BreakpointConfig<T>) -> Self {
        let initial = config.resolve(source.current()).cloned();
        let inner = Arc::new(ValueInner {
            current: Mutex::new(initial),
            observers: Observers::new(),
            subscription: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let subscription = source.on_change(Box::new(move |breakpoint: Breakpoint| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let next = config.resolve(breakpoint).cloned();
            debug!(%breakpoint, resolved = next.is_some(), "responsive: re-resolved");
            *inner.current.lock() = next.clone();
            inner.observers.notify(&next);
        }));
        *inner.subscription.lock() = Some(subscription);

        Self { inner }
    }

    pub fn get(&self) -> Option<T> {
        self.inner.current.lock().clone()
    }

    pub fn on_change(&self, callback: impl Fn(&Option<T>) + Send + Sync + 'static) -> Subscription {
        self.inner.observers.subscribe(callback)
    }
}

impl<T> Dispose for ResponsiveValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dispose(&self) {
        let subscription = self.inner.subscription.lock().take();
        drop(subscription);
        self.inner.observers.clear();
    }

    fn is_disposed(&self) -> bool {
        self.inner.subscription.lock().is_none()
    }
}

#[cfg(test)]
#[path = "tests/responsive_tests.rs"]
mod tests;
