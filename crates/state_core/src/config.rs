use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    async_operation::AsyncOptions, debounce::DebounceOptions, persistent::PersistOptions,
    selection::SelectionOptions, viewport::BreakpointThresholds,
};

pub const DEFAULT_SETTINGS_FILE: &str = "state_core.toml";
const ENV_PREFIX: &str = "APP__";

/// Controller defaults shared by a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub debounce_delay_ms: u64,
    pub debounce_max_wait_ms: Option<u64>,
    pub operation_timeout_ms: Option<u64>,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
    pub max_selections: Option<usize>,
    pub storage_key_prefix: String,
    pub breakpoints: BreakpointThresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debounce_delay_ms: 300,
            debounce_max_wait_ms: None,
            operation_timeout_ms: None,
            retry_count: 0,
            retry_delay_ms: 1000,
            max_selections: None,
            storage_key_prefix: String::new(),
            breakpoints: BreakpointThresholds::default(),
        }
    }
}

impl Settings {
    pub fn debounce_options(&self) -> DebounceOptions {
        let options = DebounceOptions::new(Duration::from_millis(self.debounce_delay_ms));
        match self.debounce_max_wait_ms {
            Some(max_wait) => options.max_wait(Duration::from_millis(max_wait)),
            None => options,
        }
    }

    pub fn async_options<T>(&self) -> AsyncOptions<T> {
        let options = AsyncOptions::default()
            .with_retry(self.retry_count, Duration::from_millis(self.retry_delay_ms));
        match self.operation_timeout_ms {
            Some(timeout) => options.with_timeout(Duration::from_millis(timeout)),
            None => options,
        }
    }

    pub fn selection_options<T>(&self) -> SelectionOptions<T> {
        SelectionOptions {
            max_selections: self.max_selections,
            ..SelectionOptions::default()
        }
    }

    pub fn persist_options<T>(&self) -> PersistOptions<T> {
        let options = PersistOptions::default();
        if self.storage_key_prefix.is_empty() {
            options
        } else {
            options.key_prefix(self.storage_key_prefix.clone())
        }
    }

    pub fn thresholds(&self) -> BreakpointThresholds {
        self.breakpoints
    }
}

/// Defaults, then the TOML file (`state_core.toml` unless `path` is given), then
/// `APP__*` environment variables. Bad input is logged and skipped.
pub fn load_settings(path: Option<&Path>) -> Settings {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));

    let mut settings = match read_settings_file(&path) {
        Ok(Some(settings)) => settings,
        Ok(None) => {
            debug!(path = %path.display(), "config: no settings file; using defaults");
            Settings::default()
        }
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "config: ignoring settings file");
            Settings::default()
        }
    };

    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());

    if !settings.breakpoints.is_ordered() {
        warn!(thresholds = ?settings.breakpoints, "config: breakpoint thresholds out of order; using defaults");
        settings.breakpoints = BreakpointThresholds::default();
    }
    settings
}

fn read_settings_file(path: &Path) -> anyhow::Result<Option<Settings>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    let settings = toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))?;
    Ok(Some(settings))
}

/// Overlays `APP__<FIELD>` variables, e.g. `APP__DEBOUNCE_DELAY_MS` or
/// `APP__BREAKPOINT_MD`. For optional fields an empty value clears the setting.
pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

    if let Some(v) = var("DEBOUNCE_DELAY_MS") {
        set_parsed(&mut settings.debounce_delay_ms, "DEBOUNCE_DELAY_MS", &v);
    }
    if let Some(v) = var("DEBOUNCE_MAX_WAIT_MS") {
        set_optional(&mut settings.debounce_max_wait_ms, "DEBOUNCE_MAX_WAIT_MS", &v);
    }
    if let Some(v) = var("OPERATION_TIMEOUT_MS") {
        set_optional(&mut settings.operation_timeout_ms, "OPERATION_TIMEOUT_MS", &v);
    }
    if let Some(v) = var("RETRY_COUNT") {
        set_parsed(&mut settings.retry_count, "RETRY_COUNT", &v);
    }
    if let Some(v) = var("RETRY_DELAY_MS") {
        set_parsed(&mut settings.retry_delay_ms, "RETRY_DELAY_MS", &v);
    }
    if let Some(v) = var("MAX_SELECTIONS") {
        set_optional(&mut settings.max_selections, "MAX_SELECTIONS", &v);
    }
    if let Some(v) = var("STORAGE_KEY_PREFIX") {
        settings.storage_key_prefix = v;
    }

    let thresholds = &mut settings.breakpoints;
    for (name, slot) in [
        ("BREAKPOINT_SM", &mut thresholds.sm),
        ("BREAKPOINT_MD", &mut thresholds.md),
        ("BREAKPOINT_LG", &mut thresholds.lg),
        ("BREAKPOINT_XL", &mut thresholds.xl),
    ] {
        if let Some(v) = var(name) {
            set_parsed(slot, name, &v);
        }
    }
}

fn set_parsed<T: FromStr>(slot: &mut T, name: &str, raw: &str) {
    match raw.trim().parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(var = %format!("{ENV_PREFIX}{name}"), value = raw, "config: ignoring unparseable value"),
    }
}

fn set_optional<T: FromStr>(slot: &mut Option<T>, name: &str, raw: &str) {
    if raw.trim().is_empty() {
        *slot = None;
        return;
    }
    match raw.trim().parse() {
        Ok(parsed) => *slot = Some(parsed),
        Err(_) => warn!(var = %format!("{ENV_PREFIX}{name}"), value = raw, "config: ignoring unparseable value"),
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
