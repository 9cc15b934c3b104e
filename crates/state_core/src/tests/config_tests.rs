use super::*;

use std::collections::HashMap;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| vars.get(name).cloned()
}

fn scratch_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("state_core_{}_{name}", std::process::id()));
    fs::write(&path, contents).expect("write scratch settings");
    path
}

#[test]
fn toml_overrides_only_the_fields_it_names() {
    let settings: Settings = toml::from_str(
        r#"
        debounce_delay_ms = 150
        retry_count = 2

        [breakpoints]
        md = 1024
        "#,
    )
    .expect("parse");

    assert_eq!(settings.debounce_delay_ms, 150);
    assert_eq!(settings.retry_count, 2);
    assert_eq!(settings.retry_delay_ms, 1000);
    assert_eq!(settings.breakpoints.md, 1024);
    assert_eq!(settings.breakpoints.sm, 600);
}

#[test]
fn env_overrides_win_and_bad_values_are_skipped() {
    let mut settings = Settings {
        max_selections: Some(10),
        ..Settings::default()
    };
    apply_env_overrides(
        &mut settings,
        env(&[
            ("APP__DEBOUNCE_DELAY_MS", "75"),
            ("APP__RETRY_COUNT", "three"),
            ("APP__OPERATION_TIMEOUT_MS", "5000"),
            ("APP__MAX_SELECTIONS", ""),
            ("APP__STORAGE_KEY_PREFIX", "ops."),
            ("APP__BREAKPOINT_XL", "2560"),
        ]),
    );

    assert_eq!(settings.debounce_delay_ms, 75);
    assert_eq!(settings.retry_count, 0);
    assert_eq!(settings.operation_timeout_ms, Some(5000));
    assert_eq!(settings.max_selections, None);
    assert_eq!(settings.storage_key_prefix, "ops.");
    assert_eq!(settings.breakpoints.xl, 2560);
}

#[test]
fn settings_convert_into_controller_options() {
    let settings = Settings {
        debounce_delay_ms: 120,
        debounce_max_wait_ms: Some(600),
        operation_timeout_ms: Some(2_000),
        retry_count: 1,
        retry_delay_ms: 50,
        max_selections: Some(3),
        storage_key_prefix: "ops.".to_string(),
        ..Settings::default()
    };

    let debounce = settings.debounce_options();
    assert_eq!(debounce.delay, Duration::from_millis(120));
    assert_eq!(debounce.max_wait, Some(Duration::from_millis(600)));
    assert!(debounce.trailing && !debounce.leading);

    let operation = settings.async_options::<u32>();
    assert_eq!(operation.timeout, Some(Duration::from_secs(2)));
    assert_eq!(operation.retry_count, 1);
    assert_eq!(operation.retry_delay, Duration::from_millis(50));

    assert_eq!(settings.selection_options::<u32>().max_selections, Some(3));
    assert_eq!(settings.persist_options::<u32>().key_prefix.as_deref(), Some("ops."));
    assert!(Settings::default().persist_options::<u32>().key_prefix.is_none());
}

#[test]
fn load_settings_reads_file_and_repairs_thresholds() {
    let good = scratch_file("good.toml", "debounce_delay_ms = 200\n");
    assert_eq!(load_settings(Some(&good)).debounce_delay_ms, 200);

    let unordered = scratch_file("unordered.toml", "[breakpoints]\nsm = 2000\n");
    assert_eq!(load_settings(Some(&unordered)).breakpoints, BreakpointThresholds::default());

    let broken = scratch_file("broken.toml", "debounce_delay_ms = \"soon\"\n");
    assert_eq!(load_settings(Some(&broken)).debounce_delay_ms, 300);

    let missing = std::env::temp_dir().join("state_core_missing_settings.toml");
    assert_eq!(read_settings_file(&missing).expect("missing is not an error"), None);

    for path in [good, unordered, broken] {
        let _ = fs::remove_file(path);
    }
}
