//! End-to-end LDX watcher tests: a real directory, a real store, and the
//! full observe → inject → record pipeline.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use pitwall_core::schema::FormRegistry;
use pitwall_core::Role;
use pitwall_daemon::store::{now_ms, Store, ValueRecord};
use pitwall_daemon::watcher::{plan_entries, LdxWatcher, WATCH_DIRECTORY_KEY, DEBOUNCE};

const FORMS: &str = r#"
form_name: daq_setup
role: DAQ
fields:
  - name: sampling_rate
    label: Sampling Rate
    type: number
    validity_window: 3600
    inject: Sampling Rate
  - name: logger_notes
    label: Logger Notes
    type: text
  - name: unused_field
    label: Unused
    type: text
"#;

struct Pipeline {
    store: Store,
    watcher: LdxWatcher,
    watch_dir: tempfile::TempDir,
    _forms_dir: tempfile::TempDir,
}

fn pipeline() -> Pipeline {
    let store = Store::open_in_memory().expect("open store");
    let forms_dir = tempfile::tempdir().expect("forms dir");
    std::fs::write(forms_dir.path().join("daq.yaml"), FORMS).expect("write form");
    let registry = Arc::new(RwLock::new(
        FormRegistry::load(forms_dir.path()).expect("registry"),
    ));
    let watch_dir = tempfile::tempdir().expect("watch dir");
    store
        .put_setting(
            WATCH_DIRECTORY_KEY,
            &watch_dir.path().to_string_lossy(),
        )
        .expect("setting");
    Pipeline {
        watcher: LdxWatcher::new(store.clone(), registry),
        store,
        watch_dir,
        _forms_dir: forms_dir,
    }
}

fn write_ldx(dir: &Path, name: &str, content: &str) {
    std::fs::write(dir.join(name), content).expect("write ldx");
}

async fn settle() {
    // Let the debounce window pass so files count as fully written.
    tokio::time::sleep(DEBOUNCE + Duration::from_millis(150)).await;
}

#[tokio::test]
async fn test_injects_current_values_into_new_file() {
    let p = pipeline();
    p.store
        .submit_values(
            "daq_setup",
            Role::Daq,
            &[
                ("sampling_rate".to_string(), Some("100".to_string())),
                ("logger_notes".to_string(), Some("baseline".to_string())),
            ],
            None,
            now_ms(),
        )
        .unwrap();

    write_ldx(p.watch_dir.path(), "run_01.ldx", "<root></root>");
    settle().await;

    assert_eq!(p.watcher.scan_once().await, 1);
    let content =
        std::fs::read_to_string(p.watch_dir.path().join("run_01.ldx")).unwrap();
    assert!(content.contains("<detail>"));
    assert!(content.contains("<entry id=\"Sampling Rate\">100</entry>"));
    assert!(content.contains("<entry id=\"logger_notes\">baseline</entry>"));
    // A field with no stored value is not injected.
    assert!(!content.contains("unused_field"));

    assert!(p.store.ldx_file_seen("run_01.ldx").unwrap());
    let injections = p.store.list_injections("run_01.ldx").unwrap();
    assert_eq!(injections.len(), 2);
}

#[tokio::test]
async fn test_reprocessing_is_suppressed_after_first_pass() {
    let p = pipeline();
    p.store
        .submit_values(
            "daq_setup",
            Role::Daq,
            &[("sampling_rate".to_string(), Some("100".to_string()))],
            None,
            now_ms(),
        )
        .unwrap();
    write_ldx(p.watch_dir.path(), "run_01.ldx", "<root></root>");
    settle().await;

    assert_eq!(p.watcher.scan_once().await, 1);
    let first_pass =
        std::fs::read_to_string(p.watch_dir.path().join("run_01.ldx")).unwrap();

    // Our own rewrite changed the file's content (and hash); a second scan
    // must not touch it again.
    settle().await;
    assert_eq!(p.watcher.scan_once().await, 0);
    let second_pass =
        std::fs::read_to_string(p.watch_dir.path().join("run_01.ldx")).unwrap();
    assert_eq!(first_pass, second_pass);
    assert_eq!(p.store.list_injections("run_01.ldx").unwrap().len(), 1);
}

#[tokio::test]
async fn test_fresh_files_are_debounced() {
    let p = pipeline();
    write_ldx(p.watch_dir.path(), "hot.ldx", "<root></root>");
    // No settle: the file was just written, so this tick must skip it.
    assert_eq!(p.watcher.scan_once().await, 0);
    assert!(!p.store.ldx_file_seen("hot.ldx").unwrap());

    settle().await;
    assert_eq!(p.watcher.scan_once().await, 1);
}

#[tokio::test]
async fn test_was_update_classification_across_files() {
    let p = pipeline();
    p.store
        .submit_values(
            "daq_setup",
            Role::Daq,
            &[
                ("sampling_rate".to_string(), Some("100".to_string())),
                ("logger_notes".to_string(), Some("baseline".to_string())),
            ],
            None,
            now_ms(),
        )
        .unwrap();

    write_ldx(p.watch_dir.path(), "run_01.ldx", "<root></root>");
    settle().await;
    assert_eq!(p.watcher.scan_once().await, 1);

    // First file: everything stored counts as an update.
    for row in p.store.list_injections("run_01.ldx").unwrap() {
        assert!(row.was_update, "{} should be an update", row.field_id);
    }

    // Second file, no submissions in between: the windowed field is still
    // inside its validity window, the plain field was not touched since
    // the previous file.
    write_ldx(p.watch_dir.path(), "run_02.ldx", "<root></root>");
    settle().await;
    assert_eq!(p.watcher.scan_once().await, 1);
    let by_field: BTreeMap<String, bool> = p
        .store
        .list_injections("run_02.ldx")
        .unwrap()
        .into_iter()
        .map(|r| (r.field_id, r.was_update))
        .collect();
    assert_eq!(by_field["Sampling Rate"], true);
    assert_eq!(by_field["logger_notes"], false);
}

#[tokio::test]
async fn test_one_broken_file_does_not_stop_the_scan() {
    let p = pipeline();
    p.store
        .submit_values(
            "daq_setup",
            Role::Daq,
            &[("sampling_rate".to_string(), Some("100".to_string()))],
            None,
            now_ms(),
        )
        .unwrap();
    write_ldx(p.watch_dir.path(), "bad.ldx", "<root></mismatch>");
    write_ldx(p.watch_dir.path(), "good.ldx", "<root></root>");
    settle().await;

    assert_eq!(p.watcher.scan_once().await, 1);
    assert!(p.store.ldx_file_seen("good.ldx").unwrap());
    // The broken file stays unrecorded so the next tick retries it.
    assert!(!p.store.ldx_file_seen("bad.ldx").unwrap());
}

#[tokio::test]
async fn test_non_ldx_files_are_ignored() {
    let p = pipeline();
    write_ldx(p.watch_dir.path(), "notes.txt", "<root></root>");
    write_ldx(p.watch_dir.path(), "UPPER.LDX", "<root></root>");
    settle().await;
    assert_eq!(p.watcher.scan_once().await, 1);
    assert!(p.store.ldx_file_seen("UPPER.LDX").unwrap());
    assert!(!p.store.ldx_file_seen("notes.txt").unwrap());
}

#[test]
fn test_plan_entries_validity_window_and_touch_rules() {
    let forms_dir = tempfile::tempdir().unwrap();
    std::fs::write(forms_dir.path().join("daq.yaml"), FORMS).unwrap();
    let registry = FormRegistry::load(forms_dir.path()).unwrap();

    let record = |value: &str, updated_at_ms: i64| ValueRecord {
        value: Some(value.to_string()),
        previous_value: None,
        updated_at_ms,
        updated_by: None,
    };
    let now = 10_000_000;
    let mut values = BTreeMap::new();
    // Inside the 3600s window.
    values.insert(
        (Role::Daq, "sampling_rate".to_string()),
        record("100", now - 1_000_000),
    );
    // Touched after the previous file.
    values.insert(
        (Role::Daq, "logger_notes".to_string()),
        record("fresh", now - 1_000),
    );

    let plan = plan_entries(&registry, &values, now, Some(now - 2_000));
    assert_eq!(plan["Sampling Rate"], ("100".to_string(), true));
    assert_eq!(plan["logger_notes"], ("fresh".to_string(), true));

    // Outside the window, untouched since the previous file.
    let mut values = BTreeMap::new();
    values.insert(
        (Role::Daq, "sampling_rate".to_string()),
        record("100", now - 4_000_000),
    );
    values.insert(
        (Role::Daq, "logger_notes".to_string()),
        record("stale", now - 5_000),
    );
    let plan = plan_entries(&registry, &values, now, Some(now - 2_000));
    assert_eq!(plan["Sampling Rate"], ("100".to_string(), false));
    assert_eq!(plan["logger_notes"], ("stale".to_string(), false));

    // No previous file at all: stored values count as updates.
    let plan = plan_entries(&registry, &values, now, None);
    assert_eq!(plan["Sampling Rate"].1, false); // window still applies
    assert_eq!(plan["logger_notes"].1, true);
}
