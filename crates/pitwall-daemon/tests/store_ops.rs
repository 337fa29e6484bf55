//! Store-level tests: transactional upserts, the audit law, idempotent
//! LDX recording, and data clearing.

use pitwall_core::Role;
use pitwall_daemon::store::{LdxFileMeta, NewSensor, Store};

fn store() -> Store {
    Store::open_in_memory().expect("open store")
}

#[test]
fn test_upsert_appends_one_audit_row_per_change() {
    let store = store();
    let outcome = store
        .upsert_form_value("daq_setup", Role::Daq, "sampling_rate", Some("100"), None, 1_000)
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.old_value, None);

    let page = store.list_audit(0, 10).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.items[0].old_value, None);
    assert_eq!(page.items[0].new_value.as_deref(), Some("100"));

    // Unchanged value: no new audit row.
    let outcome = store
        .upsert_form_value("daq_setup", Role::Daq, "sampling_rate", Some("100"), None, 2_000)
        .unwrap();
    assert!(!outcome.changed);
    assert_eq!(store.list_audit(0, 10).unwrap().total, 1);

    // Changed value: old/new recorded.
    let outcome = store
        .upsert_form_value("daq_setup", Role::Daq, "sampling_rate", Some("200"), None, 3_000)
        .unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.old_value.as_deref(), Some("100"));
    let page = store.list_audit(0, 10).unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].new_value.as_deref(), Some("200"));
}

#[test]
fn test_previous_value_advances_only_on_change() {
    let store = store();
    for (value, ts) in [("100", 1_000), ("200", 2_000), ("200", 3_000)] {
        store
            .upsert_form_value("daq_setup", Role::Daq, "sampling_rate", Some(value), None, ts)
            .unwrap();
    }
    let values = store.list_values(Role::Daq).unwrap();
    let record = &values["sampling_rate"];
    assert_eq!(record.value.as_deref(), Some("200"));
    assert_eq!(record.previous_value.as_deref(), Some("100"));
    // The no-op submit must not have touched the timestamp either.
    assert_eq!(record.updated_at_ms, 2_000);
}

#[test]
fn test_null_transitions_are_audited() {
    let store = store();
    store
        .upsert_form_value("daq_setup", Role::Daq, "notes", Some("wet track"), None, 1_000)
        .unwrap();
    let outcome = store
        .upsert_form_value("daq_setup", Role::Daq, "notes", None, None, 2_000)
        .unwrap();
    assert!(outcome.changed);
    let page = store.list_audit(0, 10).unwrap();
    assert_eq!(page.items[0].old_value.as_deref(), Some("wet track"));
    assert_eq!(page.items[0].new_value, None);
}

#[test]
fn test_submit_values_is_one_transaction_with_per_field_audit() {
    let store = store();
    let changed = store
        .submit_values(
            "daq_setup",
            Role::Daq,
            &[
                ("sampling_rate".to_string(), Some("100".to_string())),
                ("logger_notes".to_string(), Some("baseline".to_string())),
            ],
            None,
            1_000,
        )
        .unwrap();
    assert_eq!(changed, 2);
    assert_eq!(store.list_audit(0, 10).unwrap().total, 2);

    // Re-submitting the same payload changes nothing.
    let changed = store
        .submit_values(
            "daq_setup",
            Role::Daq,
            &[
                ("sampling_rate".to_string(), Some("100".to_string())),
                ("logger_notes".to_string(), Some("baseline".to_string())),
            ],
            None,
            2_000,
        )
        .unwrap();
    assert_eq!(changed, 0);
    assert_eq!(store.list_audit(0, 10).unwrap().total, 2);
}

#[test]
fn test_audit_pagination() {
    let store = store();
    for i in 0..25 {
        store
            .upsert_form_value(
                "daq_setup",
                Role::Daq,
                "sampling_rate",
                Some(&i.to_string()),
                None,
                1_000 + i,
            )
            .unwrap();
    }
    let page = store.list_audit(0, 10).unwrap();
    assert_eq!(page.total, 25);
    assert_eq!(page.items.len(), 10);
    // Newest first.
    assert_eq!(page.items[0].new_value.as_deref(), Some("24"));
    let page = store.list_audit(20, 10).unwrap();
    assert_eq!(page.items.len(), 5);
}

#[test]
fn test_ldx_recording_is_idempotent_by_name() {
    let store = store();
    let meta = LdxFileMeta {
        file_name: "run_04.ldx".to_string(),
        size: 512,
        modified_at_ms: 1_000,
        content_hash: "abc123".to_string(),
        first_seen_at_ms: 2_000,
    };
    let rows = vec![
        ("Sampling Rate".to_string(), "100".to_string(), true),
        ("Tire Pressure".to_string(), "1.8".to_string(), false),
    ];
    assert!(store.record_processed_file(&meta, &rows).unwrap());
    assert!(store.ldx_file_seen("run_04.ldx").unwrap());

    // Same name again (even with a different hash, as after our own
    // rewrite): nothing is recorded.
    let rewritten = LdxFileMeta {
        content_hash: "def456".to_string(),
        ..meta.clone()
    };
    assert!(!store.record_processed_file(&rewritten, &rows).unwrap());
    assert_eq!(store.list_injections("run_04.ldx").unwrap().len(), 2);

    let stats = store.injection_stats().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].total, 2);
    assert_eq!(stats[0].updates, 1);
    assert_eq!(stats[0].statics, 1);
}

#[test]
fn test_clear_runtime_data_preserves_config_entities() {
    let store = store();
    store.create_user("race_admin", "hash", true, &[]).unwrap();
    store.seed_default_sensors().unwrap();
    store.put_setting("watch_directory", "/tmp/ldx").unwrap();
    store
        .upsert_form_value("daq_setup", Role::Daq, "sampling_rate", Some("100"), None, 1_000)
        .unwrap();
    store
        .record_processed_file(
            &LdxFileMeta {
                file_name: "a.ldx".to_string(),
                size: 1,
                modified_at_ms: 0,
                content_hash: "h".to_string(),
                first_seen_at_ms: 0,
            },
            &[("f".to_string(), "v".to_string(), true)],
        )
        .unwrap();

    store.clear_runtime_data().unwrap();

    assert_eq!(store.list_values(Role::Daq).unwrap().len(), 0);
    assert_eq!(store.list_audit(0, 10).unwrap().total, 0);
    assert!(!store.ldx_file_seen("a.ldx").unwrap());
    assert_eq!(store.injection_stats().unwrap().len(), 0);

    assert_eq!(store.count_users().unwrap(), 1);
    assert_eq!(store.list_sensors(false).unwrap().len(), 15);
    assert_eq!(
        store.get_setting("watch_directory").unwrap().as_deref(),
        Some("/tmp/ldx")
    );
}

#[test]
fn test_user_roles_round_trip_and_cascade() {
    let store = store();
    let user = store
        .create_user("daq_lead", "hash", false, &[Role::Daq, Role::Aero])
        .unwrap();
    let loaded = store.get_user_by_username("daq_lead").unwrap().unwrap();
    assert_eq!(loaded.roles.len(), 2);

    store.set_roles(user.id, &[Role::Ergo]).unwrap();
    let loaded = store.get_user(user.id).unwrap().unwrap();
    assert_eq!(loaded.roles, vec![Role::Ergo]);

    store.put_pref(user.id, "dashboard", "{}", 1_000).unwrap();
    store.delete_user(user.id).unwrap();
    assert!(store.get_user(user.id).unwrap().is_none());
    assert_eq!(store.get_pref(user.id, "dashboard").unwrap(), None);
}

#[test]
fn test_duplicate_username_conflicts() {
    let store = store();
    store.create_user("ada", "hash", true, &[]).unwrap();
    let err = store.create_user("ada", "hash2", false, &[Role::Daq]);
    assert!(matches!(
        err,
        Err(pitwall_daemon::store::StoreError::Conflict(_))
    ));
}

#[test]
fn test_sensor_update_validates_range() {
    let store = store();
    store
        .create_sensor(&NewSensor {
            sensor_id: "fuel_pressure".to_string(),
            name: "Fuel Pressure".to_string(),
            unit: "bar".to_string(),
            min_value: 0.0,
            max_value: 8.0,
            group: "Engine".to_string(),
            sort_order: 0,
            enabled: true,
        })
        .unwrap();
    let err = store.update_sensor(
        "fuel_pressure",
        &pitwall_daemon::store::SensorUpdate {
            min_value: Some(10.0),
            ..Default::default()
        },
    );
    assert!(matches!(
        err,
        Err(pitwall_daemon::store::StoreError::Validation(_))
    ));
}

#[test]
fn test_export_snapshot_is_a_working_database() {
    let store = store();
    store.create_user("race_admin", "hash", true, &[]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("export.db");
    store.export_snapshot(&dest).unwrap();

    let copy = Store::open(&dest).unwrap();
    assert_eq!(copy.count_users().unwrap(), 1);
}
