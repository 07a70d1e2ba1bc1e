//! End-to-end tests for the complete sync flow.
//!
//! Tests the full pipeline: import → reconcile → records/status

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use serde_json::Value;
use tempfile::TempDir;

fn pumpsync_binary() -> String {
    env!("CARGO_BIN_EXE_pumpsync").to_string()
}

fn db_path(temp: &Path) -> PathBuf {
    temp.join("data/pumpsync.db")
}

/// Runs pumpsync isolated inside `temp`, optionally feeding stdin.
fn pumpsync(temp: &Path, args: &[&str], stdin: Option<&str>, env: &[(&str, &str)]) -> Output {
    let mut command = Command::new(pumpsync_binary());
    command
        .env("HOME", temp)
        .env("XDG_CONFIG_HOME", temp.join("config"))
        .env("PUMPSYNC_DATABASE_PATH", db_path(temp))
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        command.env(key, value);
    }
    let mut child = command.spawn().expect("failed to run pumpsync");
    {
        let mut pipe = child.stdin.take().expect("stdin piped");
        if let Some(input) = stdin {
            pipe.write_all(input.as_bytes()).unwrap();
        }
    }
    child.wait_with_output().unwrap()
}

fn assert_success(output: &Output, what: &str) {
    assert!(
        output.status.success(),
        "{what} should succeed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

const EVENTS: &str = r#"{"id":"1001","code":"glucose_reading","timestamp":"2024-01-01T12:00:00Z","value":"142","payload":{"trend":"Flat"}}
{"id":"1002","code":"bolus_normal","timestamp":"2024-01-01T12:00:00Z","value":"4.2","payload":{"carbs":20,"bg":142}}
{"id":"1003","code":"carb_correction","timestamp":"2024-01-01T12:03:00Z","value":"20"}
{"id":"1004","code":"basal_rate","timestamp":"2024-01-01T11:00:00Z","value":"0.9"}
{"id":"1005","code":"temp_basal","timestamp":"2024-01-01T13:00:00Z","payload":{"rate":0.45,"percent":50,"duration_minutes":60}}
{"id":"1006","code":"basal_rate","timestamp":"2024-01-01T13:01:00Z","value":"0.45","payload":{"temp":true}}
{"id":"1007","code":"profile_switch","timestamp":"2024-01-01T14:00:00Z","payload":{"profile":"Exercise"}}
{"id":"1008","code":"bg","timestamp":"2024-01-01T14:10:00Z","value":"118"}
{"id":"1009","code":"firmware_update","timestamp":"2024-01-01T14:20:00Z"}
{"id":"1010","code":"glucose_reading","timestamp":"2024-01-01T12:05:00Z","value":"150","deleted":true}
"#;

fn import_fixture(temp: &Path) {
    let output = pumpsync(temp, &["import"], Some(EVENTS), &[]);
    assert_success(&output, "import");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Imported 9 events (1 skipped)"), "{stdout}");
}

/// Full flow: import, reconcile as JSON, then read records back.
#[test]
fn test_import_reconcile_records() {
    let temp = TempDir::new().unwrap();
    import_fixture(temp.path());

    let output = pumpsync(temp.path(), &["reconcile", "--json"], None, &[]);
    assert_success(&output, "reconcile");
    let result: Value = serde_json::from_slice(&output.stdout).unwrap();

    let entry_ids: Vec<&str> = result["entries"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["id"].as_str().unwrap())
        .collect();
    assert_eq!(entry_ids, vec!["entry_1001"]);

    // Embedded bolus carbs win; the separate correction is suppressed.
    let carbs = result["carb_intakes"].as_array().unwrap();
    assert_eq!(carbs.len(), 1);
    assert_eq!(carbs[0]["id"], "carbs_1002");
    assert_eq!(carbs[0]["correlation_id"], "bolus_1002");

    // Confirmed rate folds into the program span.
    let spans = result["state_spans"].as_array().unwrap();
    let span_ids: Vec<&str> = spans.iter().map(|s| s["id"].as_str().unwrap()).collect();
    assert_eq!(span_ids, vec!["basal_1004", "basal_1005"]);
    assert_eq!(spans[0]["end_ms"], spans[1]["start_ms"]);
    assert_eq!(spans[1]["metadata"]["rate"], 0.45);
    assert!(spans[1]["end_ms"].is_null());

    let device_events = result["device_events"].as_array().unwrap();
    assert_eq!(device_events[0]["event_type"], "Profile Switch");
    assert_eq!(result["bg_checks"][0]["id"], "bg_1008");

    let output = pumpsync(temp.path(), &["records", "bolus"], None, &[]);
    assert_success(&output, "records");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1);
    let bolus: Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(bolus["id"], "bolus_1002");
    assert_eq!(bolus["insulin_units"], 4.2);
}

/// Reconciling twice stores the same records.
#[test]
fn test_reconcile_is_repeatable() {
    let temp = TempDir::new().unwrap();
    import_fixture(temp.path());

    let first = pumpsync(temp.path(), &["reconcile", "--json"], None, &[]);
    let second = pumpsync(temp.path(), &["reconcile", "--json"], None, &[]);
    assert_success(&first, "first reconcile");
    assert_success(&second, "second reconcile");
    assert_eq!(first.stdout, second.stdout);

    let status = pumpsync(temp.path(), &["status"], None, &[]);
    assert_success(&status, "status");
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("Events: 9"), "{stdout}");
    assert!(stdout.contains("Records: 8"), "{stdout}");
    assert!(stdout.contains("- state_span: 2"), "{stdout}");
}

/// Environment config and flags change a run; dry runs store nothing.
#[test]
fn test_env_config_and_dry_run() {
    let temp = TempDir::new().unwrap();
    import_fixture(temp.path());

    let output = pumpsync(
        temp.path(),
        &["reconcile", "--json", "--dry-run", "--no-carb-consolidation"],
        None,
        &[
            ("PUMPSYNC_RECONCILE__GLUCOSE_SYNC", "false"),
            ("PUMPSYNC_RECONCILE__TEMP_BASAL_WINDOW_MINUTES", "0"),
        ],
    );
    assert_success(&output, "reconcile");
    let result: Value = serde_json::from_slice(&output.stdout).unwrap();

    assert!(result["entries"].as_array().unwrap().is_empty());
    assert_eq!(result["carb_intakes"].as_array().unwrap().len(), 1);
    assert_eq!(result["carb_intakes"][0]["id"], "carbs_1003");
    assert_eq!(result["state_spans"].as_array().unwrap().len(), 3);

    let status = pumpsync(temp.path(), &["status"], None, &[]);
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("Records: 0"), "{stdout}");
}

/// Invalid input names the offending line.
#[test]
fn test_import_rejects_bad_line() {
    let temp = TempDir::new().unwrap();
    let input = "{\"id\":\"1\",\"code\":\"note\",\"timestamp\":\"2024-01-01T12:00:00Z\"}\n{oops\n";
    let output = pumpsync(temp.path(), &["import"], Some(input), &[]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid JSON on line 2"), "{stderr}");
}
