use std::process::Command;

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "playtest-cli-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

#[test]
fn cli_sandbox_run_writes_recordings_and_json_report() {
    let exe = env!("CARGO_BIN_EXE_playtest-tester");
    let recordings = temp_path("recordings");
    let output_path = temp_path("report.json");
    let status = Command::new(exe)
        .args([
            "--mode",
            "sandbox",
            "--iterations",
            "2",
            "--max-steps",
            "6",
            "--duration",
            "50",
            "--screenshot-interval",
            "0",
            "--report",
            "json",
            "--recordings-dir",
        ])
        .arg(&recordings)
        .arg("--output")
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());

    assert!(recordings.join("iter-001-general_playtest.json").exists());
    assert!(recordings.join("iter-002-general_playtest.json").exists());
    assert!(recordings.join("summary.json").exists());

    let content = std::fs::read_to_string(output_path).expect("read output");
    let report: serde_json::Value = serde_json::from_str(&content).expect("json report");
    assert_eq!(report["iterations_completed"], 2);
    assert_eq!(report["aborted"], false);
}

#[test]
fn cli_bug_repro_labels_recordings() {
    let exe = env!("CARGO_BIN_EXE_playtest-tester");
    let recordings = temp_path("repro");
    let status = Command::new(exe)
        .args([
            "--type",
            "bug-repro",
            "--target",
            "playerInBounds",
            "--iteration",
            "4",
            "--max-steps",
            "4",
            "--screenshot-interval",
            "0",
            "--recordings-dir",
        ])
        .arg(&recordings)
        .status()
        .expect("run cli");
    assert!(status.success());
    assert!(recordings.join("iter-004-bug_repro.json").exists());
}

#[test]
fn cli_unreachable_hub_fails() {
    let exe = env!("CARGO_BIN_EXE_playtest-tester");
    let recordings = temp_path("hub");
    let output = Command::new(exe)
        .args([
            "--mode",
            "browser",
            "--hub",
            "http://127.0.0.1:9",
            "--recordings-dir",
        ])
        .arg(&recordings)
        .output()
        .expect("run cli");
    assert!(!output.status.success());

    let content = std::fs::read_to_string(recordings.join("summary.json")).expect("summary");
    let summary: serde_json::Value = serde_json::from_str(&content).expect("json summary");
    assert_eq!(summary["aborted"], true);
    assert!(summary["abort_reason"].is_string());
}

#[test]
fn cli_missing_config_fails() {
    let exe = env!("CARGO_BIN_EXE_playtest-tester");
    let output = Command::new(exe)
        .arg("--config")
        .arg(temp_path("absent.json"))
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("reading config"));
}
