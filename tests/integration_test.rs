// Integration tests for the bookmark-reconciler CLI
// Run with: cargo test --test integration_test

use std::fs;
use std::path::Path;
use std::process::Command;

fn run_cli(dir: &Path, args: &[&str]) -> (bool, String, String) {
    let output = Command::new(env!("CARGO_BIN_EXE_bookmark-reconciler"))
        .current_dir(dir)
        .args(["--database", "bookmarks.sqlite"])
        .args(args)
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (output.status.success(), stdout, stderr)
}

const BATCH: &str = r#"[
  {"id": "folderaaaaaa", "type": "folder", "parentid": "toolbar", "parentName": "Bookmarks Toolbar",
   "title": "Reading", "children": ["childaaaaaaa", "childbbbbbbb"], "modified": 1000},
  {"id": "childbbbbbbb", "type": "bookmark", "parentid": "folderaaaaaa", "parentName": "Reading",
   "title": "Second", "bmkUri": "https://b.example/", "modified": 1000},
  {"id": "childaaaaaaa", "type": "bookmark", "parentid": "folderaaaaaa", "parentName": "Reading",
   "title": "First", "bmkUri": "https://a.example/", "modified": 1000}
]"#;

#[test]
fn test_apply_then_tree() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("batch.json"), BATCH).unwrap();

    let (success, stdout, stderr) = run_cli(dir.path(), &["apply", "batch.json", "--quiet"]);
    assert!(success, "apply failed: {}", stderr);
    let summary: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(summary["stats"]["inserted"], 3);
    assert!(summary["tracked"]
        .as_array()
        .unwrap()
        .iter()
        .any(|g| g == "folderaaaaaa"));

    let (success, stdout, _) = run_cli(dir.path(), &["tree"]);
    assert!(success);
    let first = stdout.find("First").expect("First in tree");
    let second = stdout.find("Second").expect("Second in tree");
    assert!(first < second, "children should follow the folder's order");

    println!("✅ apply + tree works");
}

#[test]
fn test_apply_directory_and_export() {
    let dir = tempfile::tempdir().unwrap();
    let batches = dir.path().join("incoming");
    fs::create_dir(&batches).unwrap();
    fs::write(batches.join("01.json"), BATCH).unwrap();
    fs::write(
        batches.join("02.json"),
        r#"[{"id": "childbbbbbbb", "deleted": true, "modified": 5000}]"#,
    )
    .unwrap();

    let (success, _, stderr) = run_cli(dir.path(), &["apply", "incoming", "--quiet"]);
    assert!(success, "apply failed: {}", stderr);

    let (success, stdout, _) = run_cli(dir.path(), &["export", "--since", "5000"]);
    assert!(success);
    let records: Vec<serde_json::Value> = serde_json::from_str(&stdout).unwrap();
    assert!(records
        .iter()
        .any(|r| r["id"] == "childbbbbbbb" && r["deleted"] == true));

    println!("✅ directory apply + export works");
}

#[test]
fn test_add_and_validate() {
    let dir = tempfile::tempdir().unwrap();

    let (success, stdout, stderr) = run_cli(
        dir.path(),
        &["add", "--parent", "menu", "--title", "Docs", "--url", "https://docs.example/"],
    );
    assert!(success, "add failed: {}", stderr);
    assert_eq!(stdout.trim().len(), 12);

    let (success, stdout, _) = run_cli(dir.path(), &["validate", "--detailed"]);
    assert!(success);
    assert!(stdout.contains("Validation Report"), "Should show validation report");
    assert!(stdout.contains("Summary"), "Should show summary");

    let (success, _, _) = run_cli(dir.path(), &["add", "--parent", "nosuchfolder", "--title", "X", "--folder"]);
    assert!(!success, "adding under a missing folder should fail");

    println!("✅ add + validate works");
}

#[test]
fn test_wipe_requires_confirmation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("batch.json"), BATCH).unwrap();
    run_cli(dir.path(), &["apply", "batch.json", "--quiet"]);

    let (success, _, _) = run_cli(dir.path(), &["wipe"]);
    assert!(!success);

    let (success, _, _) = run_cli(dir.path(), &["wipe", "--yes"]);
    assert!(success);
    let (_, stdout, _) = run_cli(dir.path(), &["tree"]);
    assert!(!stdout.contains("Reading"));

    println!("✅ wipe works");
}

#[test]
fn test_help_output() {
    let dir = tempfile::tempdir().unwrap();
    let (success, stdout, _) = run_cli(dir.path(), &["--help"]);
    assert!(success);
    for command in ["apply", "export", "tree", "add", "validate", "wipe"] {
        assert!(stdout.contains(command), "help should list {}", command);
    }
}
