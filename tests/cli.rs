use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn setup_test_env(extra_sources: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();

    fs::write(
        root.join("schedule.txt"),
        "Day 1 opening ceremony at 10 AM.\n\nDay 2 closing party at 8 PM.",
    )
    .unwrap();

    let config = format!(
        r#"{{
  "bot_name": "EventBot",
  "port": 0,
  "storage": {{"path": "{root}/data/kb.sqlite"}},
  "embedding": {{"provider": "disabled"}},
  "completion": {{"provider": "disabled"}},
  "sources": [
    {{"id": "schedule", "type": "local_file", "target": "{root}/schedule.txt"}}{extra}
  ]
}}"#,
        root = root.display(),
        extra = extra_sources
    );
    let config_path = root.join("chatvat.config.json");
    fs::write(&config_path, config).unwrap();
    (tmp, config_path)
}

fn run_chatvat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_chatvat"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env("RUST_LOG", "warn")
        .env_remove("GROQ_API_KEY")
        .output()
        .expect("failed to run chatvat binary");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

#[test]
fn test_stats_on_fresh_store() {
    let (_tmp, config) = setup_test_env("");
    let (stdout, stderr, ok) = run_chatvat(&config, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Entries: 0"));
    assert!(stdout.contains("No refresh has run yet."));
}

#[test]
fn test_refresh_reports_and_journals() {
    let (_tmp, config) = setup_test_env(
        r#",
    {"id": "offline", "type": "local_file", "target": "/nonexistent/chatvat/missing.txt"}"#,
    );
    let (stdout, stderr, ok) = run_chatvat(&config, &["refresh"]);
    assert!(ok, "refresh failed: {}", stderr);
    assert!(stdout.contains("2 processed, 1 failed"));
    assert!(stdout.contains("fetch_failure"));
    // Embeddings are disabled, so nothing is stored yet.
    assert!(stdout.contains("embedding_unavailable"));

    let (stdout, _, ok) = run_chatvat(&config, &["stats"]);
    assert!(ok);
    assert!(stdout.contains("Entries: 0"));
    assert!(stdout.contains("Last refresh run:"));
}

#[test]
fn test_backup_writes_new_file() {
    let (tmp, config) = setup_test_env("");
    let dest = tmp.path().join("backups").join("kb-copy.sqlite");
    let (stdout, stderr, ok) = run_chatvat(&config, &["backup", dest.to_str().unwrap()]);
    assert!(ok, "backup failed: {}", stderr);
    assert!(stdout.contains("Backup written"));
    assert!(dest.exists());

    let (_, _, ok) = run_chatvat(&config, &["backup", dest.to_str().unwrap()]);
    assert!(!ok, "backup must not overwrite an existing file");
}

#[test]
fn test_invalid_config_refuses_to_start() {
    let tmp = TempDir::new().unwrap();
    let config = tmp.path().join("chatvat.config.json");
    fs::write(
        &config,
        r#"{"bot_name": "EventBot", "sources": [{"type": "carrier_pigeon", "target": "x"}]}"#,
    )
    .unwrap();
    let (_, stderr, ok) = run_chatvat(&config, &["stats"]);
    assert!(!ok);
    assert!(stderr.contains("config"));
}

#[test]
fn test_missing_config_file() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_chatvat(&tmp.path().join("absent.json"), &["stats"]);
    assert!(!ok);
    assert!(!stderr.is_empty());
}

#[test]
fn test_search_requires_working_embedder() {
    let (_tmp, config) = setup_test_env("");
    let (_, stderr, ok) = run_chatvat(&config, &["search", "opening ceremony"]);
    assert!(!ok);
    assert!(stderr.contains("embedding service unavailable"));
}

#[test]
fn test_ingestion_commands_skip_completion_provider() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    fs::write(root.join("schedule.txt"), "Day 1 opening ceremony at 10 AM.").unwrap();
    // Default completion provider (groq) with no API key in the environment.
    let config = format!(
        r#"{{
  "bot_name": "EventBot",
  "storage": {{"path": "{root}/data/kb.sqlite"}},
  "embedding": {{"provider": "disabled"}},
  "sources": [
    {{"id": "schedule", "type": "local_file", "target": "{root}/schedule.txt"}}
  ]
}}"#,
        root = root.display()
    );
    let config_path = root.join("chatvat.config.json");
    fs::write(&config_path, config).unwrap();

    let (stdout, stderr, ok) = run_chatvat(&config_path, &["stats"]);
    assert!(ok, "stats failed: {}", stderr);
    assert!(stdout.contains("Entries: 0"));

    let (stdout, stderr, ok) = run_chatvat(&config_path, &["refresh"]);
    assert!(ok, "refresh failed: {}", stderr);
    assert!(stdout.contains("1 processed, 0 failed"));

    let (_, stderr, ok) = run_chatvat(&config_path, &["ask", "When is Day 1?"]);
    assert!(!ok);
    assert!(stderr.contains("GROQ_API_KEY"));
}
