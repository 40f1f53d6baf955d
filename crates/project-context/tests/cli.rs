use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn pctx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("pctx");
    path
}

/// Temp root with `config/pctx.toml`, a small project, and an analysis file.
fn setup_test_env() -> (TempDir, PathBuf, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let project = root.join("project");
    fs::create_dir_all(project.join("src")).unwrap();
    fs::create_dir_all(project.join("target/debug")).unwrap();
    fs::write(
        project.join("README.md"),
        "# Demo\n\nA small service that reads its settings from TOML.",
    )
    .unwrap();
    fs::write(
        project.join("src/lib.rs"),
        "pub fn add(a: i32, b: i32) -> i32 {\n    a + b\n}\n",
    )
    .unwrap();
    fs::write(project.join("target/debug/out.txt"), "build output").unwrap();

    fs::write(
        root.join("analysis.json"),
        r#"{
  "technologies": [{"name": "Rust", "category": "language"}],
  "architecturalPatterns": [{"name": "Library crate"}],
  "fileStructureSummary": "src/ holds the library",
  "signals": {"manifestFound": true, "technologiesDetected": 1}
}"#,
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{}/data/pctx.sqlite"

[chunking]
chunk_size = 400
overlap = 40

[retrieval]
top_k = 3
"#,
        root.display()
    );
    let config_path = config_dir.join("pctx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, project)
}

fn run_pctx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = pctx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run pctx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path, _) = setup_test_env();

    let (stdout, stderr, success) = run_pctx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));

    let (_, _, success) = run_pctx(&config_path, &["init"]);
    assert!(success, "Second init failed (not idempotent)");
}

#[test]
fn test_index_without_embeddings_completes() {
    let (_tmp, config_path, project) = setup_test_env();
    run_pctx(&config_path, &["init"]);

    let (stdout, stderr, success) = run_pctx(
        &config_path,
        &["index", project.to_str().unwrap(), "--progress", "off"],
    );
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("files processed: 2"));
    assert!(stdout.contains("embeddings stored: 0"));
    assert!(stdout.trim_end().ends_with("ok"));
}

#[test]
fn test_index_json_output() {
    let (_tmp, config_path, project) = setup_test_env();

    let (stdout, stderr, success) = run_pctx(
        &config_path,
        &["index", project.to_str().unwrap(), "--json", "--user", "alice"],
    );
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["userId"], "alice");
    assert_eq!(json["totalFilesProcessed"], 2);
    assert_eq!(json["cancelled"], false);
}

#[test]
fn test_index_missing_path_fails() {
    let (tmp, config_path, _) = setup_test_env();
    let missing = tmp.path().join("nope");

    let (_, stderr, success) = run_pctx(&config_path, &["index", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("does not exist"));
}

#[test]
fn test_failed_index_closes_database() {
    let (tmp, config_path, _) = setup_test_env();
    run_pctx(&config_path, &["init"]);
    let missing = tmp.path().join("nope");

    let (_, _, success) = run_pctx(&config_path, &["index", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(!tmp.path().join("data/pctx.sqlite-wal").exists());

    let (stdout, _, success) = run_pctx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Vectors:     0"));
}

#[test]
fn test_context_store_show_list() {
    let (tmp, config_path, project) = setup_test_env();
    let analysis = tmp.path().join("analysis.json");
    let project = fs::canonicalize(project).unwrap();
    let project = project.to_str().unwrap();

    let (stdout, stderr, success) = run_pctx(
        &config_path,
        &["context", "store", project, "--file", analysis.to_str().unwrap()],
    );
    assert!(success, "store failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("version: 1"));
    assert!(stdout.contains("confidence: 0.70"));

    let (stdout, _, _) = run_pctx(
        &config_path,
        &["context", "store", project, "--file", analysis.to_str().unwrap()],
    );
    assert!(stdout.contains("version: 2"));

    let (stdout, _, success) = run_pctx(&config_path, &["context", "show", project]);
    assert!(success);
    let latest: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(latest["version"], 2);

    let (stdout, _, success) = run_pctx(&config_path, &["context", "list"]);
    assert!(success);
    assert!(stdout.contains(project));

    let (stdout, _, success) = run_pctx(&config_path, &["context", "list", "--user", "bob"]);
    assert!(success);
    assert!(stdout.contains("No projects"));

    let (stdout, _, success) = run_pctx(&config_path, &["context", "delete", project]);
    assert!(success);
    assert!(stdout.contains("deleted 2 version(s)"));
}

#[test]
fn test_prompt_falls_back_without_generation() {
    let (_tmp, config_path, project) = setup_test_env();

    let (stdout, stderr, success) = run_pctx(
        &config_path,
        &["prompt", project.to_str().unwrap(), "what does add do?", "--json"],
    );
    assert!(success, "prompt failed: stdout={}, stderr={}", stdout, stderr);
    let prepared: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(prepared["relevanceScore"], 0);
    assert_eq!(prepared["includesProjectDetails"], false);
}

#[test]
fn test_clear_and_stats() {
    let (_tmp, config_path, project) = setup_test_env();
    run_pctx(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_pctx(&config_path, &["clear", project.to_str().unwrap()]);
    assert!(success, "clear failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("rows removed: 0"));

    let (stdout, _, success) = run_pctx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Vectors:     0"));
}
