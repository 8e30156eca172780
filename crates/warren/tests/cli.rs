use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn warren_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("warren");
    path
}

const CONTENT: &str = r#"[
  {
    "kind": "compliance_rule",
    "status": "approved",
    "title": "No performance guarantees",
    "body": "Marketing must never promise or imply guaranteed investment returns.",
    "pinned": true
  },
  {
    "kind": "marketing_example",
    "status": "approved",
    "title": "Roth conversion newsletter",
    "body": "A Roth conversion can make sense in a year when your income is lower than usual.",
    "audience": "retirees",
    "tags": ["tax", "retirement"]
  },
  {
    "kind": "marketing_example",
    "status": "draft",
    "title": "Unreviewed market update",
    "body": "Markets moved this quarter and a Roth conversion may help."
  },
  {
    "kind": "reference",
    "status": "approved",
    "title": "Firm facts",
    "body": "The firm has served families in Ohio since 1998."
  },
  {
    "kind": "marketing_example",
    "title": "",
    "body": "An item without a title is rejected."
  }
]"#;

fn write_config(root: &Path, extra: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[db]
path = "{}/data/warren.sqlite"

[chunking]
max_tokens = 700

[server]
bind = "127.0.0.1:7341"

[logging]
level = "warn"
{}
"#,
        root.display(),
        extra
    );
    let config_path = config_dir.join("warren.toml");
    fs::write(&config_path, config_content).unwrap();
    config_path
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();
    fs::write(root.join("content.json"), CONTENT).unwrap();
    let config_path = write_config(&root, "");
    (tmp, config_path)
}

fn run_warren(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = warren_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .env_remove("RUST_LOG")
        .env_remove("ANTHROPIC_API_KEY")
        .env_remove("OPENAI_API_KEY")
        .output()
        .unwrap_or_else(|e| panic!("Failed to run warren binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

fn ingested(tmp: &TempDir, config_path: &Path) {
    let (stdout, stderr, success) = run_warren(config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    let file = tmp.path().join("content.json");
    let (stdout, stderr, success) = run_warren(config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_warren(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/warren.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_warren(&config_path, &["init"]);
    assert!(success1, "First init failed");

    let (_, _, success2) = run_warren(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_ingest_reports_counts() {
    let (tmp, config_path) = setup_test_env();
    run_warren(&config_path, &["init"]);

    let file = tmp.path().join("content.json");
    let (stdout, stderr, success) = run_warren(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("items: 4"), "stdout={}", stdout);
    assert!(stdout.contains("chunks: 4"), "stdout={}", stdout);
    assert!(stdout.contains("embedded: 0"));
    assert!(stdout.contains("skipped: 1"));
    assert!(stderr.contains("title must not be empty"));
}

#[test]
fn test_ingest_missing_file_errors() {
    let (tmp, config_path) = setup_test_env();
    run_warren(&config_path, &["init"]);

    let missing = tmp.path().join("nope.json");
    let (_, stderr, success) = run_warren(&config_path, &["ingest", missing.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read content file"));
}

#[test]
fn test_search_text_fallback_finds_approved_content() {
    let (tmp, config_path) = setup_test_env();
    ingested(&tmp, &config_path);

    let (stdout, stderr, success) = run_warren(&config_path, &["search", "roth conversion"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("strategy=text"), "stdout={}", stdout);
    assert!(stdout.contains("Roth conversion newsletter"));
    assert!(stdout.contains("audience: retirees"));
    // Drafts never surface.
    assert!(!stdout.contains("Unreviewed market update"));
}

#[test]
fn test_search_kind_filter() {
    let (tmp, config_path) = setup_test_env();
    ingested(&tmp, &config_path);

    let (stdout, _, success) = run_warren(
        &config_path,
        &["search", "roth conversion", "--kind", "reference"],
    );
    assert!(success);
    assert!(!stdout.contains("Roth conversion newsletter"));
}

#[test]
fn test_search_unknown_kind_errors() {
    let (_tmp, config_path) = setup_test_env();

    let (_, stderr, success) = run_warren(&config_path, &["search", "x", "--kind", "blog"]);
    assert!(!success);
    assert!(stderr.contains("Unknown content kind"));
}

#[test]
fn test_search_without_matches_uses_emergency_listing() {
    let (tmp, config_path) = setup_test_env();
    ingested(&tmp, &config_path);

    let (stdout, _, success) = run_warren(&config_path, &["search", "zebra"]);
    assert!(success);
    assert!(stdout.contains("strategy=emergency"), "stdout={}", stdout);
    assert!(stdout.contains("Firm facts"));
}

#[test]
fn test_search_empty_database_is_canned() {
    let (_tmp, config_path) = setup_test_env();
    run_warren(&config_path, &["init"]);

    let (stdout, _, success) = run_warren(&config_path, &["search", "roth"]);
    assert!(success);
    assert!(stdout.contains("strategy=canned"));
    assert!(stdout.contains("No results."));
}

#[test]
fn test_search_empty_query_errors() {
    let (_tmp, config_path) = setup_test_env();
    run_warren(&config_path, &["init"]);

    let (_, stderr, success) = run_warren(&config_path, &["search", "  "]);
    assert!(!success);
    assert!(stderr.contains("query must not be empty"));
}

#[test]
fn test_assemble_includes_pinned_compliance() {
    let (tmp, config_path) = setup_test_env();
    ingested(&tmp, &config_path);

    let (stdout, stderr, success) = run_warren(
        &config_path,
        &["assemble", "Write about Roth conversions", "--session", "s1"],
    );
    assert!(success, "assemble failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("## Compliance requirements (mandatory)"));
    assert!(stdout.contains("guaranteed investment returns"));
    assert!(stdout.contains("Roth conversion newsletter"));
    assert!(stdout.contains("[user] Write about Roth conversions"));
    assert!(!stdout.contains("built-in baseline"));
}

#[test]
fn test_assemble_empty_database_uses_baseline() {
    let (_tmp, config_path) = setup_test_env();
    run_warren(&config_path, &["init"]);

    let (stdout, _, success) = run_warren(
        &config_path,
        &["assemble", "Write a newsletter", "--session", "s1"],
    );
    assert!(success);
    assert!(stdout.contains("strategy:      canned"));
    assert!(stdout.contains("compliance:    built-in baseline"));
}

#[test]
fn test_generate_without_model_returns_fallback() {
    let (tmp, config_path) = setup_test_env();
    ingested(&tmp, &config_path);

    let (stdout, _, success) = run_warren(
        &config_path,
        &["generate", "Write about Roth conversions", "--session", "s1"],
    );
    assert!(success);
    assert!(stdout.contains("Warren can't draft content right now"));
    assert!(stdout.contains("fallback response"));
}

#[test]
fn test_embed_pending_errors_when_disabled() {
    let (_tmp, config_path) = setup_test_env();
    run_warren(&config_path, &["init"]);

    let (_, stderr, success) = run_warren(&config_path, &["embed", "pending"]);
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_retrieval_commands_run_without_llm_credentials() {
    let tmp = TempDir::new().unwrap();
    fs::write(tmp.path().join("content.json"), CONTENT).unwrap();
    let config_path = write_config(
        tmp.path(),
        "\n[llm]\nprovider = \"anthropic\"\nmodel = \"claude-test\"\n",
    );

    let file = tmp.path().join("content.json");
    let (stdout, stderr, success) = run_warren(&config_path, &["ingest", file.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("items: 4"));

    let (stdout, stderr, success) = run_warren(&config_path, &["search", "roth conversion"]);
    assert!(success, "search failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("Roth conversion newsletter"));

    let (_, stderr, success) = run_warren(
        &config_path,
        &["assemble", "Write about Roth conversions", "--session", "s1"],
    );
    assert!(success, "assemble failed: stderr={}", stderr);

    // Drafting is the one command that needs the key.
    let (_, stderr, success) = run_warren(
        &config_path,
        &["generate", "Write about Roth conversions", "--session", "s1"],
    );
    assert!(!success);
    assert!(stderr.contains("ANTHROPIC_API_KEY"), "stderr={}", stderr);
}

#[test]
fn test_embed_pending_limit_and_full_backfill() {
    let (tmp, config_path) = setup_test_env();
    ingested(&tmp, &config_path);

    let mut server = mockito::Server::new();
    let mock = server
        .mock("POST", "/api/embed")
        .match_body(mockito::Matcher::PartialJson(
            serde_json::json!({ "model": "nomic-test" }),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"embeddings":[[1.0,0.0]]}"#)
        .expect(4)
        .create();
    let config_path = write_config(
        tmp.path(),
        &format!(
            "\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-test\"\ndims = 2\nurl = \"{}\"\nmax_retries = 0\n",
            server.url()
        ),
    );

    let (stdout, stderr, success) =
        run_warren(&config_path, &["embed", "pending", "--limit", "1", "--batch-size", "1"]);
    assert!(success, "embed failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("total pending: 1"), "stdout={}", stdout);
    assert!(stdout.contains("embedded: 1"));

    let (stdout, stderr, success) =
        run_warren(&config_path, &["embed", "pending", "--batch-size", "1"]);
    assert!(success, "embed failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("total pending: 3"), "stdout={}", stdout);
    assert!(stdout.contains("embedded: 3"));
    assert!(stdout.contains("failed: 0"));

    let (stdout, _, success) = run_warren(&config_path, &["embed", "pending"]);
    assert!(success);
    assert!(stdout.contains("all chunks up to date"), "stdout={}", stdout);
    mock.assert();
}

#[test]
fn test_invalid_budget_shares_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(
        tmp.path(),
        "\n[context]\nexample_share = 0.6\ndocument_share = 0.3\nhistory_share = 0.3\n",
    );

    let (_, stderr, success) = run_warren(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("share"), "stderr={}", stderr);
}
