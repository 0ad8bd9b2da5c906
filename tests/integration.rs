use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn chx_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_chx"))
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let src_dir = root.join("project/src/shop");
    fs::create_dir_all(&src_dir).unwrap();
    fs::write(
        src_dir.join("Order.java"),
        "package shop;\n\n/** A customer order. */\npublic class Order {\n    private Customer customer;\n    private int quantity;\n\n    public int total(int unitPrice) {\n        int sum = quantity * unitPrice;\n        return sum > 0 ? sum : 0;\n    }\n}\n",
    )
    .unwrap();
    fs::write(
        src_dir.join("Customer.java"),
        "package shop;\n\npublic class Customer {\n    private String name;\n    private String email;\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("project/checkout.json"),
        "{\n  \"name\": \"Checkout\",\n  \"entity\": \"Order\",\n  \"payer\": \"Customer\"\n}\n",
    )
    .unwrap();
    fs::write(
        root.join("project/README.md"),
        "# Shop\n\nOrders belong to a Customer.\n\n## Pricing\n\nThe Order total multiplies quantity by price.\n",
    )
    .unwrap();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let config_content = format!(
        r#"[db]
path = "{root}/data/chx.sqlite"

[index]
root = "{root}/project"

[server]
bind = "127.0.0.1:7331"
"#,
        root = root.display()
    );
    let config_path = config_dir.join("chx.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_chx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = chx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run chx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_init_creates_database() {
    let (tmp, config_path) = setup_test_env();

    let (stdout, stderr, success) = run_chx(&config_path, &["init"]);
    assert!(success, "init failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/chx.sqlite").exists());
}

#[test]
fn test_init_idempotent() {
    let (_tmp, config_path) = setup_test_env();

    let (_, _, success1) = run_chx(&config_path, &["init"]);
    assert!(success1, "First init failed");
    let (_, _, success2) = run_chx(&config_path, &["init"]);
    assert!(success2, "Second init failed (not idempotent)");
}

#[test]
fn test_init_writes_default_config() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("chx.toml");

    let output = Command::new(chx_binary())
        .current_dir(tmp.path())
        .arg("--config")
        .arg(&config_path)
        .arg("init")
        .output()
        .unwrap();
    assert!(output.status.success());
    let written = fs::read_to_string(&config_path).unwrap();
    assert!(written.contains("[retrieval]"));
    assert!(written.contains("rrf_k"));
}

#[test]
fn test_index_dry_run_writes_nothing() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);

    let (stdout, stderr, success) =
        run_chx(&config_path, &["index", "--dry-run", "--progress", "off"]);
    assert!(success, "dry run failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("(dry-run)"));
    assert!(stdout.contains("java files: 2"));
    assert!(stdout.contains("ok"));

    let (stdout, _, success) = run_chx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Units:       0"));
}

#[test]
fn test_index_then_stats() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);

    let (stdout, stderr, success) = run_chx(&config_path, &["index", "--progress", "off"]);
    assert!(success, "index failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("stored:"));

    let (stdout, _, success) = run_chx(&config_path, &["stats"]);
    assert!(success);
    assert!(stdout.contains("Files:       4"));
    assert!(stdout.contains("By kind:"));
    assert!(stdout.contains("entity"));
    assert!(stdout.contains("Embedded:    0"));
}

#[test]
fn test_index_is_idempotent() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);

    run_chx(&config_path, &["index", "--progress", "off"]);
    let (first, _, _) = run_chx(&config_path, &["stats"]);
    run_chx(&config_path, &["index", "--progress", "off"]);
    let (second, _, _) = run_chx(&config_path, &["stats"]);

    let units = |s: &str| {
        s.lines()
            .find(|l| l.trim_start().starts_with("Units:"))
            .map(str::to_string)
    };
    assert_eq!(units(&first), units(&second));
}

#[test]
fn test_deps_resolves_config_references() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);
    run_chx(&config_path, &["index", "--progress", "off"]);

    let (stdout, stderr, success) = run_chx(&config_path, &["deps", "checkout.json"]);
    assert!(success, "deps failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("references 2 indexed entities"));
    assert!(stdout.contains("Customer"));
    assert!(stdout.contains("Order"));
}

#[test]
fn test_query_without_embeddings_fails() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);
    run_chx(&config_path, &["index", "--progress", "off"]);

    let (_, stderr, success) = run_chx(
        &config_path,
        &["query", "how is the price computed", "--progress", "off"],
    );
    assert!(!success);
    assert!(stderr.contains("disabled"));
}

#[test]
fn test_listing_query_needs_no_embeddings() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);
    run_chx(&config_path, &["index", "--progress", "off"]);

    let (stdout, stderr, success) = run_chx(
        &config_path,
        &["query", "list all classes", "--retrieve-only", "--progress", "off"],
    );
    assert!(success, "query failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("complete listing"));
    assert!(stdout.contains("Customer"));
    assert!(stdout.contains("Order"));
}

#[test]
fn test_unknown_kind_is_rejected() {
    let (_tmp, config_path) = setup_test_env();
    run_chx(&config_path, &["init"]);

    let (_, stderr, success) =
        run_chx(&config_path, &["query", "anything", "--kind", "method"]);
    assert!(!success);
    assert!(stderr.contains("Unknown kind"));
}
