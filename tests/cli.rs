mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

use common::{eprint_body, eprint_uri, write_config, FakePds};

fn epx_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("epx");
    path
}

fn run_epx(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = epx_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run epx binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

/// Run the binary off the async runtime so the fake PDS keeps serving.
async fn run_epx_async(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let config_path = config_path.to_path_buf();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    tokio::task::spawn_blocking(move || {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        run_epx(&config_path, &args)
    })
    .await
    .unwrap()
}

fn offline_config() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = write_config(tmp.path(), "https://plc.directory");
    (tmp, config_path)
}

#[test]
fn test_init_is_idempotent() {
    let (_tmp, config) = offline_config();

    let (stdout, stderr, success) = run_epx(&config, &["init"]);
    assert!(success, "init failed: {}", stderr);
    assert!(stdout.contains("Database initialized successfully"));

    let (_, stderr, success) = run_epx(&config, &["init"]);
    assert!(success, "second init failed: {}", stderr);
}

#[test]
fn test_stats_on_empty_database() {
    let (_tmp, config) = offline_config();
    run_epx(&config, &["init"]);

    let (stdout, stderr, success) = run_epx(&config, &["stats"]);
    assert!(success, "stats failed: {}", stderr);
    assert!(stdout.contains("Records:     0"));
    assert!(stdout.contains("Graph:       0 papers, 0 citations"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("epx.toml");
    fs::write(
        &config_path,
        format!(
            "[db]\npath = \"{}/epx.sqlite\"\n\n[sync]\nsweep_limit = 0\n",
            tmp.path().display()
        ),
    )
    .unwrap();

    let (_, stderr, success) = run_epx(&config_path, &["init"]);
    assert!(!success);
    assert!(stderr.contains("sweep_limit"), "stderr: {}", stderr);
}

#[test]
fn test_missing_config_fails() {
    let (_, stderr, success) = run_epx(Path::new("/nonexistent/epx.toml"), &["init"]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_pds_registry() {
    let (_tmp, config) = offline_config();

    let (_, _, success) = run_epx(&config, &["pds", "add", "ftp://pds.example.com"]);
    assert!(!success);

    let (stdout, stderr, success) = run_epx(&config, &["pds", "add", "https://pds.example.com/"]);
    assert!(success, "pds add failed: {}", stderr);
    assert!(stdout.contains("Registered https://pds.example.com"));

    let (stdout, _, success) = run_epx(&config, &["pds", "list"]);
    assert!(success);
    assert!(stdout.contains("https://pds.example.com"));
    assert!(stdout.contains("never"));
}

#[test]
fn test_metrics_record_and_show() {
    let (_tmp, config) = offline_config();
    let uri = eprint_uri("m1");

    for actor in ["did:plc:x", "did:plc:y", "did:plc:x"] {
        let (stdout, stderr, success) =
            run_epx(&config, &["metrics", "view", &uri, "--actor", actor]);
        assert!(success, "view failed: {}", stderr);
        assert!(stdout.is_empty(), "single events record silently");
    }
    run_epx(&config, &["metrics", "dwell", &uri, "4000"]);
    run_epx(&config, &["metrics", "search-click", &uri]);

    let (stdout, stderr, success) = run_epx(&config, &["metrics", "show", &uri]);
    assert!(success, "show failed: {}", stderr);
    let metrics: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(metrics["totalViews"], 3);
    assert_eq!(metrics["uniqueViews"], 2);
    assert_eq!(metrics["views24h"], 3);
    assert_eq!(metrics["searchClicks"], 1);
    assert_eq!(metrics["avgDwellTimeMs"], 4000);

    let (stdout, _, success) = run_epx(&config, &["metrics", "trending", "--window", "7d"]);
    assert!(success);
    let trending: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(trending[0]["subjectUri"], uri.as_str());
    assert_eq!(trending[0]["score"], 3);

    let (_, _, success) = run_epx(&config, &["metrics", "trending", "--window", "1y"]);
    assert!(!success);

    let (stdout, _, success) = run_epx(&config, &["metrics", "flush"]);
    assert!(success);
    assert!(stdout.contains("Flushed metrics for 1 subjects"));
}

#[test]
fn test_metrics_batch_file() {
    let (tmp, config) = offline_config();
    let uri = eprint_uri("m2");
    let events = tmp.path().join("events.json");
    fs::write(
        &events,
        serde_json::json!([
            { "type": "view", "uri": uri },
            { "type": "download", "uri": uri, "actorId": "did:plc:z" },
            { "type": "searchDownload", "uri": uri }
        ])
        .to_string(),
    )
    .unwrap();

    let (stdout, stderr, success) =
        run_epx(&config, &["metrics", "batch", events.to_str().unwrap()]);
    assert!(success, "batch failed: {}", stderr);
    assert!(stdout.contains("Recorded 3 events"));

    let (stdout, _, _) = run_epx(&config, &["metrics", "show", &uri]);
    let metrics: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(metrics["totalViews"], 1);
    assert_eq!(metrics["totalDownloads"], 1);
    assert_eq!(metrics["uniqueDownloads"], 1);
    assert_eq!(metrics["searchDownloads"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_index_check_cite_and_delete() {
    let pds = FakePds::start().await;
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), &pds.url);

    let a = eprint_uri("a");
    let b = eprint_uri("b");
    pds.put(&a, "bafya1", eprint_body("A"));
    pds.put(&b, "bafyb1", eprint_body("B"));

    let (_, stderr, success) = run_epx_async(&config, &["init"]).await;
    assert!(success, "init failed: {}", stderr);

    let (stdout, stderr, success) = run_epx_async(&config, &["index", &a]).await;
    assert!(success, "index failed: {}", stderr);
    assert!(stdout.contains("pub.chive.eprint.submission"));
    let (_, stderr, success) = run_epx_async(&config, &["index", &b, "--pds", &pds.url]).await;
    assert!(success, "index with hint failed: {}", stderr);

    let (stdout, _, success) = run_epx_async(&config, &["check", &a]).await;
    assert!(success);
    let check: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(check["isStale"], false);
    assert_eq!(check["indexedCID"], "bafya1");

    pds.put(&a, "bafya2", eprint_body("A, revised"));
    let (stdout, _, _) = run_epx_async(&config, &["check", &a]).await;
    let check: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(check["isStale"], true);

    let (stdout, stderr, success) = run_epx_async(&config, &["refresh", &a]).await;
    assert!(success, "refresh failed: {}", stderr);
    let outcome: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["changed"], true);
    assert_eq!(outcome["currentCID"], "bafya2");

    let citations = tmp.path().join("citations.json");
    fs::write(
        &citations,
        serde_json::json!([
            { "citingUri": a, "citedUri": b, "source": "cli-test" },
            { "citingUri": a, "citedUri": eprint_uri("elsewhere"), "source": "cli-test" }
        ])
        .to_string(),
    )
    .unwrap();
    let (stdout, stderr, success) =
        run_epx_async(&config, &["citations", "import", citations.to_str().unwrap()]).await;
    assert!(success, "import failed: {}", stderr);
    let outcome: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(outcome["materialized"], 1);
    assert_eq!(outcome["skipped"], 1);

    let (stdout, _, success) = run_epx_async(&config, &["citations", "citing", &b]).await;
    assert!(success);
    let page: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(page["total"], 1);
    assert_eq!(page["citations"][0]["citingUri"], a.as_str());

    let (_, _, success) =
        run_epx_async(&config, &["citations", "references", &a, "--limit", "0"]).await;
    assert!(!success);

    let (stdout, stderr, success) = run_epx_async(&config, &["delete", &a]).await;
    assert!(success, "delete failed: {}", stderr);
    assert!(stdout.contains("Deleted"));

    let (stdout, _, _) = run_epx_async(&config, &["citations", "citing", &b]).await;
    let page: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(page["total"], 0);

    let (stdout, _, _) = run_epx_async(&config, &["check", &a]).await;
    assert!(stdout.contains("not indexed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_refresh_missing_record_fails_with_code() {
    let pds = FakePds::start().await;
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), &pds.url);

    let uri = eprint_uri("vanishing");
    pds.put(&uri, "bafyv", eprint_body("V"));
    let (_, stderr, success) = run_epx_async(&config, &["index", &uri]).await;
    assert!(success, "index failed: {}", stderr);

    pds.remove(&uri);
    let (stdout, _, success) = run_epx_async(&config, &["refresh", &uri, "--retry"]).await;
    assert!(!success);
    assert!(stdout.contains("\"NotFound\""));

    // Not-found is definitive: one getRecord for index, one for refresh.
    assert_eq!(pds.get_calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sweep_reports_counts() {
    let pds = FakePds::start().await;
    let tmp = TempDir::new().unwrap();
    let config = write_config(tmp.path(), &pds.url);

    let keep = eprint_uri("keep");
    let gone = eprint_uri("gone");
    pds.put(&keep, "bafyk", eprint_body("K"));
    pds.put(&gone, "bafyg", eprint_body("G"));
    run_epx_async(&config, &["index", &keep]).await;
    run_epx_async(&config, &["index", &gone]).await;
    pds.remove(&gone);

    let (stdout, stderr, success) =
        run_epx_async(&config, &["sweep", "--max-age-secs", "0"]).await;
    assert!(success, "sweep failed: {}", stderr);
    assert!(stdout.contains("examined:  2"));
    assert!(stdout.contains("refreshed: 1"));
    assert!(stdout.contains("not found: 1"));
}
