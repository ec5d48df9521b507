//! CLI tests for the `linewatch` binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// A `linewatch` command isolated from the caller's environment.
fn linewatch(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("linewatch");
    cmd.current_dir(dir.path())
        .env_remove("LINEWATCH_BACKEND_URL")
        .env_remove("LINEWATCH_WS_URL")
        .env_remove("LINEWATCH_FALLBACK_INTERVAL_SECS")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(dir: &TempDir, content: &str) {
    let config_dir = dir.path().join(".linewatch");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(config_dir.join("linewatch.toml"), content).unwrap();
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help() {
        let dir = TempDir::new().unwrap();
        linewatch(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("watch"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        linewatch(&dir).arg("--version").assert().success();
    }

    #[test]
    fn test_invalid_identity_is_rejected() {
        let dir = TempDir::new().unwrap();
        linewatch(&dir)
            .args(["fetch", "bogus:value"])
            .assert()
            .failure();
    }
}

mod config {
    use super::*;

    #[test]
    fn test_show_prints_effective_toml() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"
[backend]
base_url = "http://factory-api:8080"
"#,
        );
        linewatch(&dir)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("http://factory-api:8080"))
            .stdout(predicate::str::contains("throttle_ms = 100"))
            .stdout(predicate::str::contains("linewatch.toml"));
    }

    #[test]
    fn test_cli_flag_overrides_file_and_env() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"
[backend]
base_url = "http://from-file:1"
"#,
        );
        linewatch(&dir)
            .env("LINEWATCH_BACKEND_URL", "http://from-env:2")
            .args(["--backend-url", "http://from-flag:3", "config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("http://from-flag:3"))
            .stdout(predicate::str::contains("from-env").not());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "");
        linewatch(&dir)
            .args(["config", "validate"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Configuration is valid"));
    }

    #[test]
    fn test_validate_reports_problems() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"
[backend]
ws_url = "http://not-a-socket"

[polling]
live_interval_secs = 0
"#,
        );
        linewatch(&dir)
            .args(["config", "validate"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("ws_url"))
            .stderr(predicate::str::contains("live_interval_secs"));
    }

    #[test]
    fn test_malformed_file_fails_to_load() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "[backend\nbase_url = ");
        linewatch(&dir)
            .args(["config", "show"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("configuration"));
    }
}

mod backend {
    use super::*;
    use assert_cmd::prelude::OutputAssertExt;
    use axum::routing::get;
    use axum::{Json, Router};
    use serde_json::json;

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route(
                "/api/display/tv",
                get(|| async {
                    Json(json!({"success": true, "data": {"maChuyenLine": "KV07M01", "lkth": 1234}}))
                }),
            )
            .route(
                "/api/display/lines",
                get(|| async {
                    Json(json!({"success": true, "lines": [
                        {"code": "KV07M01", "nhaMay": "TS1", "line": "1", "to": "1"},
                        {"code": "KV07CD01", "nhaMay": "TS1", "line": "1", "to": "CD"}
                    ]}))
                }),
            )
            .route(
                "/api/production/health",
                get(|| async { Json(json!({"status": "ok"})) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn run(args: Vec<String>) -> assert_cmd::assert::Assert {
        let output = tokio::task::spawn_blocking(move || {
            let dir = TempDir::new().unwrap();
            linewatch(&dir).args(&args).output().unwrap()
        })
        .await
        .unwrap();
        output.assert()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fetch_prints_snapshot_json() {
        let url = spawn_backend().await;
        run(vec!["--backend-url".into(), url, "fetch".into(), "KV07M01".into()])
            .await
            .success()
            .stdout(predicate::str::contains("\"maChuyenLine\": \"KV07M01\""))
            .stdout(predicate::str::contains("\"lkth\": 1234"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lines_filters_by_type() {
        let url = spawn_backend().await;
        run(vec!["--backend-url".into(), url, "lines".into(), "--type".into(), "cd".into()])
            .await
            .success()
            .stdout(predicate::str::contains("KV07CD01"))
            .stdout(predicate::str::contains("KV07M01 ").not());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_health() {
        let url = spawn_backend().await;
        run(vec!["--backend-url".into(), url, "health".into()])
            .await
            .success()
            .stdout(predicate::str::contains("ok"));
    }

    #[test]
    fn test_unreachable_backend_fails() {
        let dir = TempDir::new().unwrap();
        linewatch(&dir)
            .args(["--backend-url", "http://127.0.0.1:9", "health"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("unreachable"));
    }
}
