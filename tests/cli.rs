use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;

const ONE_FILE_DIFF: &str = "\
diff --git a/a.py b/a.py
--- a/a.py
+++ b/a.py
@@ -1 +1 @@
-x = 1
+x = 2
diff --git a/poetry.lock b/poetry.lock
--- a/poetry.lock
+++ b/poetry.lock
@@ -1 +1 @@
-v1
+v2
";

/// The binary with every variable it reads from the environment removed.
fn prwarden(dir: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_prwarden"));
    cmd.current_dir(dir);
    for var in [
        "OPENAI_API_KEY",
        "PRWARDEN_API_KEY",
        "GITHUB_TOKEN",
        "GITHUB_REPOSITORY",
        "GITHUB_EVENT_PATH",
        "PRWARDEN_CONFIG",
        "PRWARDEN_BASE_BRANCH",
        "PRWARDEN_DIFF_PATH",
        "PRWARDEN_REPORT_PATH",
        "PRWARDEN_PR",
        "PRWARDEN_MAX_CHUNK_BYTES",
        "PRWARDEN_RETRY_COUNT",
        "PRWARDEN_RETRY_BACKOFF_MS",
        "PRWARDEN_CONCURRENCY",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

/// Answer every request with `401 Unauthorized` until the test ends.
fn rejecting_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { break };
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            while let Ok(n) = stream.read(&mut chunk) {
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                    let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                    let len = headers
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            let body = r#"{"error":{"message":"Incorrect API key provided"}}"#;
            let response = format!(
                "HTTP/1.1 401 Unauthorized\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });
    format!("http://{addr}")
}

#[test]
fn empty_diff_dry_run_writes_no_changes_report() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("empty.diff"), "").unwrap();

    let output = prwarden(dir.path())
        .args([
            "review",
            "--dry-run",
            "--diff-file",
            "empty.diff",
            "--output",
            "out/review.md",
        ])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report = std::fs::read_to_string(dir.path().join("out/review.md")).unwrap();
    assert!(report.ends_with("\n\nNo changes to review.\n"));
    assert!(String::from_utf8_lossy(&output.stdout).contains("Not published"));
}

#[test]
fn missing_diff_file_exits_with_diff_unavailable() {
    let dir = tempfile::tempdir().unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--dry-run", "--diff-file", "nope.diff"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("review.md").exists());
}

#[test]
fn changes_without_api_key_fail_before_analysis() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pr.diff"), ONE_FILE_DIFF).unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--dry-run", "--diff-file", "pr.diff"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(!dir.path().join("review.md").exists());
}

#[test]
fn rejected_api_key_exits_with_auth_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pr.diff"), ONE_FILE_DIFF).unwrap();
    std::fs::write(
        dir.path().join(".prwarden.toml"),
        format!(
            "[llm]\nbase_url = \"{}\"\napi_key_env = \"PRWARDEN_TEST_KEY\"\ntimeout_secs = 10\n",
            rejecting_server()
        ),
    )
    .unwrap();

    let output = prwarden(dir.path())
        .env("PRWARDEN_TEST_KEY", "sk-should-not-leak")
        .args(["review", "--dry-run", "--diff-file", "pr.diff"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3));
    assert!(!dir.path().join("review.md").exists());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("sk-should-not-leak"));
}

#[test]
fn publishing_without_github_token_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("empty.diff"), "").unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--diff-file", "empty.diff", "--pr", "octo/app#1"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("GITHUB_TOKEN"));
}

#[test]
fn diff_json_lists_files_and_skips() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pr.diff"), ONE_FILE_DIFF).unwrap();

    let output = prwarden(dir.path())
        .args(["diff", "--diff-file", "pr.diff", "--format", "json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["bytes"], ONE_FILE_DIFF.len());
    let files = json["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["path"], "a.py");
    assert_eq!(files[0]["kind"], "modified");
    assert_eq!(files[0]["changedLines"], 2);
    assert!(files[0]["skipped"].is_null());
    assert_eq!(files[1]["skipped"], "lock file");
}

#[test]
fn invalid_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join(".prwarden.toml"), "[review]\nconcurrency = 0\n").unwrap();

    let output = prwarden(dir.path())
        .args(["diff", "--diff-file", "missing.diff"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("concurrency"));
}

#[test]
fn diff_out_creates_missing_directories() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("pr.diff"), ONE_FILE_DIFF).unwrap();

    let output = prwarden(dir.path())
        .args([
            "diff",
            "--diff-file",
            "pr.diff",
            "--diff-out",
            "artifacts/raw/diff.txt",
        ])
        .output()
        .unwrap();

    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let written = std::fs::read_to_string(dir.path().join("artifacts/raw/diff.txt")).unwrap();
    assert_eq!(written, ONE_FILE_DIFF);
}

#[test]
fn unsupported_provider_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("empty.diff"), "").unwrap();
    std::fs::write(
        dir.path().join(".prwarden.toml"),
        "[llm]\nprovider = \"anthropic\"\n",
    )
    .unwrap();

    let output = prwarden(dir.path())
        .args(["review", "--dry-run", "--diff-file", "empty.diff"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("anthropic"));
    assert!(!dir.path().join("review.md").exists());
}
