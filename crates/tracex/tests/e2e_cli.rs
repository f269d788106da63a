use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use serial_test::serial;

const SINCE: &str = "2026-01-31T23:00:00Z";
const UNTIL: &str = "2026-02-01T03:00:00Z";

fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn bin() -> &'static str {
    env!("CARGO_BIN_EXE_tracex")
}

fn command(temp: &Path) -> Command {
    let mut cmd = Command::new(bin());
    cmd.env("TRACEX_CONFIG", temp.join("missing-config.toml"));
    cmd.env_remove("TRACEX_QUERY_UDS_PATH");
    cmd
}

fn import_fixture(temp: &Path) -> PathBuf {
    let db_path = temp.join("tracex.duckdb");
    let input = temp.join("fixture.ndjson");
    std::fs::write(&input, testkit::sample_ndjson()).unwrap();

    let output = command(temp)
        .arg("import")
        .arg(&input)
        .arg("--db-path")
        .arg(&db_path)
        .output()
        .unwrap();
    assert!(output.status.success(), "import failed: {output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("imported spans=8 errors=3 occurrences=1 skipped=0"));
    db_path
}

fn spawn_server(temp: &Path, db_path: &Path) -> (Child, u16, u16, PathBuf) {
    let query_port = free_port();
    let query_http_port = free_port();
    let uds_path = temp.join("tracex.sock");

    let child = command(temp)
        .arg("serve")
        .arg("--db-path")
        .arg(db_path)
        .arg("--query-tcp-addr")
        .arg(format!("127.0.0.1:{query_port}"))
        .arg("--query-http-addr")
        .arg(format!("127.0.0.1:{query_http_port}"))
        .arg("--query-uds-path")
        .arg(&uds_path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    (child, query_port, query_http_port, uds_path)
}

async fn wait_http_ready(port: u16, child: &mut Child) {
    let client = reqwest::Client::new();
    let mut ready = false;
    for _ in 0..100 {
        assert!(child.try_wait().unwrap().is_none(), "tracex exited early");
        if client
            .get(format!("http://127.0.0.1:{port}/v1/status"))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
        {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(ready, "query http endpoint not ready");
}

#[tokio::test]
#[serial]
async fn e2e_import_serve_and_query_tcp() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = import_fixture(temp.path());
    let (mut child, query_port, query_http_port, _uds) = spawn_server(temp.path(), &db_path);
    wait_http_ready(query_http_port, &mut child).await;

    let output = command(temp.path())
        .arg("--json")
        .arg("traces")
        .arg("--since")
        .arg(SINCE)
        .arg("--until")
        .arg(UNTIL)
        .arg("--addr")
        .arg(format!("127.0.0.1:{query_port}"))
        .output()
        .unwrap();
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let data = value["Traces"]["data"].as_array().unwrap();
    let traces = data
        .iter()
        .map(|t| t["trace"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(
        traces,
        vec![
            testkit::WORKER_TRACE,
            testkit::HOME_TRACE,
            testkit::CHECKOUT_TRACE
        ]
    );

    let checkout = &data[2];
    assert_eq!(checkout["numErrors"], 2);
    assert_eq!(checkout["name"], "/checkout");
    assert_eq!(checkout["breakdowns"][0]["sliceEnd"], 40);
    assert!(checkout["breakdowns"][0].get("components").is_none());

    let human = command(temp.path())
        .arg("traces")
        .arg("-q")
        .arg("span.op:db.sql")
        .arg("--since")
        .arg(SINCE)
        .arg("--until")
        .arg(UNTIL)
        .arg("--addr")
        .arg(format!("127.0.0.1:{query_port}"))
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&human.stdout);
    assert!(stdout.contains("name=\"process_order\""));
    assert!(stdout.contains("-- 2 traces (2 discovered, 0 dropped) --"));

    let _ = child.kill();
    let _ = child.wait();
}

#[tokio::test]
#[serial]
async fn e2e_http_query_api_and_uds_status() {
    let temp = tempfile::tempdir().unwrap();
    let db_path = import_fixture(temp.path());
    let (mut child, _query_port, query_http_port, uds) = spawn_server(temp.path(), &db_path);
    wait_http_ready(query_http_port, &mut child).await;

    let body = serde_json::json!({
        "queries": ["span.op:db.sql", "project:web"],
        "suggested_query": "span.op:http.*",
        "window": {"since": SINCE, "until": UNTIL},
        "breakdown_slices": 20,
    });
    let resp = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{query_http_port}/v1/traces"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let value: serde_json::Value = resp.json().await.unwrap();
    let data = value["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["trace"], testkit::CHECKOUT_TRACE);
    assert_eq!(data[0]["suggestedSpans"][0]["id"], "a000000000000002");
    assert_eq!(data[0]["breakdowns"][0]["sliceEnd"], 20);

    let bad = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{query_http_port}/v1/traces"))
        .json(&serde_json::json!({"limit": 0}))
        .send()
        .await
        .unwrap();
    assert_eq!(bad.status(), reqwest::StatusCode::BAD_REQUEST);

    let status = command(temp.path())
        .arg("status")
        .arg("--uds")
        .arg(&uds)
        .output()
        .unwrap();
    let stdout = String::from_utf8_lossy(&status.stdout);
    assert!(stdout.contains("spans=8 traces=3 errors=3 occurrences=1"));

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
#[serial]
fn traces_without_server_fails() {
    let temp = tempfile::tempdir().unwrap();
    let output = command(temp.path())
        .arg("traces")
        .arg("--addr")
        .arg(format!("127.0.0.1:{}", free_port()))
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("connect query server TCP"));
}
