//! Integration tests for the Burrow REST server.
//!
//! Each test spawns the real binary against a temp data directory and drives
//! it over HTTP, verifying the endpoint surface and the error-status mapping.

use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncBufReadExt;

struct ServerHandle {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    async fn stop(mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.kill().await;
        let _ = self.child.wait().await;
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

/// Spawn the server on an ephemeral port and wait until it answers.
async fn start_server(data_dir: &std::path::Path) -> ServerHandle {
    let mut child = tokio::process::Command::new(env!("CARGO_BIN_EXE_burrow-server"))
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--no-discovery")
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("failed to spawn burrow-server");

    let stdout = child.stdout.take().expect("stdout piped");
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let port = tokio::time::timeout(Duration::from_secs(30), async {
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(rest) = line.strip_prefix("BURROW_PORT=") {
                return rest.trim().parse::<u16>().expect("port parses");
            }
        }
        panic!("server exited without announcing a port");
    })
    .await
    .expect("server did not start in time");

    // Keep draining stdout so the child never blocks on a full pipe.
    let drain = tokio::spawn(async move {
        while let Ok(Some(_)) = lines.next_line().await {}
    });

    // Wait for the router to come up.
    let deadline = std::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Ok((status, _)) = try_get(port, "/api/status").await {
            if status.is_success() {
                break;
            }
        }
        assert!(
            std::time::Instant::now() < deadline,
            "server never became ready"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    ServerHandle {
        child,
        port,
        stdout_drain: Some(drain),
    }
}

async fn try_get(port: u16, path: &str) -> Result<(reqwest::StatusCode, Value), reqwest::Error> {
    let response = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{}{}", port, path))
        .timeout(Duration::from_secs(5))
        .send()
        .await?;
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    Ok((status, body))
}

async fn get(port: u16, path: &str) -> (reqwest::StatusCode, Value) {
    try_get(port, path).await.expect("GET failed")
}

async fn post(port: u16, path: &str, body: Value) -> (reqwest::StatusCode, Value) {
    post_with_header(port, path, body, None).await
}

async fn post_with_header(
    port: u16,
    path: &str,
    body: Value,
    pairing_code: Option<&str>,
) -> (reqwest::StatusCode, Value) {
    let mut request = reqwest::Client::new()
        .post(format!("http://127.0.0.1:{}{}", port, path))
        .json(&body)
        .timeout(Duration::from_secs(10));
    if let Some(code) = pairing_code {
        request = request.header("X-Pairing-Code", code);
    }
    let response = request.send().await.expect("POST failed");
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

async fn delete(
    port: u16,
    path: &str,
    pairing_code: Option<&str>,
) -> (reqwest::StatusCode, Value) {
    let mut request = reqwest::Client::new()
        .delete(format!("http://127.0.0.1:{}{}", port, path))
        .timeout(Duration::from_secs(10));
    if let Some(code) = pairing_code {
        request = request.header("X-Pairing-Code", code);
    }
    let response = request.send().await.expect("DELETE failed");
    let status = response.status();
    let body = response.json::<Value>().await.unwrap_or(Value::Null);
    (status, body)
}

fn data(body: &Value) -> &Value {
    body.get("data").expect("envelope has data")
}

async fn pairing_code(port: u16) -> String {
    let (_, body) = get(port, "/api/pairing-code").await;
    data(&body)["pairing_code"]
        .as_str()
        .expect("pairing code is a string")
        .to_string()
}

#[tokio::test]
async fn test_status_and_info_surface() {
    let temp = TempDir::new().unwrap();
    let server = start_server(temp.path()).await;
    let port = server.port;

    let (status, body) = get(port, "/api/status").await;
    assert!(status.is_success());
    assert_eq!(body["success"], json!(true));
    let snapshot = data(&body);
    assert_eq!(snapshot["running"], json!(true));
    assert_eq!(snapshot["port"], json!(port));
    assert_eq!(snapshot["databases_count"], json!(0));
    assert_eq!(snapshot["active_connections"], json!(0));
    assert_eq!(snapshot["pairing_code"].as_str().unwrap().len(), 6);

    let (status, body) = get(port, "/api/info").await;
    assert!(status.is_success());
    let info = data(&body);
    assert_eq!(info["port"], json!(port));
    assert!(info["base_url"].as_str().unwrap().starts_with("http://"));

    server.stop().await;
}

#[tokio::test]
async fn test_database_lifecycle_over_rest() {
    let temp = TempDir::new().unwrap();
    let server = start_server(temp.path()).await;
    let port = server.port;
    let code = pairing_code(port).await;

    // Create.
    let (status, body) = post(
        port,
        "/api/databases",
        json!({ "name": "myapp", "client_app": "test-suite" }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    let record = data(&body);
    assert_eq!(record["name"], json!("myapp"));
    assert_eq!(record["status"], json!("Active"));
    let id = record["id"].as_str().unwrap().to_string();

    // Duplicate in the same client-app scope is a conflict.
    let (status, body) = post(
        port,
        "/api/databases",
        json!({ "name": "myapp", "client_app": "test-suite" }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CONFLICT);
    assert_eq!(body["success"], json!(false));

    // Same name under another app is allowed.
    let (status, _) = post(
        port,
        "/api/databases",
        json!({ "name": "myapp", "client_app": "other-app" }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);

    // List and single lookup.
    let (_, body) = get(port, "/api/databases").await;
    assert_eq!(data(&body).as_array().unwrap().len(), 2);
    let (status, body) = get(port, "/api/databases/myapp").await;
    assert!(status.is_success());
    assert_eq!(data(&body)["id"], json!(id));

    // Deletion needs the pairing code.
    let (status, _) = delete(port, "/api/databases/myapp", None).await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    let (status, _) = delete(port, "/api/databases/myapp", Some(&code)).await;
    assert!(status.is_success());

    // The first record by that name is gone; the other app's survives.
    let (_, body) = get(port, "/api/databases").await;
    let remaining = data(&body).as_array().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["client_app"], json!("other-app"));

    let (status, _) = delete(port, "/api/databases/ghost", Some(&code)).await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_query_flow_and_error_mapping() {
    let temp = TempDir::new().unwrap();
    let server = start_server(temp.path()).await;
    let port = server.port;
    let code = pairing_code(port).await;

    post(
        port,
        "/api/databases",
        json!({ "name": "myapp", "client_app": "test-suite" }),
    )
    .await;

    // Wrong code: rejected before touching the database.
    let (status, body) = post(
        port,
        "/api/query",
        json!({ "database": "myapp", "query": "SELECT 1", "pairing_code": "WRONG1" }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], json!(false));

    let run = |sql: &str| {
        let code = code.clone();
        let sql = sql.to_string();
        async move {
            post(
                port,
                "/api/query",
                json!({ "database": "myapp", "query": sql, "pairing_code": code }),
            )
            .await
        }
    };

    let (status, _) = run("CREATE TABLE users(id INTEGER, name TEXT)").await;
    assert!(status.is_success());

    let (status, body) = run("INSERT INTO users VALUES (1,'a')").await;
    assert!(status.is_success());
    assert_eq!(data(&body)["rows_affected"], json!(1));

    let (status, body) = run("SELECT * FROM users").await;
    assert!(status.is_success());
    let result = data(&body);
    assert_eq!(result["columns"], json!(["id", "name"]));
    assert_eq!(result["rows"], json!([[1, "a"]]));
    assert!(result.get("rows_affected").is_none());

    // Malformed SQL maps to 400 and changes nothing.
    let (status, body) = run("SELEKT * FROM users").await;
    assert_eq!(status, reqwest::StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("syntax"));
    let (status, body) = run("SELECT count(*) FROM users").await;
    assert!(status.is_success());
    assert_eq!(data(&body)["rows"], json!([[1]]));

    // Unknown database maps to 404.
    let (status, _) = post(
        port,
        "/api/query",
        json!({ "database": "ghost", "query": "SELECT 1", "pairing_code": code }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::NOT_FOUND);

    server.stop().await;
}

#[tokio::test]
async fn test_sessions_and_code_rotation() {
    let temp = TempDir::new().unwrap();
    let server = start_server(temp.path()).await;
    let port = server.port;
    let old_code = pairing_code(port).await;

    post(
        port,
        "/api/databases",
        json!({ "name": "myapp", "client_app": "test-suite" }),
    )
    .await;

    // Pairing with a bad code leaves the counter untouched.
    let (status, _) = post(port, "/api/pair", json!({ "pairing_code": "WRONG1" })).await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    let (_, body) = get(port, "/api/status").await;
    assert_eq!(data(&body)["active_connections"], json!(0));

    // Open a real session.
    let (status, body) = post(
        port,
        "/api/pair",
        json!({ "pairing_code": old_code, "client_app": "test-suite", "database": "myapp" }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    let session_id = data(&body)["id"].as_str().unwrap().to_string();
    let (_, body) = get(port, "/api/status").await;
    assert_eq!(data(&body)["active_connections"], json!(1));

    // Rotation requires the current code.
    let (status, _) = post_with_header(port, "/api/pairing-code", json!({}), None).await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);
    let (status, body) =
        post_with_header(port, "/api/pairing-code", json!({}), Some(&old_code)).await;
    assert!(status.is_success());
    let new_code = data(&body)["pairing_code"].as_str().unwrap().to_string();
    assert_ne!(new_code, old_code);

    // The rotated-out code stops authorizing new work immediately...
    let (status, _) = post(
        port,
        "/api/query",
        json!({ "database": "myapp", "query": "SELECT 1", "pairing_code": old_code }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::UNAUTHORIZED);

    // ...but the session opened before the rotation still works.
    let (_, body) = get(port, "/api/status").await;
    assert_eq!(data(&body)["active_connections"], json!(1));
    let (status, _) = post(
        port,
        "/api/query",
        json!({
            "database": "myapp",
            "query": "SELECT 1",
            "pairing_code": old_code,
            "session_id": session_id
        }),
    )
    .await;
    assert!(status.is_success());

    // Explicit disconnect.
    let (status, body) = delete(port, &format!("/api/pair/{}", session_id), None).await;
    assert!(status.is_success());
    assert_eq!(data(&body)["closed"], json!(true));
    let (_, body) = get(port, "/api/status").await;
    assert_eq!(data(&body)["active_connections"], json!(0));

    server.stop().await;
}

#[tokio::test]
async fn test_databases_survive_restart() {
    let temp = TempDir::new().unwrap();

    let server = start_server(temp.path()).await;
    let (status, _) = post(
        server.port,
        "/api/databases",
        json!({ "name": "durable", "client_app": "test-suite" }),
    )
    .await;
    assert_eq!(status, reqwest::StatusCode::CREATED);
    server.stop().await;

    let server = start_server(temp.path()).await;
    let (_, body) = get(server.port, "/api/databases").await;
    let records = data(&body).as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["name"], json!("durable"));
    server.stop().await;
}
