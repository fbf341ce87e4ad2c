//! Integration tests for the Jailmaker Server
//!
//! These tests require a running server.
//! Run with: JAILMAKER_TEST_URL=http://127.0.0.1:8080 cargo test

use std::time::Duration;

use futures_util::StreamExt;
use integration_tests::*;
use tokio_tungstenite::{connect_async, tungstenite::Message};

// ============================================================================
// Health Tests
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let config = TestConfig::new();

    let response = config
        .client
        .get(config.api_url("/health"))
        .send()
        .await
        .expect("Failed to send health request");

    assert!(
        response.status().is_success(),
        "Health check failed with status: {}",
        response.status()
    );

    let health: HealthResponse = response.json().await.expect("Failed to parse health response");
    assert_eq!(health.status, "healthy");
    assert!(!health.version.is_empty());
}

#[tokio::test]
async fn test_health_check_response_time() {
    let config = TestConfig::new();

    let start = std::time::Instant::now();
    let response = config
        .client
        .get(config.api_url("/health"))
        .send()
        .await
        .expect("Failed to send health request");

    let elapsed = start.elapsed();
    assert!(response.status().is_success());
    assert!(
        elapsed.as_millis() < 500,
        "Health check took too long: {:?}",
        elapsed
    );
}

// ============================================================================
// User Settings Tests
// ============================================================================

#[tokio::test]
async fn test_save_and_get_user_details() {
    let config = TestConfig::new();
    let username = unique_username("details");
    save_unreachable_user(&config, &username, "integration-secret").await;

    let response = config
        .client
        .get(config.api_url("/api/getUserDetails"))
        .query(&[("username", username.as_str())])
        .send()
        .await
        .expect("Failed to get user details");
    assert!(response.status().is_success());

    let body = response.text().await.unwrap();
    assert!(
        !body.contains("integration-secret"),
        "Password leaked in user details"
    );

    let details: UserDetailsResponse = serde_json::from_str(&body).unwrap();
    assert!(details.success);
    assert_eq!(details.details.username, username);
    assert_eq!(details.details.server_ip, "127.0.0.1");
    assert_eq!(details.details.server_port, 1);
    assert_eq!(details.details.server_user, "admin");
    assert_eq!(details.details.paths, vec!["/mnt/tank/jails".to_string()]);
}

#[tokio::test]
async fn test_unknown_user_not_found() {
    let config = TestConfig::new();

    let response = config
        .client
        .get(config.api_url("/api/getUserDetails"))
        .query(&[("username", unique_username("ghost").as_str())])
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    let error: ErrorResponse = response.json().await.unwrap();
    assert!(!error.success);
    assert_eq!(error.code, 2001);
}

#[tokio::test]
async fn test_set_paths_rejects_relative_path() {
    let config = TestConfig::new();
    let username = unique_username("paths");
    save_unreachable_user(&config, &username, "pw").await;

    let response = config
        .client
        .post(config.api_url("/api/setPaths"))
        .json(&serde_json::json!({"username": username, "paths": ["jails"]}))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

    let response = config
        .client
        .post(config.api_url("/api/setPaths"))
        .json(&serde_json::json!({"username": username, "paths": ["/mnt/a", "/mnt/b"]}))
        .send()
        .await
        .expect("Failed to send request");
    let saved: MessageResponse = response.json().await.unwrap();
    assert!(saved.success);
}

// ============================================================================
// Jail Action Tests
// ============================================================================

#[tokio::test]
async fn test_control_sandbox_unknown_action() {
    let config = TestConfig::new();
    let username = unique_username("verb");
    save_unreachable_user(&config, &username, "pw").await;

    let response = config
        .client
        .post(config.api_url("/api/controlSandbox"))
        .json(&serde_json::json!({
            "action": "explode",
            "name": "web1",
            "path": "/mnt/tank/jails",
            "username": username
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreachable_host_reports_connection_error() {
    let config = TestConfig::new();
    let username = unique_username("offline");
    save_unreachable_user(&config, &username, "do-not-echo").await;

    let response = config
        .client
        .post(config.api_url("/api/controlSandbox"))
        .json(&serde_json::json!({
            "action": "start",
            "name": "web1",
            "path": "/mnt/tank/jails",
            "username": username
        }))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body = response.text().await.unwrap();
    assert!(!body.contains("do-not-echo"), "Password leaked in error");
}

#[tokio::test]
async fn test_get_sandboxes_requires_username() {
    let config = TestConfig::new();

    let response = config
        .client
        .get(config.api_url("/api/getSandboxes"))
        .send()
        .await
        .expect("Failed to send request");

    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
}

// ============================================================================
// Action Log Stream Tests
// ============================================================================

#[tokio::test]
async fn test_action_logs_report_failed_dispatch() {
    let config = TestConfig::new();
    let username = unique_username("stream");
    save_unreachable_user(&config, &username, "stream-secret").await;
    let action_id = uuid::Uuid::new_v4().to_string();

    let (mut socket, _) = connect_async(config.ws_url(&format!("/ws/actionLogs?actionId={}", action_id)))
        .await
        .expect("Failed to open action log socket");
    // Give the server time to subscribe before the action starts
    tokio::time::sleep(Duration::from_millis(200)).await;

    let response = config
        .client
        .post(config.api_url("/api/controlSandboxStream"))
        .json(&serde_json::json!({
            "action": "start",
            "name": "web1",
            "path": "/mnt/tank/jails",
            "username": username,
            "actionId": action_id
        }))
        .send()
        .await
        .expect("Failed to dispatch action");
    assert!(response.status().is_success());
    let dispatched: DispatchResponse = response.json().await.unwrap();
    assert!(dispatched.success);
    assert_eq!(dispatched.action_id, action_id);

    let mut frames = Vec::new();
    let done = tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(Ok(message)) = socket.next().await {
            if let Message::Text(text) = message {
                let text = text.as_str().to_string();
                let finished = text.contains(r#""type":"done""#);
                frames.push(text);
                if finished {
                    return true;
                }
            }
        }
        false
    })
    .await
    .expect("Timed out waiting for done frame");

    assert!(done, "Socket closed before done frame: {:?}", frames);
    assert!(frames.iter().any(|f| f.contains(r#""type":"error""#)));
    assert!(frames.last().unwrap().contains(r#""success":false"#));
    assert!(frames.iter().all(|f| !f.contains("stream-secret")));
}

#[tokio::test]
async fn test_action_logs_without_id() {
    let config = TestConfig::new();

    let (mut socket, _) = connect_async(config.ws_url("/ws/actionLogs"))
        .await
        .expect("Failed to open action log socket");

    let first = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .expect("Timed out waiting for frame");
    match first {
        Some(Ok(Message::Text(text))) => assert!(text.as_str().contains(r#""type":"error""#)),
        other => panic!("Expected error frame, got {:?}", other),
    }
}
