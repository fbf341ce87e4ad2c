//! Shared helpers for the jailmaker server integration tests

use serde::{Deserialize, Serialize};

/// Where the server under test listens
pub struct TestConfig {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl TestConfig {
    pub fn new() -> Self {
        let base_url = std::env::var("JAILMAKER_TEST_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8080".to_string());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Same path on the websocket scheme
    pub fn ws_url(&self, path: &str) -> String {
        let base = self
            .base_url
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{}{}", base, path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A username no other test run will collide with
pub fn unique_username(prefix: &str) -> String {
    format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveUserDetailsRequest {
    pub username: String,
    pub server_ip: String,
    pub server_port: String,
    pub server_user: String,
    pub server_password: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub username: String,
    pub server_ip: String,
    pub server_port: u16,
    pub server_user: String,
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserDetailsResponse {
    pub success: bool,
    pub details: UserDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    pub action_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub code: u32,
    pub message: String,
}

/// Register a user whose endpoint refuses connections
pub async fn save_unreachable_user(config: &TestConfig, username: &str, password: &str) {
    let request = SaveUserDetailsRequest {
        username: username.to_string(),
        server_ip: "127.0.0.1".to_string(),
        server_port: "1".to_string(),
        server_user: "admin".to_string(),
        server_password: password.to_string(),
        paths: vec!["/mnt/tank/jails".to_string()],
    };

    let response = config
        .client
        .post(config.api_url("/api/saveUserDetails"))
        .json(&request)
        .send()
        .await
        .expect("Failed to save user details");
    assert!(
        response.status().is_success(),
        "Save user details failed: {}",
        response.status()
    );
}
