//! User settings HTTP handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::info;

use crate::api::http::jail::UsernameQuery;
use crate::domain::endpoint::{RemoteEndpoint, UserDetails};
use super::ApiJson;
use crate::{AppState, Error, Result};

/// Save endpoint request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveUserDetailsRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub server_ip: String,
    #[serde(default, deserialize_with = "port_from_json")]
    pub server_port: u16,
    #[serde(default)]
    pub server_user: String,
    #[serde(default)]
    pub server_password: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// The settings form posts the port as text
#[derive(Deserialize)]
#[serde(untagged)]
enum PortField {
    Number(u64),
    Text(String),
}

/// Unparseable ports become 0 and are rejected by validation
fn port_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u16, D::Error> {
    let port = match PortField::deserialize(deserializer)? {
        PortField::Number(n) => u16::try_from(n).unwrap_or(0),
        PortField::Text(s) => s.trim().parse().unwrap_or(0),
    };
    Ok(port)
}

/// Replace paths request
#[derive(Debug, Deserialize)]
pub struct SetPathsRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct DisconnectRequest {
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct UserDetailsResponse {
    pub success: bool,
    pub details: UserDetails,
}

fn require_username(username: &str) -> Result<&str> {
    let username = username.trim();
    if username.is_empty() {
        Err(Error::MissingParameter("username".to_string()))
    } else {
        Ok(username)
    }
}

/// Stored settings of a user, without the server password
pub async fn get_user_details(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<UserDetailsResponse>> {
    let username = query.username.unwrap_or_default();
    let details = state
        .user_repository
        .get_details(require_username(&username)?)
        .await?;

    Ok(Json(UserDetailsResponse {
        success: true,
        details,
    }))
}

/// Store a user's remote endpoint and jail roots
pub async fn save_user_details(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SaveUserDetailsRequest>,
) -> Result<Json<MessageResponse>> {
    let username = require_username(&req.username)?;
    let endpoint = RemoteEndpoint {
        host: req.server_ip.trim().to_string(),
        port: req.server_port,
        login: req.server_user.trim().to_string(),
        password: req.server_password,
        paths: req.paths,
    };

    state.user_repository.save_details(username, &endpoint).await?;
    info!(user = %username, endpoint = %endpoint.address(), "Saved user details");

    Ok(Json(MessageResponse {
        success: true,
        message: "Details saved successfully.".to_string(),
    }))
}

pub async fn set_paths(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SetPathsRequest>,
) -> Result<Json<MessageResponse>> {
    let username = require_username(&req.username)?;
    state.user_repository.set_paths(username, &req.paths).await?;
    info!(user = %username, count = req.paths.len(), "Saved paths");

    Ok(Json(MessageResponse {
        success: true,
        message: "Paths saved successfully.".to_string(),
    }))
}

/// Close every interactive shell the user has open
pub async fn disconnect_ssh(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DisconnectRequest>,
) -> Result<Json<MessageResponse>> {
    let username = require_username(&req.username)?;
    let closed = state.shell_service.disconnect_user(username);

    Ok(Json(MessageResponse {
        success: true,
        message: format!("Closed {} SSH session(s).", closed),
    }))
}
