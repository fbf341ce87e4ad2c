//! Jail action HTTP handlers

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionId, ActionRequest, CreateSpec, LifecycleAction};
use crate::domain::endpoint::UserDetails;
use crate::domain::types::SandboxListing;
use super::ApiJson;
use crate::{AppState, Error, Result};

/// Lifecycle request, buffered or streamed
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSandboxRequest {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub username: String,
    pub action_id: Option<String>,
}

/// Arbitrary command request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub command: String,
    pub action_id: Option<String>,
}

/// Structured create request
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJailRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub name: String,
    pub spec: CreateSpec,
    pub action_id: Option<String>,
}

/// Username query parameter
#[derive(Debug, Deserialize)]
pub struct UsernameQuery {
    pub username: Option<String>,
}

/// Buffered action response
#[derive(Debug, Serialize)]
pub struct OutputResponse {
    pub success: bool,
    pub output: String,
}

/// Streamed action accepted; output follows on `/ws/actionLogs`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchResponse {
    pub success: bool,
    pub action_id: String,
}

/// Listing response
#[derive(Debug, Serialize)]
pub struct SandboxesResponse {
    pub success: bool,
    pub sandboxes: Vec<SandboxListing>,
    pub details: UserDetails,
}

impl ControlSandboxRequest {
    fn to_action(&self) -> Result<ActionRequest> {
        let verb = self.action.trim();
        if verb.is_empty() {
            return Err(Error::MissingParameter("action".to_string()));
        }
        let action = LifecycleAction::from_str(verb)
            .ok_or_else(|| Error::InvalidParameter(format!("unknown action: {}", verb)))?;

        Ok(ActionRequest::Lifecycle {
            action,
            name: self.name.clone(),
            path: self.path.clone(),
        })
    }
}

impl RunCommandRequest {
    fn to_action(&self) -> ActionRequest {
        ActionRequest::Raw {
            command: self.command.clone(),
        }
    }
}

impl CreateJailRequest {
    fn to_action(&self) -> ActionRequest {
        ActionRequest::Create {
            name: self.name.clone(),
            path: self.path.clone(),
            spec: self.spec.clone(),
        }
    }
}

/// Client-chosen id, or a fresh one
fn action_id(raw: Option<&str>) -> Result<ActionId> {
    match raw {
        Some(raw) => ActionId::parse(raw),
        None => Ok(ActionId::generate()),
    }
}

async fn run(state: &AppState, username: &str, action: ActionRequest) -> Result<Json<OutputResponse>> {
    let output = state.jail_service.run(username, &action).await?;
    Ok(Json(OutputResponse {
        success: true,
        output,
    }))
}

async fn dispatch(
    state: &AppState,
    username: &str,
    action: ActionRequest,
    raw_id: Option<&str>,
) -> Result<Json<DispatchResponse>> {
    let id = action_id(raw_id)?;
    state.jail_service.dispatch(username, &action, &id).await?;
    Ok(Json(DispatchResponse {
        success: true,
        action_id: id.to_string(),
    }))
}

/// Start, stop, restart or remove a jail and return its output
pub async fn control_sandbox(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ControlSandboxRequest>,
) -> Result<Json<OutputResponse>> {
    let action = req.to_action()?;
    run(&state, &req.username, action).await
}

/// Same as [`control_sandbox`], streamed to the action channel
pub async fn control_sandbox_stream(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ControlSandboxRequest>,
) -> Result<Json<DispatchResponse>> {
    let action = req.to_action()?;
    dispatch(&state, &req.username, action, req.action_id.as_deref()).await
}

/// Run an arbitrary command as root on the user's host
pub async fn run_ssh_command(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RunCommandRequest>,
) -> Result<Json<OutputResponse>> {
    run(&state, &req.username, req.to_action()).await
}

pub async fn run_ssh_command_stream(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RunCommandRequest>,
) -> Result<Json<DispatchResponse>> {
    dispatch(&state, &req.username, req.to_action(), req.action_id.as_deref()).await
}

/// Create a jail from structured options
pub async fn create_jail(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateJailRequest>,
) -> Result<Json<OutputResponse>> {
    run(&state, &req.username, req.to_action()).await
}

pub async fn create_jail_stream(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateJailRequest>,
) -> Result<Json<DispatchResponse>> {
    dispatch(&state, &req.username, req.to_action(), req.action_id.as_deref()).await
}

/// Raw `list` output for each configured jail root
pub async fn get_sandboxes(
    State(state): State<AppState>,
    Query(query): Query<UsernameQuery>,
) -> Result<Json<SandboxesResponse>> {
    let username = query
        .username
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::MissingParameter("username".to_string()))?;

    let sandboxes = state.jail_service.list_sandboxes(&username).await?;
    let details = state.user_repository.get_details(&username).await?;

    Ok(Json(SandboxesResponse {
        success: true,
        sandboxes,
        details,
    }))
}
