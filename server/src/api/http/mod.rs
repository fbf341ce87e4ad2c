//! HTTP and websocket API handlers

mod catalog;
mod health;
mod jail;
mod shell;
mod stream;
mod user;

use axum::{
    extract::FromRequest,
    response::Redirect,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::{AppState, Error};

/// JSON request body; a malformed body renders as an `InvalidRequest` error
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct ApiJson<T>(pub T);

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Jail actions
        .route("/controlSandbox", post(jail::control_sandbox))
        .route("/controlSandboxStream", post(jail::control_sandbox_stream))
        .route("/runSSHCommand", post(jail::run_ssh_command))
        .route("/runSSHCommandStream", post(jail::run_ssh_command_stream))
        .route("/createJail", post(jail::create_jail))
        .route("/createJailStream", post(jail::create_jail_stream))
        .route("/getSandboxes", get(jail::get_sandboxes))
        // User settings
        .route("/getUserDetails", get(user::get_user_details))
        .route("/saveUserDetails", post(user::save_user_details))
        .route("/setPaths", post(user::set_paths))
        .route("/disconnectSSH", post(user::disconnect_ssh));

    let ws_routes = Router::new()
        .route("/actionLogs", get(stream::action_logs))
        .route("/permanentSsh", get(shell::permanent_ssh))
        .route("/jailShell", get(shell::jail_shell));

    let static_files = ServeDir::new(&state.config.static_dir).append_index_html_on_directories(true);

    Router::new()
        .route("/", get(|| async { Redirect::to("/index.html") }))
        .route("/health", get(health::health_check))
        .route("/distros", get(catalog::list_distros))
        .route("/releases/{distro}", get(catalog::list_releases))
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
