//! Distro catalog handlers

use axum::{
    extract::{Path, State},
    Json,
};

use crate::{AppState, Result};

/// Distros offered in the create form
pub async fn list_distros(State(state): State<AppState>) -> Result<Json<Vec<String>>> {
    Ok(Json(state.catalog.distros().await?))
}

/// Releases of one distro
pub async fn list_releases(
    State(state): State<AppState>,
    Path(distro): Path<String>,
) -> Result<Json<Vec<String>>> {
    Ok(Json(state.catalog.releases(&distro).await?))
}
