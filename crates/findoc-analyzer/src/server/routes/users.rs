//! User registration and lookup

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    Json,
};
use serde::Deserialize;

use super::blocking;
use crate::error::{Error, Result};
use crate::server::state::AppState;
use crate::storage::User;

/// Body of `POST /users`
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// POST /users - Register a user
pub async fn create_user(
    State(state): State<AppState>,
    body: std::result::Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<Json<User>> {
    let Json(request) = body.map_err(|e| Error::InvalidRequest(e.body_text()))?;

    let username = request.username.trim().to_string();
    if username.is_empty() {
        return Err(Error::InvalidRequest("username must not be blank".to_string()));
    }
    let email = request
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty());

    let store = state.result_store().clone();
    let user = blocking(move || store.create_user(&username, email.as_deref())).await?;

    tracing::info!("Registered user {}", user.username);
    Ok(Json(user))
}

/// GET /users/:username - Look up a user
pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<User>> {
    let store = state.result_store().clone();
    let lookup = username.clone();

    blocking(move || store.get_user(&lookup))
        .await?
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("User '{}' not found", username)))
}
