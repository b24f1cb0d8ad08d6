// src/routes/user_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::hash_password,
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, DataResponse, OkResponse, Role},
    routes::auth_routes::password_error,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct UserPublicRow {
    pub user_id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub display_name: String,
    pub role: Role,
    pub is_active: bool,
    pub last_login_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

const USER_PUBLIC_COLUMNS: &str =
    "user_id, username, email, display_name, role, is_active, last_login_at, created_at";

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub password: String,
    pub role: Role,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users).post(create_user))
        .route("/{user_id}", get(get_user).patch(update_user))
        .route("/{user_id}/disable", post(disable_user))
        .route("/{user_id}/enable", post(enable_user))
}

pub async fn list_users(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<DataResponse<Vec<UserPublicRow>>>, ApiError> {
    auth.ensure_admin()?;

    let users = sqlx::query_as::<_, UserPublicRow>(&format!(
        "SELECT {USER_PUBLIC_COLUMNS} FROM usuario ORDER BY username LIMIT 200"
    ))
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(users)))
}

pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<DataResponse<UserPublicRow>>, ApiError> {
    auth.ensure_admin()?;

    let user = sqlx::query_as::<_, UserPublicRow>(&format!(
        "SELECT {USER_PUBLIC_COLUMNS} FROM usuario WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("user"))?;

    Ok(Json(DataResponse::new(user)))
}

fn validate_username(username: &str) -> Result<(), ApiError> {
    let u = username.trim();
    if u.is_empty() {
        return Err(ApiError::validation("username is required"));
    }
    if u.chars().count() < 3 {
        return Err(ApiError::validation("username must be at least 3 characters"));
    }
    if u.chars().any(char::is_whitespace) {
        return Err(ApiError::validation("username must not contain spaces"));
    }
    Ok(())
}

pub(crate) fn validate_email(email: Option<&str>) -> Result<Option<String>, ApiError> {
    match email.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(e) if e.contains('@') && !e.starts_with('@') && !e.ends_with('@') => Ok(Some(e.to_lowercase())),
        Some(e) => Err(ApiError::validation(format!("invalid email '{e}'"))),
    }
}

pub async fn create_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<DataResponse<UserPublicRow>>, ApiError> {
    auth.ensure_admin()?;

    validate_username(&req.username)?;
    let email = validate_email(req.email.as_deref())?;
    let username = req.username.trim().to_string();
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(&username)
        .to_string();

    let pw_hash = hash_password(&req.password).map_err(password_error)?;

    let user = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        INSERT INTO usuario (username, email, display_name, password_hash, role, is_active)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {USER_PUBLIC_COLUMNS}
        "#
    ))
    .bind(&username)
    .bind(email)
    .bind(&display_name)
    .bind(&pw_hash)
    .bind(req.role)
    .bind(req.is_active.unwrap_or(true))
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::unique_or_db(e, "username already taken"))?;

    tracing::info!(username = %user.username, role = user.role.as_str(), "user created");

    Ok(Json(DataResponse::new(user)))
}

pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<DataResponse<UserPublicRow>>, ApiError> {
    auth.ensure_admin()?;

    let existing = sqlx::query_as::<_, UserPublicRow>(&format!(
        "SELECT {USER_PUBLIC_COLUMNS} FROM usuario WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("user"))?;

    let display_name = match req.display_name.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => existing.display_name.clone(),
    };
    let email = match req.email.as_deref() {
        Some(e) => validate_email(Some(e))?,
        None => existing.email.clone(),
    };
    let role = req.role.unwrap_or(existing.role);
    let is_active = req.is_active.unwrap_or(existing.is_active);

    if user_id == auth.user_id && (role != Role::Admin || !is_active) {
        return Err(ApiError::validation("you cannot demote or disable yourself"));
    }

    let updated = sqlx::query_as::<_, UserPublicRow>(&format!(
        r#"
        UPDATE usuario
        SET display_name = $1,
            email = $2,
            role = $3,
            is_active = $4
        WHERE user_id = $5
        RETURNING {USER_PUBLIC_COLUMNS}
        "#
    ))
    .bind(&display_name)
    .bind(email)
    .bind(role)
    .bind(is_active)
    .bind(user_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(updated)))
}

async fn set_active(state: &AppState, user_id: Uuid, active: bool) -> Result<(), ApiError> {
    let res = sqlx::query("UPDATE usuario SET is_active = $1 WHERE user_id = $2")
        .bind(active)
        .bind(user_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("user"));
    }

    if !active {
        // a disabled account loses its sessions immediately
        sqlx::query("UPDATE session_token SET revoked_at = now() WHERE user_id = $1 AND revoked_at IS NULL")
            .bind(user_id)
            .execute(&state.db)
            .await
            .map_err(ApiError::db)?;
    }
    Ok(())
}

pub async fn disable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;
    if user_id == auth.user_id {
        return Err(ApiError::validation("you cannot disable yourself"));
    }
    set_active(&state, user_id, false).await?;
    Ok(Json(OkResponse::ok()))
}

pub async fn enable_user(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(user_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;
    set_active(&state, user_id, true).await?;
    Ok(Json(OkResponse::ok()))
}
