use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{Duration, Utc};
use serde::Deserialize;

use crate::{
    auth::{PasswordError, generate_access_token, hash_access_token, hash_password, verify_password},
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::*,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .route("/logout", post(logout))
        .route("/change_password", post(change_password))
}

const USER_COLUMNS: &str = "user_id, username, display_name, password_hash, role, is_active";

fn profile(user: UserRow) -> UserProfile {
    UserProfile {
        user_id: user.user_id,
        username: user.username,
        display_name: user.display_name,
        role: user.role,
    }
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<DataResponse<LoginResponseData>>, ApiError> {
    let username = req.username.trim();
    if username.is_empty() || req.password.is_empty() {
        return Err(ApiError::validation("username and password are required"));
    }

    let user: UserRow = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM usuario WHERE username = $1"
    ))
    .bind(username)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::invalid_credentials)?;

    if !user.is_active {
        return Err(ApiError::Forbidden("FORBIDDEN", "Account is disabled".into()));
    }

    if !verify_password(&req.password, &user.password_hash) {
        tracing::info!(username, "failed login");
        return Err(ApiError::invalid_credentials());
    }

    let access_token = generate_access_token();
    let token_hash = hash_access_token(&access_token);
    let expires_at = Utc::now() + Duration::hours(state.session_ttl_hours);

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        INSERT INTO session_token (user_id, session_token_hash, device_name, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING session_token_id, expires_at
        "#,
    )
    .bind(user.user_id)
    .bind(&token_hash)
    .bind(req.device_name.as_deref())
    .bind(expires_at)
    .fetch_one(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    sqlx::query("UPDATE usuario SET last_login_at = now() WHERE user_id = $1")
        .bind(user.user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(username, role = user.role.as_str(), "login");

    Ok(Json(DataResponse::new(LoginResponseData {
        access_token,
        expires_at: session.expires_at,
        user: profile(user),
    })))
}

pub async fn me(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<DataResponse<MeResponseData>>, ApiError> {
    let user: UserRow = sqlx::query_as::<_, UserRow>(&format!(
        "SELECT {USER_COLUMNS} FROM usuario WHERE user_id = $1 AND is_active"
    ))
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    let session: SessionTokenRow = sqlx::query_as::<_, SessionTokenRow>(
        r#"
        SELECT session_token_id, expires_at
        FROM session_token
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
          AND expires_at > now()
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    Ok(Json(DataResponse::new(MeResponseData {
        user: profile(user),
        session: SessionInfo {
            session_token_id: session.session_token_id,
            expires_at: session.expires_at,
        },
    })))
}

pub async fn logout(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<OkResponse>, ApiError> {
    let rows = sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE session_token_id = $1
          AND user_id = $2
          AND revoked_at IS NULL
        "#,
    )
    .bind(auth.session_token_id)
    .bind(auth.user_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if rows.rows_affected() == 0 {
        return Err(ApiError::session_expired());
    }

    Ok(Json(OkResponse::ok()))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    pub new_password: String,
}

pub(crate) fn password_error(e: PasswordError) -> ApiError {
    match e {
        PasswordError::TooShort => ApiError::validation(e.to_string()),
        PasswordError::Hash(msg) => ApiError::Internal(msg),
    }
}

/// Replaces the caller's password and revokes their other sessions.
pub async fn change_password(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    if req.old_password.is_empty() || req.new_password.is_empty() {
        return Err(ApiError::validation("old_password and new_password are required"));
    }

    let current: String = sqlx::query_scalar(
        "SELECT password_hash FROM usuario WHERE user_id = $1 AND is_active",
    )
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(ApiError::session_expired)?;

    if !verify_password(&req.old_password, &current) {
        return Err(ApiError::invalid_credentials());
    }

    let new_hash = hash_password(&req.new_password).map_err(password_error)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query("UPDATE usuario SET password_hash = $1 WHERE user_id = $2")
        .bind(new_hash)
        .bind(auth.user_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    sqlx::query(
        r#"
        UPDATE session_token
        SET revoked_at = now()
        WHERE user_id = $1
          AND revoked_at IS NULL
          AND session_token_id <> $2
        "#,
    )
    .bind(auth.user_id)
    .bind(auth.session_token_id)
    .execute(&mut *tx)
    .await
    .map_err(ApiError::db)?;

    tx.commit().await.map_err(ApiError::db)?;

    Ok(Json(OkResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn short_password_is_a_validation_error() {
        assert_matches!(
            password_error(PasswordError::TooShort),
            ApiError::BadRequest("VALIDATION_ERROR", _)
        );
        assert_matches!(password_error(PasswordError::Hash("x".into())), ApiError::Internal(_));
    }

    #[test]
    fn login_request_accepts_missing_device() {
        let req: LoginRequest = serde_json::from_str(r#"{"username":"ana","password":"secret123"}"#).unwrap();
        assert_eq!(req.device_name, None);
    }
}
