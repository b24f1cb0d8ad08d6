// src/routes/service_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{AppState, DataResponse, ListQuery, OkResponse, clean_opt, deserialize_double_option, patch_text},
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct CategoryRow {
    pub categoria_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ServiceRow {
    pub servicio_id: Uuid,
    pub categoria_id: Option<Uuid>,
    pub category_name: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub duration_min: i32,
    pub price_cents: i64,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const SERVICE_SELECT: &str = r#"
    SELECT s.servicio_id, s.categoria_id, c.name AS category_name, s.name, s.description,
           s.duration_min, s.price_cents, s.is_active, s.created_at, s.updated_at
    FROM servicio s
    LEFT JOIN categoria c ON c.categoria_id = s.categoria_id
"#;

#[derive(Debug, Deserialize)]
pub struct CategoryRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateServiceRequest {
    pub name: String,
    pub categoria_id: Option<Uuid>,
    pub description: Option<String>,
    pub duration_min: i32,
    pub price_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateServiceRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub categoria_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub description: Option<Option<String>>,
    pub duration_min: Option<i32>,
    pub price_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceQuery {
    pub q: Option<String>,
    pub categoria_id: Option<Uuid>,
    #[serde(default)]
    pub include_inactive: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route(
            "/categories/{categoria_id}",
            axum::routing::patch(update_category).delete(deactivate_category),
        )
        .route("/categories/{categoria_id}/services", get(list_category_services))
        .route("/services", get(list_services).post(create_service))
        .route(
            "/services/{servicio_id}",
            get(get_service).patch(update_service).delete(deactivate_service),
        )
}

fn validate_service_numbers(duration_min: i32, price_cents: i64) -> Result<(), ApiError> {
    if duration_min <= 0 {
        return Err(ApiError::validation("duration_min must be greater than 0"));
    }
    if price_cents < 0 {
        return Err(ApiError::validation("price_cents cannot be negative"));
    }
    Ok(())
}

/* -------------------------
   Categories
--------------------------*/

pub async fn list_categories(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<DataResponse<Vec<CategoryRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, CategoryRow>(
        r#"
        SELECT categoria_id, name, description, is_active, created_at
        FROM categoria
        WHERE ($1::text IS NULL OR name ILIKE $1)
          AND ($2 OR is_active)
        ORDER BY name
        "#,
    )
    .bind(q.like_pattern())
    .bind(q.include_inactive)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}

pub async fn create_category(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<DataResponse<CategoryRow>>, ApiError> {
    auth.ensure_admin()?;
    let name = clean_opt(req.name.as_deref()).ok_or_else(|| ApiError::validation("name is required"))?;

    let row = sqlx::query_as::<_, CategoryRow>(
        r#"
        INSERT INTO categoria (name, description)
        VALUES ($1, $2)
        RETURNING categoria_id, name, description, is_active, created_at
        "#,
    )
    .bind(name)
    .bind(clean_opt(req.description.flatten().as_deref()))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(row)))
}

pub async fn update_category(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(categoria_id): Path<Uuid>,
    Json(req): Json<CategoryRequest>,
) -> Result<Json<DataResponse<CategoryRow>>, ApiError> {
    auth.ensure_admin()?;

    let existing = sqlx::query_as::<_, CategoryRow>(
        "SELECT categoria_id, name, description, is_active, created_at FROM categoria WHERE categoria_id = $1",
    )
    .bind(categoria_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("category"))?;

    let name = match req.name.as_deref() {
        Some(n) => clean_opt(Some(n)).ok_or_else(|| ApiError::validation("name cannot be empty"))?,
        None => existing.name,
    };

    let row = sqlx::query_as::<_, CategoryRow>(
        r#"
        UPDATE categoria
        SET name = $1, description = $2
        WHERE categoria_id = $3
        RETURNING categoria_id, name, description, is_active, created_at
        "#,
    )
    .bind(name)
    .bind(patch_text(req.description, existing.description))
    .bind(categoria_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(row)))
}

pub async fn deactivate_category(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(categoria_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;

    let res = sqlx::query("UPDATE categoria SET is_active = false WHERE categoria_id = $1 AND is_active")
        .bind(categoria_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("category"));
    }
    Ok(Json(OkResponse::ok()))
}

pub async fn list_category_services(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(categoria_id): Path<Uuid>,
) -> Result<Json<DataResponse<Vec<ServiceRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, ServiceRow>(&format!(
        "{SERVICE_SELECT} WHERE s.categoria_id = $1 AND s.is_active ORDER BY s.name"
    ))
    .bind(categoria_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}

/* -------------------------
   Services
--------------------------*/

async fn load_service(state: &AppState, servicio_id: Uuid) -> Result<ServiceRow, ApiError> {
    sqlx::query_as::<_, ServiceRow>(&format!("{SERVICE_SELECT} WHERE s.servicio_id = $1"))
        .bind(servicio_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("service"))
}

async fn check_category(state: &AppState, categoria_id: Option<Uuid>) -> Result<(), ApiError> {
    let Some(id) = categoria_id else {
        return Ok(());
    };
    let ok: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM categoria WHERE categoria_id = $1 AND is_active)")
        .bind(id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;
    if ok { Ok(()) } else { Err(ApiError::not_found("category")) }
}

pub async fn list_services(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ServiceQuery>,
) -> Result<Json<DataResponse<Vec<ServiceRow>>>, ApiError> {
    let like = q
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let rows = sqlx::query_as::<_, ServiceRow>(&format!(
        r#"
        {SERVICE_SELECT}
        WHERE ($1::text IS NULL OR s.name ILIKE $1 OR s.description ILIKE $1)
          AND ($2::uuid IS NULL OR s.categoria_id = $2)
          AND ($3 OR s.is_active)
        ORDER BY c.name NULLS LAST, s.name
        "#
    ))
    .bind(like)
    .bind(q.categoria_id)
    .bind(q.include_inactive)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}

pub async fn get_service(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(servicio_id): Path<Uuid>,
) -> Result<Json<DataResponse<ServiceRow>>, ApiError> {
    Ok(Json(DataResponse::new(load_service(&state, servicio_id).await?)))
}

pub async fn create_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateServiceRequest>,
) -> Result<Json<DataResponse<ServiceRow>>, ApiError> {
    auth.ensure_admin()?;

    let name = clean_opt(Some(&req.name)).ok_or_else(|| ApiError::validation("name is required"))?;
    validate_service_numbers(req.duration_min, req.price_cents)?;
    check_category(&state, req.categoria_id).await?;

    let servicio_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO servicio (categoria_id, name, description, duration_min, price_cents)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING servicio_id
        "#,
    )
    .bind(req.categoria_id)
    .bind(name)
    .bind(clean_opt(req.description.as_deref()))
    .bind(req.duration_min)
    .bind(req.price_cents)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(%servicio_id, "service created");
    Ok(Json(DataResponse::new(load_service(&state, servicio_id).await?)))
}

/// Price and duration changes apply to new bookings only; existing
/// appointments keep their snapshotted duration.
pub async fn update_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(servicio_id): Path<Uuid>,
    Json(req): Json<UpdateServiceRequest>,
) -> Result<Json<DataResponse<ServiceRow>>, ApiError> {
    auth.ensure_admin()?;

    let existing = load_service(&state, servicio_id).await?;

    let name = match req.name.as_deref() {
        Some(n) => clean_opt(Some(n)).ok_or_else(|| ApiError::validation("name cannot be empty"))?,
        None => existing.name.clone(),
    };
    let duration_min = req.duration_min.unwrap_or(existing.duration_min);
    let price_cents = req.price_cents.unwrap_or(existing.price_cents);
    validate_service_numbers(duration_min, price_cents)?;

    let categoria_id = req.categoria_id.unwrap_or(existing.categoria_id);
    if categoria_id != existing.categoria_id {
        check_category(&state, categoria_id).await?;
    }

    sqlx::query(
        r#"
        UPDATE servicio
        SET categoria_id = $1,
            name = $2,
            description = $3,
            duration_min = $4,
            price_cents = $5,
            updated_at = now()
        WHERE servicio_id = $6
        "#,
    )
    .bind(categoria_id)
    .bind(name)
    .bind(patch_text(req.description, existing.description))
    .bind(duration_min)
    .bind(price_cents)
    .bind(servicio_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(load_service(&state, servicio_id).await?)))
}

pub async fn deactivate_service(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(servicio_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;

    let res = sqlx::query("UPDATE servicio SET is_active = false, updated_at = now() WHERE servicio_id = $1 AND is_active")
        .bind(servicio_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("service"));
    }
    Ok(Json(OkResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_numbers_validated() {
        assert!(validate_service_numbers(30, 0).is_ok());
        assert!(validate_service_numbers(0, 100).is_err());
        assert!(validate_service_numbers(-15, 100).is_err());
        assert!(validate_service_numbers(30, -1).is_err());
    }

    #[test]
    fn update_can_clear_category() {
        let req: UpdateServiceRequest = serde_json::from_str(r#"{"categoria_id":null}"#).unwrap();
        assert_eq!(req.categoria_id, Some(None));
        assert_eq!(req.duration_min, None);
    }
}
