// src/routes/client_routes.rs

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
    models::{AppState, DataResponse, OkResponse, PageParams, Paged, clean_opt, deserialize_double_option, patch_text},
    routes::user_routes::validate_email,
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ClientRow {
    pub cliente_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub obra_social_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub affiliate_number: Option<String>,
    pub family_group: Option<String>,
    pub holder_id: Option<Uuid>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const CLIENT_COLUMNS: &str = "cliente_id, first_name, last_name, phone, email, obra_social_id, plan_id, \
     affiliate_number, family_group, holder_id, is_active, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub obra_social_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub affiliate_number: Option<String>,
    pub family_group: Option<String>,
    pub holder_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateClientRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub obra_social_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub plan_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub affiliate_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub family_group: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub holder_id: Option<Option<Uuid>>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub obra_social_id: Option<Uuid>,
    #[serde(default)]
    pub include_inactive: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/clients", get(search_clients).post(create_client))
        .route(
            "/clients/{cliente_id}",
            get(get_client).patch(update_client).delete(deactivate_client),
        )
        .route("/clients/{cliente_id}/family", get(list_family))
}

fn required_name(value: &str, field: &str) -> Result<String, ApiError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ApiError::validation(format!("{field} is required")));
    }
    Ok(v.to_string())
}

pub(crate) async fn load_client(state: &AppState, cliente_id: Uuid) -> Result<ClientRow, ApiError> {
    sqlx::query_as::<_, ClientRow>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM cliente WHERE cliente_id = $1"
    ))
    .bind(cliente_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("client"))
}

/// Insurer and plan must be active, and the plan must belong to the insurer.
pub(crate) async fn check_coverage_refs(
    state: &AppState,
    obra_social_id: Option<Uuid>,
    plan_id: Option<Uuid>,
) -> Result<(), ApiError> {
    if let Some(os) = obra_social_id {
        let ok: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM obra_social WHERE obra_social_id = $1 AND is_active)",
        )
        .bind(os)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;
        if !ok {
            return Err(ApiError::not_found("insurer"));
        }
    }

    if let Some(plan) = plan_id {
        let Some(os) = obra_social_id else {
            return Err(ApiError::validation("plan_id requires obra_social_id"));
        };
        let plan_owner: Option<Uuid> = sqlx::query_scalar(
            "SELECT obra_social_id FROM plan_obra_social WHERE plan_id = $1 AND is_active",
        )
        .bind(plan)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?;
        match plan_owner {
            None => return Err(ApiError::not_found("plan")),
            Some(owner) if owner != os => {
                return Err(ApiError::validation("plan does not belong to the selected insurer"));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

async fn check_holder(state: &AppState, holder_id: Option<Uuid>, self_id: Option<Uuid>) -> Result<(), ApiError> {
    let Some(holder) = holder_id else {
        return Ok(());
    };
    if Some(holder) == self_id {
        return Err(ApiError::validation("a client cannot be their own holder"));
    }
    let ok: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM cliente WHERE cliente_id = $1 AND is_active)")
        .bind(holder)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;
    if !ok {
        return Err(ApiError::not_found("holder"));
    }
    Ok(())
}

const EMAIL_TAKEN: &str = "another active client already uses that email";

pub async fn create_client(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateClientRequest>,
) -> Result<Json<DataResponse<ClientRow>>, ApiError> {
    auth.ensure_schedule_writer()?;

    let first_name = required_name(&req.first_name, "first_name")?;
    let last_name = required_name(&req.last_name, "last_name")?;
    let email = validate_email(req.email.as_deref())?;
    check_coverage_refs(&state, req.obra_social_id, req.plan_id).await?;
    check_holder(&state, req.holder_id, None).await?;

    let row = sqlx::query_as::<_, ClientRow>(&format!(
        r#"
        INSERT INTO cliente (first_name, last_name, phone, email, obra_social_id, plan_id,
                             affiliate_number, family_group, holder_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING {CLIENT_COLUMNS}
        "#
    ))
    .bind(first_name)
    .bind(last_name)
    .bind(clean_opt(req.phone.as_deref()))
    .bind(email)
    .bind(req.obra_social_id)
    .bind(req.plan_id)
    .bind(clean_opt(req.affiliate_number.as_deref()))
    .bind(clean_opt(req.family_group.as_deref()))
    .bind(req.holder_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::unique_or_db(e, EMAIL_TAKEN))?;

    tracing::info!(cliente_id = %row.cliente_id, "client created");
    Ok(Json(DataResponse::new(row)))
}

pub async fn get_client(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(cliente_id): Path<Uuid>,
) -> Result<Json<DataResponse<ClientRow>>, ApiError> {
    Ok(Json(DataResponse::new(load_client(&state, cliente_id).await?)))
}

pub async fn search_clients(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<SearchQuery>,
) -> Result<Json<DataResponse<Paged<ClientRow>>>, ApiError> {
    let pages = PageParams { page: q.page, per_page: q.per_page };
    let like = q
        .q
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("%{s}%"));

    let filter = r#"
        WHERE ($1::text IS NULL
               OR first_name ILIKE $1
               OR last_name ILIKE $1
               OR (first_name || ' ' || last_name) ILIKE $1
               OR email ILIKE $1
               OR phone ILIKE $1
               OR affiliate_number ILIKE $1)
          AND ($2::uuid IS NULL OR obra_social_id = $2)
          AND ($3 OR is_active)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT count(*) FROM cliente {filter}"))
        .bind(like.as_deref())
        .bind(q.obra_social_id)
        .bind(q.include_inactive)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let rows = sqlx::query_as::<_, ClientRow>(&format!(
        "SELECT {CLIENT_COLUMNS} FROM cliente {filter} ORDER BY last_name, first_name LIMIT $4 OFFSET $5"
    ))
    .bind(like.as_deref())
    .bind(q.obra_social_id)
    .bind(q.include_inactive)
    .bind(pages.per_page())
    .bind(pages.offset())
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(Paged::new(rows, pages, total))))
}

pub async fn update_client(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(cliente_id): Path<Uuid>,
    Json(req): Json<UpdateClientRequest>,
) -> Result<Json<DataResponse<ClientRow>>, ApiError> {
    auth.ensure_schedule_writer()?;

    let existing = load_client(&state, cliente_id).await?;

    let first_name = match req.first_name.as_deref() {
        Some(s) => required_name(s, "first_name")?,
        None => existing.first_name.clone(),
    };
    let last_name = match req.last_name.as_deref() {
        Some(s) => required_name(s, "last_name")?,
        None => existing.last_name.clone(),
    };
    let email = match req.email {
        None => existing.email.clone(),
        Some(v) => validate_email(v.as_deref())?,
    };
    let obra_social_id = req.obra_social_id.unwrap_or(existing.obra_social_id);
    // dropping the insurer drops the plan with it
    let plan_id = match (req.plan_id, obra_social_id) {
        (_, None) => None,
        (Some(p), _) => p,
        (None, Some(_)) => existing.plan_id,
    };
    let holder_id = req.holder_id.unwrap_or(existing.holder_id);

    check_coverage_refs(&state, obra_social_id, plan_id).await?;
    check_holder(&state, holder_id, Some(cliente_id)).await?;

    let row = sqlx::query_as::<_, ClientRow>(&format!(
        r#"
        UPDATE cliente
        SET first_name = $1,
            last_name = $2,
            phone = $3,
            email = $4,
            obra_social_id = $5,
            plan_id = $6,
            affiliate_number = $7,
            family_group = $8,
            holder_id = $9,
            updated_at = now()
        WHERE cliente_id = $10
        RETURNING {CLIENT_COLUMNS}
        "#
    ))
    .bind(first_name)
    .bind(last_name)
    .bind(patch_text(req.phone, existing.phone))
    .bind(email)
    .bind(obra_social_id)
    .bind(plan_id)
    .bind(patch_text(req.affiliate_number, existing.affiliate_number))
    .bind(patch_text(req.family_group, existing.family_group))
    .bind(holder_id)
    .bind(cliente_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::unique_or_db(e, EMAIL_TAKEN))?;

    Ok(Json(DataResponse::new(row)))
}

/// Soft delete. Appointment history keeps pointing at the row.
pub async fn deactivate_client(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(cliente_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_schedule_writer()?;

    let res = sqlx::query("UPDATE cliente SET is_active = false, updated_at = now() WHERE cliente_id = $1 AND is_active")
        .bind(cliente_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("client"));
    }
    tracing::info!(%cliente_id, "client deactivated");
    Ok(Json(OkResponse::ok()))
}

/// Dependants of the client plus anyone sharing its family group.
pub async fn list_family(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(cliente_id): Path<Uuid>,
) -> Result<Json<DataResponse<Vec<ClientRow>>>, ApiError> {
    let me = load_client(&state, cliente_id).await?;

    let rows = sqlx::query_as::<_, ClientRow>(&format!(
        r#"
        SELECT {CLIENT_COLUMNS}
        FROM cliente
        WHERE cliente_id <> $1
          AND is_active
          AND (holder_id = $1
               OR ($2::uuid IS NOT NULL AND (cliente_id = $2 OR holder_id = $2))
               OR ($3::text IS NOT NULL AND family_group = $3))
        ORDER BY last_name, first_name
        "#
    ))
    .bind(cliente_id)
    .bind(me.holder_id)
    .bind(me.family_group.as_deref())
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}
