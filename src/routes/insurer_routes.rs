use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::ApiError,
    insurance::coverage::{AuthorizationPolicy, CostQuote, CoverageTerms},
    middleware::auth_context::AuthContext,
    models::{AppState, DataResponse, ListQuery, OkResponse, clean_opt, deserialize_double_option, patch_text},
    routes::user_routes::validate_email,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum InsurerKind {
    ObraSocial = 0,
    Prepaga = 1,
    Particular = 2,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct InsurerRow {
    pub obra_social_id: Uuid,
    pub name: String,
    pub code: String,
    pub kind: InsurerKind,
    pub cuit: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub coverage_percent: f64,
    pub requires_authorization: bool,
    pub authorization_lead_days: i32,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const INSURER_COLUMNS: &str = "obra_social_id, name, code, kind, cuit, address, phone, email, contact_name, \
     contact_phone, contact_email, coverage_percent, requires_authorization, authorization_lead_days, notes, \
     is_active, created_at, updated_at";

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct PlanRow {
    pub plan_id: Uuid,
    pub obra_social_id: Uuid,
    pub name: String,
    pub code: String,
    pub coverage_percent: f64,
    pub copay_cents: i64,
    pub coinsurance_percent: f64,
    pub annual_limit_cents: Option<i64>,
    pub per_visit_limit_cents: Option<i64>,
    pub requires_authorization: bool,
    pub authorization_lead_days: i32,
    pub notes: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const PLAN_COLUMNS: &str = "plan_id, obra_social_id, name, code, coverage_percent, copay_cents, \
     coinsurance_percent, annual_limit_cents, per_visit_limit_cents, requires_authorization, \
     authorization_lead_days, notes, is_active, created_at, updated_at";

impl PlanRow {
    pub fn coverage(&self) -> CoverageTerms {
        CoverageTerms {
            coverage_percent: self.coverage_percent,
            copay_cents: self.copay_cents,
            coinsurance_percent: self.coinsurance_percent,
        }
    }

    pub fn authorization_policy(&self) -> AuthorizationPolicy {
        AuthorizationPolicy {
            requires_authorization: self.requires_authorization,
            lead_days: self.authorization_lead_days,
        }
    }
}

impl InsurerRow {
    pub fn authorization_policy(&self) -> AuthorizationPolicy {
        AuthorizationPolicy {
            requires_authorization: self.requires_authorization,
            lead_days: self.authorization_lead_days,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateInsurerRequest {
    pub name: String,
    pub code: String,
    pub kind: Option<InsurerKind>,
    pub cuit: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub contact_name: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_email: Option<String>,
    pub coverage_percent: Option<f64>,
    pub requires_authorization: Option<bool>,
    pub authorization_lead_days: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateInsurerRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub kind: Option<InsurerKind>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub cuit: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact_phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub contact_email: Option<Option<String>>,
    pub coverage_percent: Option<f64>,
    pub requires_authorization: Option<bool>,
    pub authorization_lead_days: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PlanRequest {
    pub name: Option<String>,
    pub code: Option<String>,
    pub coverage_percent: Option<f64>,
    pub copay_cents: Option<i64>,
    pub coinsurance_percent: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub annual_limit_cents: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub per_visit_limit_cents: Option<Option<i64>>,
    pub requires_authorization: Option<bool>,
    pub authorization_lead_days: Option<i32>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub total_cents: i64,
    /// Appointment date, to report whether prior authorization is needed.
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct PlanQuote {
    pub plan_id: Uuid,
    #[serde(flatten)]
    pub quote: CostQuote,
    pub requires_authorization: Option<bool>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/insurers", get(list_insurers).post(create_insurer))
        .route(
            "/insurers/{obra_social_id}",
            get(get_insurer).patch(update_insurer).delete(deactivate_insurer),
        )
        .route("/insurers/{obra_social_id}/plans", get(list_plans).post(create_plan))
        .route(
            "/plans/{plan_id}",
            get(get_plan).patch(update_plan).delete(deactivate_plan),
        )
        .route("/plans/{plan_id}/quote", get(quote_plan))
}

fn validate_percent(value: f64, field: &str) -> Result<f64, ApiError> {
    if !(0.0..=100.0).contains(&value) {
        return Err(ApiError::validation(format!("{field} must be between 0 and 100")));
    }
    Ok(value)
}

fn validate_non_negative(value: i64, field: &str) -> Result<i64, ApiError> {
    if value < 0 {
        return Err(ApiError::validation(format!("{field} cannot be negative")));
    }
    Ok(value)
}

fn validate_lead_days(value: i32) -> Result<i32, ApiError> {
    if value < 0 {
        return Err(ApiError::validation("authorization_lead_days cannot be negative"));
    }
    Ok(value)
}

/// Insurer codes are stored upper-case without surrounding spaces.
fn normalize_code(code: &str) -> Result<String, ApiError> {
    let c = code.trim().to_uppercase();
    if c.is_empty() {
        return Err(ApiError::validation("code is required"));
    }
    Ok(c)
}

/* -------------------------
   Insurers
--------------------------*/

pub(crate) async fn load_insurer(state: &AppState, obra_social_id: Uuid) -> Result<InsurerRow, ApiError> {
    sqlx::query_as::<_, InsurerRow>(&format!(
        "SELECT {INSURER_COLUMNS} FROM obra_social WHERE obra_social_id = $1"
    ))
    .bind(obra_social_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("insurer"))
}

pub async fn list_insurers(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<DataResponse<Vec<InsurerRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, InsurerRow>(&format!(
        r#"
        SELECT {INSURER_COLUMNS}
        FROM obra_social
        WHERE ($1::text IS NULL OR name ILIKE $1 OR code ILIKE $1 OR cuit ILIKE $1)
          AND ($2 OR is_active)
        ORDER BY name
        "#
    ))
    .bind(q.like_pattern())
    .bind(q.include_inactive)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}

pub async fn get_insurer(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(obra_social_id): Path<Uuid>,
) -> Result<Json<DataResponse<InsurerRow>>, ApiError> {
    Ok(Json(DataResponse::new(load_insurer(&state, obra_social_id).await?)))
}

const CODE_TAKEN: &str = "an insurer with that code already exists";

pub async fn create_insurer(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateInsurerRequest>,
) -> Result<Json<DataResponse<InsurerRow>>, ApiError> {
    auth.ensure_admin()?;

    let name = clean_opt(Some(&req.name)).ok_or_else(|| ApiError::validation("name is required"))?;
    let code = normalize_code(&req.code)?;
    let coverage_percent = validate_percent(req.coverage_percent.unwrap_or(0.0), "coverage_percent")?;
    let lead_days = validate_lead_days(req.authorization_lead_days.unwrap_or(0))?;
    let email = validate_email(req.email.as_deref())?;
    let contact_email = validate_email(req.contact_email.as_deref())?;

    let row = sqlx::query_as::<_, InsurerRow>(&format!(
        r#"
        INSERT INTO obra_social (name, code, kind, cuit, address, phone, email, contact_name,
                                 contact_phone, contact_email, coverage_percent,
                                 requires_authorization, authorization_lead_days, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        RETURNING {INSURER_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(code)
    .bind(req.kind.unwrap_or(InsurerKind::ObraSocial))
    .bind(clean_opt(req.cuit.as_deref()))
    .bind(clean_opt(req.address.as_deref()))
    .bind(clean_opt(req.phone.as_deref()))
    .bind(email)
    .bind(clean_opt(req.contact_name.as_deref()))
    .bind(clean_opt(req.contact_phone.as_deref()))
    .bind(contact_email)
    .bind(coverage_percent)
    .bind(req.requires_authorization.unwrap_or(false))
    .bind(lead_days)
    .bind(clean_opt(req.notes.as_deref()))
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::unique_or_db(e, CODE_TAKEN))?;

    tracing::info!(code = %row.code, "insurer created");
    Ok(Json(DataResponse::new(row)))
}

pub async fn update_insurer(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(obra_social_id): Path<Uuid>,
    Json(req): Json<UpdateInsurerRequest>,
) -> Result<Json<DataResponse<InsurerRow>>, ApiError> {
    auth.ensure_admin()?;

    let existing = load_insurer(&state, obra_social_id).await?;

    let name = match req.name.as_deref() {
        Some(n) => clean_opt(Some(n)).ok_or_else(|| ApiError::validation("name cannot be empty"))?,
        None => existing.name.clone(),
    };
    let code = match req.code.as_deref() {
        Some(c) => normalize_code(c)?,
        None => existing.code.clone(),
    };
    let coverage_percent = validate_percent(
        req.coverage_percent.unwrap_or(existing.coverage_percent),
        "coverage_percent",
    )?;
    let lead_days = validate_lead_days(req.authorization_lead_days.unwrap_or(existing.authorization_lead_days))?;
    let email = match req.email {
        None => existing.email.clone(),
        Some(v) => validate_email(v.as_deref())?,
    };
    let contact_email = match req.contact_email {
        None => existing.contact_email.clone(),
        Some(v) => validate_email(v.as_deref())?,
    };

    let row = sqlx::query_as::<_, InsurerRow>(&format!(
        r#"
        UPDATE obra_social
        SET name = $1, code = $2, kind = $3, cuit = $4, address = $5, phone = $6, email = $7,
            contact_name = $8, contact_phone = $9, contact_email = $10, coverage_percent = $11,
            requires_authorization = $12, authorization_lead_days = $13, notes = $14,
            updated_at = now()
        WHERE obra_social_id = $15
        RETURNING {INSURER_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(code)
    .bind(req.kind.unwrap_or(existing.kind))
    .bind(patch_text(req.cuit, existing.cuit))
    .bind(patch_text(req.address, existing.address))
    .bind(patch_text(req.phone, existing.phone))
    .bind(email)
    .bind(patch_text(req.contact_name, existing.contact_name))
    .bind(patch_text(req.contact_phone, existing.contact_phone))
    .bind(contact_email)
    .bind(coverage_percent)
    .bind(req.requires_authorization.unwrap_or(existing.requires_authorization))
    .bind(lead_days)
    .bind(patch_text(req.notes, existing.notes))
    .bind(obra_social_id)
    .fetch_one(&state.db)
    .await
    .map_err(|e| ApiError::unique_or_db(e, CODE_TAKEN))?;

    Ok(Json(DataResponse::new(row)))
}

/// Soft delete. Plans stay attached but the insurer no longer validates.
pub async fn deactivate_insurer(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(obra_social_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;

    let res = sqlx::query(
        "UPDATE obra_social SET is_active = false, updated_at = now() WHERE obra_social_id = $1 AND is_active",
    )
    .bind(obra_social_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("insurer"));
    }
    tracing::info!(%obra_social_id, "insurer deactivated");
    Ok(Json(OkResponse::ok()))
}

/* -------------------------
   Plans
--------------------------*/

pub(crate) async fn load_plan(state: &AppState, plan_id: Uuid) -> Result<PlanRow, ApiError> {
    sqlx::query_as::<_, PlanRow>(&format!("SELECT {PLAN_COLUMNS} FROM plan_obra_social WHERE plan_id = $1"))
        .bind(plan_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("plan"))
}

pub async fn list_plans(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(obra_social_id): Path<Uuid>,
    Query(q): Query<ListQuery>,
) -> Result<Json<DataResponse<Vec<PlanRow>>>, ApiError> {
    load_insurer(&state, obra_social_id).await?;

    let rows = sqlx::query_as::<_, PlanRow>(&format!(
        r#"
        SELECT {PLAN_COLUMNS}
        FROM plan_obra_social
        WHERE obra_social_id = $1
          AND ($2 OR is_active)
        ORDER BY name
        "#
    ))
    .bind(obra_social_id)
    .bind(q.include_inactive)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}

pub async fn get_plan(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<DataResponse<PlanRow>>, ApiError> {
    Ok(Json(DataResponse::new(load_plan(&state, plan_id).await?)))
}

pub async fn create_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(obra_social_id): Path<Uuid>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<DataResponse<PlanRow>>, ApiError> {
    auth.ensure_admin()?;

    let insurer = load_insurer(&state, obra_social_id).await?;
    if !insurer.is_active {
        return Err(ApiError::not_found("insurer"));
    }

    let name = clean_opt(req.name.as_deref()).ok_or_else(|| ApiError::validation("name is required"))?;
    let code = match req.code.as_deref() {
        Some(c) => normalize_code(c)?,
        None => return Err(ApiError::validation("code is required")),
    };
    // the insurer's coverage is the starting point for a new plan
    let coverage_percent = validate_percent(
        req.coverage_percent.unwrap_or(insurer.coverage_percent),
        "coverage_percent",
    )?;
    let coinsurance_percent = validate_percent(req.coinsurance_percent.unwrap_or(0.0), "coinsurance_percent")?;
    let copay_cents = validate_non_negative(req.copay_cents.unwrap_or(0), "copay_cents")?;
    let annual = req.annual_limit_cents.flatten();
    let per_visit = req.per_visit_limit_cents.flatten();
    if let Some(v) = annual {
        validate_non_negative(v, "annual_limit_cents")?;
    }
    if let Some(v) = per_visit {
        validate_non_negative(v, "per_visit_limit_cents")?;
    }

    let row = sqlx::query_as::<_, PlanRow>(&format!(
        r#"
        INSERT INTO plan_obra_social (obra_social_id, name, code, coverage_percent, copay_cents,
                                      coinsurance_percent, annual_limit_cents, per_visit_limit_cents,
                                      requires_authorization, authorization_lead_days, notes)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING {PLAN_COLUMNS}
        "#
    ))
    .bind(obra_social_id)
    .bind(name)
    .bind(code)
    .bind(coverage_percent)
    .bind(copay_cents)
    .bind(coinsurance_percent)
    .bind(annual)
    .bind(per_visit)
    .bind(req.requires_authorization.unwrap_or(insurer.requires_authorization))
    .bind(validate_lead_days(req.authorization_lead_days.unwrap_or(insurer.authorization_lead_days))?)
    .bind(clean_opt(req.notes.flatten().as_deref()))
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(row)))
}

pub async fn update_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_id): Path<Uuid>,
    Json(req): Json<PlanRequest>,
) -> Result<Json<DataResponse<PlanRow>>, ApiError> {
    auth.ensure_admin()?;

    let existing = load_plan(&state, plan_id).await?;

    let name = match req.name.as_deref() {
        Some(n) => clean_opt(Some(n)).ok_or_else(|| ApiError::validation("name cannot be empty"))?,
        None => existing.name.clone(),
    };
    let code = match req.code.as_deref() {
        Some(c) => normalize_code(c)?,
        None => existing.code.clone(),
    };
    let coverage_percent = validate_percent(req.coverage_percent.unwrap_or(existing.coverage_percent), "coverage_percent")?;
    let coinsurance_percent = validate_percent(
        req.coinsurance_percent.unwrap_or(existing.coinsurance_percent),
        "coinsurance_percent",
    )?;
    let copay_cents = validate_non_negative(req.copay_cents.unwrap_or(existing.copay_cents), "copay_cents")?;
    let annual = req.annual_limit_cents.unwrap_or(existing.annual_limit_cents);
    let per_visit = req.per_visit_limit_cents.unwrap_or(existing.per_visit_limit_cents);
    let lead_days = validate_lead_days(req.authorization_lead_days.unwrap_or(existing.authorization_lead_days))?;

    let row = sqlx::query_as::<_, PlanRow>(&format!(
        r#"
        UPDATE plan_obra_social
        SET name = $1, code = $2, coverage_percent = $3, copay_cents = $4, coinsurance_percent = $5,
            annual_limit_cents = $6, per_visit_limit_cents = $7, requires_authorization = $8,
            authorization_lead_days = $9, notes = $10, updated_at = now()
        WHERE plan_id = $11
        RETURNING {PLAN_COLUMNS}
        "#
    ))
    .bind(name)
    .bind(code)
    .bind(coverage_percent)
    .bind(copay_cents)
    .bind(coinsurance_percent)
    .bind(annual)
    .bind(per_visit)
    .bind(req.requires_authorization.unwrap_or(existing.requires_authorization))
    .bind(lead_days)
    .bind(patch_text(req.notes, existing.notes))
    .bind(plan_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(row)))
}

pub async fn deactivate_plan(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;

    let res = sqlx::query("UPDATE plan_obra_social SET is_active = false, updated_at = now() WHERE plan_id = $1 AND is_active")
        .bind(plan_id)
        .execute(&state.db)
        .await
        .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("plan"));
    }
    Ok(Json(OkResponse::ok()))
}

/// Patient share of a given amount under the plan.
pub async fn quote_plan(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(plan_id): Path<Uuid>,
    Query(q): Query<QuoteQuery>,
) -> Result<Json<DataResponse<PlanQuote>>, ApiError> {
    let total_cents = validate_non_negative(q.total_cents, "total_cents")?;
    let plan = load_plan(&state, plan_id).await?;
    let insurer = load_insurer(&state, plan.obra_social_id).await?;
    let today = Utc::now().date_naive();

    // either the plan or its insurer can demand prior authorization
    let requires_authorization = q.date.map(|d| {
        plan.authorization_policy().requires_authorization_for(d, today)
            || insurer.authorization_policy().requires_authorization_for(d, today)
    });

    Ok(Json(DataResponse::new(PlanQuote {
        plan_id,
        quote: plan.coverage().quote(total_cents),
        requires_authorization,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn codes_are_upper_cased() {
        assert_eq!(normalize_code("  osde ").unwrap(), "OSDE");
        assert_matches!(normalize_code("  "), Err(ApiError::BadRequest("VALIDATION_ERROR", _)));
    }

    #[test]
    fn percent_bounds() {
        assert!(validate_percent(0.0, "x").is_ok());
        assert!(validate_percent(100.0, "x").is_ok());
        assert!(validate_percent(100.5, "x").is_err());
        assert!(validate_percent(-1.0, "x").is_err());
        assert!(validate_percent(f64::NAN, "x").is_err());
    }

    #[test]
    fn kind_names() {
        let k: InsurerKind = serde_json::from_str(r#""prepaga""#).unwrap();
        assert_eq!(k, InsurerKind::Prepaga);
        assert_eq!(serde_json::to_string(&InsurerKind::ObraSocial).unwrap(), r#""obra_social""#);
    }

    #[test]
    fn quote_serializes_flat() {
        let q = PlanQuote {
            plan_id: Uuid::nil(),
            quote: CostQuote {
                total_cents: 100,
                covered_cents: 80,
                patient_cents: 20,
            },
            requires_authorization: None,
        };
        let v = serde_json::to_value(q).unwrap();
        assert_eq!(v["patient_cents"], 20);
        assert!(v["requires_authorization"].is_null());
    }
}
