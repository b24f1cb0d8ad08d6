use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, DomainError},
    middleware::auth_context::AuthContext,
    models::{AppState, DataResponse, ListQuery, OkResponse, clean_opt, deserialize_double_option, patch_text},
    routes::user_routes::validate_email,
    scheduling::{
        hhmm,
        working_hours::{DayHours, WorkingHoursTemplate, weekday_index},
    },
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ProfessionalRow {
    pub profesional_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

const PROFESSIONAL_COLUMNS: &str = "profesional_id, first_name, last_name, specialty, license_number, \
     phone, email, is_active, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateProfessionalRequest {
    pub first_name: String,
    pub last_name: String,
    pub specialty: Option<String>,
    pub license_number: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfessionalRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub specialty: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub license_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub email: Option<Option<String>>,
}

/// One open weekday in a working-hours payload. Omitted weekdays are closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeekdayHours {
    /// 0 = Monday .. 6 = Sunday
    pub weekday: i16,
    #[serde(with = "hhmm")]
    pub opens_at: NaiveTime,
    #[serde(with = "hhmm")]
    pub closes_at: NaiveTime,
}

#[derive(Debug, Serialize)]
pub struct WorkingHoursResponse {
    pub profesional_id: Uuid,
    /// True when nothing is stored and the office default applies.
    pub is_default: bool,
    pub days: Vec<WeekdayHours>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/professionals", get(list_professionals).post(create_professional))
        .route(
            "/professionals/{profesional_id}",
            get(get_professional)
                .patch(update_professional)
                .delete(deactivate_professional),
        )
        .route(
            "/professionals/{profesional_id}/working_hours",
            get(get_working_hours).put(put_working_hours),
        )
}

async fn load_professional(state: &AppState, profesional_id: Uuid) -> Result<ProfessionalRow, ApiError> {
    sqlx::query_as::<_, ProfessionalRow>(&format!(
        "SELECT {PROFESSIONAL_COLUMNS} FROM profesional WHERE profesional_id = $1"
    ))
    .bind(profesional_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("professional"))
}

pub async fn list_professionals(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<ListQuery>,
) -> Result<Json<DataResponse<Vec<ProfessionalRow>>>, ApiError> {
    let rows = sqlx::query_as::<_, ProfessionalRow>(&format!(
        r#"
        SELECT {PROFESSIONAL_COLUMNS}
        FROM profesional
        WHERE ($1::text IS NULL
               OR first_name ILIKE $1
               OR last_name ILIKE $1
               OR specialty ILIKE $1)
          AND ($2 OR is_active)
        ORDER BY last_name, first_name
        "#
    ))
    .bind(q.like_pattern())
    .bind(q.include_inactive)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}

pub async fn get_professional(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(profesional_id): Path<Uuid>,
) -> Result<Json<DataResponse<ProfessionalRow>>, ApiError> {
    Ok(Json(DataResponse::new(load_professional(&state, profesional_id).await?)))
}

pub async fn create_professional(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateProfessionalRequest>,
) -> Result<Json<DataResponse<ProfessionalRow>>, ApiError> {
    auth.ensure_admin()?;

    let first_name = clean_opt(Some(&req.first_name)).ok_or_else(|| ApiError::validation("first_name is required"))?;
    let last_name = clean_opt(Some(&req.last_name)).ok_or_else(|| ApiError::validation("last_name is required"))?;
    let email = validate_email(req.email.as_deref())?;

    let row = sqlx::query_as::<_, ProfessionalRow>(&format!(
        r#"
        INSERT INTO profesional (first_name, last_name, specialty, license_number, phone, email)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {PROFESSIONAL_COLUMNS}
        "#
    ))
    .bind(first_name)
    .bind(last_name)
    .bind(clean_opt(req.specialty.as_deref()))
    .bind(clean_opt(req.license_number.as_deref()))
    .bind(clean_opt(req.phone.as_deref()))
    .bind(email)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    tracing::info!(profesional_id = %row.profesional_id, "professional created");
    Ok(Json(DataResponse::new(row)))
}

pub async fn update_professional(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(profesional_id): Path<Uuid>,
    Json(req): Json<UpdateProfessionalRequest>,
) -> Result<Json<DataResponse<ProfessionalRow>>, ApiError> {
    auth.ensure_admin()?;

    let existing = load_professional(&state, profesional_id).await?;

    let first_name = match req.first_name.as_deref() {
        Some(s) => clean_opt(Some(s)).ok_or_else(|| ApiError::validation("first_name cannot be empty"))?,
        None => existing.first_name.clone(),
    };
    let last_name = match req.last_name.as_deref() {
        Some(s) => clean_opt(Some(s)).ok_or_else(|| ApiError::validation("last_name cannot be empty"))?,
        None => existing.last_name.clone(),
    };
    let email = match req.email {
        None => existing.email.clone(),
        Some(v) => validate_email(v.as_deref())?,
    };

    let row = sqlx::query_as::<_, ProfessionalRow>(&format!(
        r#"
        UPDATE profesional
        SET first_name = $1,
            last_name = $2,
            specialty = $3,
            license_number = $4,
            phone = $5,
            email = $6,
            updated_at = now()
        WHERE profesional_id = $7
        RETURNING {PROFESSIONAL_COLUMNS}
        "#
    ))
    .bind(first_name)
    .bind(last_name)
    .bind(patch_text(req.specialty, existing.specialty))
    .bind(patch_text(req.license_number, existing.license_number))
    .bind(patch_text(req.phone, existing.phone))
    .bind(email)
    .bind(profesional_id)
    .fetch_one(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(row)))
}

/// Soft delete. Existing appointments are left untouched.
pub async fn deactivate_professional(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(profesional_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;

    let res = sqlx::query(
        "UPDATE profesional SET is_active = false, updated_at = now() WHERE profesional_id = $1 AND is_active",
    )
    .bind(profesional_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("professional"));
    }
    Ok(Json(OkResponse::ok()))
}

fn to_payload(template: &WorkingHoursTemplate) -> Vec<WeekdayHours> {
    template
        .to_rows()
        .into_iter()
        .map(|(weekday, h)| WeekdayHours {
            weekday,
            opens_at: h.opens_at,
            closes_at: h.closes_at,
        })
        .collect()
}

/// Validates a full week payload. Duplicate weekdays are rejected.
fn template_from_payload(days: &[WeekdayHours]) -> Result<WorkingHoursTemplate, DomainError> {
    let mut seen = [false; 7];
    for d in days {
        let idx = weekday_index(d.weekday)?;
        if seen[idx] {
            return Err(DomainError::validation(format!("weekday {} listed twice", d.weekday)));
        }
        seen[idx] = true;
        DayHours::new(d.opens_at, d.closes_at)?;
    }
    WorkingHoursTemplate::from_rows(days.iter().map(|d| (d.weekday, d.opens_at, d.closes_at)))
}

pub async fn get_working_hours(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(profesional_id): Path<Uuid>,
) -> Result<Json<DataResponse<WorkingHoursResponse>>, ApiError> {
    load_professional(&state, profesional_id).await?;

    let rows: Vec<(i16, NaiveTime, NaiveTime)> = sqlx::query_as(
        "SELECT weekday, opens_at, closes_at FROM profesional_horario WHERE profesional_id = $1 ORDER BY weekday",
    )
    .bind(profesional_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let is_default = rows.is_empty();
    let template = WorkingHoursTemplate::from_rows(rows)?;

    Ok(Json(DataResponse::new(WorkingHoursResponse {
        profesional_id,
        is_default,
        days: to_payload(&template),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PutWorkingHoursRequest {
    pub days: Vec<WeekdayHours>,
}

/// Replaces the whole weekly template. An empty list restores the default.
pub async fn put_working_hours(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(profesional_id): Path<Uuid>,
    Json(req): Json<PutWorkingHoursRequest>,
) -> Result<Json<DataResponse<WorkingHoursResponse>>, ApiError> {
    auth.ensure_admin()?;
    load_professional(&state, profesional_id).await?;

    let template = template_from_payload(&req.days)?;

    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    sqlx::query("DELETE FROM profesional_horario WHERE profesional_id = $1")
        .bind(profesional_id)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;

    for d in &req.days {
        sqlx::query(
            "INSERT INTO profesional_horario (profesional_id, weekday, opens_at, closes_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(profesional_id)
        .bind(d.weekday)
        .bind(d.opens_at)
        .bind(d.closes_at)
        .execute(&mut *tx)
        .await
        .map_err(ApiError::db)?;
    }

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%profesional_id, open_days = req.days.len(), "working hours replaced");

    Ok(Json(DataResponse::new(WorkingHoursResponse {
        profesional_id,
        is_default: req.days.is_empty(),
        days: to_payload(&template),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn day(weekday: i16, open: &str, close: &str) -> WeekdayHours {
        serde_json::from_value(serde_json::json!({
            "weekday": weekday,
            "opens_at": open,
            "closes_at": close,
        }))
        .unwrap()
    }

    #[test]
    fn empty_payload_means_default_week() {
        let t = template_from_payload(&[]).unwrap();
        assert_eq!(t, WorkingHoursTemplate::default());
        assert_eq!(to_payload(&t).len(), 6);
    }

    #[test]
    fn payload_round_trips_through_template() {
        let days = vec![day(0, "09:00", "12:00"), day(3, "14:00", "19:30")];
        let t = template_from_payload(&days).unwrap();
        let back = to_payload(&t);
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].weekday, 3);
        assert_eq!(serde_json::to_value(&back[1]).unwrap()["closes_at"], "19:30");
    }

    #[test]
    fn duplicates_and_inverted_windows_rejected() {
        assert_matches!(
            template_from_payload(&[day(1, "09:00", "10:00"), day(1, "11:00", "12:00")]),
            Err(DomainError::Validation(_))
        );
        assert_matches!(
            template_from_payload(&[day(1, "12:00", "10:00")]),
            Err(DomainError::Validation(_))
        );
    }
}
