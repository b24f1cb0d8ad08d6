use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::{
    error::{ApiError, DomainError},
    insurance::authorization::{
        generate_number, inherit_plan_terms, AuthorizationState, AuthorizationStatus, PlanTerms, RequestedTerms,
    },
    middleware::auth_context::AuthContext,
    models::{AppState, DataResponse, OkResponse, PageParams, Paged, clean_opt},
    routes::{
        client_routes::{check_coverage_refs, load_client},
        insurer_routes::load_plan,
    },
};

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuthorizationRow {
    pub autorizacion_id: Uuid,
    pub number: String,
    pub cliente_id: Uuid,
    pub obra_social_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub servicio_id: Option<Uuid>,
    pub profesional_id: Option<Uuid>,
    pub appt_date: Option<NaiveDate>,
    pub requested_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub status: AuthorizationStatus,
    pub rejection_reason: Option<String>,
    pub coverage_percent: Option<f64>,
    pub copay_cents: Option<i64>,
    pub coinsurance_percent: Option<f64>,
    pub limit_cents: Option<i64>,
    pub remaining_uses: i32,
    pub notes: Option<String>,
    pub requested_by: Option<String>,
    pub decided_by: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const AUTHORIZATION_COLUMNS: &str = "autorizacion_id, number, cliente_id, obra_social_id, plan_id, servicio_id, \
     profesional_id, appt_date, requested_at, decided_at, expires_at, status, rejection_reason, coverage_percent, \
     copay_cents, coinsurance_percent, limit_cents, remaining_uses, notes, requested_by, decided_by, is_active, \
     created_at, updated_at";

impl AuthorizationRow {
    fn state(&self) -> AuthorizationState {
        AuthorizationState {
            status: self.status,
            decided_at: self.decided_at,
            expires_at: self.expires_at,
            rejection_reason: self.rejection_reason.clone(),
            remaining_uses: self.remaining_uses,
            is_active: self.is_active,
        }
    }

    fn apply(&mut self, s: AuthorizationState) {
        self.status = s.status;
        self.decided_at = s.decided_at;
        self.expires_at = s.expires_at;
        self.rejection_reason = s.rejection_reason;
        self.remaining_uses = s.remaining_uses;
        self.is_active = s.is_active;
    }
}

#[derive(Debug, Serialize)]
pub struct AuthorizationView {
    #[serde(flatten)]
    pub authorization: AuthorizationRow,
    pub days_remaining: Option<i64>,
    pub is_usable: bool,
}

impl AuthorizationView {
    fn new(authorization: AuthorizationRow, today: NaiveDate) -> Self {
        let state = authorization.state();
        Self {
            days_remaining: state.days_remaining(today),
            is_usable: state.is_usable(today),
            authorization,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizationListQuery {
    pub cliente_id: Option<Uuid>,
    pub status: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateAuthorizationRequest {
    pub cliente_id: Uuid,
    /// Defaults to the client's insurer.
    pub obra_social_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub servicio_id: Option<Uuid>,
    pub profesional_id: Option<Uuid>,
    pub appt_date: Option<NaiveDate>,
    pub coverage_percent: Option<f64>,
    pub copay_cents: Option<i64>,
    pub coinsurance_percent: Option<f64>,
    pub limit_cents: Option<i64>,
    pub remaining_uses: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RejectRequest {
    pub reason: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/authorizations", get(list_authorizations).post(create_authorization))
        .route(
            "/authorizations/{autorizacion_id}",
            get(get_authorization).delete(deactivate_authorization),
        )
        .route("/authorizations/{autorizacion_id}/approve", post(approve_authorization))
        .route("/authorizations/{autorizacion_id}/reject", post(reject_authorization))
        .route("/authorizations/{autorizacion_id}/use", post(use_authorization))
}

fn validate_terms(t: &RequestedTerms) -> Result<(), ApiError> {
    for (name, v) in [("coverage_percent", t.coverage_percent), ("coinsurance_percent", t.coinsurance_percent)] {
        if v.is_some_and(|p| !(0.0..=100.0).contains(&p)) {
            return Err(ApiError::validation(format!("{name} must be between 0 and 100")));
        }
    }
    for (name, v) in [("copay_cents", t.copay_cents), ("limit_cents", t.limit_cents)] {
        if v.is_some_and(|c| c < 0) {
            return Err(ApiError::validation(format!("{name} cannot be negative")));
        }
    }
    Ok(())
}

async fn persist_state(
    tx: &mut Transaction<'static, Postgres>,
    row: &AuthorizationRow,
    decided_by: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE autorizacion
        SET status = $1, decided_at = $2, expires_at = $3, rejection_reason = $4,
            remaining_uses = $5, is_active = $6,
            decided_by = COALESCE((SELECT display_name FROM usuario WHERE user_id = $7), decided_by),
            updated_at = now()
        WHERE autorizacion_id = $8
        "#,
    )
    .bind(row.status)
    .bind(row.decided_at)
    .bind(row.expires_at)
    .bind(&row.rejection_reason)
    .bind(row.remaining_uses)
    .bind(row.is_active)
    .bind(decided_by)
    .bind(row.autorizacion_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn lock_authorization(
    tx: &mut Transaction<'static, Postgres>,
    autorizacion_id: Uuid,
) -> Result<AuthorizationRow, ApiError> {
    sqlx::query_as::<_, AuthorizationRow>(&format!(
        "SELECT {AUTHORIZATION_COLUMNS} FROM autorizacion WHERE autorizacion_id = $1 AND is_active FOR UPDATE"
    ))
    .bind(autorizacion_id)
    .fetch_optional(&mut **tx)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("authorization"))
}

/// Loads the row under lock, runs `f` on its state and writes it back.
async fn mutate_authorization<F>(
    state: &AppState,
    autorizacion_id: Uuid,
    decided_by: Option<Uuid>,
    f: F,
) -> Result<AuthorizationRow, ApiError>
where
    F: FnOnce(&mut AuthorizationState) -> Result<(), DomainError>,
{
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;
    let mut row = lock_authorization(&mut tx, autorizacion_id).await?;

    let mut s = row.state();
    s.refresh_expiry(Utc::now().date_naive());
    f(&mut s)?;
    row.apply(s);

    persist_state(&mut tx, &row, decided_by).await.map_err(ApiError::db)?;
    tx.commit().await.map_err(ApiError::db)?;
    Ok(row)
}

pub async fn list_authorizations(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<AuthorizationListQuery>,
) -> Result<Json<DataResponse<Paged<AuthorizationView>>>, ApiError> {
    let status = q
        .status
        .as_deref()
        .map(str::parse::<AuthorizationStatus>)
        .transpose()?;
    let page = PageParams { page: q.page, per_page: q.per_page };

    // approved rows past their expiry are reported as expired
    sqlx::query(
        "UPDATE autorizacion SET status = 3, updated_at = now() \
         WHERE status = 1 AND expires_at IS NOT NULL AND expires_at::date < CURRENT_DATE",
    )
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    let filter = r#"
        WHERE ($1::uuid IS NULL OR cliente_id = $1)
          AND ($2::smallint IS NULL OR status = $2)
          AND ($3 OR is_active)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM autorizacion {filter}"))
        .bind(q.cliente_id)
        .bind(status)
        .bind(q.include_inactive)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let rows = sqlx::query_as::<_, AuthorizationRow>(&format!(
        "SELECT {AUTHORIZATION_COLUMNS} FROM autorizacion {filter} ORDER BY requested_at DESC LIMIT $4 OFFSET $5"
    ))
    .bind(q.cliente_id)
    .bind(status)
    .bind(q.include_inactive)
    .bind(page.per_page())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    let today = Utc::now().date_naive();
    let items = rows.into_iter().map(|r| AuthorizationView::new(r, today)).collect();
    Ok(Json(DataResponse::new(Paged::new(items, page, total))))
}

pub async fn get_authorization(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(autorizacion_id): Path<Uuid>,
) -> Result<Json<DataResponse<AuthorizationView>>, ApiError> {
    let today = Utc::now().date_naive();
    let row = sqlx::query_as::<_, AuthorizationRow>(&format!(
        "SELECT {AUTHORIZATION_COLUMNS} FROM autorizacion WHERE autorizacion_id = $1 AND is_active"
    ))
    .bind(autorizacion_id)
    .fetch_optional(&state.db)
    .await
    .map_err(ApiError::db)?
    .ok_or_else(|| ApiError::not_found("authorization"))?;

    // only a lapse is written back, under lock
    let row = if lapses_on(&row, today) {
        mutate_authorization(&state, autorizacion_id, None, |_| Ok(())).await?
    } else {
        row
    };
    Ok(Json(DataResponse::new(AuthorizationView::new(row, today))))
}

/// Whether reading `row` on `today` flips it to expired.
fn lapses_on(row: &AuthorizationRow, today: NaiveDate) -> bool {
    row.state().refresh_expiry(today)
}

const NUMBER_ATTEMPTS: usize = 5;

pub async fn create_authorization(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAuthorizationRequest>,
) -> Result<Json<DataResponse<AuthorizationView>>, ApiError> {
    auth.ensure_schedule_writer()?;

    let client = load_client(&state, req.cliente_id).await?;
    if !client.is_active {
        return Err(DomainError::not_found("client").into());
    }

    let obra_social_id = req
        .obra_social_id
        .or(client.obra_social_id)
        .ok_or_else(|| ApiError::validation("client has no insurer; obra_social_id is required"))?;
    let plan_id = match req.obra_social_id {
        Some(_) => req.plan_id,
        None => req.plan_id.or(client.plan_id),
    };
    check_coverage_refs(&state, Some(obra_social_id), plan_id).await?;

    let remaining_uses = req.remaining_uses.unwrap_or(1);
    if remaining_uses < 1 {
        return Err(ApiError::validation("remaining_uses must be at least 1"));
    }

    let requested = RequestedTerms {
        coverage_percent: req.coverage_percent,
        copay_cents: req.copay_cents,
        coinsurance_percent: req.coinsurance_percent,
        limit_cents: req.limit_cents,
    };
    validate_terms(&requested)?;

    let plan_terms = match plan_id {
        Some(id) => {
            let plan = load_plan(&state, id).await?;
            Some(PlanTerms {
                coverage: plan.coverage(),
                per_visit_limit_cents: plan.per_visit_limit_cents,
            })
        }
        None => None,
    };
    let terms = inherit_plan_terms(requested, plan_terms.as_ref());

    let today = Utc::now().date_naive();
    let initial = AuthorizationState::new_pending(remaining_uses);
    let notes = clean_opt(req.notes.as_deref());

    let mut attempt = 0;
    let row = loop {
        attempt += 1;
        let res = sqlx::query_as::<_, AuthorizationRow>(&format!(
            r#"
            INSERT INTO autorizacion (number, cliente_id, obra_social_id, plan_id, servicio_id, profesional_id,
                                      appt_date, status, coverage_percent, copay_cents, coinsurance_percent,
                                      limit_cents, remaining_uses, notes, requested_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    (SELECT display_name FROM usuario WHERE user_id = $15))
            RETURNING {AUTHORIZATION_COLUMNS}
            "#
        ))
        .bind(generate_number(today))
        .bind(req.cliente_id)
        .bind(obra_social_id)
        .bind(plan_id)
        .bind(req.servicio_id)
        .bind(req.profesional_id)
        .bind(req.appt_date)
        .bind(initial.status)
        .bind(terms.coverage_percent)
        .bind(terms.copay_cents)
        .bind(terms.coinsurance_percent)
        .bind(terms.limit_cents)
        .bind(initial.remaining_uses)
        .bind(&notes)
        .bind(auth.user_id)
        .fetch_one(&state.db)
        .await;

        match res {
            Ok(row) => break row,
            // the random suffix collided with another number from today
            Err(e) if attempt < NUMBER_ATTEMPTS
                && e.as_database_error().is_some_and(|d| d.is_unique_violation()) => {}
            Err(e) => return Err(ApiError::db(e)),
        }
    };

    tracing::info!(number = %row.number, cliente_id = %row.cliente_id, "authorization requested");
    Ok(Json(DataResponse::new(AuthorizationView::new(row, today))))
}

pub async fn approve_authorization(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(autorizacion_id): Path<Uuid>,
    body: Option<Json<ApproveRequest>>,
) -> Result<Json<DataResponse<AuthorizationView>>, ApiError> {
    auth.ensure_admin()?;
    let Json(req) = body.unwrap_or_default();

    let now = Utc::now();
    let row = mutate_authorization(&state, autorizacion_id, Some(auth.user_id), |s| {
        s.approve(now, req.expires_at)
    })
    .await?;

    tracing::info!(number = %row.number, "authorization approved");
    Ok(Json(DataResponse::new(AuthorizationView::new(row, now.date_naive()))))
}

pub async fn reject_authorization(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(autorizacion_id): Path<Uuid>,
    body: Option<Json<RejectRequest>>,
) -> Result<Json<DataResponse<AuthorizationView>>, ApiError> {
    auth.ensure_admin()?;
    let Json(req) = body.unwrap_or_default();

    let now = Utc::now();
    let row = mutate_authorization(&state, autorizacion_id, Some(auth.user_id), |s| {
        s.reject(now, req.reason.as_deref())
    })
    .await?;

    tracing::info!(number = %row.number, "authorization rejected");
    Ok(Json(DataResponse::new(AuthorizationView::new(row, now.date_naive()))))
}

/// Consumes one use of an approved authorization.
pub async fn use_authorization(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(autorizacion_id): Path<Uuid>,
) -> Result<Json<DataResponse<AuthorizationView>>, ApiError> {
    auth.ensure_schedule_writer()?;

    let today = Utc::now().date_naive();
    let row = mutate_authorization(&state, autorizacion_id, None, |s| s.consume(today)).await?;

    tracing::info!(number = %row.number, remaining = row.remaining_uses, "authorization used");
    Ok(Json(DataResponse::new(AuthorizationView::new(row, today))))
}

pub async fn deactivate_authorization(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(autorizacion_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    auth.ensure_admin()?;

    let res = sqlx::query(
        "UPDATE autorizacion SET is_active = false, updated_at = now() WHERE autorizacion_id = $1 AND is_active",
    )
    .bind(autorizacion_id)
    .execute(&state.db)
    .await
    .map_err(ApiError::db)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("authorization"));
    }
    Ok(Json(OkResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{Days, TimeZone};

    fn row(status: AuthorizationStatus) -> AuthorizationRow {
        let t = Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap();
        AuthorizationRow {
            autorizacion_id: Uuid::nil(),
            number: "AUTH-20260302-00FF".into(),
            cliente_id: Uuid::nil(),
            obra_social_id: Uuid::nil(),
            plan_id: None,
            servicio_id: None,
            profesional_id: None,
            appt_date: None,
            requested_at: t,
            decided_at: None,
            expires_at: Some(t + Days::new(10)),
            status,
            rejection_reason: None,
            coverage_percent: Some(80.0),
            copay_cents: None,
            coinsurance_percent: None,
            limit_cents: None,
            remaining_uses: 1,
            notes: None,
            requested_by: None,
            decided_by: None,
            is_active: true,
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn view_reports_days_and_usability() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let v = AuthorizationView::new(row(AuthorizationStatus::Approved), today);
        assert_eq!(v.days_remaining, Some(7));
        assert!(v.is_usable);

        let v = AuthorizationView::new(row(AuthorizationStatus::Pending), today);
        assert!(!v.is_usable);

        let json = serde_json::to_value(AuthorizationView::new(row(AuthorizationStatus::Approved), today)).unwrap();
        assert_eq!(json["status"], "approved");
        assert_eq!(json["number"], "AUTH-20260302-00FF");
    }

    #[test]
    fn state_round_trips_through_row() {
        let mut r = row(AuthorizationStatus::Approved);
        let mut s = r.state();
        s.consume(NaiveDate::from_ymd_opt(2026, 3, 3).unwrap()).unwrap();
        r.apply(s);
        assert_eq!(r.remaining_uses, 0);
        assert_eq!(r.status, AuthorizationStatus::Expired);
    }

    #[test]
    fn reads_write_back_only_a_lapse() {
        let within = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let past = NaiveDate::from_ymd_opt(2026, 3, 13).unwrap();

        assert!(!lapses_on(&row(AuthorizationStatus::Approved), within));
        assert!(!lapses_on(&row(AuthorizationStatus::Pending), past));
        assert!(!lapses_on(&row(AuthorizationStatus::Expired), past));

        let mut no_expiry = row(AuthorizationStatus::Approved);
        no_expiry.expires_at = None;
        assert!(!lapses_on(&no_expiry, past));

        assert!(lapses_on(&row(AuthorizationStatus::Approved), past));
    }

    #[test]
    fn terms_are_range_checked() {
        let ok = RequestedTerms {
            coverage_percent: Some(100.0),
            copay_cents: Some(0),
            ..Default::default()
        };
        assert!(validate_terms(&ok).is_ok());

        let bad = RequestedTerms {
            coinsurance_percent: Some(120.0),
            ..Default::default()
        };
        assert_matches!(validate_terms(&bad), Err(ApiError::BadRequest(_, _)));

        let bad = RequestedTerms {
            limit_cents: Some(-5),
            ..Default::default()
        };
        assert_matches!(validate_terms(&bad), Err(ApiError::BadRequest(_, _)));
    }
}
