use axum::{
    extract::{Path, Query, State},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Days, Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ApiError, DomainError},
    middleware::auth_context::AuthContext,
    models::{AppState, DataResponse, PageParams, Paged, clean_opt, deserialize_double_option, patch_text},
    scheduling::{
        availability::{AvailabilityService, BookingRequest, DayAvailability, PgScheduleStore, Slot},
        calendar::{build_calendar, day_summary, AppointmentProjection, CalendarView, CalendarViewKind, DaySummary},
        hhmm,
        lifecycle::{self, AppointmentStatus},
        parse_date, parse_time,
        working_hours::DayHours,
    },
};

/// Wall-clock time of the office. Bookings are stored as local date + time.
fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(create_appointment))
        .route("/appointments/upcoming", get(upcoming_appointments))
        .route(
            "/appointments/{turno_id}",
            get(get_appointment).patch(update_appointment),
        )
        .route("/appointments/{turno_id}/confirm", post(confirm_appointment))
        .route("/appointments/{turno_id}/complete", post(complete_appointment))
        .route("/appointments/{turno_id}/cancel", post(cancel_appointment))
        .route("/appointments/{turno_id}/status", put(override_status))
        .route("/availability", get(free_slots))
        .route("/availability/slots", get(free_slot_times))
        .route("/calendar", get(calendar))
        .route("/calendar/summary", get(summary))
}

/* -------------------------
   Rows & DTOs
--------------------------*/

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AppointmentRow {
    pub turno_id: Uuid,
    pub cliente_id: Uuid,
    pub profesional_id: Uuid,
    pub servicio_id: Uuid,
    pub appt_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_min: i32,
    pub status: AppointmentStatus,
    pub final_price_cents: Option<i64>,
    pub price_cents: i64,
    pub notes: Option<String>,
    pub client_name: String,
    pub professional_name: String,
    pub service_name: String,
    pub created_by_user_id: Option<Uuid>,
    pub updated_by_user_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const APPOINTMENT_SELECT: &str = r#"
    SELECT t.turno_id, t.cliente_id, t.profesional_id, t.servicio_id, t.appt_date, t.start_time,
           t.duration_min, t.status, t.final_price_cents,
           COALESCE(t.final_price_cents, s.price_cents) AS price_cents,
           t.notes,
           c.last_name || ', ' || c.first_name AS client_name,
           p.last_name || ', ' || p.first_name AS professional_name,
           s.name AS service_name,
           t.created_by_user_id, t.updated_by_user_id, t.created_at, t.updated_at
    FROM turno t
    JOIN cliente c ON c.cliente_id = t.cliente_id
    JOIN profesional p ON p.profesional_id = t.profesional_id
    JOIN servicio s ON s.servicio_id = t.servicio_id
"#;

const PROJECTION_SELECT: &str = r#"
    SELECT t.turno_id AS appointment_id, t.appt_date, t.start_time, t.duration_min, t.status,
           c.last_name || ', ' || c.first_name AS client_name,
           p.last_name || ', ' || p.first_name AS professional_name,
           s.name AS service_name,
           t.final_price_cents,
           s.price_cents AS service_price_cents
    FROM turno t
    JOIN cliente c ON c.cliente_id = t.cliente_id
    JOIN profesional p ON p.profesional_id = t.profesional_id
    JOIN servicio s ON s.servicio_id = t.servicio_id
"#;

#[derive(Debug, Deserialize)]
pub struct CreateAppointmentRequest {
    pub cliente_id: Uuid,
    pub profesional_id: Uuid,
    pub servicio_id: Uuid,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub status: Option<String>,
    pub final_price_cents: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateAppointmentRequest {
    pub cliente_id: Option<Uuid>,
    pub profesional_id: Option<Uuid>,
    pub servicio_id: Option<Uuid>,
    pub date: Option<String>,
    pub time: Option<String>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub final_price_cents: Option<Option<i64>>,
    #[serde(default, deserialize_with = "deserialize_double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StatusOverrideRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentListQuery {
    pub from: Option<String>,
    pub to: Option<String>,
    pub status: Option<String>,
    pub profesional_id: Option<Uuid>,
    pub cliente_id: Option<Uuid>,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpcomingQuery {
    pub days: Option<u64>,
    pub profesional_id: Option<Uuid>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FreeSlotsQuery {
    pub profesional_id: Uuid,
    pub servicio_id: Uuid,
    pub date: String,
    /// Optional start to check against working hours.
    pub time: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CalendarQuery {
    pub view: Option<String>,
    pub date: Option<String>,
    pub profesional_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct FreeSlots {
    pub date: Option<NaiveDate>,
    pub working_hours: Option<DayHours>,
    pub duration_min: Option<i32>,
    pub slots: Vec<Slot>,
    /// Whether `time` plus the service duration fits the working hours.
    /// Booking outside them is allowed; clients show a warning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub within_working_hours: Option<bool>,
}

impl FreeSlots {
    fn nothing() -> Self {
        Self {
            date: None,
            working_hours: None,
            duration_min: None,
            slots: Vec::new(),
            within_working_hours: None,
        }
    }

    fn from_day(day: DayAvailability, time: Option<NaiveTime>) -> Self {
        let within_working_hours = match (time, day.duration_min) {
            (Some(t), Some(d)) => Some(day.working_hours.is_some_and(|h| h.fits(t, i64::from(d)))),
            _ => None,
        };
        Self {
            date: Some(day.date),
            working_hours: day.working_hours,
            duration_min: day.duration_min,
            slots: day.slots,
            within_working_hours,
        }
    }
}

fn validate_price(price: Option<i64>) -> Result<Option<i64>, ApiError> {
    if price.is_some_and(|p| p < 0) {
        return Err(ApiError::validation("final_price_cents cannot be negative"));
    }
    Ok(price)
}

fn parse_status_filter(s: Option<&str>) -> Result<Option<AppointmentStatus>, DomainError> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::parse::<AppointmentStatus>).transpose()
}

async fn load_appointment(state: &AppState, turno_id: Uuid) -> Result<AppointmentRow, ApiError> {
    sqlx::query_as::<_, AppointmentRow>(&format!("{APPOINTMENT_SELECT} WHERE t.turno_id = $1"))
        .bind(turno_id)
        .fetch_optional(&state.db)
        .await
        .map_err(ApiError::db)?
        .ok_or_else(|| ApiError::not_found("appointment"))
}

/* -------------------------
   Reads
--------------------------*/

pub async fn list_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<AppointmentListQuery>,
) -> Result<Json<DataResponse<Paged<AppointmentRow>>>, ApiError> {
    let from = q.from.as_deref().map(parse_date).transpose()?;
    let to = q.to.as_deref().map(parse_date).transpose()?;
    if let (Some(f), Some(t)) = (from, to) {
        if t < f {
            return Err(ApiError::validation("'to' must not be before 'from'"));
        }
    }
    let status = parse_status_filter(q.status.as_deref())?;
    let page = PageParams { page: q.page, per_page: q.per_page };

    let filter = r#"
        WHERE ($1::date IS NULL OR t.appt_date >= $1)
          AND ($2::date IS NULL OR t.appt_date <= $2)
          AND ($3::smallint IS NULL OR t.status = $3)
          AND ($4::uuid IS NULL OR t.profesional_id = $4)
          AND ($5::uuid IS NULL OR t.cliente_id = $5)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM turno t {filter}"))
        .bind(from)
        .bind(to)
        .bind(status)
        .bind(q.profesional_id)
        .bind(q.cliente_id)
        .fetch_one(&state.db)
        .await
        .map_err(ApiError::db)?;

    let items = sqlx::query_as::<_, AppointmentRow>(&format!(
        "{APPOINTMENT_SELECT} {filter} ORDER BY t.appt_date, t.start_time LIMIT $6 OFFSET $7"
    ))
    .bind(from)
    .bind(to)
    .bind(status)
    .bind(q.profesional_id)
    .bind(q.cliente_id)
    .bind(page.per_page())
    .bind(page.offset())
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(Paged::new(items, page, total))))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    _auth: AuthContext,
    Path(turno_id): Path<Uuid>,
) -> Result<Json<DataResponse<AppointmentRow>>, ApiError> {
    Ok(Json(DataResponse::new(load_appointment(&state, turno_id).await?)))
}

const DEFAULT_UPCOMING_DAYS: u64 = 7;
const MAX_UPCOMING: i64 = 200;

/// Pending and confirmed appointments from now on, soonest first.
pub async fn upcoming_appointments(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<UpcomingQuery>,
) -> Result<Json<DataResponse<Vec<AppointmentRow>>>, ApiError> {
    let now = local_now();
    let today = now.date();
    let until = today + Days::new(q.days.unwrap_or(DEFAULT_UPCOMING_DAYS));
    let limit = q.limit.filter(|l| *l > 0).unwrap_or(50).min(MAX_UPCOMING);

    let rows = sqlx::query_as::<_, AppointmentRow>(&format!(
        r#"
        {APPOINTMENT_SELECT}
        WHERE t.status IN (0, 1)
          AND (t.appt_date > $1 OR (t.appt_date = $1 AND t.start_time >= $2))
          AND t.appt_date <= $3
          AND ($4::uuid IS NULL OR t.profesional_id = $4)
        ORDER BY t.appt_date, t.start_time
        LIMIT $5
        "#
    ))
    .bind(today)
    .bind(now.time())
    .bind(until)
    .bind(q.profesional_id)
    .bind(limit)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)?;

    Ok(Json(DataResponse::new(rows)))
}

/// Free start times for a professional, service and date. An unparseable
/// date yields an empty result instead of an error.
pub async fn free_slots(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<FreeSlotsQuery>,
) -> Result<Json<DataResponse<FreeSlots>>, ApiError> {
    let Ok(date) = parse_date(&q.date) else {
        tracing::debug!(date = %q.date, "unparseable date, no slots");
        return Ok(Json(DataResponse::new(FreeSlots::nothing())));
    };
    let time = q.time.as_deref().map(parse_time).transpose()?;

    let service = AvailabilityService::new(PgScheduleStore::begin(&state.db).await?);
    let day = service
        .day_availability(q.profesional_id, date, q.servicio_id, local_now())
        .await?;

    Ok(Json(DataResponse::new(FreeSlots::from_day(day, time))))
}

/// Bare list of free start times.
pub async fn free_slot_times(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<FreeSlotsQuery>,
) -> Result<Json<DataResponse<Vec<Slot>>>, ApiError> {
    let Ok(date) = parse_date(&q.date) else {
        return Ok(Json(DataResponse::new(Vec::new())));
    };

    let service = AvailabilityService::new(PgScheduleStore::begin(&state.db).await?);
    let times = service
        .list_free_slots(q.profesional_id, date, q.servicio_id, local_now())
        .await?;

    Ok(Json(DataResponse::new(times.into_iter().map(Slot).collect())))
}

async fn load_projections(
    state: &AppState,
    start: NaiveDate,
    end: NaiveDate,
    profesional_id: Option<Uuid>,
) -> Result<Vec<AppointmentProjection>, ApiError> {
    sqlx::query_as::<_, AppointmentProjection>(&format!(
        r#"
        {PROJECTION_SELECT}
        WHERE t.appt_date BETWEEN $1 AND $2
          AND ($3::uuid IS NULL OR t.profesional_id = $3)
        ORDER BY t.appt_date, t.start_time
        "#
    ))
    .bind(start)
    .bind(end)
    .bind(profesional_id)
    .fetch_all(&state.db)
    .await
    .map_err(ApiError::db)
}

fn reference_date(raw: Option<&str>) -> Result<NaiveDate, DomainError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_date(s),
        None => Ok(local_now().date()),
    }
}

pub async fn calendar(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<DataResponse<CalendarView>>, ApiError> {
    let view: CalendarViewKind = match q.view.as_deref() {
        Some(v) => v.parse()?,
        None => CalendarViewKind::default(),
    };
    let reference = reference_date(q.date.as_deref())?;
    let (start, end) = view.query_range(reference);

    let appointments = load_projections(&state, start, end, q.profesional_id).await?;
    Ok(Json(DataResponse::new(build_calendar(view, reference, &appointments))))
}

/// Counts and revenue for a single date.
pub async fn summary(
    State(state): State<AppState>,
    _auth: AuthContext,
    Query(q): Query<CalendarQuery>,
) -> Result<Json<DataResponse<DaySummary>>, ApiError> {
    let date = reference_date(q.date.as_deref())?;
    let appointments = load_projections(&state, date, date, q.profesional_id).await?;
    Ok(Json(DataResponse::new(day_summary(date, &appointments))))
}

/* -------------------------
   Writes
--------------------------*/

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAppointmentRequest>,
) -> Result<Json<DataResponse<AppointmentRow>>, ApiError> {
    auth.ensure_schedule_writer()?;

    let date = parse_date(&req.date)?;
    let time = parse_time(&req.time)?;
    let status = lifecycle::initial_status(req.status.as_deref())?;
    let price = validate_price(req.final_price_cents)?;

    let booking = BookingRequest {
        client_id: req.cliente_id,
        professional_id: req.profesional_id,
        service_id: req.servicio_id,
        date,
        time,
        duration_min: None,
        exclude_appointment_id: None,
    };

    let service = AvailabilityService::new(PgScheduleStore::begin_serializable(&state.db).await?);
    let validated = service.validate_booking(&booking, local_now()).await?;
    let mut tx = service.into_store().into_transaction();

    let turno_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO turno (cliente_id, profesional_id, servicio_id, appt_date, start_time, duration_min,
                           status, final_price_cents, notes, created_by_user_id, updated_by_user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
        RETURNING turno_id
        "#,
    )
    .bind(req.cliente_id)
    .bind(req.profesional_id)
    .bind(req.servicio_id)
    .bind(date)
    .bind(time)
    .bind(validated.duration_min)
    .bind(status)
    .bind(price)
    .bind(clean_opt(req.notes.as_deref()))
    .bind(auth.user_id)
    .fetch_one(&mut *tx)
    .await
    .map_err(DomainError::from)?;

    tx.commit().await.map_err(DomainError::from)?;

    tracing::info!(
        %turno_id,
        profesional_id = %req.profesional_id,
        %date,
        %time,
        duration_min = validated.duration_min,
        "appointment booked"
    );
    Ok(Json(DataResponse::new(load_appointment(&state, turno_id).await?)))
}

/// Edits an appointment. Moving it (client, professional, service, date or
/// time) re-runs booking validation excluding the appointment itself.
pub async fn update_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(turno_id): Path<Uuid>,
    Json(req): Json<UpdateAppointmentRequest>,
) -> Result<Json<DataResponse<AppointmentRow>>, ApiError> {
    auth.ensure_schedule_writer()?;

    let existing = load_appointment(&state, turno_id).await?;
    if existing.status.is_terminal() {
        return Err(DomainError::validation(format!("a {} appointment cannot be edited", existing.status)).into());
    }

    let date = req.date.as_deref().map(parse_date).transpose()?.unwrap_or(existing.appt_date);
    let time = req.time.as_deref().map(parse_time).transpose()?.unwrap_or(existing.start_time);
    let cliente_id = req.cliente_id.unwrap_or(existing.cliente_id);
    let profesional_id = req.profesional_id.unwrap_or(existing.profesional_id);
    let servicio_id = req.servicio_id.unwrap_or(existing.servicio_id);
    let price = match req.final_price_cents {
        None => existing.final_price_cents,
        Some(p) => validate_price(p)?,
    };
    let notes = patch_text(req.notes, existing.notes.clone());

    let service_changed = servicio_id != existing.servicio_id;
    let moved = service_changed
        || date != existing.appt_date
        || time != existing.start_time
        || cliente_id != existing.cliente_id
        || profesional_id != existing.profesional_id;

    let (mut tx, duration_min) = if moved {
        let booking = BookingRequest {
            client_id: cliente_id,
            professional_id: profesional_id,
            service_id: servicio_id,
            date,
            time,
            // a new service brings its own duration
            duration_min: (!service_changed).then_some(existing.duration_min),
            exclude_appointment_id: Some(turno_id),
        };
        let service = AvailabilityService::new(PgScheduleStore::begin_serializable(&state.db).await?);
        let validated = service.validate_booking(&booking, local_now()).await?;
        (service.into_store().into_transaction(), validated.duration_min)
    } else {
        (state.db.begin().await.map_err(ApiError::db)?, existing.duration_min)
    };

    let res = sqlx::query(
        r#"
        UPDATE turno
        SET cliente_id = $1, profesional_id = $2, servicio_id = $3, appt_date = $4, start_time = $5,
            duration_min = $6, final_price_cents = $7, notes = $8, updated_by_user_id = $9,
            updated_at = now()
        WHERE turno_id = $10 AND status IN (0, 1)
        "#,
    )
    .bind(cliente_id)
    .bind(profesional_id)
    .bind(servicio_id)
    .bind(date)
    .bind(time)
    .bind(duration_min)
    .bind(price)
    .bind(notes)
    .bind(auth.user_id)
    .bind(turno_id)
    .execute(&mut *tx)
    .await
    .map_err(DomainError::from)?;

    if res.rows_affected() == 0 {
        return Err(DomainError::InvalidTransition {
            from: "completed or cancelled".into(),
            to: "edited".into(),
        }
        .into());
    }
    tx.commit().await.map_err(DomainError::from)?;

    if moved {
        tracing::info!(%turno_id, %profesional_id, %date, %time, "appointment rescheduled");
    }
    Ok(Json(DataResponse::new(load_appointment(&state, turno_id).await?)))
}

/// Locks the appointment, computes the new status and notes from the current
/// ones and writes them back.
async fn change_status<F>(
    state: &AppState,
    auth: &AuthContext,
    turno_id: Uuid,
    f: F,
) -> Result<AppointmentRow, ApiError>
where
    F: FnOnce(AppointmentStatus, Option<String>) -> Result<(AppointmentStatus, Option<String>), DomainError>,
{
    let mut tx = state.db.begin().await.map_err(ApiError::db)?;

    let current: Option<(AppointmentStatus, Option<String>)> =
        sqlx::query_as("SELECT status, notes FROM turno WHERE turno_id = $1 FOR UPDATE")
            .bind(turno_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(ApiError::db)?;
    let Some((from, notes)) = current else {
        return Err(ApiError::not_found("appointment"));
    };

    let (to, notes) = f(from, notes)?;

    sqlx::query(
        "UPDATE turno SET status = $1, notes = $2, updated_by_user_id = $3, updated_at = now() WHERE turno_id = $4",
    )
    .bind(to)
    .bind(notes)
    .bind(auth.user_id)
    .bind(turno_id)
    .execute(&mut *tx)
    .await
    // reopening a cancelled appointment can collide with a newer booking
    .map_err(DomainError::from)?;

    tx.commit().await.map_err(ApiError::db)?;

    tracing::info!(%turno_id, %from, %to, "appointment status changed");
    load_appointment(state, turno_id).await
}

pub async fn confirm_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(turno_id): Path<Uuid>,
) -> Result<Json<DataResponse<AppointmentRow>>, ApiError> {
    auth.ensure_schedule_writer()?;
    let row = change_status(&state, &auth, turno_id, |from, notes| Ok((lifecycle::confirm(from)?, notes))).await?;
    Ok(Json(DataResponse::new(row)))
}

pub async fn complete_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(turno_id): Path<Uuid>,
) -> Result<Json<DataResponse<AppointmentRow>>, ApiError> {
    auth.ensure_schedule_writer()?;
    let row = change_status(&state, &auth, turno_id, |from, notes| Ok((lifecycle::complete(from)?, notes))).await?;
    Ok(Json(DataResponse::new(row)))
}

pub async fn cancel_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(turno_id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<DataResponse<AppointmentRow>>, ApiError> {
    auth.ensure_schedule_writer()?;
    let Json(req) = body.unwrap_or_default();

    let row = change_status(&state, &auth, turno_id, |from, notes| {
        let to = lifecycle::cancel(from)?;
        Ok((to, lifecycle::cancellation_notes(notes.as_deref(), req.reason.as_deref())))
    })
    .await?;
    Ok(Json(DataResponse::new(row)))
}

/// Admin escape hatch: sets any status, bypassing the lifecycle graph.
pub async fn override_status(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(turno_id): Path<Uuid>,
    Json(req): Json<StatusOverrideRequest>,
) -> Result<Json<DataResponse<AppointmentRow>>, ApiError> {
    auth.ensure_admin()?;
    let row = change_status(&state, &auth, turno_id, |from, notes| {
        Ok((lifecycle::admin_override(from, &req.status)?, notes))
    })
    .await?;
    Ok(Json(DataResponse::new(row)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> DayAvailability {
        DayAvailability {
            date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            working_hours: Some(DayHours::new(t(8, 0), t(18, 0)).unwrap()),
            duration_min: Some(60),
            slots: vec![Slot(t(8, 0)), Slot(t(11, 0))],
        }
    }

    #[test]
    fn free_slots_flag_out_of_hours_requests() {
        let inside = FreeSlots::from_day(monday(), Some(t(16, 30)));
        assert_eq!(inside.within_working_hours, Some(true));

        let spills_over = FreeSlots::from_day(monday(), Some(t(17, 30)));
        assert_eq!(spills_over.within_working_hours, Some(false));

        let mut closed = monday();
        closed.working_hours = None;
        assert_eq!(FreeSlots::from_day(closed, Some(t(10, 0))).within_working_hours, Some(false));

        assert_eq!(FreeSlots::from_day(monday(), None).within_working_hours, None);
    }

    #[test]
    fn free_slots_render_hh_mm() {
        let v = serde_json::to_value(FreeSlots::from_day(monday(), None)).unwrap();
        assert_eq!(v["slots"], serde_json::json!(["08:00", "11:00"]));
        assert_eq!(v["date"], "2026-03-02");
        assert!(v.get("within_working_hours").is_none());

        let v = serde_json::to_value(FreeSlots::nothing()).unwrap();
        assert_eq!(v["slots"], serde_json::json!([]));
        assert!(v["date"].is_null());
    }

    #[test]
    fn status_filter_accepts_both_languages() {
        assert_eq!(parse_status_filter(None).unwrap(), None);
        assert_eq!(parse_status_filter(Some(" ")).unwrap(), None);
        assert_eq!(
            parse_status_filter(Some("confirmado")).unwrap(),
            Some(AppointmentStatus::Confirmed)
        );
        assert_matches!(parse_status_filter(Some("done")), Err(DomainError::InvalidStatus(_)));
    }

    #[test]
    fn negative_prices_are_rejected() {
        assert_eq!(validate_price(None).unwrap(), None);
        assert_eq!(validate_price(Some(0)).unwrap(), Some(0));
        assert_matches!(validate_price(Some(-1)), Err(ApiError::BadRequest("VALIDATION_ERROR", _)));
    }

    #[test]
    fn reference_date_defaults_to_today() {
        assert_eq!(reference_date(None).unwrap(), local_now().date());
        assert_eq!(
            reference_date(Some("2026-03-02")).unwrap(),
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
        );
        assert_matches!(reference_date(Some("02/03/2026")), Err(DomainError::Validation(_)));
    }

    #[test]
    fn update_body_distinguishes_cleared_price() {
        let req: UpdateAppointmentRequest = serde_json::from_str(r#"{"final_price_cents":null}"#).unwrap();
        assert_eq!(req.final_price_cents, Some(None));
        let req: UpdateAppointmentRequest = serde_json::from_str(r#"{"time":"10:30"}"#).unwrap();
        assert_eq!(req.final_price_cents, None);
        assert_eq!(req.time.as_deref(), Some("10:30"));
    }
}
