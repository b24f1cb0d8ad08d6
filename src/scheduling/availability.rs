use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::DomainError;
use crate::scheduling::hhmm;
use crate::scheduling::overlap::{Booking, Interval, find_conflict};
use crate::scheduling::slots;
use crate::scheduling::working_hours::{DayHours, WorkingHoursTemplate};

/// Read access to everything availability decisions depend on.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// `None` when the professional is unknown or inactive.
    async fn working_hours(&self, professional_id: Uuid) -> Result<Option<WorkingHoursTemplate>, DomainError>;

    /// Duration of an active service, `None` otherwise.
    async fn service_duration(&self, service_id: Uuid) -> Result<Option<i32>, DomainError>;

    async fn client_is_active(&self, client_id: Uuid) -> Result<bool, DomainError>;

    /// Blocking bookings of the professional on that date, by start time.
    async fn bookings_on(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<Booking>, DomainError>;
}

/* -------------------------
   Postgres store
--------------------------*/

/// Runs every lookup inside one transaction so a booking can be validated
/// and written atomically.
pub struct PgScheduleStore {
    tx: Mutex<Transaction<'static, Postgres>>,
}

impl PgScheduleStore {
    pub async fn begin(pool: &PgPool) -> Result<Self, DomainError> {
        let tx = pool.begin().await?;
        Ok(Self { tx: Mutex::new(tx) })
    }

    pub async fn begin_serializable(pool: &PgPool) -> Result<Self, DomainError> {
        let mut tx = pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Self { tx: Mutex::new(tx) })
    }

    pub fn into_transaction(self) -> Transaction<'static, Postgres> {
        self.tx.into_inner()
    }
}

#[async_trait]
impl ScheduleStore for PgScheduleStore {
    async fn working_hours(&self, professional_id: Uuid) -> Result<Option<WorkingHoursTemplate>, DomainError> {
        let mut tx = self.tx.lock().await;

        let active: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM profesional WHERE profesional_id = $1 AND is_active)",
        )
        .bind(professional_id)
        .fetch_one(&mut **tx)
        .await?;
        if !active {
            return Ok(None);
        }

        let rows: Vec<(i16, NaiveTime, NaiveTime)> = sqlx::query_as(
            r#"
            SELECT weekday, opens_at, closes_at
            FROM profesional_horario
            WHERE profesional_id = $1
            ORDER BY weekday
            "#,
        )
        .bind(professional_id)
        .fetch_all(&mut **tx)
        .await?;

        WorkingHoursTemplate::from_rows(rows).map(Some)
    }

    async fn service_duration(&self, service_id: Uuid) -> Result<Option<i32>, DomainError> {
        let mut tx = self.tx.lock().await;
        let d = sqlx::query_scalar("SELECT duration_min FROM servicio WHERE servicio_id = $1 AND is_active")
            .bind(service_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(d)
    }

    async fn client_is_active(&self, client_id: Uuid) -> Result<bool, DomainError> {
        let mut tx = self.tx.lock().await;
        let active = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM cliente WHERE cliente_id = $1 AND is_active)")
            .bind(client_id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(active)
    }

    async fn bookings_on(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<Booking>, DomainError> {
        let mut tx = self.tx.lock().await;
        let rows = sqlx::query_as::<_, Booking>(
            r#"
            SELECT turno_id AS appointment_id, start_time, duration_min, status
            FROM turno
            WHERE profesional_id = $1
              AND appt_date = $2
              AND status IN (0, 1)
            ORDER BY start_time
            "#,
        )
        .bind(professional_id)
        .bind(date)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows)
    }
}

/* -------------------------
   Service
--------------------------*/

#[derive(Debug, Clone)]
pub struct BookingRequest {
    pub client_id: Uuid,
    pub professional_id: Uuid,
    pub service_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    /// Keeps an existing appointment's snapshotted duration on reschedule.
    pub duration_min: Option<i32>,
    pub exclude_appointment_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedBooking {
    pub duration_min: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayAvailability {
    pub date: NaiveDate,
    pub working_hours: Option<DayHours>,
    pub duration_min: Option<i32>,
    pub slots: Vec<Slot>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot(#[serde(with = "hhmm")] pub NaiveTime);

pub struct AvailabilityService<S> {
    store: S,
}

impl<S: ScheduleStore> AvailabilityService<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Free start times for the service's duration, in order. Unknown or
    /// inactive professionals and services, past dates and closed days all
    /// produce an empty list. Starts already behind `now` are dropped.
    pub async fn list_free_slots(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        service_id: Uuid,
        now: NaiveDateTime,
    ) -> Result<Vec<NaiveTime>, DomainError> {
        let day = self.day_availability(professional_id, date, service_id, now).await?;
        Ok(day.slots.into_iter().map(|s| s.0).collect())
    }

    pub async fn day_availability(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        service_id: Uuid,
        now: NaiveDateTime,
    ) -> Result<DayAvailability, DomainError> {
        let mut out = DayAvailability {
            date,
            working_hours: None,
            duration_min: None,
            slots: Vec::new(),
        };

        let today = now.date();
        if date < today {
            return Ok(out);
        }

        let Some(template) = self.store.working_hours(professional_id).await? else {
            tracing::debug!(%professional_id, "no active professional, no slots");
            return Ok(out);
        };
        out.working_hours = template.hours_on(date);

        let Some(duration) = self.store.service_duration(service_id).await? else {
            tracing::debug!(%service_id, "no active service, no slots");
            return Ok(out);
        };
        out.duration_min = Some(duration);

        let candidates = slots::candidate_starts(&template, date, today, i64::from(duration));
        if candidates.is_empty() {
            return Ok(out);
        }

        let booked = self.store.bookings_on(professional_id, date).await?;
        out.slots = candidates
            .into_iter()
            .filter(|&t| date > today || t >= now.time())
            .filter(|&t| find_conflict(Interval::new(t, i64::from(duration)), &booked, None).is_none())
            .map(Slot)
            .collect();

        Ok(out)
    }

    /// Past, reference and overlap checks for a professional's time slot.
    /// Working hours are not enforced here.
    pub async fn check_slot(
        &self,
        professional_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
        duration_min: i32,
        exclude: Option<Uuid>,
        now: NaiveDateTime,
    ) -> Result<(), DomainError> {
        ensure_not_past(date, time, now)?;

        if self.store.working_hours(professional_id).await?.is_none() {
            return Err(DomainError::not_found("professional"));
        }

        // bookings are looked up per date, so one may not spill into the next day
        let candidate = Interval::new(time, i64::from(duration_min));
        if candidate.crosses_midnight() {
            return Err(DomainError::validation(format!(
                "a {duration_min} minute appointment at {} would run past midnight",
                time.format("%H:%M")
            )));
        }

        let booked = self.store.bookings_on(professional_id, date).await?;
        if let Some(conflicting) = find_conflict(candidate, &booked, exclude) {
            tracing::info!(%professional_id, %date, %time, %conflicting, "slot already taken");
            return Err(DomainError::SchedulingConflict {
                conflicting: Some(conflicting),
            });
        }
        Ok(())
    }

    /// Full booking validation: not in the past, client, professional and
    /// service active, no overlap with other blocking appointments.
    pub async fn validate_booking(
        &self,
        req: &BookingRequest,
        now: NaiveDateTime,
    ) -> Result<ValidatedBooking, DomainError> {
        ensure_not_past(req.date, req.time, now)?;

        if !self.store.client_is_active(req.client_id).await? {
            return Err(DomainError::not_found("client"));
        }
        let service_duration = self
            .store
            .service_duration(req.service_id)
            .await?
            .ok_or(DomainError::not_found("service"))?;

        let duration_min = req.duration_min.unwrap_or(service_duration);
        self.check_slot(
            req.professional_id,
            req.date,
            req.time,
            duration_min,
            req.exclude_appointment_id,
            now,
        )
        .await?;

        Ok(ValidatedBooking { duration_min })
    }
}

fn ensure_not_past(date: NaiveDate, time: NaiveTime, now: NaiveDateTime) -> Result<(), DomainError> {
    if date.and_time(time) < now {
        return Err(DomainError::PastDate(format!(
            "cannot book {} {} in the past",
            date.format("%Y-%m-%d"),
            time.format("%H:%M")
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::lifecycle::AppointmentStatus;
    use assert_matches::assert_matches;
    use std::collections::{HashMap, HashSet};

    #[derive(Default)]
    struct MemoryStore {
        professionals: HashMap<Uuid, WorkingHoursTemplate>,
        services: HashMap<Uuid, i32>,
        clients: HashSet<Uuid>,
        bookings: Vec<(Uuid, NaiveDate, Booking)>,
    }

    #[async_trait]
    impl ScheduleStore for MemoryStore {
        async fn working_hours(&self, professional_id: Uuid) -> Result<Option<WorkingHoursTemplate>, DomainError> {
            Ok(self.professionals.get(&professional_id).cloned())
        }

        async fn service_duration(&self, service_id: Uuid) -> Result<Option<i32>, DomainError> {
            Ok(self.services.get(&service_id).copied())
        }

        async fn client_is_active(&self, client_id: Uuid) -> Result<bool, DomainError> {
            Ok(self.clients.contains(&client_id))
        }

        async fn bookings_on(&self, professional_id: Uuid, date: NaiveDate) -> Result<Vec<Booking>, DomainError> {
            let mut out: Vec<Booking> = self
                .bookings
                .iter()
                .filter(|(p, d, b)| *p == professional_id && *d == date && b.status.blocks_slot())
                .map(|(_, _, b)| b.clone())
                .collect();
            out.sort_by_key(|b| b.start_time);
            Ok(out)
        }
    }

    struct Fixture {
        svc: AvailabilityService<MemoryStore>,
        client: Uuid,
        professional: Uuid,
        hour_service: Uuid,
        booked_id: Uuid,
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    /// Friday before the test Monday, 12:00.
    fn last_week() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 2, 27).unwrap().and_time(hm(12, 0))
    }

    /// Default hours, one pending 10:00–11:00 booking on Monday.
    fn fixture() -> Fixture {
        let client = Uuid::new_v4();
        let professional = Uuid::new_v4();
        let hour_service = Uuid::new_v4();
        let booked_id = Uuid::new_v4();

        let mut store = MemoryStore::default();
        store.clients.insert(client);
        store.professionals.insert(professional, WorkingHoursTemplate::default());
        store.services.insert(hour_service, 60);
        store.bookings.push((
            professional,
            monday(),
            Booking {
                appointment_id: booked_id,
                start_time: hm(10, 0),
                duration_min: 60,
                status: AppointmentStatus::Pending,
            },
        ));

        Fixture {
            svc: AvailabilityService::new(store),
            client,
            professional,
            hour_service,
            booked_id,
        }
    }

    fn request(f: &Fixture, date: NaiveDate, time: NaiveTime) -> BookingRequest {
        BookingRequest {
            client_id: f.client,
            professional_id: f.professional,
            service_id: f.hour_service,
            date,
            time,
            duration_min: None,
            exclude_appointment_id: None,
        }
    }

    #[tokio::test]
    async fn monday_with_ten_oclock_taken() {
        let f = fixture();
        let slots = f
            .svc
            .list_free_slots(f.professional, monday(), f.hour_service, last_week())
            .await
            .unwrap();

        assert!(slots.contains(&hm(8, 0)));
        assert!(slots.contains(&hm(9, 0)));
        assert!(!slots.contains(&hm(9, 30)));
        assert!(!slots.contains(&hm(10, 0)));
        assert!(!slots.contains(&hm(10, 30)));
        assert!(slots.contains(&hm(11, 0)));
        assert_eq!(slots.last(), Some(&hm(17, 0)));
    }

    #[tokio::test]
    async fn half_hour_booking_at_ten_frees_its_neighbours() {
        let professional = Uuid::new_v4();
        let consult = Uuid::new_v4();
        let mut store = MemoryStore::default();
        store.professionals.insert(professional, WorkingHoursTemplate::default());
        store.services.insert(consult, 30);
        store.bookings.push((
            professional,
            monday(),
            Booking {
                appointment_id: Uuid::new_v4(),
                start_time: hm(10, 0),
                duration_min: 30,
                status: AppointmentStatus::Confirmed,
            },
        ));
        let svc = AvailabilityService::new(store);

        let slots = svc.list_free_slots(professional, monday(), consult, last_week()).await.unwrap();
        assert!(slots.contains(&hm(9, 30)));
        assert!(!slots.contains(&hm(10, 0)));
        assert!(slots.contains(&hm(10, 30)));
    }

    #[tokio::test]
    async fn start_with_seconds_still_conflicts() {
        let f = fixture();
        let mut req = request(&f, monday(), NaiveTime::from_hms_opt(9, 59, 30).unwrap());
        req.duration_min = Some(1);
        assert_matches!(
            f.svc.validate_booking(&req, last_week()).await,
            Err(DomainError::SchedulingConflict { conflicting: Some(id) }) if id == f.booked_id
        );
    }

    #[tokio::test]
    async fn appointments_cannot_run_past_midnight() {
        let f = fixture();
        assert_matches!(
            f.svc.validate_booking(&request(&f, monday(), hm(23, 30)), last_week()).await,
            Err(DomainError::Validation(_))
        );
        let mut req = request(&f, monday(), hm(23, 30));
        req.duration_min = Some(30);
        assert!(f.svc.validate_booking(&req, last_week()).await.is_ok());
    }

    #[tokio::test]
    async fn booking_into_taken_slot_conflicts() {
        let f = fixture();
        let err = f
            .svc
            .validate_booking(&request(&f, monday(), hm(10, 30)), last_week())
            .await
            .unwrap_err();
        assert_matches!(err, DomainError::SchedulingConflict { conflicting: Some(id) } if id == f.booked_id);
    }

    #[tokio::test]
    async fn rescheduling_ignores_itself() {
        let f = fixture();
        let mut req = request(&f, monday(), hm(10, 30));
        req.exclude_appointment_id = Some(f.booked_id);
        let ok = f.svc.validate_booking(&req, last_week()).await.unwrap();
        assert_eq!(ok.duration_min, 60);
    }

    #[tokio::test]
    async fn yesterday_is_past() {
        let f = fixture();
        let now = monday().succ_opt().unwrap().and_time(hm(9, 0));
        assert_matches!(
            f.svc.validate_booking(&request(&f, monday(), hm(15, 0)), now).await,
            Err(DomainError::PastDate(_))
        );
        let slots = f
            .svc
            .list_free_slots(f.professional, monday(), f.hour_service, now)
            .await
            .unwrap();
        assert!(slots.is_empty());
    }

    #[tokio::test]
    async fn sunday_has_no_slots() {
        let f = fixture();
        let sunday = NaiveDate::from_ymd_opt(2026, 3, 8).unwrap();
        let day = f
            .svc
            .day_availability(f.professional, sunday, f.hour_service, last_week())
            .await
            .unwrap();
        assert!(day.slots.is_empty());
        assert_eq!(day.working_hours, None);
    }

    #[tokio::test]
    async fn unknown_references_yield_empty_slots_but_fail_booking() {
        let f = fixture();
        let ghost = Uuid::new_v4();

        let slots = f.svc.list_free_slots(ghost, monday(), f.hour_service, last_week()).await.unwrap();
        assert!(slots.is_empty());
        let slots = f.svc.list_free_slots(f.professional, monday(), ghost, last_week()).await.unwrap();
        assert!(slots.is_empty());

        let mut req = request(&f, monday(), hm(8, 0));
        req.professional_id = ghost;
        assert_matches!(
            f.svc.validate_booking(&req, last_week()).await,
            Err(DomainError::NotFound { entity: "professional" })
        );

        let mut req = request(&f, monday(), hm(8, 0));
        req.client_id = ghost;
        assert_matches!(
            f.svc.validate_booking(&req, last_week()).await,
            Err(DomainError::NotFound { entity: "client" })
        );

        let mut req = request(&f, monday(), hm(8, 0));
        req.service_id = ghost;
        assert_matches!(
            f.svc.validate_booking(&req, last_week()).await,
            Err(DomainError::NotFound { entity: "service" })
        );
    }

    #[tokio::test]
    async fn today_skips_elapsed_starts() {
        let f = fixture();
        let now = monday().and_time(hm(14, 10));
        let slots = f
            .svc
            .list_free_slots(f.professional, monday(), f.hour_service, now)
            .await
            .unwrap();
        assert_eq!(slots.first(), Some(&hm(14, 30)));
    }

    #[tokio::test]
    async fn every_free_slot_validates() {
        let f = fixture();
        for now in [last_week(), monday().and_time(hm(9, 45))] {
            let slots = f
                .svc
                .list_free_slots(f.professional, monday(), f.hour_service, now)
                .await
                .unwrap();
            assert!(!slots.is_empty());
            for t in slots {
                let res = f.svc.validate_booking(&request(&f, monday(), t), now).await;
                assert!(res.is_ok(), "{t} listed free but rejected: {res:?}");
            }
        }
    }

    #[tokio::test]
    async fn snapshotted_duration_wins_over_service() {
        let f = fixture();
        let mut req = request(&f, monday(), hm(9, 30));
        req.duration_min = Some(30);
        let ok = f.svc.validate_booking(&req, last_week()).await.unwrap();
        assert_eq!(ok.duration_min, 30);
    }
}
