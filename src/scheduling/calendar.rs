use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{Datelike, Days, Months, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;
use crate::scheduling::hhmm;
use crate::scheduling::lifecycle::AppointmentStatus;

const MAX_MONTH_ROWS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarViewKind {
    Day,
    #[default]
    Week,
    Month,
}

impl FromStr for CalendarViewKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "dia" => Ok(CalendarViewKind::Day),
            "week" | "semana" => Ok(CalendarViewKind::Week),
            "month" | "mes" => Ok(CalendarViewKind::Month),
            other => Err(DomainError::validation(format!(
                "unknown calendar view '{other}', expected day, week or month"
            ))),
        }
    }
}

impl CalendarViewKind {
    /// Inclusive date range to load appointments for. The month view loads
    /// the calendar month only, even though its grid shows padding days.
    pub fn query_range(self, reference: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            CalendarViewKind::Day => (reference, reference),
            CalendarViewKind::Week => {
                let start = week_start(reference);
                (start, start + Days::new(6))
            }
            CalendarViewKind::Month => month_bounds(reference),
        }
    }

    /// Reference dates for the previous and next period.
    pub fn neighbours(self, reference: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            CalendarViewKind::Day => (reference - Days::new(1), reference + Days::new(1)),
            CalendarViewKind::Week => (reference - Days::new(7), reference + Days::new(7)),
            CalendarViewKind::Month => {
                let (first, _) = month_bounds(reference);
                (
                    first.checked_sub_months(Months::new(1)).unwrap_or(first),
                    first.checked_add_months(Months::new(1)).unwrap_or(first),
                )
            }
        }
    }

    pub fn title(self, reference: NaiveDate) -> String {
        match self {
            CalendarViewKind::Day => reference.format("%A %d/%m/%Y").to_string(),
            CalendarViewKind::Week => {
                let (start, end) = self.query_range(reference);
                format!("Week {} - {}", start.format("%d/%m"), end.format("%d/%m/%Y"))
            }
            CalendarViewKind::Month => reference.format("%B %Y").to_string(),
        }
    }
}

/// Monday on or before `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Days::new(u64::from(date.weekday().num_days_from_monday()))
}

/// First and last day of the month containing `date`.
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = date - Days::new(u64::from(date.day0()));
    let last = first
        .checked_add_months(Months::new(1))
        .map(|next| next - Days::new(1))
        .unwrap_or(first);
    (first, last)
}

/* -------------------------
   Projections
--------------------------*/

/// Appointment joined with client, professional and service names.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AppointmentProjection {
    pub appointment_id: Uuid,
    pub appt_date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_min: i32,
    pub status: AppointmentStatus,
    pub client_name: String,
    pub professional_name: String,
    pub service_name: String,
    pub final_price_cents: Option<i64>,
    pub service_price_cents: i64,
}

impl AppointmentProjection {
    /// Override price when set, else the service list price.
    pub fn effective_price_cents(&self) -> i64 {
        self.final_price_cents.unwrap_or(self.service_price_cents)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarEntry {
    pub appointment_id: Uuid,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_min: i32,
    pub status: AppointmentStatus,
    pub color: &'static str,
    pub client_name: String,
    pub professional_name: String,
    pub service_name: String,
    pub price_cents: i64,
}

impl From<&AppointmentProjection> for CalendarEntry {
    fn from(p: &AppointmentProjection) -> Self {
        CalendarEntry {
            appointment_id: p.appointment_id,
            start_time: p.start_time,
            duration_min: p.duration_min,
            status: p.status,
            color: p.status.color(),
            client_name: p.client_name.clone(),
            professional_name: p.professional_name.clone(),
            service_name: p.service_name.clone(),
            price_cents: p.effective_price_cents(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarDay {
    pub date: NaiveDate,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_displayed_month: Option<bool>,
    pub appointments: Vec<CalendarEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PeriodStats {
    pub total: usize,
    pub pending: usize,
    pub confirmed: usize,
    pub completed: usize,
    pub cancelled: usize,
    /// Sum of effective prices of completed appointments.
    pub revenue_cents: i64,
}

pub fn period_stats<'a, I>(appointments: I) -> PeriodStats
where
    I: IntoIterator<Item = &'a AppointmentProjection>,
{
    appointments.into_iter().fold(PeriodStats::default(), |mut s, a| {
        s.total += 1;
        match a.status {
            AppointmentStatus::Pending => s.pending += 1,
            AppointmentStatus::Confirmed => s.confirmed += 1,
            AppointmentStatus::Completed => {
                s.completed += 1;
                s.revenue_cents += a.effective_price_cents();
            }
            AppointmentStatus::Cancelled => s.cancelled += 1,
        }
        s
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct CalendarView {
    pub view: CalendarViewKind,
    pub title: String,
    pub reference_date: NaiveDate,
    pub previous_date: NaiveDate,
    pub next_date: NaiveDate,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub days: Vec<CalendarDay>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub weeks: Vec<Vec<CalendarDay>>,
    pub stats: PeriodStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaySummary {
    pub date: NaiveDate,
    pub stats: PeriodStats,
}

pub fn day_summary(date: NaiveDate, appointments: &[AppointmentProjection]) -> DaySummary {
    DaySummary {
        date,
        stats: period_stats(appointments.iter().filter(|a| a.appt_date == date)),
    }
}

fn bucket_by_date(appointments: &[AppointmentProjection]) -> BTreeMap<NaiveDate, Vec<&AppointmentProjection>> {
    let mut map: BTreeMap<NaiveDate, Vec<&AppointmentProjection>> = BTreeMap::new();
    for a in appointments {
        map.entry(a.appt_date).or_default().push(a);
    }
    for day in map.values_mut() {
        day.sort_by_key(|a| a.start_time);
    }
    map
}

/// Groups appointments into the day, week or month grid around `reference`.
/// Stats cover appointments inside the query range only.
pub fn build_calendar(
    view: CalendarViewKind,
    reference: NaiveDate,
    appointments: &[AppointmentProjection],
) -> CalendarView {
    let (range_start, range_end) = view.query_range(reference);
    let (previous_date, next_date) = view.neighbours(reference);
    let buckets = bucket_by_date(appointments);

    let make_day = |date: NaiveDate, in_month: Option<bool>| CalendarDay {
        date,
        in_displayed_month: in_month,
        appointments: buckets
            .get(&date)
            .map(|v| v.iter().map(|a| CalendarEntry::from(*a)).collect())
            .unwrap_or_default(),
    };

    let mut days = Vec::new();
    let mut weeks = Vec::new();
    match view {
        CalendarViewKind::Day => days.push(make_day(reference, None)),
        CalendarViewKind::Week => {
            days = range_start
                .iter_days()
                .take(7)
                .map(|d| make_day(d, None))
                .collect();
        }
        CalendarViewKind::Month => {
            let mut cursor = week_start(range_start);
            while cursor <= range_end && weeks.len() < MAX_MONTH_ROWS {
                let row: Vec<CalendarDay> = cursor
                    .iter_days()
                    .take(7)
                    .map(|d| make_day(d, Some(d.month() == reference.month() && d.year() == reference.year())))
                    .collect();
                weeks.push(row);
                cursor = cursor + Days::new(7);
            }
        }
    }

    let stats = period_stats(
        appointments
            .iter()
            .filter(|a| a.appt_date >= range_start && a.appt_date <= range_end),
    );

    CalendarView {
        view,
        title: view.title(reference),
        reference_date: reference,
        previous_date,
        next_date,
        range_start,
        range_end,
        days,
        weeks,
        stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Weekday;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn appt(date: NaiveDate, h: u32, status: AppointmentStatus, price: i64, over: Option<i64>) -> AppointmentProjection {
        AppointmentProjection {
            appointment_id: Uuid::new_v4(),
            appt_date: date,
            start_time: NaiveTime::from_hms_opt(h, 0, 0).unwrap(),
            duration_min: 30,
            status,
            client_name: "Ana Paz".into(),
            professional_name: "Dr. Ruiz".into(),
            service_name: "Consulta".into(),
            final_price_cents: over,
            service_price_cents: price,
        }
    }

    #[test]
    fn view_parsing() {
        assert_eq!("Month".parse::<CalendarViewKind>().unwrap(), CalendarViewKind::Month);
        assert_eq!("semana".parse::<CalendarViewKind>().unwrap(), CalendarViewKind::Week);
        assert_matches!("year".parse::<CalendarViewKind>(), Err(DomainError::Validation(_)));
        assert_eq!(CalendarViewKind::default(), CalendarViewKind::Week);
    }

    #[test]
    fn week_is_monday_anchored() {
        for day in 2..=8 {
            let (start, end) = CalendarViewKind::Week.query_range(d(2026, 3, day));
            assert_eq!(start, d(2026, 3, 2));
            assert_eq!(end, d(2026, 3, 8));
            assert_eq!(start.weekday(), Weekday::Mon);
        }
        // Sunday belongs to the week that started six days earlier
        assert_eq!(week_start(d(2026, 3, 1)), d(2026, 2, 23));
    }

    #[test]
    fn month_grid_sizes() {
        // Feb 2021 starts on a Monday and has 28 days
        let feb = build_calendar(CalendarViewKind::Month, d(2021, 2, 10), &[]);
        assert_eq!(feb.weeks.len(), 4);

        // Mar 2026 starts on a Sunday and ends on a Tuesday
        let mar = build_calendar(CalendarViewKind::Month, d(2026, 3, 15), &[]);
        assert_eq!(mar.weeks.len(), 6);
        assert_eq!(mar.weeks[0][0].date, d(2026, 2, 23));
        assert_eq!(mar.weeks[0][0].in_displayed_month, Some(false));
        assert_eq!(mar.weeks[0][6].in_displayed_month, Some(true));

        for month in 1..=12 {
            let cal = build_calendar(CalendarViewKind::Month, d(2026, month, 1), &[]);
            assert!((4..=6).contains(&cal.weeks.len()));
            assert!(cal.weeks.iter().all(|w| w.len() == 7 && w[0].date.weekday() == Weekday::Mon));
            let last_cell = cal.weeks.last().unwrap()[6].date;
            assert!(last_cell >= cal.range_end);
        }
    }

    #[test]
    fn month_range_is_calendar_month() {
        assert_eq!(
            CalendarViewKind::Month.query_range(d(2024, 2, 17)),
            (d(2024, 2, 1), d(2024, 2, 29))
        );
        assert_eq!(
            CalendarViewKind::Month.neighbours(d(2026, 1, 31)),
            (d(2025, 12, 1), d(2026, 2, 1))
        );
    }

    #[test]
    fn revenue_counts_completed_only() {
        let mon = d(2026, 3, 2);
        let appts = vec![
            appt(mon, 9, AppointmentStatus::Completed, 10_000, None),
            appt(mon, 10, AppointmentStatus::Completed, 10_000, Some(7_500)),
            appt(mon, 11, AppointmentStatus::Cancelled, 10_000, None),
            appt(mon, 12, AppointmentStatus::Pending, 10_000, None),
            appt(mon, 13, AppointmentStatus::Confirmed, 10_000, None),
        ];
        let stats = period_stats(&appts);
        assert_eq!(
            stats,
            PeriodStats {
                total: 5,
                pending: 1,
                confirmed: 1,
                completed: 2,
                cancelled: 1,
                revenue_cents: 17_500,
            }
        );
    }

    #[test]
    fn empty_period_has_zero_stats() {
        let cal = build_calendar(CalendarViewKind::Day, d(2026, 3, 2), &[]);
        assert_eq!(cal.stats, PeriodStats::default());
        assert_eq!(cal.days.len(), 1);
        assert!(cal.days[0].appointments.is_empty());
    }

    #[test]
    fn week_buckets_sorted_by_time() {
        let tue = d(2026, 3, 3);
        let appts = vec![
            appt(tue, 15, AppointmentStatus::Pending, 1, None),
            appt(tue, 9, AppointmentStatus::Pending, 1, None),
            appt(d(2026, 3, 20), 9, AppointmentStatus::Pending, 1, None),
        ];
        let cal = build_calendar(CalendarViewKind::Week, tue, &appts);
        assert_eq!(cal.days.len(), 7);
        let tuesday = &cal.days[1];
        assert_eq!(tuesday.date, tue);
        let hours: Vec<_> = tuesday.appointments.iter().map(|a| a.start_time).collect();
        assert!(hours[0] < hours[1]);
        // out-of-range appointment is ignored by stats
        assert_eq!(cal.stats.total, 2);
    }

    #[test]
    fn day_summary_filters_to_date() {
        let mon = d(2026, 3, 2);
        let appts = vec![
            appt(mon, 9, AppointmentStatus::Completed, 5_000, None),
            appt(d(2026, 3, 3), 9, AppointmentStatus::Completed, 5_000, None),
        ];
        let s = day_summary(mon, &appts);
        assert_eq!(s.stats.total, 1);
        assert_eq!(s.stats.revenue_cents, 5_000);
    }

    #[test]
    fn titles() {
        assert_eq!(CalendarViewKind::Month.title(d(2026, 3, 15)), "March 2026");
        assert_eq!(CalendarViewKind::Week.title(d(2026, 3, 4)), "Week 02/03 - 08/03/2026");
        assert_eq!(CalendarViewKind::Day.title(d(2026, 3, 2)), "Monday 02/03/2026");
    }
}
