use chrono::{NaiveDate, NaiveTime};

use crate::scheduling::working_hours::WorkingHoursTemplate;

pub const SLOT_STEP_MINUTES: i64 = 30;

/// Candidate start times on `date` for an appointment of `duration_min`,
/// stepping [`SLOT_STEP_MINUTES`] from opening time. A candidate is kept
/// only when the whole appointment ends by closing time.
///
/// Past dates, closed weekdays and non-positive durations yield nothing.
pub fn candidate_starts(
    template: &WorkingHoursTemplate,
    date: NaiveDate,
    today: NaiveDate,
    duration_min: i64,
) -> Vec<NaiveTime> {
    candidate_starts_every(template, date, today, duration_min, SLOT_STEP_MINUTES)
}

pub fn candidate_starts_every(
    template: &WorkingHoursTemplate,
    date: NaiveDate,
    today: NaiveDate,
    duration_min: i64,
    step_min: i64,
) -> Vec<NaiveTime> {
    if date < today || duration_min <= 0 || step_min <= 0 {
        return Vec::new();
    }
    let Some(hours) = template.hours_on(date) else {
        return Vec::new();
    };

    let (open, close) = hours.minute_bounds();
    let mut out = Vec::new();
    let mut start = open;
    while start + duration_min <= close {
        if let Some(t) = NaiveTime::from_num_seconds_from_midnight_opt((start * 60) as u32, 0) {
            out.push(t);
        }
        start += step_min;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduling::working_hours::DayHours;
    use chrono::Weekday;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn monday() -> NaiveDate {
        day(2026, 3, 2)
    }

    #[test]
    fn monday_hour_long_service() {
        let t = WorkingHoursTemplate::default();
        let slots = candidate_starts(&t, monday(), monday(), 60);

        assert_eq!(slots.first(), Some(&hm(8, 0)));
        assert_eq!(slots.last(), Some(&hm(17, 0)));
        // 08:00..=17:00 every 30 minutes
        assert_eq!(slots.len(), 19);
        assert!(slots.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn every_slot_ends_before_close() {
        let t = WorkingHoursTemplate::default();
        for duration in [15, 30, 45, 90, 600] {
            for s in candidate_starts(&t, monday(), monday(), duration) {
                let hours = t.hours_on(monday()).unwrap();
                assert!(hours.fits(s, duration), "{s} + {duration} overflows");
            }
        }
    }

    #[test]
    fn sunday_and_past_dates_are_empty() {
        let t = WorkingHoursTemplate::default();
        let sunday = day(2026, 3, 8);
        assert!(candidate_starts(&t, sunday, monday(), 30).is_empty());
        assert!(candidate_starts(&t, monday(), day(2026, 3, 3), 30).is_empty());
    }

    #[test]
    fn longer_than_window_is_empty() {
        let t = WorkingHoursTemplate::default();
        let saturday = day(2026, 3, 7);
        assert!(candidate_starts(&t, saturday, monday(), 241).is_empty());
        assert_eq!(candidate_starts(&t, saturday, monday(), 240), vec![hm(9, 0)]);
    }

    #[test]
    fn non_positive_duration_is_empty() {
        let t = WorkingHoursTemplate::default();
        assert!(candidate_starts(&t, monday(), monday(), 0).is_empty());
        assert!(candidate_starts(&t, monday(), monday(), -30).is_empty());
    }

    #[test]
    fn odd_opening_time_is_the_first_candidate() {
        let t = WorkingHoursTemplate::closed().with_day(
            Weekday::Mon,
            Some(DayHours::new(hm(8, 15), hm(9, 45)).unwrap()),
        );
        assert_eq!(
            candidate_starts(&t, monday(), monday(), 30),
            vec![hm(8, 15), hm(8, 45), hm(9, 15)]
        );
    }
}
