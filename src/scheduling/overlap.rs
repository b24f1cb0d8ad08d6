use chrono::{NaiveTime, Timelike};
use uuid::Uuid;

use crate::scheduling::lifecycle::AppointmentStatus;

pub const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Half-open interval in seconds since midnight, matching the exact
/// timestamps of the `turno_no_overlap` constraint. `end` may pass 24:00.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: i64,
    pub end: i64,
}

impl Interval {
    pub fn new(start: NaiveTime, duration_min: i64) -> Self {
        let start = i64::from(start.num_seconds_from_midnight());
        Self { start, end: start + duration_min.max(0) * 60 }
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end > SECONDS_PER_DAY
    }
}

/// An existing appointment on the same professional and day.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Booking {
    pub appointment_id: Uuid,
    pub start_time: NaiveTime,
    pub duration_min: i32,
    pub status: AppointmentStatus,
}

impl Booking {
    pub fn interval(&self) -> Interval {
        Interval::new(self.start_time, i64::from(self.duration_min))
    }
}

/// Returns the id of the first blocking booking overlapping `candidate`.
/// Cancelled and completed bookings never block; `exclude` skips the
/// appointment being rescheduled.
pub fn find_conflict(candidate: Interval, existing: &[Booking], exclude: Option<Uuid>) -> Option<Uuid> {
    existing
        .iter()
        .filter(|b| b.status.blocks_slot())
        .filter(|b| Some(b.appointment_id) != exclude)
        .find(|b| b.interval().overlaps(&candidate))
        .map(|b| b.appointment_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn booking(start: NaiveTime, duration_min: i32, status: AppointmentStatus) -> Booking {
        Booking {
            appointment_id: Uuid::new_v4(),
            start_time: start,
            duration_min,
            status,
        }
    }

    #[test]
    fn touching_intervals_do_not_overlap() {
        let a = Interval::new(hm(10, 0), 60);
        let b = Interval::new(hm(11, 0), 30);
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn boundary_pairs_at_half_past() {
        let first = Interval::new(hm(9, 0), 30);
        assert!(!first.overlaps(&Interval::new(hm(9, 30), 30)));
        assert!(first.overlaps(&Interval::new(hm(9, 15), 30)));
    }

    #[test]
    fn seconds_count_towards_overlap() {
        let existing = vec![booking(hm(10, 0), 30, AppointmentStatus::Pending)];
        let late_start = Interval::new(hms(9, 30, 30), 30);
        assert_eq!(find_conflict(late_start, &existing, None), Some(existing[0].appointment_id));

        let ends_on_the_dot = Interval::new(hms(9, 29, 59), 30);
        assert!(ends_on_the_dot.end < existing[0].interval().start);
    }

    #[test]
    fn late_evening_interval_crosses_midnight() {
        assert!(Interval::new(hm(23, 30), 60).crosses_midnight());
        assert!(!Interval::new(hm(23, 30), 30).crosses_midnight());
    }

    #[test]
    fn overlap_is_symmetric() {
        let pairs = [
            (Interval::new(hm(10, 0), 60), Interval::new(hm(10, 30), 60)),
            (Interval::new(hm(9, 0), 180), Interval::new(hm(10, 0), 15)),
            (Interval::new(hm(10, 0), 30), Interval::new(hm(14, 0), 30)),
        ];
        for (a, b) in pairs {
            assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }
    }

    #[test]
    fn reports_first_conflicting_booking() {
        let existing = vec![
            booking(hm(9, 0), 30, AppointmentStatus::Confirmed),
            booking(hm(10, 0), 60, AppointmentStatus::Pending),
        ];
        let hit = find_conflict(Interval::new(hm(10, 30), 30), &existing, None);
        assert_eq!(hit, Some(existing[1].appointment_id));
    }

    #[test]
    fn terminal_bookings_never_block() {
        let existing = vec![
            booking(hm(10, 0), 60, AppointmentStatus::Cancelled),
            booking(hm(10, 0), 60, AppointmentStatus::Completed),
        ];
        assert_eq!(find_conflict(Interval::new(hm(10, 0), 60), &existing, None), None);
    }

    #[test]
    fn excluded_appointment_is_ignored() {
        let existing = vec![booking(hm(10, 0), 60, AppointmentStatus::Pending)];
        let me = existing[0].appointment_id;
        assert_eq!(find_conflict(Interval::new(hm(10, 30), 60), &existing, Some(me)), None);
    }

    #[test]
    fn order_of_existing_does_not_matter_for_detection() {
        let mut existing = vec![
            booking(hm(15, 0), 30, AppointmentStatus::Pending),
            booking(hm(8, 0), 30, AppointmentStatus::Pending),
        ];
        let candidate = Interval::new(hm(8, 15), 30);
        let a = find_conflict(candidate, &existing, None).is_some();
        existing.reverse();
        let b = find_conflict(candidate, &existing, None).is_some();
        assert!(a && b);
    }
}
