use chrono::{Datelike, NaiveDate, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::scheduling::hhmm;

/// Opening window for a single weekday. `closes_at` is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayHours {
    #[serde(with = "hhmm")]
    pub opens_at: NaiveTime,
    #[serde(with = "hhmm")]
    pub closes_at: NaiveTime,
}

impl DayHours {
    pub fn new(opens_at: NaiveTime, closes_at: NaiveTime) -> Result<Self, DomainError> {
        if closes_at <= opens_at {
            return Err(DomainError::validation(format!(
                "closing time {} must be after opening time {}",
                closes_at.format("%H:%M"),
                opens_at.format("%H:%M"),
            )));
        }
        Ok(Self { opens_at, closes_at })
    }

    /// Minutes since midnight, `[open, close)`.
    pub fn minute_bounds(&self) -> (i64, i64) {
        (minute_of_day(self.opens_at), minute_of_day(self.closes_at))
    }

    pub fn fits(&self, start: NaiveTime, duration_min: i64) -> bool {
        let (open, close) = self.minute_bounds();
        let s = i64::from(start.num_seconds_from_midnight());
        s >= open * 60 && s + duration_min * 60 <= close * 60
    }
}

pub fn minute_of_day(t: NaiveTime) -> i64 {
    i64::from(t.num_seconds_from_midnight() / 60)
}

/// Weekly opening hours of a professional, indexed Monday = 0.
/// `None` marks a closed day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingHoursTemplate {
    days: [Option<DayHours>; 7],
}

fn hm(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap_or(NaiveTime::MIN)
}

impl Default for WorkingHoursTemplate {
    /// Mon–Fri 08:00–18:00, Sat 09:00–13:00, Sun closed.
    fn default() -> Self {
        let weekday = Some(DayHours { opens_at: hm(8, 0), closes_at: hm(18, 0) });
        let saturday = Some(DayHours { opens_at: hm(9, 0), closes_at: hm(13, 0) });
        Self {
            days: [weekday, weekday, weekday, weekday, weekday, saturday, None],
        }
    }
}

impl WorkingHoursTemplate {
    pub fn closed() -> Self {
        Self { days: [None; 7] }
    }

    #[cfg(test)]
    pub fn with_day(mut self, weekday: Weekday, hours: Option<DayHours>) -> Self {
        self.days[weekday.num_days_from_monday() as usize] = hours;
        self
    }

    pub fn hours_for(&self, weekday: Weekday) -> Option<DayHours> {
        self.days[weekday.num_days_from_monday() as usize]
    }

    pub fn hours_on(&self, date: NaiveDate) -> Option<DayHours> {
        self.hours_for(date.weekday())
    }

    /// Builds a template from stored `(weekday, opens_at, closes_at)` rows.
    /// A professional with no stored rows gets the default template.
    pub fn from_rows<I>(rows: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = (i16, NaiveTime, NaiveTime)>,
    {
        let mut template = Self::closed();
        let mut any = false;
        for (weekday, opens_at, closes_at) in rows {
            let idx = weekday_index(weekday)?;
            template.days[idx] = Some(DayHours::new(opens_at, closes_at)?);
            any = true;
        }
        Ok(if any { template } else { Self::default() })
    }

    /// Open days as `(weekday, hours)` with Monday = 0, for persistence.
    pub fn to_rows(&self) -> Vec<(i16, DayHours)> {
        self.days
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.map(|h| (i as i16, h)))
            .collect()
    }
}

pub fn weekday_index(weekday: i16) -> Result<usize, DomainError> {
    if (0..7).contains(&weekday) {
        Ok(weekday as usize)
    } else {
        Err(DomainError::validation(format!(
            "weekday must be 0 (Monday) .. 6 (Sunday), got {weekday}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_template_matches_office_hours() {
        let t = WorkingHoursTemplate::default();
        assert_eq!(
            t.hours_for(Weekday::Mon),
            Some(DayHours { opens_at: hm(8, 0), closes_at: hm(18, 0) })
        );
        assert_eq!(
            t.hours_for(Weekday::Sat),
            Some(DayHours { opens_at: hm(9, 0), closes_at: hm(13, 0) })
        );
        assert_eq!(t.hours_for(Weekday::Sun), None);
    }

    #[test]
    fn empty_rows_fall_back_to_default() {
        let t = WorkingHoursTemplate::from_rows(Vec::new()).unwrap();
        assert_eq!(t, WorkingHoursTemplate::default());
    }

    #[test]
    fn stored_rows_replace_whole_week() {
        let t = WorkingHoursTemplate::from_rows(vec![(2, hm(14, 0), hm(20, 0))]).unwrap();
        assert_eq!(t.hours_for(Weekday::Mon), None);
        assert_eq!(
            t.hours_for(Weekday::Wed),
            Some(DayHours { opens_at: hm(14, 0), closes_at: hm(20, 0) })
        );
        assert_eq!(t.to_rows().len(), 1);
    }

    #[test]
    fn rejects_inverted_window_and_bad_weekday() {
        assert_matches!(
            WorkingHoursTemplate::from_rows(vec![(0, hm(18, 0), hm(8, 0))]),
            Err(DomainError::Validation(_))
        );
        assert_matches!(
            WorkingHoursTemplate::from_rows(vec![(7, hm(8, 0), hm(9, 0))]),
            Err(DomainError::Validation(_))
        );
    }

    #[test]
    fn fits_respects_exclusive_close() {
        let h = DayHours::new(hm(9, 0), hm(13, 0)).unwrap();
        assert!(h.fits(hm(12, 0), 60));
        assert!(!h.fits(hm(12, 30), 60));
        assert!(!h.fits(hm(8, 30), 30));
    }

    #[test]
    fn serializes_as_hh_mm() {
        let h = DayHours::new(hm(9, 0), hm(13, 30)).unwrap();
        let json = serde_json::to_value(h).unwrap();
        assert_eq!(json["opens_at"], "09:00");
        assert_eq!(json["closes_at"], "13:30");
    }
}
