use chrono::NaiveDate;
use serde::Serialize;

/// Cost split terms of an insurer plan or an approved authorization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CoverageTerms {
    pub coverage_percent: f64,
    pub copay_cents: i64,
    pub coinsurance_percent: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CostQuote {
    pub total_cents: i64,
    pub covered_cents: i64,
    pub patient_cents: i64,
}

impl CoverageTerms {
    /// Patient share of `total_cents`:
    /// `total - covered + copay + coinsurance% of covered`, never negative.
    /// No coverage means the patient pays the total and no copay applies.
    pub fn patient_cost(&self, total_cents: i64) -> i64 {
        if self.coverage_percent <= 0.0 {
            return total_cents;
        }
        let total = total_cents as f64;
        let covered = total * self.coverage_percent / 100.0;
        let coinsurance = covered * self.coinsurance_percent / 100.0;
        let patient = total - covered + self.copay_cents as f64 + coinsurance;
        patient.max(0.0).round() as i64
    }

    pub fn quote(&self, total_cents: i64) -> CostQuote {
        let patient_cents = self.patient_cost(total_cents);
        CostQuote {
            total_cents,
            covered_cents: (total_cents - patient_cents).max(0),
            patient_cents,
        }
    }
}

/// Prior-authorization rule shared by insurers and plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthorizationPolicy {
    pub requires_authorization: bool,
    pub lead_days: i32,
}

impl AuthorizationPolicy {
    /// True when an authorization is required and the appointment is closer
    /// than the lead time.
    pub fn requires_authorization_for(&self, appt_date: NaiveDate, today: NaiveDate) -> bool {
        self.requires_authorization && (appt_date - today).num_days() < i64::from(self.lead_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms(coverage: f64, copay: i64, coins: f64) -> CoverageTerms {
        CoverageTerms {
            coverage_percent: coverage,
            copay_cents: copay,
            coinsurance_percent: coins,
        }
    }

    #[test]
    fn no_coverage_pays_everything() {
        assert_eq!(terms(0.0, 5_000, 10.0).patient_cost(20_000), 20_000);
    }

    #[test]
    fn coverage_with_copay_and_coinsurance() {
        // 80% of 10000 covered = 8000; patient 2000 + 500 copay + 10% of 8000
        assert_eq!(terms(80.0, 500, 10.0).patient_cost(10_000), 3_300);
        assert_eq!(terms(100.0, 0, 0.0).patient_cost(10_000), 0);
    }

    #[test]
    fn quote_splits_total() {
        let q = terms(70.0, 0, 0.0).quote(10_000);
        assert_eq!(q.patient_cents, 3_000);
        assert_eq!(q.covered_cents, 7_000);
    }

    #[test]
    fn lead_time_rule() {
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let policy = AuthorizationPolicy {
            requires_authorization: true,
            lead_days: 3,
        };
        assert!(policy.requires_authorization_for(today + chrono::Days::new(2), today));
        assert!(!policy.requires_authorization_for(today + chrono::Days::new(3), today));

        let off = AuthorizationPolicy {
            requires_authorization: false,
            lead_days: 30,
        };
        assert!(!off.requires_authorization_for(today, today));
    }
}
