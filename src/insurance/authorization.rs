use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::insurance::coverage::CoverageTerms;

pub const DEFAULT_VALIDITY_DAYS: u64 = 30;

/// Prior-authorization status, stored as smallint on `autorizacion.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    Pending = 0,
    Approved = 1,
    Rejected = 2,
    Expired = 3,
}

impl AuthorizationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Approved => "approved",
            AuthorizationStatus::Rejected => "rejected",
            AuthorizationStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthorizationStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "pendiente" => Ok(AuthorizationStatus::Pending),
            "approved" | "aprobada" => Ok(AuthorizationStatus::Approved),
            "rejected" | "rechazada" => Ok(AuthorizationStatus::Rejected),
            "expired" | "vencida" => Ok(AuthorizationStatus::Expired),
            _ => Err(DomainError::InvalidStatus(s.to_string())),
        }
    }
}

/// The mutable part of an authorization that the lifecycle operates on.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationState {
    pub status: AuthorizationStatus,
    pub decided_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub remaining_uses: i32,
    pub is_active: bool,
}

impl AuthorizationState {
    pub fn new_pending(remaining_uses: i32) -> Self {
        Self {
            status: AuthorizationStatus::Pending,
            decided_at: None,
            expires_at: None,
            rejection_reason: None,
            remaining_uses,
            is_active: true,
        }
    }

    fn ensure_pending(&self, action: &str) -> Result<(), DomainError> {
        if self.status != AuthorizationStatus::Pending {
            return Err(DomainError::InvalidTransition {
                from: self.status.to_string(),
                to: action.to_string(),
            });
        }
        Ok(())
    }

    /// Approves a pending authorization. Without an explicit expiry it is
    /// valid for [`DEFAULT_VALIDITY_DAYS`].
    pub fn approve(&mut self, now: DateTime<Utc>, expires_at: Option<DateTime<Utc>>) -> Result<(), DomainError> {
        self.ensure_pending("approved")?;
        let expires_at = expires_at.unwrap_or(now + Days::new(DEFAULT_VALIDITY_DAYS));
        if expires_at <= now {
            return Err(DomainError::validation("expiry must be in the future"));
        }
        self.status = AuthorizationStatus::Approved;
        self.decided_at = Some(now);
        self.expires_at = Some(expires_at);
        Ok(())
    }

    pub fn reject(&mut self, now: DateTime<Utc>, reason: Option<&str>) -> Result<(), DomainError> {
        self.ensure_pending("rejected")?;
        self.status = AuthorizationStatus::Rejected;
        self.decided_at = Some(now);
        self.rejection_reason = reason.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
        Ok(())
    }

    pub fn is_past_expiry(&self, today: NaiveDate) -> bool {
        self.expires_at.is_some_and(|e| e.date_naive() < today)
    }

    pub fn is_usable(&self, today: NaiveDate) -> bool {
        self.status == AuthorizationStatus::Approved
            && self.is_active
            && self.remaining_uses > 0
            && !self.is_past_expiry(today)
    }

    /// Whole days until expiry; negative once expired, `None` without expiry.
    pub fn days_remaining(&self, today: NaiveDate) -> Option<i64> {
        self.expires_at.map(|e| (e.date_naive() - today).num_days())
    }

    /// Consumes one use. The last use expires the authorization.
    pub fn consume(&mut self, today: NaiveDate) -> Result<(), DomainError> {
        if !self.is_usable(today) {
            return Err(DomainError::validation(format!(
                "authorization is not usable (status {}, {} uses left)",
                self.status, self.remaining_uses
            )));
        }
        self.remaining_uses -= 1;
        if self.remaining_uses == 0 {
            self.status = AuthorizationStatus::Expired;
        }
        Ok(())
    }

    /// Moves an approved authorization past its expiry date to expired.
    /// Returns whether the status changed.
    pub fn refresh_expiry(&mut self, today: NaiveDate) -> bool {
        if self.status == AuthorizationStatus::Approved && self.is_past_expiry(today) {
            self.status = AuthorizationStatus::Expired;
            return true;
        }
        false
    }
}

/// `AUTH-YYYYMMDD-XXXX` with four random upper-case hex digits.
pub fn generate_number(today: NaiveDate) -> String {
    let suffix: u16 = rand::thread_rng().r#gen();
    format!("AUTH-{}-{:04X}", today.format("%Y%m%d"), suffix)
}

/// Terms stored on a new authorization: explicit values win, the plan fills
/// the rest.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestedTerms {
    pub coverage_percent: Option<f64>,
    pub copay_cents: Option<i64>,
    pub coinsurance_percent: Option<f64>,
    pub limit_cents: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanTerms {
    pub coverage: CoverageTerms,
    pub per_visit_limit_cents: Option<i64>,
}

pub fn inherit_plan_terms(requested: RequestedTerms, plan: Option<&PlanTerms>) -> RequestedTerms {
    let Some(plan) = plan else {
        return requested;
    };
    RequestedTerms {
        coverage_percent: requested.coverage_percent.or(Some(plan.coverage.coverage_percent)),
        copay_cents: requested.copay_cents.or(Some(plan.coverage.copay_cents)),
        coinsurance_percent: requested.coinsurance_percent.or(Some(plan.coverage.coinsurance_percent)),
        limit_cents: requested.limit_cents.or(plan.per_visit_limit_cents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap()
    }

    fn today() -> NaiveDate {
        now().date_naive()
    }

    #[test]
    fn approve_defaults_to_thirty_days() {
        let mut a = AuthorizationState::new_pending(1);
        a.approve(now(), None).unwrap();
        assert_eq!(a.status, AuthorizationStatus::Approved);
        assert_eq!(a.decided_at, Some(now()));
        assert_eq!(a.days_remaining(today()), Some(30));
        assert!(a.is_usable(today()));
    }

    #[test]
    fn decisions_only_from_pending() {
        let mut a = AuthorizationState::new_pending(1);
        a.reject(now(), Some(" missing study ")).unwrap();
        assert_eq!(a.rejection_reason.as_deref(), Some("missing study"));
        assert_matches!(a.approve(now(), None), Err(DomainError::InvalidTransition { .. }));
        assert_matches!(a.reject(now(), None), Err(DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn last_use_expires() {
        let mut a = AuthorizationState::new_pending(2);
        a.approve(now(), None).unwrap();
        a.consume(today()).unwrap();
        assert_eq!(a.status, AuthorizationStatus::Approved);
        a.consume(today()).unwrap();
        assert_eq!(a.remaining_uses, 0);
        assert_eq!(a.status, AuthorizationStatus::Expired);
        assert_matches!(a.consume(today()), Err(DomainError::Validation(_)));
    }

    #[test]
    fn pending_cannot_be_used() {
        let mut a = AuthorizationState::new_pending(1);
        assert!(!a.is_usable(today()));
        assert_matches!(a.consume(today()), Err(DomainError::Validation(_)));
    }

    #[test]
    fn expiry_date_passing() {
        let mut a = AuthorizationState::new_pending(1);
        a.approve(now(), Some(now() + Days::new(5))).unwrap();
        let later = today() + Days::new(6);
        assert!(!a.is_usable(later));
        assert_eq!(a.days_remaining(later), Some(-1));
        assert!(a.refresh_expiry(later));
        assert_eq!(a.status, AuthorizationStatus::Expired);
        assert!(!a.refresh_expiry(later));
    }

    #[test]
    fn expiry_in_the_past_is_rejected() {
        let mut a = AuthorizationState::new_pending(1);
        assert_matches!(
            a.approve(now(), Some(now() - Days::new(1))),
            Err(DomainError::Validation(_))
        );
        assert_eq!(a.status, AuthorizationStatus::Pending);
    }

    #[test]
    fn number_format() {
        let n = generate_number(today());
        assert!(n.starts_with("AUTH-20260302-"));
        assert_eq!(n.len(), "AUTH-20260302-ABCD".len());
        assert!(n[14..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn plan_fills_missing_terms() {
        let plan = PlanTerms {
            coverage: CoverageTerms {
                coverage_percent: 70.0,
                copay_cents: 1_000,
                coinsurance_percent: 0.0,
            },
            per_visit_limit_cents: Some(50_000),
        };
        let requested = RequestedTerms {
            coverage_percent: Some(90.0),
            ..Default::default()
        };
        let t = inherit_plan_terms(requested, Some(&plan));
        assert_eq!(t.coverage_percent, Some(90.0));
        assert_eq!(t.copay_cents, Some(1_000));
        assert_eq!(t.limit_cents, Some(50_000));
        assert_eq!(inherit_plan_terms(requested, None), requested);
    }
}
