use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Appointment status, stored as smallint on `turno.status`.
///
/// ```text
/// pending ──▶ confirmed ──▶ completed
///    │            │
///    └────────────┴──▶ cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending = 0,
    Confirmed = 1,
    Completed = 2,
    Cancelled = 3,
}

impl AppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    /// Pending and confirmed appointments occupy their slot.
    pub fn blocks_slot(self) -> bool {
        matches!(self, AppointmentStatus::Pending | AppointmentStatus::Confirmed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AppointmentStatus::Completed | AppointmentStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed) | (Confirmed, Completed) | (Pending, Cancelled) | (Confirmed, Cancelled)
        )
    }

    /// Badge color used by calendar clients.
    pub fn color(self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "#f0ad4e",
            AppointmentStatus::Confirmed => "#0275d8",
            AppointmentStatus::Completed => "#5cb85c",
            AppointmentStatus::Cancelled => "#d9534f",
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "pendiente" => Ok(AppointmentStatus::Pending),
            "confirmed" | "confirmado" => Ok(AppointmentStatus::Confirmed),
            "completed" | "completado" => Ok(AppointmentStatus::Completed),
            "cancelled" | "canceled" | "cancelado" => Ok(AppointmentStatus::Cancelled),
            _ => Err(DomainError::InvalidStatus(s.to_string())),
        }
    }
}

/// Status for a new appointment. Absent means pending.
pub fn initial_status(requested: Option<&str>) -> Result<AppointmentStatus, DomainError> {
    match requested.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(AppointmentStatus::Pending),
        Some(s) => s.parse(),
    }
}

/// Checked transition along the status graph.
pub fn transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<AppointmentStatus, DomainError> {
    if from.can_transition_to(to) {
        Ok(to)
    } else {
        Err(DomainError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

pub fn confirm(from: AppointmentStatus) -> Result<AppointmentStatus, DomainError> {
    transition(from, AppointmentStatus::Confirmed)
}

pub fn complete(from: AppointmentStatus) -> Result<AppointmentStatus, DomainError> {
    transition(from, AppointmentStatus::Completed)
}

pub fn cancel(from: AppointmentStatus) -> Result<AppointmentStatus, DomainError> {
    transition(from, AppointmentStatus::Cancelled)
}

/// Unchecked status write for administrators: any value is accepted,
/// including moves out of a terminal state.
pub fn admin_override(from: AppointmentStatus, requested: &str) -> Result<AppointmentStatus, DomainError> {
    let to: AppointmentStatus = requested.parse()?;
    if !from.can_transition_to(to) && from != to {
        tracing::warn!(%from, %to, "status override outside the normal lifecycle");
    }
    Ok(to)
}

/// Appends the cancellation reason to existing notes.
pub fn cancellation_notes(existing: Option<&str>, reason: Option<&str>) -> Option<String> {
    let existing = existing.map(str::trim).filter(|s| !s.is_empty());
    let reason = reason.map(str::trim).filter(|s| !s.is_empty());
    match (existing, reason) {
        (e, None) => e.map(str::to_string),
        (None, Some(r)) => Some(format!("Cancelado: {r}")),
        (Some(e), Some(r)) => Some(format!("{e}\nCancelado: {r}")),
    }
}
