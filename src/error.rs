use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
}

/* -------------------------
   Domain errors
--------------------------*/

/// Errors raised by the scheduling and insurance logic. All of them are
/// recoverable at the request boundary.
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("{entity} not found or inactive")]
    NotFound { entity: &'static str },

    #[error("professional is not available at that time")]
    SchedulingConflict { conflicting: Option<Uuid> },

    #[error("{0}")]
    PastDate(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("{0}")]
    Validation(String),

    #[error("db error: {0}")]
    Database(sqlx::Error),
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        DomainError::NotFound { entity }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        DomainError::Validation(msg.into())
    }
}

// Serialization failures and exclusion violations both mean another request
// took the slot between our check and our write.
const PG_SERIALIZATION_FAILURE: &str = "40001";
const PG_EXCLUSION_VIOLATION: &str = "23P01";

impl From<sqlx::Error> for DomainError {
    fn from(e: sqlx::Error) -> Self {
        let code = e
            .as_database_error()
            .and_then(|d| d.code())
            .map(|c| c.into_owned());

        match code.as_deref() {
            Some(PG_SERIALIZATION_FAILURE) | Some(PG_EXCLUSION_VIOLATION) => {
                tracing::warn!("slot taken concurrently: {e}");
                DomainError::SchedulingConflict { conflicting: None }
            }
            _ => DomainError::Database(e),
        }
    }
}

/* -------------------------
   HTTP errors
--------------------------*/

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Internal(String),
}

impl ApiError {
    pub fn invalid_credentials() -> Self {
        ApiError::Unauthorized("INVALID_CREDENTIALS", "Username or password is incorrect".into())
    }

    pub fn session_expired() -> Self {
        ApiError::Unauthorized("SESSION_EXPIRED", "Session expired".into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ApiError::BadRequest("VALIDATION_ERROR", msg.into())
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    pub fn db(e: sqlx::Error) -> Self {
        tracing::error!("db error: {e}");
        ApiError::Internal(format!("db error: {e}"))
    }

    /// Unique violations become 409 with `msg`, anything else is a db error.
    pub fn unique_or_db(e: sqlx::Error, msg: &str) -> Self {
        let is_unique = e
            .as_database_error()
            .is_some_and(|d| d.is_unique_violation());
        if is_unique {
            ApiError::Conflict("ALREADY_EXISTS", msg.to_string())
        } else {
            ApiError::db(e)
        }
    }

    fn to_error_response(code: &str, message: &str) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
            },
        })
    }
}

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        let msg = e.to_string();
        match e {
            DomainError::NotFound { .. } => ApiError::NotFound("NOT_FOUND", msg),
            DomainError::SchedulingConflict { .. } => ApiError::Conflict("SCHEDULING_CONFLICT", msg),
            DomainError::PastDate(_) => ApiError::BadRequest("PAST_DATE", msg),
            DomainError::InvalidStatus(_) => ApiError::BadRequest("INVALID_STATUS", msg),
            DomainError::InvalidTransition { .. } => ApiError::Conflict("INVALID_TRANSITION", msg),
            DomainError::Validation(_) => ApiError::BadRequest("VALIDATION_ERROR", msg),
            DomainError::Database(e) => ApiError::db(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => {
                (StatusCode::UNAUTHORIZED, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Forbidden(code, msg) => {
                (StatusCode::FORBIDDEN, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::BadRequest(code, msg) => {
                (StatusCode::BAD_REQUEST, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::NotFound(code, msg) => {
                (StatusCode::NOT_FOUND, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Conflict(code, msg) => {
                (StatusCode::CONFLICT, ApiError::to_error_response(code, &msg)).into_response()
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ApiError::to_error_response("INTERNAL", &msg),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_map_to_http_status() {
        let cases = [
            (DomainError::not_found("client"), StatusCode::NOT_FOUND),
            (
                DomainError::SchedulingConflict { conflicting: None },
                StatusCode::CONFLICT,
            ),
            (DomainError::PastDate("yesterday".into()), StatusCode::BAD_REQUEST),
            (DomainError::InvalidStatus("foo".into()), StatusCode::BAD_REQUEST),
            (DomainError::validation("bad date"), StatusCode::BAD_REQUEST),
        ];

        for (err, expected) in cases {
            let resp = ApiError::from(err).into_response();
            assert_eq!(resp.status(), expected);
        }
    }

    #[test]
    fn not_found_message_names_entity() {
        assert_eq!(
            DomainError::not_found("professional").to_string(),
            "professional not found or inactive"
        );
    }

    #[test]
    fn plain_sqlx_errors_stay_database_errors() {
        let err = DomainError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, DomainError::Database(_)));
    }
}
