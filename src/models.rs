use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub session_ttl_hours: i64,
}

/* -------------------------
   API DTOs
--------------------------*/

#[derive(Debug, Serialize)]
pub struct DataResponse<T> {
    pub data: T,
}

impl<T> DataResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub data: OkData,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { data: OkData { ok: true } }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub device_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LoginResponseData {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MeResponseData {
    pub user: UserProfile,
    pub session: SessionInfo,
}

#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Common filters for list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub q: Option<String>,
    #[serde(default)]
    pub include_inactive: bool,
}

impl ListQuery {
    /// `%term%` for ILIKE, or None when no search term was given.
    pub fn like_pattern(&self) -> Option<String> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| format!("%{s}%"))
    }
}

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

/// 1-based page parameters.
#[derive(Debug, Default, Clone, Copy, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageParams {
    pub fn page(&self) -> i64 {
        self.page.filter(|p| *p > 0).unwrap_or(1)
    }

    pub fn per_page(&self) -> i64 {
        self.per_page
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_PER_PAGE)
            .min(MAX_PER_PAGE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.per_page()
    }
}

#[derive(Debug, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, params: PageParams, total: i64) -> Self {
        Self {
            items,
            page: params.page(),
            per_page: params.per_page(),
            total,
        }
    }
}

/* -------------------------
   DB Row Models
--------------------------*/

#[derive(Debug, sqlx::FromRow)]
pub struct UserRow {
    pub user_id: Uuid,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub role: Role,
    pub is_active: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct SessionTokenRow {
    pub session_token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/* -------------------------
   Roles
--------------------------*/

/// Stored as smallint on `usuario.role`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "smallint")]
#[repr(i16)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin = 1,
    Medico = 2,
    Usuario = 3,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Medico => "medico",
            Role::Usuario => "usuario",
        }
    }

    /// Reception staff and admins book and move appointments.
    pub fn can_manage_schedule(self) -> bool {
        matches!(self, Role::Admin | Role::Usuario)
    }
}

/* -------------------------
   Helpers
--------------------------*/

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`)
/// in PATCH bodies. Use with `#[serde(default, deserialize_with = ...)]`.
pub fn deserialize_double_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Trims and drops empty strings.
pub fn clean_opt(s: Option<&str>) -> Option<String> {
    s.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string)
}

/// Resolves a nullable PATCH field against the stored value.
pub fn patch_text(field: Option<Option<String>>, existing: Option<String>) -> Option<String> {
    match field {
        None => existing,
        Some(v) => clean_opt(v.as_deref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Patch {
        #[serde(default, deserialize_with = "deserialize_double_option")]
        email: Option<Option<String>>,
    }

    #[test]
    fn double_option_distinguishes_null_from_missing() {
        let missing: Patch = serde_json::from_str("{}").unwrap();
        let null: Patch = serde_json::from_str(r#"{"email":null}"#).unwrap();
        let set: Patch = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();

        assert_eq!(missing.email, None);
        assert_eq!(null.email, Some(None));
        assert_eq!(set.email, Some(Some("a@b.c".into())));
    }

    #[test]
    fn patch_text_keeps_clears_or_replaces() {
        let old = Some("old".to_string());
        assert_eq!(patch_text(None, old.clone()), old);
        assert_eq!(patch_text(Some(None), old.clone()), None);
        assert_eq!(patch_text(Some(Some("  ".into())), old.clone()), None);
        assert_eq!(patch_text(Some(Some(" new ".into())), old), Some("new".into()));
    }

    #[test]
    fn like_pattern_ignores_blank_terms() {
        let q = ListQuery { q: Some("  ".into()), include_inactive: false };
        assert_eq!(q.like_pattern(), None);
        let q = ListQuery { q: Some("gar".into()), include_inactive: false };
        assert_eq!(q.like_pattern().as_deref(), Some("%gar%"));
    }

    #[test]
    fn page_params_are_clamped() {
        let p = PageParams { page: Some(3), per_page: Some(500) };
        assert_eq!(p.per_page(), MAX_PER_PAGE);
        assert_eq!(p.offset(), 2 * MAX_PER_PAGE);

        let p = PageParams { page: Some(0), per_page: Some(-1) };
        assert_eq!(p.page(), 1);
        assert_eq!(p.per_page(), DEFAULT_PER_PAGE);
        assert_eq!(p.offset(), 0);
    }

    #[test]
    fn only_admin_and_reception_manage_schedule() {
        assert!(Role::Admin.can_manage_schedule());
        assert!(Role::Usuario.can_manage_schedule());
        assert!(!Role::Medico.can_manage_schedule());
        assert_eq!(serde_json::to_string(&Role::Medico).unwrap(), r#""medico""#);
    }
}
