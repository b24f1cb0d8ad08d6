use crate::models::AppState;
use axum::Router;

pub mod appointment_routes;
pub mod auth_routes;
pub mod authorization_routes;
pub mod client_routes;
pub mod insurer_routes;
pub mod professional_routes;
pub mod service_routes;
pub mod user_routes;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/auth", auth_routes::router())
        .nest("/api/v1/users", user_routes::router())
        .nest("/api/v1", client_routes::router())
        .nest("/api/v1", professional_routes::router())
        .nest("/api/v1", service_routes::router())
        .nest("/api/v1", insurer_routes::router())
        .nest("/api/v1", authorization_routes::router())
        .nest("/api/v1", appointment_routes::router())
        .with_state(state)
}
