use sqlx::postgres::{PgPool, PgPoolOptions};

use crate::auth::hash_password;
use crate::config::BootstrapAdmin;
use crate::models::Role;

pub async fn connect_pg(database_url: &str, max_connections: u32) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// Creates the configured administrator unless the username is taken.
/// Safe to run on every start.
pub async fn bootstrap_admin(pool: &PgPool, admin: &BootstrapAdmin) -> anyhow::Result<()> {
    let password_hash = hash_password(&admin.password)?;

    let inserted = sqlx::query(
        r#"
        INSERT INTO usuario (username, display_name, password_hash, role, is_active)
        VALUES ($1, $1, $2, $3, true)
        ON CONFLICT (username) DO NOTHING
        "#,
    )
    .bind(&admin.username)
    .bind(password_hash)
    .bind(Role::Admin)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::info!(username = %admin.username, "bootstrap administrator created");
    } else {
        tracing::debug!(username = %admin.username, "bootstrap administrator already present");
    }
    Ok(())
}
