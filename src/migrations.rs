//! Database migrations.
//!
//! Uses SQLx embedded migrations for the canonical store and the display mirror.

use sqlx::SqlitePool;

static CANONICAL_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/canonical");
static DISPLAY_MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("migrations/display");

pub async fn run_canonical(pool: &SqlitePool) -> anyhow::Result<()> {
    CANONICAL_MIGRATOR.run(pool).await?;
    Ok(())
}

pub async fn run_display(pool: &SqlitePool) -> anyhow::Result<()> {
    DISPLAY_MIGRATOR.run(pool).await?;
    Ok(())
}
