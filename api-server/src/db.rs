use rocket_db_pools::sqlx::{self, PgPool, migrate::Migrator};
use rocket_db_pools::Database;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Database)]
#[database("posts_db")]
pub struct PostsDb(sqlx::PgPool);

/// Apply pending migrations. Already-applied migrations are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    log::info!("checking database migration state");

    // `run` creates the migrations table, verifies checksums and applies
    // anything pending before traffic is served.
    MIGRATOR.run(pool).await?;

    log::info!("database migrations up to date");
    Ok(())
}
