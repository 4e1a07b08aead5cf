use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use posts_api::config::ImportConfig;
use posts_api::db;
use posts_api::import::ImportService;
use posts_api::store::PgPostStore;

#[derive(Parser, Debug)]
#[command(
    name = "import_posts",
    about = "Fetch the upstream posts collection once and upsert it into the database"
)]
struct Args {
    /// Override the upstream URL (defaults to POSTS_SOURCE_URL or the public placeholder API).
    #[arg(long)]
    source_url: Option<String>,

    /// Maximum fetch attempts before giving up.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Exit non-zero when any individual row could not be saved.
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let mut config = ImportConfig::from_env();
    if let Some(url) = args.source_url {
        config.source_url = url;
    }
    if let Some(max_attempts) = args.max_attempts {
        config.max_attempts = max_attempts.max(1);
    }
    if args.strict {
        config.strict_row_failures = true;
    }

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.pool.max_workers.max(1) as u32)
        .connect(&database_url)
        .await?;

    db::run_migrations(&pool).await?;

    let service = ImportService::from_config(&config, PgPostStore::shared(pool.clone()))?;

    match service.run().await {
        Ok(report) => {
            println!(
                "Imported {} of {} posts from {} ({} fetch attempt(s), {} row failure(s))",
                report.saved,
                report.fetched,
                config.source_url,
                report.fetch_attempts,
                report.failures.len()
            );
            for failure in &report.failures {
                println!("  post {}: {}", failure.id, failure.cause);
            }
            pool.close().await;
            Ok(())
        }
        Err(err) => {
            writeln!(io::stderr(), "error: import failed: {err}")?;
            pool.close().await;
            std::process::exit(1);
        }
    }
}
