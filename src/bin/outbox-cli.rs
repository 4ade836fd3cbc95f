use std::env;

use chrono::{Duration, Utc};
use outbox_engine::{evaluate_health, OutboxConfig, OutboxRepository, OutboxStatus, SqlxOutboxRepository, StatusCounts};
use sqlx::PgPool;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  outbox-cli health <DATABASE_URL>");
        eprintln!("  outbox-cli retain <older_than_days> <DATABASE_URL>");
        eprintln!("  outbox-cli force-dead <message_uuid> <reason> <DATABASE_URL>");
        std::process::exit(1);
    }

    let cmd = args[1].as_str();

    match cmd {
        "health" if args.len() == 3 => {
            let db_url = &args[2];
            let pool = PgPool::connect(db_url).await?;
            let repo = SqlxOutboxRepository::new(pool);
            let config = OutboxConfig::load().unwrap_or_default();

            let counts = StatusCounts {
                pending: repo.count_by_status(OutboxStatus::Pending).await?,
                processing: repo.count_by_status(OutboxStatus::Processing).await?,
                published: repo.count_by_status(OutboxStatus::Published).await?,
                failed: repo.count_by_status(OutboxStatus::Failed).await?,
                dead: repo.count_by_status(OutboxStatus::Dead).await?,
            };

            let health = evaluate_health(
                counts,
                config.health_warning_threshold,
                config.health_error_threshold,
            );
            println!("{:?}", health);
            println!(
                "pending={} processing={} published={} failed={} dead={}",
                counts.pending, counts.processing, counts.published, counts.failed, counts.dead
            );
        }
        "retain" if args.len() == 4 => {
            let older_than_days: i64 = args[2].parse()?;
            let db_url = &args[3];
            let pool = PgPool::connect(db_url).await?;
            let repo = SqlxOutboxRepository::new(pool);
            let cutoff = Utc::now() - Duration::days(older_than_days);
            let deleted = repo.delete_published_older_than(cutoff).await?;
            println!("Deleted {} published rows older than {}", deleted, cutoff);
        }
        "force-dead" if args.len() == 5 => {
            let id = Uuid::parse_str(&args[2])?;
            let reason = &args[3];
            let db_url = &args[4];
            let pool = PgPool::connect(db_url).await?;
            let repo = SqlxOutboxRepository::new(pool);
            let now = Utc::now();
            let existing = repo
                .find_by_id(id)
                .await?
                .ok_or_else(|| format!("no such message: {id}"))?;
            repo.mark_dead(id, reason, existing.attempts.max(1), now).await?;
            println!("Marked {} DEAD: {}", id, reason);
        }
        _ => {
            eprintln!("Invalid arguments");
            std::process::exit(1);
        }
    }

    Ok(())
}
