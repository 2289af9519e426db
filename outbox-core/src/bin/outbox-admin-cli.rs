use std::env;
use std::sync::Arc;

use outbox_core::admin::AdminService;
use outbox_core::dispatcher::DispatcherConfig;
use outbox_core::repository::PgOutboxStore;
use sqlx::PgPool;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!("  outbox-admin-cli replay <dead_letter_id> <DATABASE_URL>");
        eprintln!("  outbox-admin-cli list-attempts <event_id> <DATABASE_URL>");
        std::process::exit(1);
    }

    let cmd = args[1].as_str();

    match cmd {
        "replay" if args.len() == 4 => {
            let dead_letter_id = Uuid::parse_str(&args[2])?;
            let db_url = &args[3];
            let pool = PgPool::connect(db_url).await?;
            let store = Arc::new(PgOutboxStore::new(pool));
            let admin = AdminService::new(store.clone(), store.clone(), store, DispatcherConfig::default());
            admin.replay(dead_letter_id).await?;
            println!("Replayed dead letter {dead_letter_id}");
        }
        "list-attempts" if args.len() == 4 => {
            let event_id = Uuid::parse_str(&args[2])?;
            let db_url = &args[3];
            let pool = PgPool::connect(db_url).await?;
            let store = Arc::new(PgOutboxStore::new(pool));
            let admin = AdminService::new(store.clone(), store.clone(), store, DispatcherConfig::default());
            for attempt in admin.list_attempts(event_id).await? {
                println!(
                    "{} attempt={} status={} http={:?} next_retry_at={:?}",
                    attempt.created_at, attempt.attempt_number, attempt.status, attempt.http_status_code, attempt.next_retry_at
                );
            }
        }
        _ => {
            eprintln!("Invalid arguments");
            std::process::exit(1);
        }
    }

    Ok(())
}
