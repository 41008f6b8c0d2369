use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tracing::info;

use wedding_guest_bot::config;
use wedding_guest_bot::db::{self, Pool};
use wedding_guest_bot::messages::MessageFactory;
use wedding_guest_bot::notify;
use wedding_guest_bot::storage;
use wedding_guest_bot::telegram::TelegramTransport;
use wedding_guest_bot::template::JinjaRenderer;

#[derive(Debug, Parser)]
#[command(author, version, about = "Batch jobs for the wedding guest bot")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Restrict the job to these guests (repeatable). Defaults to every guest.
    #[arg(long = "guest", global = true)]
    guests: Vec<i64>,

    #[command(subcommand)]
    job: Job,
}

#[derive(Debug, Subcommand)]
enum Job {
    /// Assign every public notification to the guests missing it
    AssignPublicNotifications,
    /// Grant public general purpose commands to the guests missing them
    SyncAvailableCommands,
    /// Deliver pending notifications over Telegram
    SendNotifications {
        /// Maximum notifications delivered to one guest in this run
        #[arg(long, default_value = "1")]
        limit_per_guest: u32,
    },
    /// Check that the template storage is reachable
    StorageHealthcheck,
}

async fn target_guests(pool: &Pool, requested: Vec<i64>) -> Result<Vec<i64>> {
    if requested.is_empty() {
        Ok(db::guests::all_guest_ids(pool).await?)
    } else {
        Ok(requested)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let blobs = storage::from_config(&cfg)?;
    if let Job::StorageHealthcheck = args.job {
        blobs.healthcheck().await?;
        info!("storage is reachable");
        return Ok(());
    }

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let guest_ids = target_guests(&pool, args.guests).await?;

    match args.job {
        Job::AssignPublicNotifications => {
            let inserted = notify::assign_public_notifications(&pool, &guest_ids).await?;
            info!(inserted, "done");
        }
        Job::SyncAvailableCommands => {
            let inserted = notify::update_available_commands(&pool, &guest_ids).await?;
            info!(inserted, "done");
        }
        Job::SendNotifications { limit_per_guest } => {
            let renderer = Arc::new(JinjaRenderer::default());
            let factory = MessageFactory::from_config(&cfg, blobs, renderer)?;
            let transport = TelegramTransport::new(
                Bot::new(cfg.telegram.bot_token.clone()),
                cfg.telegram.inline_keyboard_row_width,
            );
            let report = notify::send_notifications(
                &pool,
                &factory,
                &transport,
                &guest_ids,
                Some(limit_per_guest),
            )
            .await?;
            info!(?report, "done");
        }
        Job::StorageHealthcheck => {}
    }

    Ok(())
}
