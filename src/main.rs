use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use tracing::info;

use wedding_guest_bot::config;
use wedding_guest_bot::db;
use wedding_guest_bot::geocoder::NominatimClient;
use wedding_guest_bot::handlers::BotContext;
use wedding_guest_bot::messages::MessageFactory;
use wedding_guest_bot::storage;
use wedding_guest_bot::telegram::{self, TelegramTransport};
use wedding_guest_bot::template::JinjaRenderer;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
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

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let blobs = storage::from_config(&cfg)?;
    let renderer = Arc::new(JinjaRenderer::default());
    let factory = MessageFactory::from_config(&cfg, blobs, renderer)?;
    let geocoder = NominatimClient::from_config(&cfg)?;

    let ctx = Arc::new(BotContext {
        pool,
        factory,
        geocoder: Arc::new(geocoder),
        default_command_code: cfg.app.default_command_code.clone(),
        language_code: cfg.geocoder.language_code.clone(),
    });

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let transport = Arc::new(TelegramTransport::new(
        bot.clone(),
        cfg.telegram.inline_keyboard_row_width,
    ));

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(telegram::on_message))
        .branch(Update::filter_callback_query().endpoint(telegram::on_callback));

    info!("starting telegram bot");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![ctx, transport])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
