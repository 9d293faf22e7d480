mod archiver;
mod config;
mod dedup;
mod filter;
mod keys;
mod media;
mod platform;
mod scheduler;
mod server;
mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use teloxide::Bot;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::archiver::Archiver;
use crate::config::{Config, DedupConfig};
use crate::dedup::sqlite::SqliteKv;
use crate::dedup::DedupService;
use crate::filter::ScopeFilter;
use crate::platform::telegram::{self, TelegramSource};
use crate::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "channel-archiver", version, about = "Archive Telegram channel media to object storage")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Receive updates over HTTPS (requires [webhook])
    Serve,
    /// Long-poll Telegram for updates
    Poll,
    /// Register the webhook URL with Telegram
    SetWebhook {
        /// Overrides webhook.public_url
        #[arg(long)]
        url: Option<String>,
    },
    /// Remove the registered webhook so polling works again
    DeleteWebhook,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,channel_archiver=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from: {}", cli.config.display());
    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let bot = Bot::new(&config.telegram.bot_token);

    match cli.command {
        Command::SetWebhook { url } => {
            let webhook = config
                .webhook
                .as_ref()
                .context("set-webhook needs a [webhook] section for the secret token")?;
            let url = url
                .or_else(|| webhook.public_url.clone())
                .context("No webhook URL: pass --url or set webhook.public_url")?;
            telegram::set_webhook(&bot, &url, &webhook.secret_token).await
        }
        Command::DeleteWebhook => telegram::delete_webhook(&bot).await,
        Command::Serve => {
            let webhook = config
                .webhook
                .clone()
                .context("serve needs a [webhook] section")?;
            let (archiver, _scheduler) = build_archiver(&config, bot).await?;
            server::serve(&webhook, archiver).await
        }
        Command::Poll => {
            let (archiver, _scheduler) = build_archiver(&config, bot.clone()).await?;
            telegram::run_polling(bot, archiver, &config.polling).await
        }
    }
}

/// Wire the archiver from config. The returned scheduler must stay alive for purges to run.
async fn build_archiver(config: &Config, bot: Bot) -> Result<(Arc<Archiver>, Option<Scheduler>)> {
    let filter = ScopeFilter::from_config(&config.telegram);
    if filter.is_configured() {
        info!(
            "Archiving chat {} (thread: {})",
            config.telegram.channel_id,
            config
                .telegram
                .message_thread_id
                .as_deref()
                .unwrap_or("any")
        );
    } else {
        warn!("telegram.channel_id is not set; every update will be ignored");
    }

    info!("Storage backend: {}", config.storage.backend);
    let store = storage::from_config(&config.storage).await?;
    let source = Arc::new(TelegramSource::new(bot));

    let mut archiver = Archiver::new(filter, source, store);
    let mut scheduler = None;

    if let Some(dedup_config) = &config.dedup {
        let (dedup, purge) = build_dedup(dedup_config).await?;
        archiver = archiver.with_dedup(dedup);
        scheduler = Some(purge);
    }

    Ok((Arc::new(archiver), scheduler))
}

async fn build_dedup(config: &DedupConfig) -> Result<(DedupService, Scheduler)> {
    let kv = SqliteKv::open(&config.database_path)?;

    let scheduler = Scheduler::new().await?;
    scheduler::tasks::register_purge_task(&scheduler, kv.clone(), &config.purge_cron).await?;
    scheduler.start().await?;

    info!(
        "Dedup enabled: policy {}, marker TTL {}s",
        config.policy, config.ttl_secs
    );
    Ok((
        DedupService::new(Arc::new(kv), config.policy, config.ttl_secs),
        scheduler,
    ))
}
