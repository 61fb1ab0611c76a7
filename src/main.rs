pub mod checker;
pub mod commands;
pub mod config;
pub mod events;
pub mod extensions;
pub mod gateway;
pub mod window;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::{Context as _, Result};
use chrono::{DateTime, FixedOffset};
use clap::Parser;
use clokwerk::AsyncScheduler;
use serenity::{
    async_trait,
    framework::standard::{macros::group, StandardFramework},
    http::Http,
    model::gateway::Ready,
    prelude::*,
};
use tracing::info;

use crate::{
    checker::{run_check, NotifyPolicy},
    commands::check::*,
    config::Config,
    extensions::ClientContextExt,
    gateway::DiscordGateway,
    window::{kst, ReportWindow},
};

#[group]
#[commands(check)]
struct General;

/// Daily report reminder bot. Without flags it stays connected and checks
/// the report channel every night at 00:05 KST; with `--once` it performs a
/// single check and exits, for use with external schedulers.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Run a single check and exit
    #[arg(long)]
    once: bool,

    /// Override the window start (RFC 3339, e.g. 2024-06-01T18:00:00+09:00)
    #[arg(long, value_name = "RFC3339", requires = "once", requires = "window_end")]
    window_start: Option<DateTime<FixedOffset>>,

    /// Override the window end (RFC 3339, exclusive)
    #[arg(long, value_name = "RFC3339", requires = "once", requires = "window_start")]
    window_end: Option<DateTime<FixedOffset>>,
}

struct Handler {
    scheduler_started: AtomicBool,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("bot online as {}", ready.user.tag());

        // `ready` fires again after gateway reconnects; one scheduler loop
        // is enough.
        if self.scheduler_started.swap(true, Ordering::SeqCst) {
            return;
        }

        let config = ctx.get_config().await;
        let lock = ctx.get_check_lock().await;
        let mut scheduler = AsyncScheduler::with_tz(kst());
        events::setup_schedulers(&mut scheduler, ctx.http.clone(), config, lock);

        tokio::spawn(async move {
            loop {
                scheduler.run_pending().await;
                tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            }
        });
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Arc::new(Config::from_env()?);
    info!(
        "report-watchdog {} starting, watching channel {}",
        env!("GIT_HASH"),
        config.channel_id
    );

    if args.once {
        let window = match (args.window_start, args.window_end) {
            (Some(start), Some(end)) => ReportWindow::from_bounds(start, end)?,
            _ => ReportWindow::current(),
        };
        run_once(config, window).await
    } else {
        run_persistent(config).await
    }
}

/// One-shot mode: every operation of a check is a plain REST call, so a bare
/// HTTP client suffices and no gateway connection is opened. A failed check
/// propagates out of `main` into a non-zero exit code.
async fn run_once(config: Arc<Config>, window: ReportWindow) -> Result<()> {
    let http = Arc::new(Http::new(&config.token));
    let policy = NotifyPolicy {
        announce_all_clear: config.announce_all_clear,
    };

    let gateway = DiscordGateway::connect(http, config).await?;
    let outcome = run_check(&gateway, &window, &policy).await?;
    info!("check complete: {}", outcome.summary());
    Ok(())
}

async fn run_persistent(config: Arc<Config>) -> Result<()> {
    let framework = StandardFramework::new()
        .configure(|c| c.prefix("!"))
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.token, intents)
        .event_handler(Handler {
            scheduler_started: AtomicBool::new(false),
        })
        .framework(framework)
        .await
        .context("failed to build the Discord client")?;

    {
        let mut data = client.data.write().await;
        data.insert::<Config>(config);
        data.insert::<events::CheckLock>(Arc::new(tokio::sync::Mutex::new(())));
    }

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("could not register the ctrl+c handler");
        shard_manager.lock().await.shutdown_all().await;
    });

    client.start().await.context("client error")?;
    Ok(())
}
