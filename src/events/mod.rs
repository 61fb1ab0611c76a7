use std::sync::Arc;

use chrono::FixedOffset;
use clokwerk::{AsyncScheduler, Job, TimeUnits};
use serenity::{http::Http, prelude::TypeMapKey};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::{
    checker::{run_check_guarded, NotifyPolicy},
    config::Config,
    gateway::DiscordGateway,
    window::ReportWindow,
};

/// Local wall-clock time of the daily check, a few minutes past midnight so
/// the whole evening window has closed.
const DAILY_CHECK_AT: &str = "00:05";

/// The one slot a check run occupies. Shared between the nightly timer and
/// the manual `!check` command so the two entry points cannot overlap; a
/// firing that finds the slot taken is skipped, not queued.
pub struct CheckLock;

impl TypeMapKey for CheckLock {
    type Value = Arc<Mutex<()>>;
}

pub fn setup_schedulers(
    scheduler: &mut AsyncScheduler<FixedOffset>,
    http: Arc<Http>,
    config: Arc<Config>,
    lock: Arc<Mutex<()>>,
) {
    scheduler.every(1.day()).at(DAILY_CHECK_AT).run(move || {
        let http = http.clone();
        let config = config.clone();
        let lock = lock.clone();
        async move {
            scheduled_check(http, config, lock).await;
        }
    });
}

/// One scheduled firing: compute the window that just closed, run the check,
/// log the outcome. Errors end this run only; the next firing starts fresh.
pub async fn scheduled_check(http: Arc<Http>, config: Arc<Config>, lock: Arc<Mutex<()>>) {
    let window = ReportWindow::current();
    let policy = NotifyPolicy {
        announce_all_clear: config.announce_all_clear,
    };

    let gateway = match DiscordGateway::connect(http, config).await {
        Ok(g) => g,
        Err(e) => {
            error!("scheduled check aborted: {:#}", e);
            return;
        }
    };

    match run_check_guarded(&lock, &gateway, &window, &policy).await {
        Ok(Some(outcome)) => info!("scheduled check done: {}", outcome.summary()),
        Ok(None) => warn!("another check is still running, skipping this firing"),
        Err(e) => error!("scheduled check failed: {:#}", e),
    }
}
