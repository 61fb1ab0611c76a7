//! The daily compliance check: who posted a report during the evening
//! window, who did not, and the notifications that follow. Everything here
//! works on plain ids and timestamps; the Discord client is behind
//! [`ChannelGateway`] so the logic can be exercised without a connection.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use serenity::async_trait;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::window::ReportWindow;

/// History pages are requested at the API maximum.
const HISTORY_PAGE_SIZE: u8 = 100;
/// Concurrent direct-message sends in flight at once.
const DM_CONCURRENCY: usize = 4;

pub const REMINDER_HEADING: &str =
    "⏰ The following members have not submitted today's report:";
pub const ALL_CLEAR_MESSAGE: &str =
    "✅ Everyone submitted their report for yesterday's 18:00–24:00 window!";
pub const DM_REMINDER: &str = "No report of yours was found in today's 18:00–24:00 \
window. Please remember to submit it!";

/// A guild member subject to the reporting requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterMember {
    pub id: u64,
    pub display_name: String,
}

/// One message from the report channel's history.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub id: u64,
    pub author_id: u64,
    pub timestamp: DateTime<Utc>,
}

/// The chat-platform operations one check needs. Implemented over the
/// serenity HTTP client in [`crate::gateway`], mocked in tests.
#[async_trait]
pub trait ChannelGateway: Send + Sync {
    /// Members subject to the check, bots and the bot's own account already
    /// excluded.
    async fn fetch_roster(&self) -> Result<Vec<RosterMember>>;
    /// One page of channel history, newest first, strictly older than
    /// `before` when given.
    async fn fetch_messages_before(
        &self,
        before: Option<u64>,
        limit: u8,
    ) -> Result<Vec<ChannelMessage>>;
    async fn post_channel_message(&self, content: &str) -> Result<()>;
    async fn send_direct_message(&self, recipient: u64, content: &str) -> Result<()>;
}

/// Notification policy knobs; see the matching fields on [`crate::config::Config`].
#[derive(Debug, Clone, Copy)]
pub struct NotifyPolicy {
    pub announce_all_clear: bool,
}

/// What a finished check found and did, for logging and command replies.
#[derive(Debug)]
pub struct CheckOutcome {
    pub window: ReportWindow,
    pub roster_size: usize,
    pub non_reporters: Vec<RosterMember>,
    pub dm_failures: usize,
}

/// [`run_check`] behind a shared lock, so the nightly timer and the manual
/// `!check` command cannot notify twice over the same window. Returns
/// `Ok(None)` when another check already holds the slot; callers report the
/// skip, they never queue.
pub async fn run_check_guarded<G: ChannelGateway>(
    lock: &Mutex<()>,
    gateway: &G,
    window: &ReportWindow,
    policy: &NotifyPolicy,
) -> Result<Option<CheckOutcome>> {
    let _guard = match lock.try_lock() {
        Ok(guard) => guard,
        Err(_) => return Ok(None),
    };
    run_check(gateway, window, policy).await.map(Some)
}

/// Runs one compliance check against `window`.
///
/// Roster and history fetches are fail-closed: any error aborts the check
/// before a single notification goes out. Once the non-reporter set is known,
/// the channel mention and each direct message are independent best-effort
/// sends; their failures are logged and counted but never abort the run.
pub async fn run_check<G: ChannelGateway>(
    gateway: &G,
    window: &ReportWindow,
    policy: &NotifyPolicy,
) -> Result<CheckOutcome> {
    info!("checking reports in window {}", window);

    let roster = gateway
        .fetch_roster()
        .await
        .context("failed to fetch the member roster")?;
    let reporters = collect_reporters(gateway, window)
        .await
        .context("failed to fetch the channel history")?;

    let non_reporters: Vec<RosterMember> = roster
        .iter()
        .filter(|m| !reporters.contains(&m.id))
        .cloned()
        .collect();

    info!(
        "{} of {} tracked members reported, {} missing",
        roster.len() - non_reporters.len(),
        roster.len(),
        non_reporters.len()
    );

    if non_reporters.is_empty() {
        if policy.announce_all_clear {
            if let Err(e) = gateway.post_channel_message(ALL_CLEAR_MESSAGE).await {
                warn!("failed to post the all-clear message: {:#}", e);
            }
        }
        return Ok(CheckOutcome {
            window: *window,
            roster_size: roster.len(),
            non_reporters,
            dm_failures: 0,
        });
    }

    let mentions = non_reporters
        .iter()
        .map(|m| format!("<@{}>", m.id))
        .collect::<Vec<_>>()
        .join(" ");
    if let Err(e) = gateway
        .post_channel_message(&format!("{}\n{}", REMINDER_HEADING, mentions))
        .await
    {
        error!("failed to post the channel reminder: {:#}", e);
    }

    // Owned pairs rather than `&RosterMember`: a closure whose signature
    // mentions the argument lifetime trips rustc's higher-ranked `Send`
    // check (rust-lang/rust#89976).
    let dm_targets: Vec<(u64, String)> = non_reporters
        .iter()
        .map(|m| (m.id, m.display_name.clone()))
        .collect();
    let dm_failures = stream::iter(dm_targets)
        .map(|(id, display_name)| async move {
            match gateway.send_direct_message(id, DM_REMINDER).await {
                Ok(()) => 0usize,
                Err(e) => {
                    warn!("could not DM {} ({}): {:#}", display_name, id, e);
                    1
                }
            }
        })
        .buffer_unordered(DM_CONCURRENCY)
        .fold(0, |acc, failed| async move { acc + failed })
        .await;

    Ok(CheckOutcome {
        window: *window,
        roster_size: roster.len(),
        non_reporters,
        dm_failures,
    })
}

/// Distinct author ids of messages inside the window, paginating backward
/// from the newest message. Pagination stops at the first message older than
/// the window start; messages at or past the window end (posted after
/// midnight, before the check fired) are skipped.
async fn collect_reporters<G: ChannelGateway>(
    gateway: &G,
    window: &ReportWindow,
) -> Result<std::collections::HashSet<u64>> {
    let mut reporters = std::collections::HashSet::new();
    let mut before: Option<u64> = None;

    loop {
        let page = gateway
            .fetch_messages_before(before, HISTORY_PAGE_SIZE)
            .await?;
        if page.is_empty() {
            break;
        }

        let mut reached_window_start = false;
        for message in &page {
            if window.precedes(message.timestamp) {
                reached_window_start = true;
                break;
            }
            if window.contains(message.timestamp) {
                reporters.insert(message.author_id);
            }
        }

        if reached_window_start || page.len() < HISTORY_PAGE_SIZE as usize {
            break;
        }
        before = page.last().map(|m| m.id);
    }

    Ok(reporters)
}

impl CheckOutcome {
    /// One-line human summary, used by the manual `!check` reply.
    pub fn summary(&self) -> String {
        if self.non_reporters.is_empty() {
            format!("All {} tracked members reported.", self.roster_size)
        } else {
            format!(
                "{} of {} tracked members did not report: {}",
                self.non_reporters.len(),
                self.roster_size,
                self.non_reporters
                    .iter()
                    .map(|m| m.display_name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    }
}
