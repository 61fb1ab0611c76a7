use serenity::{
    framework::standard::{macros::command, CommandResult},
    model::prelude::*,
    prelude::*,
};

use crate::{
    checker::{run_check_guarded, NotifyPolicy},
    extensions::*,
    gateway::DiscordGateway,
    window::ReportWindow,
};

/// Manual trigger for the daily check, restricted to administrators. Shares
/// the check slot with the nightly timer, so triggering during a scheduled
/// run cannot double-notify.
#[command]
#[required_permissions(ADMINISTRATOR)]
async fn check(ctx: &Context, msg: &Message) -> CommandResult {
    let config = ctx.get_config().await;
    let lock = ctx.get_check_lock().await;
    let policy = NotifyPolicy {
        announce_all_clear: config.announce_all_clear,
    };
    let window = ReportWindow::current();

    let gateway = DiscordGateway::connect(ctx.http.clone(), config).await?;
    match run_check_guarded(&lock, &gateway, &window, &policy).await? {
        Some(outcome) => {
            msg.reply(ctx, outcome.summary()).await?;
        }
        None => {
            msg.reply(ctx, "A check is already running, try again in a moment.")
                .await?;
        }
    }
    Ok(())
}
