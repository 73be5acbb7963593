use crate::config::BotConfig;
use crate::core::scheduling::{ScheduleAction, ScheduleRule, ScheduleService};
use crate::discord::channel_purge::purge_channel;
use crate::infra::scheduling::SqliteScheduleStore;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_secs(20);

pub fn ping_content(role_id: u64, message: &str) -> String {
    format!("<@&{}> {}", role_id, message)
}

/// Carry out one rule's action right now.
pub async fn run_rule(
    http: &serenity::Http,
    config: &BotConfig,
    rule: &ScheduleRule,
) -> Result<(), serenity::Error> {
    let channel = serenity::ChannelId::new(rule.channel_id);
    match &rule.action {
        ScheduleAction::PingRole { role_id, message } => {
            channel
                .send_message(
                    http,
                    serenity::CreateMessage::new()
                        .content(ping_content(*role_id, message))
                        .allowed_mentions(
                            serenity::CreateAllowedMentions::new()
                                .roles(vec![serenity::RoleId::new(*role_id)]),
                        ),
                )
                .await?;
            tracing::info!(rule_id = rule.id, channel_id = rule.channel_id, "Sent scheduled ping");
        }
        ScheduleAction::PurgeChannel { limit } => {
            if config.is_excluded(rule.channel_id) {
                tracing::info!(
                    rule_id = rule.id,
                    channel_id = rule.channel_id,
                    "Skipping purge of excluded channel"
                );
                return Ok(());
            }
            purge_channel(http, channel, Some(*limit)).await?;
        }
    }
    Ok(())
}

/// Poll the schedule table and fire every slot that came due since the last
/// successful tick. The window only advances when the lookup succeeds, so a
/// database hiccup delays fires instead of dropping them.
pub fn spawn(
    http: Arc<serenity::Http>,
    schedules: Arc<ScheduleService<SqliteScheduleStore>>,
    config: Arc<BotConfig>,
) {
    tokio::spawn(async move {
        let mut window_start = Utc::now();
        let mut ticker = tokio::time::interval(TICK);
        tracing::info!("Schedule runner started");

        loop {
            ticker.tick().await;
            let now = Utc::now();

            let due = match schedules.due(window_start, now).await {
                Ok(due) => due,
                Err(e) => {
                    tracing::warn!("Failed to load schedules: {}", e);
                    continue;
                }
            };
            window_start = now;

            for fire in due {
                tracing::debug!(rule_id = fire.rule.id, at = %fire.at, "Schedule due");
                if let Err(e) = run_rule(&http, &config, &fire.rule).await {
                    tracing::error!(
                        rule_id = fire.rule.id,
                        channel_id = fire.rule.channel_id,
                        "Scheduled action failed: {}",
                        e
                    );
                }
            }
        }
    });
}
