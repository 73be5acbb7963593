use crate::config::BotConfig;
use crate::core::leveling::{daily_date, LevelingService, DAILY_XP_TIMEZONE};
use crate::core::scheduling::RecurringSlot;
use crate::infra::leveling::SqliteXpStore;
use chrono::{NaiveDate, Utc};
use poise::serenity_prelude as serenity;
use std::sync::Arc;

const MEMBER_PAGE: u64 = 1000;

/// Every midnight (New York time) hand the daily-XP role to yesterday's top
/// gainer, announce it, then clear the daily counters.
pub fn spawn(
    http: Arc<serenity::Http>,
    cache: Arc<serenity::Cache>,
    leveling: Arc<LevelingService<SqliteXpStore>>,
    config: Arc<BotConfig>,
) {
    tokio::spawn(async move {
        let midnight = match RecurringSlot::daily(0, 0, DAILY_XP_TIMEZONE.name()) {
            Ok(slot) => slot,
            Err(e) => {
                tracing::error!("Daily award disabled: {}", e);
                return;
            }
        };

        loop {
            let now = Utc::now();
            let Some(next) = midnight.next_fire(now + chrono::Duration::seconds(1)) else {
                tracing::error!("Could not compute next daily award time; stopping task");
                return;
            };
            tracing::info!(next = %next, "Next daily XP award scheduled");
            tokio::time::sleep((next - now).to_std().unwrap_or_default()).await;

            let Some(yesterday) = daily_date(next).pred_opt() else {
                continue;
            };

            let guild_ids: Vec<u64> = match config.guild_id {
                Some(id) => vec![id],
                None => cache.guilds().iter().map(|g| g.get()).collect(),
            };
            for guild_id in guild_ids {
                if let Err(e) = award_guild(&http, &leveling, &config, guild_id, yesterday).await {
                    tracing::error!(guild_id, "Daily award failed: {}", e);
                }
            }

            match leveling.reset_daily_xp(yesterday).await {
                Ok(cleared) => tracing::info!(%yesterday, cleared, "Daily XP reset"),
                Err(e) => tracing::error!(%yesterday, "Failed to reset daily XP: {}", e),
            }
        }
    });
}

async fn award_guild(
    http: &serenity::Http,
    leveling: &LevelingService<SqliteXpStore>,
    config: &BotConfig,
    guild_id: u64,
    day: NaiveDate,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let Some((user_id, xp)) = leveling.daily_top_user(guild_id, day).await? else {
        tracing::info!(guild_id, %day, "No XP gained yesterday; nothing to award");
        return Ok(());
    };
    let Some(role_id) = config.daily_xp_role_id else {
        tracing::debug!(guild_id, "DAILY_XP_ROLE_ID not set; skipping role handoff");
        return Ok(());
    };

    let guild = serenity::GuildId::new(guild_id);
    let role = serenity::RoleId::new(role_id);

    // Winner must still be in the guild.
    if let Err(e) = http.get_member(guild, serenity::UserId::new(user_id)).await {
        tracing::info!(guild_id, user_id, "Daily top gainer left the guild: {}", e);
        return Ok(());
    }

    for holder in members_with_role(http, guild, role).await? {
        if let Err(e) = http
            .remove_member_role(guild, holder, role, Some("Daily XP reset"))
            .await
        {
            tracing::warn!(guild_id, user_id = holder.get(), "Failed to remove daily role: {}", e);
        }
    }

    let reason = format!("Most XP yesterday: {}", xp);
    http.add_member_role(guild, serenity::UserId::new(user_id), role, Some(&reason))
        .await?;
    tracing::info!(guild_id, user_id, xp, %day, "Daily XP role awarded");

    if let Some(channel_id) = config.daily_announce_channel_id {
        serenity::ChannelId::new(channel_id)
            .say(
                http,
                format!("🏆 Congrats <@{}>: you gained **{} XP** yesterday!", user_id, xp),
            )
            .await?;
    }

    Ok(())
}

async fn members_with_role(
    http: &serenity::Http,
    guild: serenity::GuildId,
    role: serenity::RoleId,
) -> Result<Vec<serenity::UserId>, serenity::Error> {
    let mut holders = Vec::new();
    let mut after: Option<u64> = None;

    loop {
        let page = http.get_guild_members(guild, Some(MEMBER_PAGE), after).await?;
        holders.extend(
            page.iter()
                .filter(|m| m.roles.contains(&role))
                .map(|m| m.user.id),
        );
        match page.last() {
            Some(last) if page.len() as u64 == MEMBER_PAGE => after = Some(last.user.id.get()),
            _ => break,
        }
    }

    Ok(holders)
}
