// Gateway handlers for members joining and gaining roles.

use crate::config::RoleAlert;
use crate::discord::Data;
use poise::serenity_prelude::{self as serenity, Mentionable};
use std::collections::HashSet;

/// Post the guild's welcome template for a new member.
pub async fn handle_member_join(
    ctx: &serenity::Context,
    data: &Data,
    member: &serenity::Member,
) -> Result<(), serenity::Error> {
    if member.user.bot {
        return Ok(());
    }
    let guild_id = member.guild_id.get();
    if data.config.guild_id.is_some_and(|id| id != guild_id) {
        return Ok(());
    }

    let Some(channel_id) = data.settings.welcome_channel(guild_id) else {
        tracing::warn!(guild_id, "No welcome channel configured");
        return Ok(());
    };

    let role_channel = data
        .features
        .role_channels
        .get(&guild_id)
        .map(|id| format!("<#{}>", id));
    let content = data
        .welcome
        .render(guild_id, &member.mention().to_string(), role_channel.as_deref());

    serenity::ChannelId::new(channel_id)
        .say(&ctx.http, content)
        .await?;
    tracing::info!(guild_id, user_id = member.user.id.get(), "Sent welcome message");
    Ok(())
}

/// Fire the configured role alerts for roles the member just received.
pub async fn handle_member_update(
    ctx: &serenity::Context,
    data: &Data,
    old: Option<&serenity::Member>,
    new: &serenity::Member,
) -> Result<(), serenity::Error> {
    if new.user.bot {
        return Ok(());
    }
    let Some(old) = old else {
        // No cached copy to diff against.
        tracing::debug!(user_id = new.user.id.get(), "Member update without previous state");
        return Ok(());
    };

    let before: Vec<u64> = old.roles.iter().map(|r| r.get()).collect();
    let after: Vec<u64> = new.roles.iter().map(|r| r.get()).collect();
    let mention = new.mention().to_string();

    for alert in triggered_alerts(&data.features.role_alerts, &before, &after) {
        let content = alert.message.replace("{member}", &mention);
        if let Err(e) = serenity::ChannelId::new(alert.channel_id)
            .say(&ctx.http, content)
            .await
        {
            tracing::error!(
                role_id = alert.role_id,
                channel_id = alert.channel_id,
                "Could not send role alert: {}",
                e
            );
        }
    }
    Ok(())
}

/// Alerts whose role appears in `after` but not in `before`.
fn triggered_alerts<'a>(alerts: &'a [RoleAlert], before: &[u64], after: &[u64]) -> Vec<&'a RoleAlert> {
    let before: HashSet<u64> = before.iter().copied().collect();
    let added: HashSet<u64> = after
        .iter()
        .copied()
        .filter(|r| !before.contains(r))
        .collect();

    alerts
        .iter()
        .filter(|alert| added.contains(&alert.role_id))
        .collect()
}
