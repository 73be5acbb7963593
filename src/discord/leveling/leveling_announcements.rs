use crate::core::leveling::{reward_roles_gained, reward_roles_lost, LevelUpEvent, XpStatus};
use crate::discord::commands::leveling::progress_field;
use crate::discord::Data;
use poise::serenity_prelude::{self as serenity, builder::CreateMessage};

/// Announce a level-up in the guild's level-up channel and hand out any
/// reward roles the new level unlocked.
pub async fn announce_level_up(
    ctx: &serenity::Context,
    data: &Data,
    level_up: &LevelUpEvent,
) -> Result<(), serenity::Error> {
    sync_reward_roles(
        &ctx.http,
        data,
        level_up.guild_id,
        level_up.user_id,
        level_up.old_level,
        level_up.new_level,
    )
    .await;

    let Some(channel_id) = data.settings.levelup_channel(level_up.guild_id) else {
        tracing::debug!(
            guild_id = level_up.guild_id,
            "No level-up channel configured; skipping announcement"
        );
        return Ok(());
    };

    let status = XpStatus::from_total_xp(level_up.total_xp);
    let embed = serenity::CreateEmbed::new()
        .title(format!("Level {}", level_up.new_level))
        .color(level_color(level_up.new_level))
        .field("Total XP", level_up.total_xp.to_string(), true)
        .field("Progress", progress_field(&status), false);

    serenity::ChannelId::new(channel_id)
        .send_message(
            ctx,
            CreateMessage::new()
                .content(format!("Player <@{}> has leveled up.", level_up.user_id))
                .embed(embed),
        )
        .await
        .map(|_| ())
}

/// Role ids that were actually added or removed.
#[derive(Debug, Default)]
pub struct RoleChanges {
    pub added: Vec<u64>,
    pub removed: Vec<u64>,
}

/// Add or remove threshold reward roles after a level change. Failures are
/// logged per role so one missing permission doesn't block the rest.
pub async fn sync_reward_roles(
    http: &serenity::Http,
    data: &Data,
    guild_id: u64,
    user_id: u64,
    old_level: u32,
    new_level: u32,
) -> RoleChanges {
    let rewards = &data.features.role_rewards;
    let guild = serenity::GuildId::new(guild_id);
    let user = serenity::UserId::new(user_id);
    let mut changes = RoleChanges::default();

    for role_id in reward_roles_gained(rewards, old_level, new_level) {
        match http
            .add_member_role(guild, user, serenity::RoleId::new(role_id), Some("Level reward"))
            .await
        {
            Ok(()) => changes.added.push(role_id),
            Err(e) => {
                tracing::warn!(guild_id, user_id, role_id, "Failed to add reward role: {}", e)
            }
        }
    }

    for role_id in reward_roles_lost(rewards, old_level, new_level) {
        match http
            .remove_member_role(
                guild,
                user,
                serenity::RoleId::new(role_id),
                Some("XP dropped below threshold"),
            )
            .await
        {
            Ok(()) => changes.removed.push(role_id),
            Err(e) => {
                tracing::warn!(guild_id, user_id, role_id, "Failed to remove reward role: {}", e)
            }
        }
    }

    changes
}

fn level_color(level: u32) -> serenity::Colour {
    if level >= 50 {
        serenity::Colour::DARK_PURPLE
    } else if level >= 25 {
        serenity::Colour::ORANGE
    } else if level >= 10 {
        serenity::Colour::GOLD
    } else if level >= 5 {
        serenity::Colour::BLURPLE
    } else {
        serenity::Colour::LIGHT_GREY
    }
}
