// Admin configuration commands: announcement channels, on-demand purges and
// the leveling knobs.

use crate::core::leveling::XpAdjustment;
use crate::discord::channel_purge::purge_channel;
use crate::discord::leveling_announcements::{sync_reward_roles, RoleChanges};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

// ============================================================================
// /config-channels
// ============================================================================

/// Configure channels for bot announcements.
#[poise::command(
    slash_command,
    guild_only,
    rename = "config-channels",
    required_permissions = "MANAGE_GUILD",
    subcommands("set_welcome", "set_levelup", "purge_messages")
)]
pub async fn config_channels(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the channel for welcome messages.
#[poise::command(
    slash_command,
    guild_only,
    rename = "set-welcome",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn set_welcome(
    ctx: Context<'_>,
    #[description = "The text channel to send welcome messages to"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    ctx.data()
        .settings
        .set_welcome_channel(guild_id, channel.id.get())
        .await?;

    tracing::info!(guild_id, channel_id = channel.id.get(), "Welcome channel updated");
    ctx.send(
        poise::CreateReply::default()
            .content(format!("✅ Welcome messages will now be sent to <#{}>.", channel.id))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Set the channel for level-up announcements.
#[poise::command(
    slash_command,
    guild_only,
    rename = "set-levelup",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn set_levelup(
    ctx: Context<'_>,
    #[description = "The text channel to send level-up messages to"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    ctx.data()
        .settings
        .set_levelup_channel(guild_id, channel.id.get())
        .await?;

    tracing::info!(guild_id, channel_id = channel.id.get(), "Level-up channel updated");
    ctx.send(
        poise::CreateReply::default()
            .content(format!(
                "✅ Level-up announcements will now be sent to <#{}>.",
                channel.id
            ))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Purge messages from a channel, after confirmation.
#[poise::command(
    slash_command,
    guild_only,
    rename = "purge-messages",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn purge_messages(
    ctx: Context<'_>,
    #[description = "The text channel to purge"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
    #[description = "Number of messages to delete. Leave blank to delete all."]
    #[min = 1]
    limit: Option<u32>,
) -> Result<(), Error> {
    let amount = match limit {
        Some(n) => format!("the last **{}** messages", n),
        None => "**all** messages".to_string(),
    };

    let buttons = |disabled: bool| {
        vec![serenity::CreateActionRow::Buttons(vec![
            serenity::CreateButton::new("purge_confirm")
                .label("Confirm Purge")
                .style(serenity::ButtonStyle::Danger)
                .disabled(disabled),
            serenity::CreateButton::new("purge_cancel")
                .label("Cancel")
                .style(serenity::ButtonStyle::Secondary)
                .disabled(disabled),
        ])]
    };

    let prompt = format!(
        "Are you sure you want to permanently delete {} in <#{}>?",
        amount, channel.id
    );
    let reply = ctx
        .send(
            poise::CreateReply::default()
                .content(prompt.clone())
                .components(buttons(false))
                .ephemeral(true),
        )
        .await?;
    let msg_id = reply.message().await?.id;

    let choice = serenity::ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(std::time::Duration::from_secs(30))
        .filter(move |mci| mci.message.id == msg_id)
        .await;

    // Whatever happens, the buttons are single-use.
    reply
        .edit(
            ctx,
            poise::CreateReply::default()
                .content(prompt)
                .components(buttons(true)),
        )
        .await?;

    let Some(mci) = choice else {
        return Ok(());
    };
    mci.defer(ctx.http()).await?;

    if mci.data.custom_id != "purge_confirm" {
        ctx.send(
            poise::CreateReply::default()
                .content("Phew! Purge operation canceled.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let deleted = purge_channel(ctx.http(), channel.id, limit).await?;
    ctx.send(
        poise::CreateReply::default()
            .content(format!(
                "✅ **Success!** Purged **{}** messages from <#{}>.",
                deleted, channel.id
            ))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

// ============================================================================
// /config-leveling
// ============================================================================

/// Configure the leveling system mechanics.
#[poise::command(
    slash_command,
    guild_only,
    rename = "config-leveling",
    required_permissions = "MANAGE_GUILD",
    subcommands("cooldown", "xprange", "addxp", "removexp", "removeallxp")
)]
pub async fn config_leveling(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the XP gain cooldown.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn cooldown(
    ctx: Context<'_>,
    #[description = "The cooldown time in seconds"] seconds: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    ctx.data().settings.set_cooldown(guild_id, seconds).await?;

    ctx.send(
        poise::CreateReply::default()
            .content(format!("✅ XP cooldown set to **{}** seconds.", seconds))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Set the min/max XP gain per message.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn xprange(
    ctx: Context<'_>,
    #[description = "Minimum XP"] min_xp: i64,
    #[description = "Maximum XP"] max_xp: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    ctx.data()
        .settings
        .set_xp_range(guild_id, min_xp, max_xp)
        .await?;
    let range = ctx.data().settings.leveling(guild_id).xp_range;

    ctx.send(
        poise::CreateReply::default()
            .content(format!("✅ XP range set to {}-{}.", range.min(), range.max()))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Add XP to a member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn addxp(
    ctx: Context<'_>,
    #[description = "The member to grant XP to"] member: serenity::User,
    #[description = "The amount of XP to add"]
    #[min = 1]
    amount: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let adjustment = ctx
        .data()
        .leveling
        .adjust_xp(member.id.get(), guild_id, amount)
        .await?;
    let changes = apply_roles(ctx, guild_id, member.id.get(), &adjustment).await;

    tracing::info!(
        guild_id,
        user_id = member.id.get(),
        admin_id = ctx.author().id.get(),
        amount,
        "XP added by admin"
    );
    ctx.say(format!(
        "✅ Added **{} XP** to <@{}>.\n{}",
        amount,
        member.id,
        adjustment_summary(&adjustment, &changes)
    ))
    .await?;
    Ok(())
}

/// Remove XP from a member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn removexp(
    ctx: Context<'_>,
    #[description = "The member to remove XP from"] member: serenity::User,
    #[description = "The amount of XP to remove"]
    #[min = 1]
    amount: i64,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let adjustment = ctx
        .data()
        .leveling
        .adjust_xp(member.id.get(), guild_id, -amount)
        .await?;
    let changes = apply_roles(ctx, guild_id, member.id.get(), &adjustment).await;

    tracing::info!(
        guild_id,
        user_id = member.id.get(),
        admin_id = ctx.author().id.get(),
        amount,
        "XP removed by admin"
    );
    ctx.say(format!(
        "❌ Removed **{} XP** from <@{}>.\n{}",
        adjustment.old_xp - adjustment.new_xp,
        member.id,
        adjustment_summary(&adjustment, &changes)
    ))
    .await?;
    Ok(())
}

/// Remove all XP from a member.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn removeallxp(
    ctx: Context<'_>,
    #[description = "The member to remove XP from"] member: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be in a guild")?.get();
    let leveling = &ctx.data().leveling;

    if leveling.get_status(member.id.get(), guild_id).await?.total_xp == 0 {
        ctx.send(
            poise::CreateReply::default()
                .content(format!("<@{}> has no XP to remove.", member.id))
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    }

    let adjustment = leveling.reset_xp(member.id.get(), guild_id).await?;
    let changes = apply_roles(ctx, guild_id, member.id.get(), &adjustment).await;

    tracing::info!(
        guild_id,
        user_id = member.id.get(),
        admin_id = ctx.author().id.get(),
        removed = adjustment.old_xp,
        "XP reset by admin"
    );
    ctx.send(
        poise::CreateReply::default()
            .content(format!(
                "❌ Removed **{} XP** from <@{}>.\n{}",
                adjustment.old_xp,
                member.id,
                adjustment_summary(&adjustment, &changes)
            ))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

async fn apply_roles(
    ctx: Context<'_>,
    guild_id: u64,
    user_id: u64,
    adjustment: &XpAdjustment,
) -> RoleChanges {
    sync_reward_roles(
        ctx.http(),
        ctx.data(),
        guild_id,
        user_id,
        adjustment.old_level,
        adjustment.new_level,
    )
    .await
}

fn adjustment_summary(adjustment: &XpAdjustment, changes: &RoleChanges) -> String {
    let roles = |ids: &[u64]| {
        ids.iter()
            .map(|id| format!("<@&{}>", id))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut summary = format!(
        "• Level: **{} → {}**\n• Total XP: **{}**\n",
        adjustment.old_level, adjustment.new_level, adjustment.new_xp
    );
    if !changes.added.is_empty() {
        summary.push_str(&format!("🎉 Roles awarded: {}\n", roles(&changes.added)));
    }
    if !changes.removed.is_empty() {
        summary.push_str(&format!("⚠️ Roles removed: {}\n", roles(&changes.removed)));
    }
    summary
}
