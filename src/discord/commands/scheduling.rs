// Commands for recurring role pings and channel purges.

use crate::core::scheduling::{
    parse_time_of_day, parse_weekdays, ScheduleAction, ScheduleRule, DEFAULT_PURGE_LIMIT,
    DEFAULT_SCHEDULE_TIMEZONE,
};
use crate::discord::schedule_runner::{ping_content, run_rule};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Manage scheduled pings and purges.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("list", "add_ping", "add_purge", "remove", "test")
)]
pub async fn schedule(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// List this server's schedules.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn list(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let rules = ctx.data().schedules.list(guild_id).await?;

    if rules.is_empty() {
        ctx.say("No schedules yet. Add one with `/schedule add-ping` or `/schedule add-purge`.")
            .await?;
        return Ok(());
    }

    let now = chrono::Utc::now();
    let mut embed = serenity::CreateEmbed::new()
        .title("📅 Schedules")
        .color(serenity::Colour::BLUE);
    for rule in rules.iter().take(25) {
        embed = embed.field(
            format!("#{} · {}", rule.id, describe_action(&rule.action)),
            describe_rule(rule, now),
            false,
        );
    }

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Ping a role on a recurring schedule.
#[poise::command(
    slash_command,
    guild_only,
    rename = "add-ping",
    required_permissions = "MANAGE_GUILD"
)]
pub async fn add_ping(
    ctx: Context<'_>,
    #[description = "Channel to post in"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
    #[description = "Role to ping"] role: serenity::Role,
    #[description = "Days, e.g. 'mon,wed,fri', 'weekdays' or 'daily'"] days: String,
    #[description = "Time of day as HH:MM (24h)"] time: String,
    #[description = "Text after the role mention"] message: String,
    #[description = "IANA timezone (default: America/New_York)"] timezone: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let (hour, minute) = parse_time_of_day(&time)?;
    let rule = ScheduleRule::new(
        guild_id,
        channel.id.get(),
        parse_weekdays(&days)?,
        hour,
        minute,
        timezone.as_deref().unwrap_or(DEFAULT_SCHEDULE_TIMEZONE),
        ScheduleAction::PingRole {
            role_id: role.id.get(),
            message,
        },
    )?;
    let rule = ctx.data().schedules.add(rule).await?;

    tracing::info!(guild_id, rule_id = rule.id, "Ping schedule added");
    ctx.say(format!(
        "✅ Schedule **#{}** added: {}",
        rule.id,
        describe_rule(&rule, chrono::Utc::now())
    ))
    .await?;
    Ok(())
}

/// Purge a channel on a recurring schedule.
#[poise::command(
    slash_command,
    guild_only,
    rename = "add-purge",
    required_permissions = "MANAGE_MESSAGES"
)]
pub async fn add_purge(
    ctx: Context<'_>,
    #[description = "Channel to purge"]
    #[channel_types("Text")]
    channel: serenity::GuildChannel,
    #[description = "Days, e.g. 'mon,wed,fri', 'weekdays' or 'daily'"] days: String,
    #[description = "Time of day as HH:MM (24h)"] time: String,
    #[description = "Messages to delete per run (default: 1000)"]
    #[min = 1]
    limit: Option<u32>,
    #[description = "IANA timezone (default: America/New_York)"] timezone: Option<String>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    if ctx.data().config.is_excluded(channel.id.get()) {
        ctx.say(format!("<#{}> is excluded from purges.", channel.id))
            .await?;
        return Ok(());
    }

    let (hour, minute) = parse_time_of_day(&time)?;
    let rule = ScheduleRule::new(
        guild_id,
        channel.id.get(),
        parse_weekdays(&days)?,
        hour,
        minute,
        timezone.as_deref().unwrap_or(DEFAULT_SCHEDULE_TIMEZONE),
        ScheduleAction::PurgeChannel {
            limit: limit.unwrap_or(DEFAULT_PURGE_LIMIT),
        },
    )?;
    let rule = ctx.data().schedules.add(rule).await?;

    tracing::info!(guild_id, rule_id = rule.id, "Purge schedule added");
    ctx.say(format!(
        "✅ Schedule **#{}** added: {}",
        rule.id,
        describe_rule(&rule, chrono::Utc::now())
    ))
    .await?;
    Ok(())
}

/// Delete a schedule.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn remove(
    ctx: Context<'_>,
    #[description = "Schedule number from /schedule list"] id: i64,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    ctx.data().schedules.remove(guild_id, id).await?;

    tracing::info!(guild_id, rule_id = id, "Schedule removed");
    ctx.say(format!("🗑️ Schedule **#{}** removed.", id)).await?;
    Ok(())
}

/// Check every schedule, or trigger one right now.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn test(
    ctx: Context<'_>,
    #[description = "Optional: the schedule number to trigger immediately"] id: Option<i64>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let Some(id) = id else {
        let rules = ctx.data().schedules.list(guild_id).await?;
        if rules.is_empty() {
            ctx.say("No schedules configured.").await?;
            return Ok(());
        }
        let mut embed = serenity::CreateEmbed::new()
            .title("Scheduler Status Check")
            .description("Checking all configured schedules...")
            .color(serenity::Colour::BLUE);
        for rule in rules.iter().take(25) {
            embed = embed.field(
                format!("#{} · {}", rule.id, describe_action(&rule.action)),
                health_check(ctx, rule),
                false,
            );
        }
        ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
            .await?;
        return Ok(());
    };

    let rule = ctx.data().schedules.get(guild_id, id).await?;
    match &rule.action {
        ScheduleAction::PingRole { role_id, message } => {
            serenity::ChannelId::new(rule.channel_id)
                .say(
                    ctx.http(),
                    format!(
                        "**--- THIS IS A TEST PING ---**\n{}",
                        ping_content(*role_id, message)
                    ),
                )
                .await?;
        }
        ScheduleAction::PurgeChannel { .. } => {
            run_rule(ctx.http(), &ctx.data().config, &rule).await?;
        }
    }

    ctx.send(
        poise::CreateReply::default()
            .content(format!(
                "✅ Triggered schedule **#{}** in <#{}>.",
                rule.id, rule.channel_id
            ))
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

fn describe_action(action: &ScheduleAction) -> String {
    match action {
        ScheduleAction::PingRole { role_id, .. } => format!("ping <@&{}>", role_id),
        ScheduleAction::PurgeChannel { limit } => format!("purge {} messages", limit),
    }
}

fn describe_rule(rule: &ScheduleRule, now: chrono::DateTime<chrono::Utc>) -> String {
    let mut text = format!("{} in <#{}>", rule.slot, rule.channel_id);
    if let ScheduleAction::PingRole { message, .. } = &rule.action {
        text.push_str(&format!("\n> {}", truncate(message, 80)));
    }
    if let Some(next) = rule.next_fire(now) {
        text.push_str(&format!("\nNext: <t:{}:F>", next.timestamp()));
    }
    text
}

/// Cache-only check that the channel and role a rule points at still exist.
fn health_check(ctx: Context<'_>, rule: &ScheduleRule) -> String {
    let cache = &ctx.serenity_context().cache;
    let Some(guild) = ctx.guild_id().and_then(|id| cache.guild(id)) else {
        return "❔ Guild not cached".to_string();
    };

    let channel_id = serenity::ChannelId::new(rule.channel_id);
    let mut status = if guild.channels.contains_key(&channel_id) {
        format!("✅ Channel: <#{}>", rule.channel_id)
    } else {
        format!("❌ Channel ID `{}` not found.", rule.channel_id)
    };

    if let ScheduleAction::PingRole { role_id, .. } = &rule.action {
        match guild.roles.get(&serenity::RoleId::new(*role_id)) {
            Some(role) => status.push_str(&format!("\n✅ Role: `{}`", role.name)),
            None => status.push_str(&format!("\n❌ Role ID `{}` not found.", role_id)),
        }
    }
    status
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
