// Discord commands for the leveling system.
//
// These are thin adapters: pull primitive ids out of the poise context, call
// the core service, and format the result as an embed.

use crate::config::{BotConfig, FeatureConfig};
use crate::core::giveaway::GiveawayService;
use crate::core::leveling::{LeaderboardEntry, LevelingService, XpStatus};
use crate::core::scheduling::ScheduleService;
use crate::core::settings::SettingsService;
use crate::core::welcome::WelcomeTemplates;
use crate::infra::giveaway::SqliteGiveawayStore;
use crate::infra::leveling::SqliteXpStore;
use crate::infra::scheduling::SqliteScheduleStore;
use crate::infra::settings::SqliteSettingsStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// How many ranked users `/leaderboard` loads.
const LEADERBOARD_SIZE: usize = 200;
const LEADERBOARD_PAGE_SIZE: usize = 10;

/// Show a member's level, XP and server rank.
#[poise::command(slash_command, guild_only)]
pub async fn rank(
    ctx: Context<'_>,
    #[description = "Member to look up (defaults to you)"] member: Option<serenity::User>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let target = member.as_ref().unwrap_or_else(|| ctx.author());
    let user_id = target.id.get();

    let leveling = &ctx.data().leveling;
    let Some(rank) = leveling.get_rank(user_id, guild_id).await? else {
        ctx.say("That user has no XP yet.").await?;
        return Ok(());
    };
    let status = leveling.get_status(user_id, guild_id).await?;

    let display_name = resolve_display_name_cached(&ctx, guild_id, user_id);
    let embed = serenity::CreateEmbed::new()
        .title(format!("{}'s Rank", display_name))
        .thumbnail(target.face())
        .color(0x5865F2)
        .field("Rank", format!("#{}", rank), true)
        .field("Level", status.level.to_string(), true)
        .field("Total XP", status.total_xp.to_string(), true)
        .field("Progress", progress_field(&status), false);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show the top members by XP.
#[poise::command(slash_command, guild_only)]
pub async fn leaderboard(
    ctx: Context<'_>,
    #[description = "Page number (default: 1)"]
    #[min = 1]
    page: Option<usize>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    ctx.defer().await?;

    let entries = ctx
        .data()
        .leveling
        .get_leaderboard(guild_id, LEADERBOARD_SIZE, 0)
        .await?;

    if entries.is_empty() {
        ctx.say("No one has earned XP yet! Start chatting to get on the leaderboard! 💬")
            .await?;
        return Ok(());
    }

    let total_pages = entries.len().div_ceil(LEADERBOARD_PAGE_SIZE);
    let mut current_page = page.unwrap_or(1).clamp(1, total_pages);

    let reply = ctx
        .send(
            poise::CreateReply::default()
                .embed(leaderboard_embed(&ctx, guild_id, &entries, current_page, total_pages))
                .components(leaderboard_buttons(current_page, total_pages)),
        )
        .await?;
    let msg_id = reply.message().await?.id;

    while let Some(mci) = serenity::ComponentInteractionCollector::new(ctx)
        .author_id(ctx.author().id)
        .channel_id(ctx.channel_id())
        .timeout(std::time::Duration::from_secs(60 * 2))
        .filter(move |mci| mci.message.id == msg_id)
        .await
    {
        match mci.data.custom_id.as_str() {
            "leaderboard_prev" => current_page = current_page.saturating_sub(1).max(1),
            "leaderboard_next" => current_page = (current_page + 1).min(total_pages),
            _ => continue,
        }

        let response = serenity::CreateInteractionResponse::UpdateMessage(
            serenity::CreateInteractionResponseMessage::new()
                .embed(leaderboard_embed(&ctx, guild_id, &entries, current_page, total_pages))
                .components(leaderboard_buttons(current_page, total_pages)),
        );
        if let Err(e) = mci.create_response(ctx.http(), response).await {
            tracing::warn!(guild_id, "Failed to page leaderboard: {}", e);
        }
    }

    // Timed out: leave the last page up but drop the buttons.
    reply
        .edit(
            ctx,
            poise::CreateReply::default()
                .embed(leaderboard_embed(&ctx, guild_id, &entries, current_page, total_pages))
                .components(Vec::new()),
        )
        .await?;

    Ok(())
}

fn leaderboard_embed(
    ctx: &Context<'_>,
    guild_id: u64,
    entries: &[LeaderboardEntry],
    page: usize,
    total_pages: usize,
) -> serenity::CreateEmbed {
    let author_id = ctx.author().id.get();
    let mut description = match entries.iter().find(|e| e.user_id == author_id) {
        Some(me) => format!("Your rank: **#{}**\n\n", me.rank),
        None => "You are not ranked yet.\n\n".to_string(),
    };

    let offset = (page - 1) * LEADERBOARD_PAGE_SIZE;
    for entry in entries.iter().skip(offset).take(LEADERBOARD_PAGE_SIZE) {
        let medal = match entry.rank {
            1 => "🥇",
            2 => "🥈",
            3 => "🥉",
            _ => "▫️",
        };
        let name = resolve_display_name_cached(ctx, guild_id, entry.user_id);
        let name = if entry.user_id == author_id {
            format!("**{}** (You)", name)
        } else {
            name
        };
        description.push_str(&format!(
            "{} **#{}** {} · Level {} · {} XP\n",
            medal, entry.rank, name, entry.level, entry.xp
        ));
    }

    serenity::CreateEmbed::new()
        .title("📊 Leaderboard")
        .description(description)
        .color(0xffd700)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Page {}/{}",
            page, total_pages
        )))
}

fn leaderboard_buttons(page: usize, total_pages: usize) -> Vec<serenity::CreateActionRow> {
    vec![serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new("leaderboard_prev")
            .label("◀ Previous")
            .style(serenity::ButtonStyle::Primary)
            .disabled(page <= 1),
        serenity::CreateButton::new("leaderboard_next")
            .label("Next ▶")
            .style(serenity::ButtonStyle::Primary)
            .disabled(page >= total_pages),
    ])]
}

pub(crate) fn progress_field(status: &XpStatus) -> String {
    let span = status.next_level_xp.saturating_sub(status.start_of_level_xp);
    format!(
        "{}/{} XP to level {}\n{}",
        status.xp_into_level,
        span,
        status.level + 1,
        build_progress_bar(status.progress(), 12)
    )
}

/// Cache-only display name lookup. Falls back to a mention so a leaderboard
/// never waits on HTTP.
fn resolve_display_name_cached(ctx: &Context<'_>, guild_id: u64, user_id: u64) -> String {
    let guild_id_s = serenity::GuildId::from(guild_id);
    let user_id_s = serenity::UserId::from(user_id);

    if let Some(guild) = ctx.serenity_context().cache.guild(guild_id_s) {
        if let Some(member) = guild.members.get(&user_id_s) {
            return member.display_name().to_string();
        }
    }

    if let Some(user) = ctx.serenity_context().cache.user(user_id_s) {
        return user.name.clone();
    }

    format!("<@{}>", user_id)
}

pub(crate) fn build_progress_bar(progress: f64, length: usize) -> String {
    let clamped = progress.clamp(0.0, 1.0);
    let mut filled = (clamped * length as f64).round() as usize;
    if clamped > 0.0 && filled == 0 {
        filled = 1;
    }
    filled = filled.min(length);
    let bar = "▰".repeat(filled) + &"▱".repeat(length - filled);
    format!("{} ({}%)", bar, (clamped * 100.0).round() as u32)
}

// ============================================================================
// SHARED FRAMEWORK TYPES
// ============================================================================

/// Data that's shared across all commands, event handlers and background
/// tasks.
pub struct Data {
    pub leveling: Arc<LevelingService<SqliteXpStore>>,
    pub settings: Arc<SettingsService<SqliteSettingsStore>>,
    pub schedules: Arc<ScheduleService<SqliteScheduleStore>>,
    pub giveaways: Arc<GiveawayService<SqliteGiveawayStore>>,
    pub welcome: Arc<WelcomeTemplates>,
    pub config: Arc<BotConfig>,
    pub features: Arc<FeatureConfig>,
}

/// Error type for commands.
/// Box<dyn Error> means "any error type" - flexible but less type-safe.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// Context type for commands - gives access to Discord and our Data.
pub type Context<'a> = poise::Context<'a, Data, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(build_progress_bar(0.0, 4), "▱▱▱▱ (0%)");
        assert_eq!(build_progress_bar(0.5, 4), "▰▰▱▱ (50%)");
        assert_eq!(build_progress_bar(1.5, 4), "▰▰▰▰ (100%)");
    }

    #[test]
    fn tiny_progress_still_shows_one_segment() {
        assert!(build_progress_bar(0.01, 10).starts_with("▰▱"));
    }

    #[test]
    fn progress_field_names_the_next_level() {
        let status = XpStatus::from_total_xp(150);
        let field = progress_field(&status);
        assert!(field.contains(&format!("to level {}", status.level + 1)));
    }
}
