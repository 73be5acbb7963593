// Giveaway commands: start, end early, reroll.

use crate::core::giveaway::{parse_message_id, GiveawayError, NewGiveaway};
use crate::discord::giveaway_messages::{
    announce_failed_draw, announce_result, departed_entrants, enter_button, mention_list,
    open_embed,
};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Run giveaways in this channel.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("start", "end", "reroll")
)]
pub async fn giveaway(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Start a giveaway with an entry button.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn start(
    ctx: Context<'_>,
    #[description = "What's being given away"] prize: String,
    #[description = "How long it runs (e.g. '30m', '2h', '1d12h')"] duration: String,
    #[description = "Number of winners (default: 1)"]
    #[min = 1]
    #[max = 50]
    winners: Option<u32>,
) -> Result<(), Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();

    let Some(duration) = parse_duration(&duration) else {
        ctx.send(
            poise::CreateReply::default()
                .content("Invalid duration. Use formats like `30m`, `2h`, `1d` or `1h30m`.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };
    let winner_count = winners.unwrap_or(1);
    let host_id = ctx.author().id.get();
    let now = chrono::Utc::now();

    // The message id is the giveaway's key, so post first and record second.
    let message = ctx
        .channel_id()
        .send_message(
            ctx.http(),
            serenity::CreateMessage::new()
                .embed(open_embed(&prize, host_id, now + duration, winner_count, 0))
                .components(enter_button(false)),
        )
        .await?;

    let started = ctx
        .data()
        .giveaways
        .start(
            NewGiveaway {
                message_id: message.id.get(),
                channel_id: ctx.channel_id().get(),
                guild_id,
                host_id,
                prize,
                duration,
                winner_count,
            },
            now,
        )
        .await;

    match started {
        Ok(giveaway) => {
            tracing::info!(
                guild_id,
                message_id = giveaway.message_id,
                winner_count,
                ends_at = %giveaway.ends_at,
                "Giveaway started"
            );
            ctx.send(
                poise::CreateReply::default()
                    .content(format!(
                        "Giveaway started! It ends <t:{}:R>.",
                        giveaway.ends_at.timestamp()
                    ))
                    .ephemeral(true),
            )
            .await?;
            Ok(())
        }
        Err(e) => {
            if let Err(delete_err) = message.delete(ctx.http()).await {
                tracing::warn!("Failed to remove orphaned giveaway message: {}", delete_err);
            }
            Err(e.into())
        }
    }
}

/// End a running giveaway now and draw its winners.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn end(
    ctx: Context<'_>,
    #[description = "Giveaway message ID or link"] message: String,
) -> Result<(), Error> {
    let message_id = resolve_giveaway(ctx, &message).await?;
    let giveaways = &ctx.data().giveaways;
    ctx.defer_ephemeral().await?;

    let entrants = giveaways.entrant_ids(message_id).await?;
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    let departed = departed_entrants(ctx.http(), guild_id, &entrants).await;

    let mut rng = StdRng::from_entropy();
    let finished = giveaways
        .finish(message_id, |user_id| !departed.contains(&user_id), &mut rng)
        .await;
    let result = match finished {
        Ok(Some(result)) => result,
        Ok(None) => {
            ctx.say("That giveaway has already ended.").await?;
            return Ok(());
        }
        Err(e @ GiveawayError::InsufficientEntrants { .. }) => {
            // Strict draws: the giveaway is closed either way.
            let giveaway = giveaways.get(message_id).await?;
            announce_failed_draw(ctx.http(), &giveaway, &e.to_string()).await?;
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!(
        message_id,
        winners = result.winners.len(),
        entrants = result.entrant_count,
        "Giveaway ended early"
    );
    announce_result(ctx.http(), &result).await?;
    ctx.send(
        poise::CreateReply::default()
            .content("Giveaway ended.")
            .ephemeral(true),
    )
    .await?;
    Ok(())
}

/// Pick new winners for an ended giveaway.
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn reroll(
    ctx: Context<'_>,
    #[description = "Giveaway message ID or link"] message: String,
    #[description = "How many new winners (default: 1)"]
    #[min = 1]
    winners: Option<u32>,
) -> Result<(), Error> {
    let message_id = resolve_giveaway(ctx, &message).await?;
    let giveaways = &ctx.data().giveaways;
    ctx.defer().await?;

    let entrants = giveaways.entrant_ids(message_id).await?;
    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?.get();
    let departed = departed_entrants(ctx.http(), guild_id, &entrants).await;

    let mut rng = StdRng::from_entropy();
    let result = giveaways
        .reroll(
            message_id,
            winners.unwrap_or(1),
            |user_id| !departed.contains(&user_id),
            &mut rng,
        )
        .await?;

    if result.winners.is_empty() {
        ctx.say("No one left to draw: everyone still here has already won.")
            .await?;
        return Ok(());
    }

    ctx.say(format!(
        "🎉 New winner{}: {}! You won the **{}**!",
        if result.winners.len() == 1 { "" } else { "s" },
        mention_list(&result.winners),
        result.giveaway.prize
    ))
    .await?;
    Ok(())
}

/// Parse the id or link and make sure the giveaway belongs to this guild.
async fn resolve_giveaway(ctx: Context<'_>, input: &str) -> Result<u64, Error> {
    let guild_id = ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get();
    let message_id = parse_message_id(input).ok_or("That isn't a message ID or message link.")?;

    let giveaway = ctx.data().giveaways.get(message_id).await?;
    if giveaway.guild_id != guild_id {
        return Err(GiveawayError::NotFound(message_id).into());
    }
    Ok(message_id)
}

/// Upper bound on any single number, keeps chrono's constructors in range.
const MAX_DURATION_COMPONENT: i64 = 100_000;

/// Parse durations like "45s", "30m", "2h", "1d" or compounds like "1d12h".
/// A bare number is read as minutes.
fn parse_duration(input: &str) -> Option<chrono::Duration> {
    let input = input.trim().to_lowercase().replace(' ', "");
    if input.is_empty() {
        return None;
    }

    if let Ok(minutes) = input.parse::<i64>() {
        return (1..=MAX_DURATION_COMPONENT)
            .contains(&minutes)
            .then(|| chrono::Duration::minutes(minutes));
    }

    let mut total = chrono::Duration::zero();
    let mut number = String::new();
    for c in input.chars() {
        if c.is_ascii_digit() {
            number.push(c);
            continue;
        }
        let value: i64 = number.parse().ok().filter(|v| *v <= MAX_DURATION_COMPONENT)?;
        number.clear();
        total = total
            + match c {
                's' => chrono::Duration::seconds(value),
                'm' => chrono::Duration::minutes(value),
                'h' => chrono::Duration::hours(value),
                'd' => chrono::Duration::days(value),
                'w' => chrono::Duration::weeks(value),
                _ => return None,
            };
    }

    // Trailing digits without a unit.
    if !number.is_empty() || total <= chrono::Duration::zero() {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("45s"), Some(Duration::seconds(45)));
        assert_eq!(parse_duration("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("2H"), Some(Duration::hours(2)));
        assert_eq!(parse_duration("1d"), Some(Duration::days(1)));
    }

    #[test]
    fn parses_compound_durations() {
        assert_eq!(
            parse_duration("1d 12h"),
            Some(Duration::days(1) + Duration::hours(12))
        );
        assert_eq!(
            parse_duration("1h30m"),
            Some(Duration::minutes(90))
        );
    }

    #[test]
    fn bare_numbers_are_minutes() {
        assert_eq!(parse_duration("15"), Some(Duration::minutes(15)));
    }

    #[test]
    fn rejects_garbage_and_zero() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("0"), None);
        assert_eq!(parse_duration("0m"), None);
        assert_eq!(parse_duration("soon"), None);
        assert_eq!(parse_duration("5x"), None);
        assert_eq!(parse_duration("1h30"), None);
        assert_eq!(parse_duration("99999999999d"), None);
    }
}
