// Giveaway message rendering plus the "Enter Giveaway" button handler.
// Shared by the slash commands, the gateway event handler and the watcher task.

use crate::core::giveaway::{weight_for_roles, DrawResult, EntryOutcome, Giveaway};
use crate::discord::Data;
use poise::serenity_prelude as serenity;
use std::collections::HashSet;

/// Custom id on the entry button. It carries no per-giveaway state, so the
/// button keeps working after a restart: the message id identifies the
/// giveaway.
pub const ENTER_BUTTON_ID: &str = "giveaway_enter";

const GIVEAWAY_COLOR: u32 = 0xF1C40F;
const ENDED_COLOR: u32 = 0x2F3136;

pub fn open_embed(
    prize: &str,
    host_id: u64,
    ends_at: chrono::DateTime<chrono::Utc>,
    winner_count: u32,
    entries: u64,
) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title(format!("🎉 Giveaway: {} 🎉", prize))
        .description("Press the button below to enter!")
        .color(GIVEAWAY_COLOR)
        .field("Host", format!("<@{}>", host_id), true)
        .field("Entries", entries.to_string(), true)
        .field("Winners", winner_count.to_string(), true)
        .field("Ends", format!("<t:{}:R>", ends_at.timestamp()), false)
}

pub fn ended_embed(giveaway: &Giveaway, entries: usize) -> serenity::CreateEmbed {
    let winners = if !giveaway.winners.is_empty() {
        mention_list(&giveaway.winners)
    } else if entries == 0 {
        "Ended with no entries.".to_string()
    } else {
        "No one! Maybe they all left?".to_string()
    };

    serenity::CreateEmbed::new()
        .title("🎉 Giveaway Ended! 🎉")
        .description(format!("**{}**", giveaway.prize))
        .color(ENDED_COLOR)
        .field("Host", format!("<@{}>", giveaway.host_id), true)
        .field("Entries", entries.to_string(), true)
        .field("Winners", winners, false)
        .field("Ended", format!("<t:{}:R>", giveaway.ends_at.timestamp()), false)
}

pub fn enter_button(disabled: bool) -> Vec<serenity::CreateActionRow> {
    vec![serenity::CreateActionRow::Buttons(vec![
        serenity::CreateButton::new(ENTER_BUTTON_ID)
            .label("Enter Giveaway")
            .emoji('🎉')
            .style(serenity::ButtonStyle::Success)
            .disabled(disabled),
    ])]
}

pub fn mention_list(user_ids: &[u64]) -> String {
    user_ids
        .iter()
        .map(|id| format!("<@{}>", id))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Swap the giveaway message to its ended state and congratulate the winners
/// in a reply.
pub async fn announce_result(
    http: &serenity::Http,
    result: &DrawResult,
) -> Result<(), serenity::Error> {
    let giveaway = &result.giveaway;
    let channel = serenity::ChannelId::new(giveaway.channel_id);
    let message = serenity::MessageId::new(giveaway.message_id);

    channel
        .edit_message(
            http,
            message,
            serenity::EditMessage::new()
                .embed(ended_embed(giveaway, result.entrant_count))
                .components(enter_button(true)),
        )
        .await?;

    let content = if result.winners.is_empty() && result.entrant_count == 0 {
        format!("The giveaway for **{}** ended with no entries.", giveaway.prize)
    } else if result.winners.is_empty() {
        format!(
            "The giveaway for **{}** ended without a winner: every entrant has left the server.",
            giveaway.prize
        )
    } else {
        format!(
            "Congratulations {}! You won the **{}**!",
            mention_list(&result.winners),
            giveaway.prize
        )
    };

    channel
        .send_message(
            http,
            serenity::CreateMessage::new()
                .content(content)
                .reference_message((channel, message)),
        )
        .await?;

    Ok(())
}

/// Close out a giveaway whose draw was refused, e.g. strict mode with too
/// few entrants.
pub async fn announce_failed_draw(
    http: &serenity::Http,
    giveaway: &Giveaway,
    reason: &str,
) -> Result<(), serenity::Error> {
    let channel = serenity::ChannelId::new(giveaway.channel_id);
    let message = serenity::MessageId::new(giveaway.message_id);

    let embed = serenity::CreateEmbed::new()
        .title("🎉 Giveaway Ended! 🎉")
        .description(format!("**{}**", giveaway.prize))
        .color(ENDED_COLOR)
        .field("Host", format!("<@{}>", giveaway.host_id), true)
        .field("Winners", "No winners drawn.", false);
    channel
        .edit_message(
            http,
            message,
            serenity::EditMessage::new()
                .embed(embed)
                .components(enter_button(true)),
        )
        .await?;

    channel
        .send_message(
            http,
            serenity::CreateMessage::new()
                .content(format!(
                    "The giveaway for **{}** ended without a draw: {}",
                    giveaway.prize, reason
                ))
                .reference_message((channel, message)),
        )
        .await?;
    Ok(())
}

/// Entrants Discord reports as no longer in the guild. Any other lookup
/// failure keeps the entrant in the draw.
pub async fn departed_entrants(
    http: &serenity::Http,
    guild_id: u64,
    entrants: &[u64],
) -> HashSet<u64> {
    let guild = serenity::GuildId::new(guild_id);
    let mut departed = HashSet::new();

    for &user_id in entrants {
        match http.get_member(guild, serenity::UserId::new(user_id)).await {
            Ok(_) => {}
            Err(serenity::Error::Http(serenity::HttpError::UnsuccessfulRequest(response)))
                if response.status_code.as_u16() == 404 =>
            {
                departed.insert(user_id);
            }
            Err(e) => {
                tracing::warn!(guild_id, user_id, "Could not check giveaway entrant: {}", e);
            }
        }
    }

    if !departed.is_empty() {
        tracing::info!(guild_id, departed = departed.len(), "Skipping entrants who left");
    }
    departed
}

/// Handle a press on the entry button. Entry weight comes from the member's
/// roles at the moment they click.
pub async fn handle_enter_button(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
) -> Result<(), serenity::Error> {
    let message_id = interaction.message.id.get();
    let user_id = interaction.user.id.get();

    let roles: Vec<u64> = interaction
        .member
        .as_ref()
        .map(|m| m.roles.iter().map(|r| r.get()).collect())
        .unwrap_or_default();
    let weight = weight_for_roles(
        &roles,
        &data.features.role_weights,
        data.features.default_weight,
    );

    let now = chrono::Utc::now();
    let reply = match data.giveaways.enter(message_id, user_id, weight, now).await {
        Ok(EntryOutcome::Entered { total_entries }) => {
            tracing::info!(message_id, user_id, weight, "Giveaway entry recorded");
            refresh_entry_count(ctx, data, interaction, total_entries).await;
            if weight > 1 {
                format!("You're in! Your roles give you **{}** entries.", weight)
            } else {
                "You're in! Good luck 🍀".to_string()
            }
        }
        Ok(EntryOutcome::AlreadyEntered) => "You have already entered this giveaway.".to_string(),
        Ok(EntryOutcome::Closed) => "This giveaway has already ended.".to_string(),
        Err(e) => {
            tracing::error!(message_id, user_id, "Failed to record giveaway entry: {}", e);
            "Something went wrong entering the giveaway. Please try again.".to_string()
        }
    };

    interaction
        .create_response(
            &ctx.http,
            serenity::CreateInteractionResponse::Message(
                serenity::CreateInteractionResponseMessage::new()
                    .content(reply)
                    .ephemeral(true),
            ),
        )
        .await
}

async fn refresh_entry_count(
    ctx: &serenity::Context,
    data: &Data,
    interaction: &serenity::ComponentInteraction,
    total_entries: u64,
) {
    let giveaway = match data.giveaways.get(interaction.message.id.get()).await {
        Ok(giveaway) => giveaway,
        Err(e) => {
            tracing::warn!("Could not reload giveaway to update entries: {}", e);
            return;
        }
    };

    let embed = open_embed(
        &giveaway.prize,
        giveaway.host_id,
        giveaway.ends_at,
        giveaway.winner_count,
        total_entries,
    );
    if let Err(e) = interaction
        .channel_id
        .edit_message(
            &ctx.http,
            interaction.message.id,
            serenity::EditMessage::new().embed(embed),
        )
        .await
    {
        tracing::warn!(
            message_id = giveaway.message_id,
            "Failed to update giveaway entry count: {}",
            e
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mentions_are_comma_separated() {
        assert_eq!(mention_list(&[1, 22]), "<@1>, <@22>");
        assert_eq!(mention_list(&[]), "");
    }
}
