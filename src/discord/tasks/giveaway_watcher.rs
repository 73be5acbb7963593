use crate::core::giveaway::{GiveawayError, GiveawayService};
use crate::discord::giveaway_messages::{announce_failed_draw, announce_result, departed_entrants};
use crate::infra::giveaway::SqliteGiveawayStore;
use poise::serenity_prelude as serenity;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

/// End giveaways whose time is up. Giveaways that expired while the bot was
/// offline are picked up on the first tick.
pub fn spawn(
    http: Arc<serenity::Http>,
    giveaways: Arc<GiveawayService<SqliteGiveawayStore>>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        tracing::info!(interval_secs = interval.as_secs(), "Giveaway watcher started");

        loop {
            ticker.tick().await;

            let due = match giveaways.due_giveaways(chrono::Utc::now()).await {
                Ok(due) => due,
                Err(e) => {
                    tracing::warn!("Failed to load due giveaways: {}", e);
                    continue;
                }
            };

            for giveaway in due {
                let message_id = giveaway.message_id;
                let entrants = match giveaways.entrant_ids(message_id).await {
                    Ok(entrants) => entrants,
                    Err(e) => {
                        tracing::warn!(message_id, "Failed to load giveaway entrants: {}", e);
                        continue;
                    }
                };
                let departed = departed_entrants(&http, giveaway.guild_id, &entrants).await;

                let mut rng = StdRng::from_entropy();
                let finished = giveaways
                    .finish(message_id, |user_id| !departed.contains(&user_id), &mut rng)
                    .await;
                let result = match finished {
                    Ok(Some(result)) => result,
                    // Ended by /giveaway end in the meantime.
                    Ok(None) => continue,
                    Err(e @ GiveawayError::InsufficientEntrants { .. }) => {
                        tracing::warn!(message_id, "Giveaway ended without a draw: {}", e);
                        if let Err(e) =
                            announce_failed_draw(&http, &giveaway, &e.to_string()).await
                        {
                            tracing::warn!(message_id, "Failed to announce giveaway result: {}", e);
                        }
                        continue;
                    }
                    Err(e) => {
                        tracing::error!(message_id, "Failed to finish giveaway: {}", e);
                        continue;
                    }
                };

                tracing::info!(
                    message_id,
                    winners = result.winners.len(),
                    entrants = result.entrant_count,
                    "Giveaway ended"
                );
                if let Err(e) = announce_result(&http, &result).await {
                    tracing::warn!(message_id, "Failed to announce giveaway result: {}", e);
                }
            }
        }
    });
}
