// Weighted winner selection and small input helpers for giveaways.

use super::GiveawayError;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::{BTreeMap, HashMap};

/// What to do when fewer people entered than there are prizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShortfallPolicy {
    /// Fail with `InsufficientEntrants`.
    Strict,
    /// Draw everyone who entered.
    #[default]
    AllowFewer,
}

/// Pick `count` distinct winners, each round weighted by entry count.
///
/// `entrants` maps user id to weight. A winner is removed from the pool
/// before the next round, so nobody can win twice. Iteration follows user id
/// order, which makes the result depend only on the map and the rng state.
pub fn draw_winners<R: Rng + ?Sized>(
    entrants: &BTreeMap<u64, u32>,
    count: usize,
    policy: ShortfallPolicy,
    rng: &mut R,
) -> Result<Vec<u64>, GiveawayError> {
    if let Some((&user_id, _)) = entrants.iter().find(|(_, weight)| **weight == 0) {
        return Err(GiveawayError::InvalidWeight(user_id));
    }

    let count = if count > entrants.len() {
        match policy {
            ShortfallPolicy::Strict => {
                return Err(GiveawayError::InsufficientEntrants {
                    requested: count,
                    available: entrants.len(),
                })
            }
            ShortfallPolicy::AllowFewer => entrants.len(),
        }
    } else {
        count
    };

    let mut pool: Vec<(u64, u32)> = entrants.iter().map(|(id, w)| (*id, *w)).collect();
    let mut winners = Vec::with_capacity(count);

    while winners.len() < count {
        let dist = WeightedIndex::new(pool.iter().map(|(_, weight)| *weight))
            .map_err(|e| GiveawayError::DrawFailed(e.to_string()))?;
        let (user_id, _) = pool.remove(dist.sample(rng));
        winners.push(user_id);
    }

    Ok(winners)
}

/// Entry weight for a member: the larger of `default` and the best bonus any
/// of their roles grants. Never below 1.
pub fn weight_for_roles(member_roles: &[u64], role_weights: &HashMap<u64, u32>, default: u32) -> u32 {
    member_roles
        .iter()
        .filter_map(|role| role_weights.get(role).copied())
        .fold(default, u32::max)
        .max(1)
}

/// Accepts a bare message id or a message link such as
/// `https://discord.com/channels/<guild>/<channel>/<message>`.
pub fn parse_message_id(input: &str) -> Option<u64> {
    let input = input.trim();

    let Some(rest) = input
        .strip_prefix("https://")
        .or_else(|| input.strip_prefix("http://"))
    else {
        return parse_snowflake(input);
    };

    let (host, path) = rest.split_once('/')?;
    let host = host
        .strip_prefix("ptb.")
        .or_else(|| host.strip_prefix("canary."))
        .unwrap_or(host);
    if host != "discord.com" && host != "discordapp.com" {
        return None;
    }

    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        ["channels", guild, channel, message]
            if parse_snowflake(guild).is_some() && parse_snowflake(channel).is_some() =>
        {
            parse_snowflake(message)
        }
        _ => None,
    }
}

fn parse_snowflake(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
