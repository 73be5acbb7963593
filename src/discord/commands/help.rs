use crate::discord::commands::leveling::{Context, Error};
use poise::serenity_prelude as serenity;
use std::collections::HashMap;

const CATEGORY_ORDER: &[&str] = &[
    "Leveling",
    "Giveaways",
    "Scheduling",
    "Configuration",
    "Utilities",
];

fn get_category_emoji(category: &str) -> &'static str {
    match category {
        "Leveling" => "📈",
        "Giveaways" => "🎉",
        "Scheduling" => "📅",
        "Configuration" => "⚙️",
        "Utilities" => "🧰",
        _ => "•",
    }
}

struct CommandMetadata {
    category: &'static str,
    priority: i32,
    description: Option<&'static str>,
}

fn get_command_metadata(name: &str) -> CommandMetadata {
    let (category, priority, description) = match name {
        "rank" => ("Leveling", 90, Some("Check your level, XP and server rank.")),
        "leaderboard" => ("Leveling", 80, Some("Browse the top 200 members by XP.")),
        "giveaway" => ("Giveaways", 70, Some("Start, end or reroll a giveaway.")),
        "schedule" => (
            "Scheduling",
            60,
            Some("Recurring role pings and channel purges."),
        ),
        "config-channels" => (
            "Configuration",
            50,
            Some("Welcome and level-up channels, on-demand purges."),
        ),
        "config-leveling" => (
            "Configuration",
            45,
            Some("XP cooldown, XP range and manual XP changes."),
        ),
        "bugreport" => ("Utilities", 20, Some("Send a bug report to the developers.")),
        _ => ("Utilities", 0, None),
    };

    CommandMetadata {
        category,
        priority,
        description,
    }
}

/// Show a categorized list of commands.
#[poise::command(slash_command)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    let mut categories: HashMap<&str, Vec<(i32, String)>> = HashMap::new();

    for command in &ctx.framework().options().commands {
        if command.hide_in_help || command.name == "help" {
            continue;
        }

        let metadata = get_command_metadata(&command.name);
        let description = metadata
            .description
            .or(command.description.as_deref())
            .unwrap_or("No description provided.");

        let mut entry = format!("• **/{}**: {}", command.name, description);
        if !command.subcommands.is_empty() {
            let subcommands: Vec<String> = command
                .subcommands
                .iter()
                .map(|sub| format!("`{}`", sub.name))
                .collect();
            entry.push_str(&format!("\n  ⤷ {}", subcommands.join(" · ")));
        }

        categories
            .entry(metadata.category)
            .or_default()
            .push((metadata.priority, entry));
    }

    let mut embed = serenity::CreateEmbed::new()
        .title("Command Guide")
        .description("Use slash commands with `/`. Admin commands only show up for members with the right permissions.")
        .color(serenity::Colour::from_rgb(88, 101, 242))
        .timestamp(serenity::Timestamp::now());

    let mut sorted_categories: Vec<_> = categories.keys().cloned().collect();
    sorted_categories.sort_by(|a, b| {
        let pos_a = CATEGORY_ORDER.iter().position(|&x| x == *a).unwrap_or(999);
        let pos_b = CATEGORY_ORDER.iter().position(|&x| x == *b).unwrap_or(999);
        pos_a.cmp(&pos_b).then(a.cmp(b))
    });

    for category in sorted_categories {
        if let Some(entries) = categories.get_mut(category) {
            entries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

            let title = format!("{} {}", get_category_emoji(category), category);
            let formatted: Vec<String> = entries.iter().map(|(_, s)| s.clone()).collect();

            for (i, chunk) in chunk_entries(&formatted).iter().enumerate() {
                let field_name = if i == 0 {
                    title.clone()
                } else {
                    format!("{} (cont.)", title)
                };
                embed = embed.field(field_name, chunk.join("\n"), false);
            }
        }
    }

    embed = embed.footer(serenity::CreateEmbedFooter::new(
        "Found a bug? Use /bugreport.",
    ));

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Split entries so no embed field goes over Discord's 1024 character limit.
fn chunk_entries(entries: &[String]) -> Vec<Vec<String>> {
    let mut chunks = Vec::new();
    let mut current_chunk = Vec::new();
    let mut current_length = 0;

    for entry in entries {
        let entry_len = entry.len();
        if current_length + entry_len + 1 > 1000 && !current_chunk.is_empty() {
            chunks.push(current_chunk);
            current_chunk = Vec::new();
            current_length = 0;
        }

        current_chunk.push(entry.clone());
        current_length += entry_len + 1;
    }

    if !current_chunk.is_empty() {
        chunks.push(current_chunk);
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_stay_under_field_limit() {
        let entries: Vec<String> = (0..30).map(|i| format!("{:0>60}", i)).collect();
        let chunks = chunk_entries(&entries);

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.join("\n").len() <= 1024);
        }
        assert_eq!(chunks.iter().map(Vec::len).sum::<usize>(), 30);
    }

    #[test]
    fn known_commands_have_categories() {
        assert_eq!(get_command_metadata("rank").category, "Leveling");
        assert_eq!(get_command_metadata("config-leveling").category, "Configuration");
        assert_eq!(get_command_metadata("unknown").category, "Utilities");
    }
}
