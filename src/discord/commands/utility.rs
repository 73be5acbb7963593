// Bug reports: a modal whose contents are forwarded to the report channel.

use crate::discord::{Data, Error};
use poise::serenity_prelude as serenity;
use poise::Modal;

type ApplicationContext<'a> = poise::ApplicationContext<'a, Data, Error>;

#[derive(Debug, poise::Modal)]
#[name = "Submit a Bug Report"]
struct BugReportModal {
    #[name = "Short Summary of the Bug"]
    #[placeholder = "e.g., Rank command shows the wrong level"]
    #[max_length = 100]
    summary: String,
    #[name = "Steps to Reproduce"]
    #[placeholder = "1. Run the /rank command...\n2. Observe the XP value..."]
    #[paragraph]
    #[max_length = 1024]
    steps: String,
    #[name = "Expected Behavior (Optional)"]
    #[paragraph]
    #[max_length = 1024]
    expected: Option<String>,
}

/// Submit a bug report to the developers.
#[poise::command(slash_command)]
pub async fn bugreport(app_ctx: ApplicationContext<'_>) -> Result<(), Error> {
    let ctx = poise::Context::Application(app_ctx);
    let Some(channel_id) = ctx.data().config.bug_report_channel_id else {
        ctx.send(
            poise::CreateReply::default()
                .content("Bug reports aren't set up on this bot.")
                .ephemeral(true),
        )
        .await?;
        return Ok(());
    };

    let Some(report) = BugReportModal::execute(app_ctx).await? else {
        // Modal timed out or was dismissed.
        return Ok(());
    };

    let author = ctx.author();
    let source = match ctx.guild_id() {
        Some(guild_id) => format!("guild {}", guild_id),
        None => "a DM".to_string(),
    };

    let mut embed = serenity::CreateEmbed::new()
        .title(format!("New Bug Report: {}", report.summary))
        .color(serenity::Colour::RED)
        .timestamp(serenity::Timestamp::now())
        .author(serenity::CreateEmbedAuthor::new(author.name.clone()).icon_url(author.face()))
        .field(
            "Steps to Reproduce",
            format!("```\n{}\n```", report.steps),
            false,
        );
    if let Some(expected) = report.expected.filter(|e| !e.trim().is_empty()) {
        embed = embed.field("Expected Behavior", format!("```\n{}\n```", expected), false);
    }
    embed = embed.footer(serenity::CreateEmbedFooter::new(format!(
        "Submitted from {} | User ID: {}",
        source, author.id
    )));

    let forwarded = serenity::ChannelId::new(channel_id)
        .send_message(ctx.http(), serenity::CreateMessage::new().embed(embed))
        .await;

    let reply = match forwarded {
        Ok(_) => {
            tracing::info!(user_id = author.id.get(), "Bug report submitted");
            "Thank you! Your bug report has been submitted successfully."
        }
        Err(e) => {
            tracing::error!(channel_id, "Failed to forward bug report: {}", e);
            "Oops! Something went wrong while submitting your report."
        }
    };

    ctx.send(poise::CreateReply::default().content(reply).ephemeral(true))
        .await?;
    Ok(())
}
