// This is the entry point of the Discord bot.
//
// **Architecture Overview:**
// - `config/` = Environment and JSON configuration
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite stores)
// - `discord/` = Discord-specific adapters (commands, events, background tasks)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands, event handlers and background tasks

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "config/bot_config.rs"]
mod config;
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::config::{BotConfig, FeatureConfig};
use crate::core::giveaway::{GiveawayService, ShortfallPolicy};
use crate::core::leveling::{daily_date, LevelingError, LevelingService, LevelingSettings};
use crate::core::scheduling::ScheduleService;
use crate::core::settings::{SettingsDefaults, SettingsService};
use crate::core::welcome::WelcomeTemplates;
use crate::discord::giveaway_messages::{handle_enter_button, ENTER_BUTTON_ID};
use crate::discord::leveling_announcements::announce_level_up;
use crate::discord::member_events;
use crate::discord::{Data, Error};
use crate::infra::giveaway::SqliteGiveawayStore;
use crate::infra::leveling::SqliteXpStore;
use crate::infra::scheduling::SqliteScheduleStore;
use crate::infra::settings::SqliteSettingsStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
async fn event_handler(
    ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            // Ignore bot messages (including our own)
            if new_message.author.bot {
                return Ok(());
            }
            // Only guild messages earn XP
            let Some(guild_id) = new_message.guild_id else {
                return Ok(());
            };
            if data.config.is_excluded(new_message.channel_id.get()) {
                return Ok(());
            }

            let user_id = new_message.author.id.get();
            let guild_id = guild_id.get();
            let now = chrono::Utc::now();
            let settings = data.settings.leveling(guild_id);

            match data
                .leveling
                .process_message(user_id, guild_id, now, &settings, daily_date(now))
                .await
            {
                Ok(Some(level_up)) => {
                    tracing::info!(
                        user_id = level_up.user_id,
                        guild_id = level_up.guild_id,
                        old_level = level_up.old_level,
                        new_level = level_up.new_level,
                        total_xp = level_up.total_xp,
                        "User leveled up"
                    );
                    if let Err(err) = announce_level_up(ctx, data, &level_up).await {
                        tracing::warn!("Failed to send level-up announcement: {err}");
                    }
                }
                Ok(None) => {
                    // XP was awarded but no level up - nothing to do
                }
                Err(LevelingError::OnCooldown(_)) => {
                    // User is on cooldown - silently ignore
                }
                Err(e) => {
                    tracing::error!(user_id, guild_id, "Error processing XP for message: {}", e);
                }
            }
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            if let Err(e) = member_events::handle_member_join(ctx, data, new_member).await {
                tracing::error!("Error sending welcome message: {}", e);
            }
        }
        serenity::FullEvent::GuildMemberUpdate {
            old_if_available,
            new,
            ..
        } => {
            if let Some(new) = new {
                if let Err(e) =
                    member_events::handle_member_update(ctx, data, old_if_available.as_ref(), new)
                        .await
                {
                    tracing::error!("Error handling member update: {}", e);
                }
            }
        }
        serenity::FullEvent::InteractionCreate {
            interaction: serenity::Interaction::Component(component),
        } if component.data.custom_id == ENTER_BUTTON_ID => {
            if let Err(e) = handle_enter_button(ctx, data, component).await {
                tracing::error!("Error handling giveaway entry: {}", e);
            }
        }

        _ => {}
    }

    Ok(())
}

/// Show command failures to the user instead of leaving the interaction
/// hanging; everything else goes to poise's default handler.
async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Setup { error, .. } => {
            tracing::error!("Failed to start bot: {}", error);
        }
        poise::FrameworkError::Command { error, ctx, .. } => {
            tracing::error!(
                command = %ctx.command().qualified_name,
                user_id = ctx.author().id.get(),
                "Command failed: {}",
                error
            );
            let reply = poise::CreateReply::default()
                .content(format!("❌ {}", error))
                .ephemeral(true);
            if let Err(e) = ctx.send(reply).await {
                tracing::warn!("Failed to report command error: {}", e);
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                tracing::error!("Error while handling error: {}", e);
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = BotConfig::from_env().expect(
        "Invalid configuration! Check BOT_ENV and the matching DEV_/PROD_DISCORD_TOKEN in your .env file.",
    );

    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();
    tracing::info!(environment = ?config.environment, "Configuration loaded");

    let features =
        FeatureConfig::load(&config.bot_config_path).expect("Failed to read bot_config.json");
    let welcome = WelcomeTemplates::load(Some(&config.welcome_messages_path), std::env::vars())
        .expect("Failed to read welcome message templates");

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let pool = infra::database::connect(&config.database_url)
        .await
        .expect("Failed to open the SQLite database");

    let xp_store = SqliteXpStore::new(pool.clone());
    xp_store.migrate().await.expect("Failed to migrate XP tables");
    let leveling_service = Arc::new(LevelingService::new(xp_store));

    let settings_store = SqliteSettingsStore::new(pool.clone());
    settings_store
        .migrate()
        .await
        .expect("Failed to migrate settings table");
    let settings_service = Arc::new(SettingsService::new(
        settings_store,
        SettingsDefaults {
            welcome_channel_id: config.default_welcome_channel_id,
            levelup_channel_id: config.default_levelup_channel_id,
            leveling: LevelingSettings::default(),
        },
    ));
    let loaded = settings_service
        .load()
        .await
        .expect("Failed to load guild settings");
    tracing::info!(guilds = loaded, "Loaded guild settings");

    let schedule_store = SqliteScheduleStore::new(pool.clone());
    schedule_store
        .migrate()
        .await
        .expect("Failed to migrate schedules table");
    let schedule_service = Arc::new(ScheduleService::new(schedule_store));

    let giveaway_store = SqliteGiveawayStore::new(pool);
    giveaway_store
        .migrate()
        .await
        .expect("Failed to migrate giveaway tables");
    let policy = if features.strict_giveaway_draws {
        ShortfallPolicy::Strict
    } else {
        ShortfallPolicy::AllowFewer
    };
    let giveaway_service = Arc::new(GiveawayService::new(giveaway_store, policy));

    // Seed schedules from bot_config.json the first time the bot runs.
    if let Some(guild_id) = config.guild_id {
        let mut rules = Vec::new();
        for schedule in features.ping_schedules.iter().cloned() {
            match schedule.into_rules(guild_id) {
                Ok(mut r) => rules.append(&mut r),
                Err(e) => tracing::warn!("Skipping invalid ping schedule in config: {}", e),
            }
        }
        match schedule_service.seed(rules).await {
            Ok(0) => {}
            Ok(seeded) => tracing::info!(seeded, "Seeded schedules from bot_config.json"),
            Err(e) => tracing::error!("Failed to seed schedules: {}", e),
        }
    }

    let token = config.token.clone();
    let config = Arc::new(config);

    // Create the data structure that will be shared across all commands
    let data = Data {
        leveling: Arc::clone(&leveling_service),
        settings: Arc::clone(&settings_service),
        schedules: Arc::clone(&schedule_service),
        giveaways: Arc::clone(&giveaway_service),
        welcome: Arc::new(welcome),
        config: Arc::clone(&config),
        features: Arc::new(features),
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS; // Joins and role changes

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: discord::all_commands(),
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(|ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!(user = %ready.user.name, "Bot is starting up");

                // Guild registration is instant; global registration can take
                // up to an hour to propagate.
                match data.config.guild_id {
                    Some(guild_id) => {
                        poise::builtins::register_in_guild(
                            ctx,
                            &framework.options().commands,
                            serenity::GuildId::new(guild_id),
                        )
                        .await?
                    }
                    None => {
                        poise::builtins::register_globally(ctx, &framework.options().commands)
                            .await?
                    }
                }
                tracing::info!("Commands registered");

                discord::schedule_runner::spawn(
                    ctx.http.clone(),
                    Arc::clone(&data.schedules),
                    Arc::clone(&data.config),
                );
                discord::giveaway_watcher::spawn(
                    ctx.http.clone(),
                    Arc::clone(&data.giveaways),
                    data.config.giveaway_check_interval,
                );
                discord::daily_award::spawn(
                    ctx.http.clone(),
                    ctx.cache.clone(),
                    Arc::clone(&data.leveling),
                    Arc::clone(&data.config),
                );

                tracing::info!("Bot is ready");
                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .expect("Error creating client");

    client.start().await.expect("Error running bot");
}
