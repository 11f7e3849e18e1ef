//! Discord adapter: slash commands that call [`StockService`] and render
//! its replies.

use async_trait::async_trait;
use chrono::Utc;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{Config, ConfigError};
use crate::metrics::Metrics;
use crate::persistence::StoreError;
use crate::service::{Notifier, Reply, StockService, SummaryEmbed};
use crate::stock::{Slot, StockSchema, Tier};

/// Data shared with every command.
pub struct Data {
    pub service: Arc<StockService>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Startup failures that stop the process.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to prepare data files: {0}")]
    Storage(#[from] StoreError),
    #[error("failed to start liveness endpoint: {0}")]
    Liveness(#[from] std::io::Error),
    #[error("invalid bot token")]
    InvalidToken,
    #[error("discord client error: {0}")]
    Discord(serenity::Error),
}

impl From<serenity::Error> for BotError {
    fn from(e: serenity::Error) -> Self {
        match e {
            serenity::Error::Gateway(serenity::GatewayError::InvalidAuthentication) => {
                Self::InvalidToken
            }
            other => Self::Discord(other),
        }
    }
}

#[derive(Debug, Clone, Copy, poise::ChoiceParameter)]
pub enum TierChoice {
    #[name = "premium"]
    Premium,
    #[name = "free"]
    Free,
}

impl From<TierChoice> for Tier {
    fn from(choice: TierChoice) -> Self {
        match choice {
            TierChoice::Premium => Tier::Premium,
            TierChoice::Free => Tier::Free,
        }
    }
}

async fn autocomplete_category<'a>(
    ctx: Context<'_>,
    partial: &'a str,
) -> impl Iterator<Item = String> + 'a {
    ctx.data().service.autocomplete_categories(partial).into_iter()
}

/// Genera un ítem del stock disponible.
#[poise::command(slash_command, guild_only)]
pub async fn generate(
    ctx: Context<'_>,
    #[description = "Categoría del ítem"]
    #[autocomplete = "autocomplete_category"]
    category: Option<String>,
    #[description = "Tipo de suscripción"]
    #[rename = "subscription_type"]
    tier: Option<TierChoice>,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let reply = ctx
        .data()
        .service
        .generate(
            ctx.author().id.get(),
            category.as_deref(),
            tier.map(Tier::from),
            Utc::now(),
        )
        .await;
    send(ctx, reply).await
}

/// Añade ítems al stock (uno por línea).
#[poise::command(
    slash_command,
    guild_only,
    default_member_permissions = "ADMINISTRATOR"
)]
pub async fn add_stock(
    ctx: Context<'_>,
    #[description = "Categoría del ítem"]
    #[autocomplete = "autocomplete_category"]
    category: Option<String>,
    #[description = "Tipo de suscripción"]
    #[rename = "subscription_type"]
    tier: Option<TierChoice>,
    #[description = "Pega las cuentas o links separados por un salto de línea."] items: String,
) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    info!(user = %ctx.author().id, "add_stock invoked");
    let reply = ctx
        .data()
        .service
        .add_stock(category.as_deref(), tier.map(Tier::from), &items, Utc::now())
        .await;
    send(ctx, reply).await
}

/// Muestra el número de ítems disponibles.
#[poise::command(slash_command, guild_only)]
pub async fn check_stock(ctx: Context<'_>) -> Result<(), Error> {
    ctx.defer_ephemeral().await?;
    let reply = ctx.data().service.check_stock();
    send(ctx, reply).await
}

/// Información para obtener acceso premium.
#[poise::command(slash_command, guild_only)]
pub async fn upgrade_premium(ctx: Context<'_>) -> Result<(), Error> {
    let reply = ctx.data().service.upgrade_premium();
    send(ctx, reply).await
}

/// Command set for a stock layout, with parameters the layout doesn't use
/// removed and the rest marked required.
pub fn commands_for(schema: StockSchema) -> Vec<poise::Command<Data, Error>> {
    let mut commands = vec![generate(), add_stock(), check_stock()];
    if schema.uses_tiers() {
        commands.push(upgrade_premium());
    }

    for command in &mut commands {
        command.parameters.retain(|p| match p.name.as_str() {
            "category" => schema.uses_categories(),
            "subscription_type" => schema.uses_tiers(),
            _ => true,
        });
        for param in &mut command.parameters {
            param.required = true;
        }
    }
    commands
}

async fn send(ctx: Context<'_>, reply: Reply) -> Result<(), Error> {
    let mut builder = poise::CreateReply::default().ephemeral(reply.ephemeral);
    if !reply.content.is_empty() {
        builder = builder.content(reply.content);
    }
    if let Some(embed) = reply.embed {
        builder = builder.embed(render_embed(embed));
    }
    ctx.send(builder).await?;
    Ok(())
}

fn render_embed(embed: SummaryEmbed) -> serenity::CreateEmbed {
    serenity::CreateEmbed::new()
        .title(embed.title)
        .colour(serenity::Colour::DARK_GREEN)
        .fields(embed.fields.into_iter().map(|(name, value)| (name, value, true)))
        .footer(serenity::CreateEmbedFooter::new(embed.footer))
}

async fn on_error(error: poise::FrameworkError<'_, Data, Error>) {
    match error {
        poise::FrameworkError::Command { error, ctx, .. } => {
            error!(command = %ctx.command().name, error = %error, "command failed");
            let reply = poise::CreateReply::default()
                .content("⚠️ Ocurrió un error inesperado. Inténtalo de nuevo.")
                .ephemeral(true);
            if let Err(e) = ctx.send(reply).await {
                warn!(error = %e, "failed to report command error");
            }
        }
        other => {
            if let Err(e) = poise::builtins::on_error(other).await {
                error!(error = %e, "error while handling framework error");
            }
        }
    }
}

/// Posts generation notices to the admin channel.
pub struct ChannelNotifier {
    http: Arc<serenity::Http>,
    channel: serenity::ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<serenity::Http>, channel_id: u64) -> Self {
        Self {
            http,
            channel: serenity::ChannelId::new(channel_id),
        }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn item_generated(&self, user_id: u64, slot: &Slot) -> Result<(), Error> {
        let content = format!("📦 <@{}> generó un ítem de **{}**.", user_id, slot);
        self.channel.say(&*self.http, content).await?;
        Ok(())
    }
}

/// Build the poise framework. Commands are registered in the configured
/// guild once the gateway is ready.
pub fn build_framework(
    config: Arc<Config>,
    metrics: Arc<Metrics>,
) -> poise::Framework<Data, Error> {
    let schema = config.schema;
    poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: commands_for(schema),
            on_error: |error| Box::pin(on_error(error)),
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                info!(user = %ready.user.name, id = %ready.user.id, "🤖 connected to Discord");

                let guild = serenity::GuildId::new(config.guild_id);
                match poise::builtins::register_in_guild(ctx, &framework.options().commands, guild)
                    .await
                {
                    Ok(()) => info!(guild_id = config.guild_id, "slash commands registered"),
                    Err(e) => warn!(
                        guild_id = config.guild_id,
                        error = %e,
                        "failed to register slash commands, check guild id and bot permissions"
                    ),
                }

                let mut service = StockService::new(config.clone(), metrics);
                if let Some(channel_id) = config.admin_channel_id {
                    service = service
                        .with_notifier(Arc::new(ChannelNotifier::new(ctx.http.clone(), channel_id)));
                }
                Ok(Data {
                    service: Arc::new(service),
                })
            })
        })
        .build()
}

/// Connect and run until the gateway closes.
pub async fn run(token: &str, config: Arc<Config>, metrics: Arc<Metrics>) -> Result<(), BotError> {
    let intents = serenity::GatewayIntents::non_privileged();
    let framework = build_framework(config, metrics);

    info!("connecting to Discord");
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await?;
    client.start().await?;
    Ok(())
}
