use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tl_config::Config;
use tl_core::{init_logging, Services};
use tl_db::{ActivityRepository, Database, GroupRepository, SettingsRepository, BOT_TOKEN_KEY};
use tl_web::AppState;
use tracing::info;

#[derive(Parser)]
#[command(name = "teamlink", about = "TeamLink - Slack sync for groups", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Store the Slack bot token in the settings table
    SetBotToken { token: String },
    /// Remove the stored Slack bot token
    ClearBotToken,
    /// Add a group's linked members to its channel
    Sync { group_id: String },
    /// Print recent sync activity as JSON lines
    Activity {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;
    init_logging(
        &config.log_level,
        config.log_file.as_deref(),
        config.log_structured,
    );
    config
        .create_directories()
        .context("Failed to create directories")?;

    let db = Arc::new(
        Database::new(&config.db_path, config.db_connection_pool_size)
            .await
            .context("Failed to connect to database")?,
    );
    db.initialize()
        .await
        .context("Failed to initialize database schema")?;

    let result = match cli.command {
        Commands::Serve => serve(&config, db.clone()).await,
        Commands::SetBotToken { token } => set_bot_token(&db, &token).await,
        Commands::ClearBotToken => clear_bot_token(&db).await,
        Commands::Sync { group_id } => sync(&config, db.clone(), &group_id).await,
        Commands::Activity { limit } => activity(&db, limit).await,
    };

    db.close().await;
    result
}

async fn serve(config: &Config, db: Arc<Database>) -> anyhow::Result<()> {
    info!(project = %config.project_name, "TeamLink starting...");

    let services = Services::from_config(config, db).context("Failed to build services")?;
    if services.credentials.get_token().await?.is_none() {
        tracing::warn!("No Slack bot token configured; Slack operations will fail until one is set");
    }

    let state = AppState::new(config, services);
    tl_web::serve(state, &config.web_addr(), shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("TeamLink stopped.");
    Ok(())
}

async fn set_bot_token(db: &Database, token: &str) -> anyhow::Result<()> {
    let token = token.trim();
    if token.is_empty() {
        bail!("Bot token must not be empty");
    }
    SettingsRepository::new(db)
        .set(BOT_TOKEN_KEY, token)
        .await
        .context("Failed to store bot token")?;
    println!("Bot token stored.");
    Ok(())
}

async fn clear_bot_token(db: &Database) -> anyhow::Result<()> {
    let removed = SettingsRepository::new(db)
        .delete(BOT_TOKEN_KEY)
        .await
        .context("Failed to remove bot token")?;
    println!("{}", if removed { "Bot token removed." } else { "No bot token was set." });
    Ok(())
}

async fn sync(config: &Config, db: Arc<Database>, group_id: &str) -> anyhow::Result<()> {
    let group = GroupRepository::new(&db)
        .get_group(group_id)
        .await?
        .with_context(|| format!("Group {group_id} not found"))?;
    let Some(channel_id) = group.channel_id else {
        bail!("Group {group_id} has no linked channel");
    };

    let services = Services::from_config(config, db).context("Failed to build services")?;
    let report = services
        .sync
        .sync_group_to_channel("cli", group_id, &channel_id)
        .await
        .context("Membership sync failed")?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn activity(db: &Database, limit: i64) -> anyhow::Result<()> {
    let entries = ActivityRepository::new(db)
        .recent(limit)
        .await
        .context("Failed to read activity")?;
    for entry in entries {
        println!("{}", serde_json::to_string(&entry)?);
    }
    Ok(())
}

/// Resolves on SIGINT or SIGTERM (Ctrl+C elsewhere).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(mut sigint), Ok(mut sigterm)) => {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            _ => {
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
    info!("Shutdown requested, draining connections...");
}
