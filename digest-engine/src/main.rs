use anyhow::Context;
use clap::{Parser, Subcommand};
use digest_engine::{
    DigestPipeline, DigestService, FeedbackEvent, HackerNewsConfig, HackerNewsFeed, LogSink,
    PreferenceModel, SettingsManager, DEFAULT_SETTINGS,
};
use interfaces::SqliteState;
use std::sync::Arc;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "digest-engine")]
#[command(about = "Daily ranked Hacker News digest that learns from likes")]
#[command(version)]
struct Args {
    /// SQLite database holding settings, tag weights and articles
    #[arg(long, default_value = "sqlite://digest.db?mode=rwc", env = "DIGEST_DATABASE_URL")]
    database_url: String,

    /// Base URL of the Hacker News API
    #[arg(long, env = "DIGEST_FEED_URL")]
    feed_url: Option<String>,

    #[arg(long, default_value = "info", env = "DIGEST_LOG_LEVEL")]
    log_level: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the daily scheduler until interrupted
    Run,
    /// Run a single digest cycle now
    Once,
    /// Record a like for a delivered article
    Like { id: u64 },
    /// Change a setting
    Set { key: String, value: String },
    /// Print learned tag weights and current settings
    Weights,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(args.log_level).init();

    let state = Arc::new(
        SqliteState::connect(&args.database_url)
            .await
            .with_context(|| format!("Failed to open database {}", args.database_url))?,
    );

    let settings = Arc::new(SettingsManager::load(state.clone(), DEFAULT_SETTINGS).await?);
    let preferences = Arc::new(PreferenceModel::new(
        state.clone(),
        settings.preference_config().await?,
    ));

    let mut feed_config = HackerNewsConfig::default();
    if let Some(url) = args.feed_url {
        feed_config.base_url = url;
    }
    let feed = Arc::new(HackerNewsFeed::new(feed_config)?);

    let pipeline = Arc::new(DigestPipeline::new(
        feed,
        state.clone(),
        Arc::new(LogSink::new()),
        preferences.clone(),
        settings.clone(),
    ));

    match args.command {
        Command::Run => {
            let service = DigestService::start(pipeline).await?;
            if let Some(next) = service.scheduler().next_fire().await {
                info!("Next digest at {}", next);
            }
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl+C")?;
            info!("Interrupt received");
            service.shutdown().await;
        }
        Command::Once => {
            let report = pipeline.run_cycle().await?;
            info!(
                "Delivered {} of {} candidates ({} already delivered, {} failed)",
                report.delivered.len(),
                report.candidates,
                report.already_delivered,
                report.failed_deliveries
            );
        }
        Command::Like { id } => {
            pipeline.handle_feedback(FeedbackEvent::like(id)).await?;
        }
        Command::Set { key, value } => {
            settings.set(&key, &value).await?;
        }
        Command::Weights => {
            for entry in settings.snapshot().await {
                println!("{} = {} (default {})", entry.key, entry.value, entry.default);
            }
            for tag in preferences.entries().await? {
                println!("{:<24} {:>8.4}  likes={}", tag.tag, tag.weight, tag.count);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn global_options_read_from_environment() {
        let cmd = Args::command();
        let env_of = |id: &str| {
            cmd.get_arguments()
                .find(|a| a.get_id() == id)
                .and_then(|a| a.get_env())
                .and_then(|e| e.to_str())
                .map(str::to_string)
        };
        assert_eq!(env_of("database_url").as_deref(), Some("DIGEST_DATABASE_URL"));
        assert_eq!(env_of("feed_url").as_deref(), Some("DIGEST_FEED_URL"));
        assert_eq!(env_of("log_level").as_deref(), Some("DIGEST_LOG_LEVEL"));
    }

    #[test]
    fn parses_like_subcommand() {
        let args = Args::try_parse_from(["digest-engine", "--log-level", "debug", "like", "42"]).unwrap();
        assert_eq!(args.log_level, Level::DEBUG);
        assert!(matches!(args.command, Command::Like { id: 42 }));
    }
}
